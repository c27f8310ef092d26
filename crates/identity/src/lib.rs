#![warn(clippy::unwrap_used)]

//! Durable per-visitor identity state: storage backends and the resolver
//! that derives user, device, session and event identifiers from it.

pub mod memory;
pub mod redis_store;
pub mod resolver;
pub mod store;

pub use memory::{MemoryIdentityStore, VisitorState};
pub use redis_store::RedisIdentityStore;
pub use resolver::{IdentityResolver, ResolvedIdentity};
pub use store::{IdentityKey, IdentityStore, Scope};
