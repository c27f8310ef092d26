#![warn(clippy::unwrap_used)]

//! Event normalization pipeline: turns host events into Amplitude HTTP API
//! records and hands them to the dispatcher.
//!
//! # Modules
//!
//! - [`namespace`]: payload key routing into property buckets
//! - [`ecommerce`]: order/product payloads to transaction fields
//! - [`useragent`]: OS and device hints from the user-agent string
//! - [`normalizer`]: canonical record assembly
//! - [`forwarder`]: resolve → map → normalize → dispatch orchestration

pub mod ecommerce;
pub mod forwarder;
pub mod namespace;
pub mod normalizer;
pub mod useragent;

pub use ecommerce::{EcommerceMapper, RevenueType, Transaction};
pub use forwarder::{ForwardOutcome, Forwarder};
pub use namespace::{resolve_namespace, Namespace};
pub use normalizer::{EventNormalizer, NormalizedEvent};
