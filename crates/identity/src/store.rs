//! Storage seam for visitor identity state.

use async_trait::async_trait;
use forwarder_core::ForwarderResult;

/// Persistence lifetime of a stored identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Lives until the host ends the session or it idles out.
    Session,
    /// Lives indefinitely.
    Infinite,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Infinite => "infinite",
        }
    }
}

/// Identifiers the pipeline keeps per visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    UserId,
    DeviceId,
    SessionId,
    EventCounter,
}

impl IdentityKey {
    pub fn scope(&self) -> Scope {
        match self {
            Self::SessionId => Scope::Session,
            Self::UserId | Self::DeviceId | Self::EventCounter => Scope::Infinite,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserId => "user_id",
            Self::DeviceId => "device_id",
            Self::SessionId => "session_id",
            Self::EventCounter => "event_counter",
        }
    }
}

/// Per-visitor key/value store with session and indefinite scopes.
///
/// A missing value is `Ok(None)`, never an error. Errors are reserved for
/// backend failures.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Backend identifier used in logs (e.g. "memory", "redis").
    fn backend(&self) -> &'static str;

    async fn get(&self, visitor_id: &str, key: IdentityKey) -> ForwarderResult<Option<String>>;

    /// Store a value, replacing whatever was there.
    async fn set(&self, visitor_id: &str, key: IdentityKey, value: &str) -> ForwarderResult<()>;

    /// Store `value` only if nothing is stored yet. Returns the value that
    /// ended up stored.
    async fn set_if_absent(
        &self,
        visitor_id: &str,
        key: IdentityKey,
        value: &str,
    ) -> ForwarderResult<String>;

    /// Atomically add one to a counter (missing counts as zero) and return
    /// the new value.
    async fn increment(&self, visitor_id: &str, key: IdentityKey) -> ForwarderResult<u64>;

    /// Drop every session-scoped value for the visitor.
    async fn end_session(&self, visitor_id: &str) -> ForwarderResult<()>;
}
