//! In-process identity store backed by DashMap for lock-free concurrent access.
//! Every visitor owns one [`VisitorState`]; read-modify-write operations run
//! under the visitor's shard lock so counters and first writes cannot race.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use forwarder_core::{ForwarderError, ForwarderResult};

use crate::store::{IdentityKey, IdentityStore};

/// Session-scoped identifier with its sliding idle deadline.
#[derive(Debug, Clone)]
pub struct SessionSlot {
    pub session_id: String,
    pub last_seen: Instant,
}

/// Everything the forwarder remembers about one visitor.
#[derive(Debug, Clone, Default)]
pub struct VisitorState {
    pub user_id: Option<String>,
    pub device_id: Option<String>,
    pub session: Option<SessionSlot>,
    pub event_counter: u64,
}

impl VisitorState {
    /// The current session, dropping it first if it idled past `ttl`.
    fn live_session(&mut self, ttl: Duration) -> Option<&mut SessionSlot> {
        if self
            .session
            .as_ref()
            .is_some_and(|slot| slot.last_seen.elapsed() > ttl)
        {
            self.session = None;
        }
        let slot = self.session.as_mut()?;
        slot.last_seen = Instant::now();
        Some(slot)
    }

    fn read(&mut self, key: IdentityKey, ttl: Duration) -> Option<String> {
        match key {
            IdentityKey::UserId => self.user_id.clone(),
            IdentityKey::DeviceId => self.device_id.clone(),
            IdentityKey::SessionId => self.live_session(ttl).map(|slot| slot.session_id.clone()),
            IdentityKey::EventCounter => {
                (self.event_counter > 0).then(|| self.event_counter.to_string())
            }
        }
    }

    fn write(&mut self, key: IdentityKey, value: &str) -> ForwarderResult<()> {
        match key {
            IdentityKey::UserId => self.user_id = Some(value.to_string()),
            IdentityKey::DeviceId => self.device_id = Some(value.to_string()),
            IdentityKey::SessionId => {
                self.session = Some(SessionSlot {
                    session_id: value.to_string(),
                    last_seen: Instant::now(),
                })
            }
            IdentityKey::EventCounter => {
                self.event_counter = value.parse().map_err(|_| {
                    ForwarderError::Storage(format!("event counter must be an integer, got '{value}'"))
                })?
            }
        }
        Ok(())
    }
}

/// Identity store living in process memory. State is lost on restart.
pub struct MemoryIdentityStore {
    visitors: DashMap<String, VisitorState>,
    session_ttl: Duration,
}

impl Default for MemoryIdentityStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(1800))
    }
}

impl MemoryIdentityStore {
    pub fn new(session_ttl: Duration) -> Self {
        Self {
            visitors: DashMap::new(),
            session_ttl,
        }
    }

    /// Copy of a visitor's state, if the visitor has been seen.
    pub fn snapshot(&self, visitor_id: &str) -> Option<VisitorState> {
        self.visitors.get(visitor_id).map(|state| state.clone())
    }

    /// Drop idle sessions. Call this periodically from a background task.
    pub fn evict_expired(&self) -> usize {
        let mut evicted = 0;
        for mut entry in self.visitors.iter_mut() {
            let state = entry.value_mut();
            if state
                .session
                .as_ref()
                .is_some_and(|slot| slot.last_seen.elapsed() > self.session_ttl)
            {
                state.session = None;
                evicted += 1;
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.visitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visitors.is_empty()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, visitor_id: &str, key: IdentityKey) -> ForwarderResult<Option<String>> {
        Ok(self
            .visitors
            .get_mut(visitor_id)
            .and_then(|mut state| state.read(key, self.session_ttl)))
    }

    async fn set(&self, visitor_id: &str, key: IdentityKey, value: &str) -> ForwarderResult<()> {
        self.visitors
            .entry(visitor_id.to_string())
            .or_default()
            .write(key, value)
    }

    async fn set_if_absent(
        &self,
        visitor_id: &str,
        key: IdentityKey,
        value: &str,
    ) -> ForwarderResult<String> {
        let mut state = self.visitors.entry(visitor_id.to_string()).or_default();
        if let Some(existing) = state.read(key, self.session_ttl) {
            return Ok(existing);
        }
        state.write(key, value)?;
        Ok(value.to_string())
    }

    async fn increment(&self, visitor_id: &str, key: IdentityKey) -> ForwarderResult<u64> {
        if key != IdentityKey::EventCounter {
            return Err(ForwarderError::Storage(format!(
                "{} is not a counter",
                key.as_str()
            )));
        }
        let mut state = self.visitors.entry(visitor_id.to_string()).or_default();
        state.event_counter = state.event_counter.saturating_add(1);
        Ok(state.event_counter)
    }

    async fn end_session(&self, visitor_id: &str) -> ForwarderResult<()> {
        if let Some(mut state) = self.visitors.get_mut(visitor_id) {
            state.session = None;
        }
        Ok(())
    }
}
