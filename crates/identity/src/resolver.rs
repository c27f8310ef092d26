//! Identity resolution: derives user, device, session and event identifiers
//! for an incoming event and persists them per visitor.
//!
//! Precedence for user and device identifiers is always
//! explicit payload value > stored value > policy default.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use forwarder_core::config::AnonymousUserPolicy;
use forwarder_core::types::fields;
use forwarder_core::{ForwarderError, ForwarderResult, RawEvent};
use tracing::debug;
use uuid::Uuid;

use crate::store::{IdentityKey, IdentityStore};

/// Identifiers resolved for a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub user_id: Option<String>,
    pub device_id: String,
    pub session_id: String,
    pub event_id: u64,
}

/// Issues millisecond timestamps that never repeat within the process, so
/// two sessions started in the same millisecond still get distinct ids.
#[derive(Debug, Default)]
struct SessionClock {
    last_issued: AtomicI64,
}

impl SessionClock {
    fn next(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        match self
            .last_issued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            }) {
            Ok(previous) | Err(previous) => now.max(previous + 1),
        }
    }
}

pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
    anonymous_user: AnonymousUserPolicy,
    session_clock: SessionClock,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>, anonymous_user: AnonymousUserPolicy) -> Self {
        Self {
            store,
            anonymous_user,
            session_clock: SessionClock::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    pub fn anonymous_user_policy(&self) -> AnonymousUserPolicy {
        self.anonymous_user
    }

    /// Resolve every identifier for `event`, writing new or explicit values
    /// back to the store.
    pub async fn resolve(&self, event: &RawEvent) -> ForwarderResult<ResolvedIdentity> {
        let visitor_id = event.context.visitor_id.as_str();
        if visitor_id.is_empty() {
            return Err(ForwarderError::MissingRequiredField(
                "context.visitor_id".to_string(),
            ));
        }

        let user_id = self
            .resolve_user_id(
                visitor_id,
                event.payload_identifier(fields::USER_ID).as_deref(),
            )
            .await?;
        let device_id = self
            .resolve_device_id(
                visitor_id,
                event.payload_identifier(fields::DEVICE_ID).as_deref(),
            )
            .await?;
        let session_id = self.resolve_session_id(visitor_id).await?;
        let event_id = self.next_event_id(visitor_id).await?;

        Ok(ResolvedIdentity {
            user_id,
            device_id,
            session_id,
            event_id,
        })
    }

    async fn resolve_user_id(
        &self,
        visitor_id: &str,
        explicit: Option<&str>,
    ) -> ForwarderResult<Option<String>> {
        if let Some(user_id) = explicit {
            self.store.set(visitor_id, IdentityKey::UserId, user_id).await?;
            return Ok(Some(user_id.to_string()));
        }

        if let Some(stored) = self.store.get(visitor_id, IdentityKey::UserId).await? {
            return Ok(Some(stored));
        }

        match self.anonymous_user {
            AnonymousUserPolicy::Unset => Ok(None),
            AnonymousUserPolicy::Generate => {
                let generated = Uuid::new_v4().to_string();
                let user_id = self
                    .store
                    .set_if_absent(visitor_id, IdentityKey::UserId, &generated)
                    .await?;
                debug!(visitor_id, user_id = %user_id, "Generated anonymous user id");
                metrics::counter!("identity.user_id.generated").increment(1);
                Ok(Some(user_id))
            }
        }
    }

    async fn resolve_device_id(
        &self,
        visitor_id: &str,
        explicit: Option<&str>,
    ) -> ForwarderResult<String> {
        if let Some(device_id) = explicit {
            self.store
                .set(visitor_id, IdentityKey::DeviceId, device_id)
                .await?;
            return Ok(device_id.to_string());
        }

        if let Some(stored) = self.store.get(visitor_id, IdentityKey::DeviceId).await? {
            return Ok(stored);
        }

        let generated = Uuid::new_v4().to_string();
        let device_id = self
            .store
            .set_if_absent(visitor_id, IdentityKey::DeviceId, &generated)
            .await?;
        debug!(visitor_id, device_id = %device_id, "Generated device id");
        metrics::counter!("identity.device_id.generated").increment(1);
        Ok(device_id)
    }

    async fn resolve_session_id(&self, visitor_id: &str) -> ForwarderResult<String> {
        if let Some(stored) = self.store.get(visitor_id, IdentityKey::SessionId).await? {
            return Ok(stored);
        }

        let generated = self.session_clock.next().to_string();
        let session_id = self
            .store
            .set_if_absent(visitor_id, IdentityKey::SessionId, &generated)
            .await?;
        debug!(visitor_id, session_id = %session_id, "Started session");
        metrics::counter!("identity.session.started").increment(1);
        Ok(session_id)
    }

    async fn next_event_id(&self, visitor_id: &str) -> ForwarderResult<u64> {
        self.store
            .increment(visitor_id, IdentityKey::EventCounter)
            .await
    }
}
