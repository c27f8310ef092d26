//! Forwarder: the single entry point for host events.
//!
//! resolve identity → (ecommerce) map order → normalize → dispatch.
//! Any error before dispatch drops the event; dispatch itself is spawned and
//! never reported back.

use forwarder_core::{
    CanonicalEventRecord, EventKind, ForwarderError, ForwarderResult, RawEvent, Region,
};
use forwarder_dispatch::Dispatcher;
use forwarder_identity::{IdentityResolver, IdentityStore};
use tracing::{debug, info, warn};

use crate::ecommerce::EcommerceMapper;
use crate::normalizer::{EventNormalizer, NormalizedEvent};

/// What was handed to the dispatcher for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardOutcome {
    pub record: CanonicalEventRecord,
    pub region: Region,
}

impl ForwardOutcome {
    pub fn event_id(&self) -> Option<u64> {
        self.record.event_id()
    }
}

pub struct Forwarder {
    resolver: IdentityResolver,
    normalizer: EventNormalizer,
    dispatcher: Dispatcher,
}

impl Forwarder {
    pub fn new(
        resolver: IdentityResolver,
        normalizer: EventNormalizer,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            resolver,
            normalizer,
            dispatcher,
        }
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Process one host event and hand the record to the dispatcher.
    pub async fn forward(&self, event: RawEvent) -> ForwarderResult<ForwardOutcome> {
        let kind = event.kind.as_str();
        metrics::counter!("forwarder.events.received", "kind" => kind).increment(1);

        let normalized = match self.prepare(event).await {
            Ok(normalized) => normalized,
            Err(e) => {
                metrics::counter!(
                    "forwarder.events.dropped",
                    "kind" => kind,
                    "reason" => e.kind()
                )
                .increment(1);
                warn!(kind, reason = e.kind(), error = %e, "Event dropped");
                return Err(e);
            }
        };

        let NormalizedEvent { record, region } = normalized;
        // Fire-and-forget.
        drop(self.dispatcher.dispatch(record.clone(), region));
        metrics::counter!("forwarder.events.forwarded", "kind" => kind).increment(1);

        Ok(ForwardOutcome { record, region })
    }

    /// Everything [`forward`](Self::forward) does short of dispatching.
    pub async fn prepare(&self, mut event: RawEvent) -> ForwarderResult<NormalizedEvent> {
        let identity = self.resolver.resolve(&event).await?;
        debug!(
            visitor_id = %event.context.visitor_id,
            event_id = identity.event_id,
            session_id = %identity.session_id,
            "Identity resolved"
        );

        let transaction = if event.kind == EventKind::Ecommerce {
            let action = ecommerce_action(&event)?;
            Some(EcommerceMapper::map(&action, &mut event.payload)?)
        } else {
            None
        };

        self.normalizer
            .normalize(&event, &identity, transaction.as_ref())
    }

    /// End the visitor's session; the next event starts a new one.
    pub async fn end_session(&self, visitor_id: &str) -> ForwarderResult<()> {
        if visitor_id.is_empty() {
            return Err(ForwarderError::MissingRequiredField("visitor_id".into()));
        }
        self.resolver.store().end_session(visitor_id).await?;
        info!(visitor_id, "Session ended");
        Ok(())
    }
}

fn ecommerce_action(event: &RawEvent) -> ForwarderResult<String> {
    event
        .name
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| event.payload_str("name"))
        .map(String::from)
        .ok_or_else(|| ForwarderError::MissingRequiredField("name".into()))
}
