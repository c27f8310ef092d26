use chrono::Utc;
use forwarder_core::types::fields;
use forwarder_core::{
    CanonicalEventRecord, EventKind, ForwarderError, ForwarderResult, RawEvent, Region,
};
use forwarder_identity::ResolvedIdentity;
use serde_json::Value;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ecommerce::Transaction;
use crate::namespace::{bucket_namespace, is_truthy, resolve_namespace, Namespace};
use crate::useragent::parse_user_agent;

/// Payload key read as the event name when the host does not supply one.
const NAME_KEY: &str = "name";

/// A canonical record together with the region it must be sent to.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub record: CanonicalEventRecord,
    pub region: Region,
}

/// Assembles canonical records from raw events.
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    enrich_device: bool,
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventNormalizer {
    pub fn new() -> Self {
        Self {
            enrich_device: true,
        }
    }

    /// Skip user-agent parsing. `ip` and `language` are still copied.
    pub fn without_device_enrichment(mut self) -> Self {
        self.enrich_device = false;
        self
    }

    /// Build the record for `event`.
    ///
    /// `event.payload` must already have been through the ecommerce mapper
    /// for ecommerce events. Payload keys are applied last and in payload
    /// order, so a later key overrides an earlier one and any top-level key
    /// overrides the computed default of the same name.
    pub fn normalize(
        &self,
        event: &RawEvent,
        identity: &ResolvedIdentity,
        transaction: Option<&Transaction>,
    ) -> ForwarderResult<NormalizedEvent> {
        let (event_type, name_from_payload) = event_type(event)?;
        let ctx = &event.context;

        let mut record = CanonicalEventRecord::new();
        record.insert(fields::EVENT_TYPE, event_type);
        if let Some(user_id) = identity.user_id.as_deref().filter(|s| !s.is_empty()) {
            record.insert(fields::USER_ID, user_id);
        }
        if !identity.device_id.is_empty() {
            record.insert(fields::DEVICE_ID, identity.device_id.as_str());
        }
        record.insert(fields::SESSION_ID, identity.session_id.as_str());
        record.insert(fields::EVENT_ID, identity.event_id);
        record.insert(
            fields::TIME,
            ctx.timestamp.unwrap_or_else(Utc::now).timestamp_millis(),
        );
        record.insert(fields::INSERT_ID, Uuid::new_v4().to_string());

        {
            let props = record.bucket_mut(fields::EVENT_PROPERTIES);
            props.insert("url".into(), ctx.url.clone().into());
            if let Some(referrer) = non_empty(&ctx.referrer) {
                props.insert("referrer".into(), referrer.into());
            }
            if let Some(title) = non_empty(&ctx.title) {
                props.insert("title".into(), title.into());
            }
        }

        if self.enrich_device {
            if let Some(ua) = non_empty(&ctx.user_agent) {
                let device = parse_user_agent(ua);
                let hints = [
                    (fields::OS_NAME, device.os_name),
                    (fields::OS_VERSION, device.os_version),
                    (fields::DEVICE_MANUFACTURER, device.device_manufacturer),
                    (fields::DEVICE_MODEL, device.device_model),
                    (fields::PLATFORM, device.platform),
                ];
                for (field, value) in hints {
                    if let Some(value) = value {
                        record.insert(field, value);
                    }
                }
            }
        }
        if let Some(ip) = non_empty(&ctx.ip) {
            record.insert(fields::IP, ip);
        }
        if let Some(language) = non_empty(&ctx.language) {
            record.insert(fields::LANGUAGE, language);
        }

        if let Some(transaction) = transaction {
            transaction.apply(&mut record);
        }

        let mut region = Region::Default;
        for (key, value) in &event.payload {
            // Identity inputs were consumed by the resolver.
            if key == fields::USER_ID || key == fields::DEVICE_ID {
                if event.payload_identifier(key).is_none() {
                    debug!(key = %key, "Ignoring unusable identifier value");
                }
                continue;
            }
            if name_from_payload && key == NAME_KEY {
                continue;
            }

            let (namespace, stripped) = resolve_namespace(key);
            match namespace {
                Namespace::RegionFlag => {
                    region = if is_truthy(value) {
                        Region::Eu
                    } else {
                        Region::Default
                    };
                }
                Namespace::TopLevel => match bucket_namespace(key) {
                    Some(bucket) => merge_bucket(&mut record, bucket, key, value),
                    None => {
                        record.insert(stripped, value.clone());
                    }
                },
                Namespace::EventProperty | Namespace::UserProperty | Namespace::Group => {
                    if let Some(bucket) = namespace.bucket() {
                        record
                            .bucket_mut(bucket)
                            .insert(stripped.to_string(), value.clone());
                    }
                }
            }
        }

        debug!(
            event_type = record.event_type().unwrap_or_default(),
            event_id = identity.event_id,
            region = region.as_str(),
            "Event normalized"
        );

        Ok(NormalizedEvent { record, region })
    }
}

/// `event_type` for the record, and whether it was read from the payload.
fn event_type(event: &RawEvent) -> ForwarderResult<(String, bool)> {
    if event.kind == EventKind::Pageview {
        return Ok((EventKind::Pageview.as_str().to_string(), false));
    }
    if let Some(name) = event.name.as_deref().filter(|s| !s.trim().is_empty()) {
        return Ok((name.to_string(), false));
    }
    match event.payload_str(NAME_KEY) {
        Some(name) => Ok((name.to_string(), true)),
        None => Err(ForwarderError::MissingRequiredField(NAME_KEY.into())),
    }
}

fn merge_bucket(record: &mut CanonicalEventRecord, bucket: Namespace, key: &str, value: &Value) {
    let (Some(target), Value::Object(entries)) = (bucket.bucket(), value) else {
        trace!(key, "Ignoring non-object bucket value");
        return;
    };
    let target = record.bucket_mut(target);
    for (k, v) in entries {
        target.insert(k.clone(), v.clone());
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
