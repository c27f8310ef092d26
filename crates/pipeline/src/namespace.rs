//! Payload key routing. Every payload key is classified here and nowhere else.
//!
//! ```text
//! Key                         | Namespace      | Stored as
//! ----------------------------|----------------|------------------------
//! event_properties.plan       | EventProperty  | event_properties.plan
//! ecom_order_id               | EventProperty  | event_properties.order_id
//! user_properties.age         | UserProperty   | user_properties.age
//! groups.company              | Group          | groups.company
//! eu_data                     | RegionFlag     | (routing only)
//! plan                        | TopLevel       | plan
//! ```

use forwarder_core::types::fields;
use serde_json::Value;

pub const EVENT_PROPERTIES_PREFIX: &str = "event_properties.";
pub const USER_PROPERTIES_PREFIX: &str = "user_properties.";
pub const GROUPS_PREFIX: &str = "groups.";
/// Marker the ecommerce mapper puts on flattened order fields.
pub const ECOMMERCE_MARKER: &str = "ecom_";
pub const REGION_FLAG_KEY: &str = "eu_data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    EventProperty,
    UserProperty,
    Group,
    RegionFlag,
    TopLevel,
}

impl Namespace {
    /// Record bucket this namespace writes into, if any.
    pub fn bucket(&self) -> Option<&'static str> {
        match self {
            Self::EventProperty => Some(fields::EVENT_PROPERTIES),
            Self::UserProperty => Some(fields::USER_PROPERTIES),
            Self::Group => Some(fields::GROUPS),
            Self::RegionFlag | Self::TopLevel => None,
        }
    }
}

/// Classify a payload key, returning the key with its prefix removed.
///
/// A prefix with nothing after it is not a namespaced key and stays
/// top-level.
pub fn resolve_namespace(key: &str) -> (Namespace, &str) {
    if key == REGION_FLAG_KEY {
        return (Namespace::RegionFlag, key);
    }

    let prefixes = [
        (EVENT_PROPERTIES_PREFIX, Namespace::EventProperty),
        (ECOMMERCE_MARKER, Namespace::EventProperty),
        (USER_PROPERTIES_PREFIX, Namespace::UserProperty),
        (GROUPS_PREFIX, Namespace::Group),
    ];
    for (prefix, namespace) in prefixes {
        if let Some(stripped) = key.strip_prefix(prefix) {
            if !stripped.is_empty() {
                return (namespace, stripped);
            }
        }
    }

    (Namespace::TopLevel, key)
}

/// For bare bucket names (`event_properties`, `user_properties`, `groups`),
/// the namespace whose bucket they address.
pub fn bucket_namespace(key: &str) -> Option<Namespace> {
    match key {
        fields::EVENT_PROPERTIES => Some(Namespace::EventProperty),
        fields::USER_PROPERTIES => Some(Namespace::UserProperty),
        fields::GROUPS => Some(Namespace::Group),
        _ => None,
    }
}

/// Loose boolean reading used for the region flag.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        Value::Null | Value::Array(_) | Value::Object(_) => false,
    }
}
