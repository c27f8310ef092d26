use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat, ordered key/value payload carried by a host event.
pub type Payload = Map<String, Value>;

/// Top-level field names of the Amplitude HTTP API v2 event object.
pub mod fields {
    pub const EVENT_TYPE: &str = "event_type";
    pub const USER_ID: &str = "user_id";
    pub const DEVICE_ID: &str = "device_id";
    pub const SESSION_ID: &str = "session_id";
    pub const EVENT_ID: &str = "event_id";
    pub const TIME: &str = "time";
    pub const INSERT_ID: &str = "insert_id";
    pub const EVENT_PROPERTIES: &str = "event_properties";
    pub const USER_PROPERTIES: &str = "user_properties";
    pub const GROUPS: &str = "groups";
    pub const REVENUE: &str = "revenue";
    pub const REVENUE_TYPE: &str = "revenueType";
    pub const PRODUCT_ID: &str = "productId";
    pub const QUANTITY: &str = "quantity";
    pub const OS_NAME: &str = "os_name";
    pub const OS_VERSION: &str = "os_version";
    pub const DEVICE_MANUFACTURER: &str = "device_manufacturer";
    pub const DEVICE_MODEL: &str = "device_model";
    pub const PLATFORM: &str = "platform";
    pub const IP: &str = "ip";
    pub const LANGUAGE: &str = "language";
}

/// Kind of event delivered by the host event bus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Pageview,
    Event,
    Ecommerce,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pageview => "pageview",
            Self::Event => "event",
            Self::Ecommerce => "ecommerce",
        }
    }
}

/// Client context the host attaches to every event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientContext {
    /// Stable host-side visitor key; all identity state is stored under it.
    pub visitor_id: String,
    pub url: String,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Event time as observed by the host. Receipt time is used when absent.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A raw host event, scoped to one processing pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub payload: Payload,
    pub context: ClientContext,
}

impl RawEvent {
    pub fn new(kind: EventKind, context: ClientContext) -> Self {
        Self {
            kind,
            name: None,
            payload: Payload::new(),
            context,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Non-empty string value of a payload key.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Identifier carried by a payload key: a non-empty string, or a number
    /// in its canonical decimal form.
    pub fn payload_identifier(&self, key: &str) -> Option<String> {
        match self.payload.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Ingestion endpoint family the request is routed to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Default,
    Eu,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Eu => "eu",
        }
    }
}

/// Vendor-shaped event ready for transmission.
///
/// Backed by an ordered JSON object so that payload-supplied top-level keys
/// can replace any computed default regardless of its type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalEventRecord(Map<String, Value>);

impl CanonicalEventRecord {
    /// An empty record with the three property buckets seeded.
    pub fn new() -> Self {
        let mut map = Map::new();
        map.insert(fields::EVENT_PROPERTIES.into(), Value::Object(Map::new()));
        map.insert(fields::USER_PROPERTIES.into(), Value::Object(Map::new()));
        map.insert(fields::GROUPS.into(), Value::Object(Map::new()));
        Self(map)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Mutable access to a bucket object, re-seeding it if a previous write
    /// left a non-object value there.
    pub fn bucket_mut(&mut self, bucket: &str) -> &mut Map<String, Value> {
        let slot = self
            .0
            .entry(bucket.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        match slot {
            Value::Object(map) => map,
            _ => unreachable!("bucket slot was just set to an object"),
        }
    }

    pub fn bucket(&self, bucket: &str) -> Option<&Map<String, Value>> {
        self.0.get(bucket).and_then(Value::as_object)
    }

    pub fn event_type(&self) -> Option<&str> {
        self.0.get(fields::EVENT_TYPE).and_then(Value::as_str)
    }

    pub fn event_id(&self) -> Option<u64> {
        self.0.get(fields::EVENT_ID).and_then(Value::as_u64)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.0.get(fields::SESSION_ID).and_then(Value::as_str)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.0.get(fields::USER_ID).and_then(Value::as_str)
    }

    pub fn device_id(&self) -> Option<&str> {
        self.0.get(fields::DEVICE_ID).and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// Optional request-level options understood by the ingestion API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchOptions {
    pub min_id_length: u32,
}

/// Request envelope posted to the ingestion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchRequest {
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<DispatchOptions>,
    pub events: Vec<CanonicalEventRecord>,
}
