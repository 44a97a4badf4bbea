//! Inbound analytics event types.
//!
//! The [`AnalyticsEvent`] struct is a typed envelope over a Segment-style
//! event: the slots the layouts care about are named fields, everything else
//! is kept verbatim in `extra` and passes through every layout untouched
//! (apart from key casing).
//!
//! # Example
//!
//! ```json
//! {
//!   "type": "track",
//!   "event": "Signed Up",
//!   "userId": "u1",
//!   "properties": {"plan": "pro"},
//!   "context": {"ip": "1.2.3.4", "page": {"url": "https://example.com/"}},
//!   "anonymousId": "a1"
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;

use crate::tables::TABLE_NAME_PARAMETER;

/// A single analytics event (page, identify, group, track, or anything else).
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    /// Event type tag: `track`, `identify`, `group`, `page`, `alias`, or free-form
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    /// Name of a track event (e.g. "Signed Up")
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub event: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traits: Option<Map<String, Value>>,

    /// Scalar slots keep an explicit `null` as `Some(Value::Null)`
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Value>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Value>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,

    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub write_key: Option<Value>,

    /// Explicit destination table, see [`crate::tables`]
    #[serde(
        rename = "JITSU_TABLE_NAME",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub table_name: Option<String>,

    /// Unrecognized top-level keys, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `context` object of an event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traits: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ids: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnalyticsEvent {
    /// Create an event of the given type with every other slot empty
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            ..Self::default()
        }
    }

    /// The event type tag, if any
    pub fn kind(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    /// The table override, ignoring an empty string
    pub fn table_override(&self) -> Option<&str> {
        self.table_name.as_deref().filter(|t| !t.is_empty())
    }

    /// Track event name, ignoring an empty string
    pub fn event_name(&self) -> Option<&str> {
        self.event
            .as_ref()
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.as_ref().and_then(|p| p.get(key))
    }

    pub fn trait_value(&self, key: &str) -> Option<&Value> {
        self.traits.as_ref().and_then(|t| t.get(key))
    }

    pub fn context_traits(&self) -> Option<&Map<String, Value>> {
        self.context.as_ref().and_then(|c| c.traits.as_ref())
    }

    /// All top-level fields under their wire names, in slot order followed by
    /// the unrecognized keys.
    pub fn fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        put(&mut map, "type", self.event_type.clone().map(Value::String));
        put(&mut map, "event", self.event.clone());
        put(
            &mut map,
            "context",
            self.context.as_ref().map(|c| Value::Object(c.fields())),
        );
        put(&mut map, "properties", self.properties.clone().map(Value::Object));
        put(&mut map, "traits", self.traits.clone().map(Value::Object));
        put(&mut map, "userId", self.user_id.clone());
        put(&mut map, "groupId", self.group_id.clone());
        put(&mut map, "messageId", self.message_id.clone());
        put(&mut map, "timestamp", self.timestamp.clone());
        put(&mut map, "writeKey", self.write_key.clone());
        put(
            &mut map,
            TABLE_NAME_PARAMETER,
            self.table_name.clone().map(Value::String),
        );
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map
    }

    /// [`AnalyticsEvent::fields`] minus the given keys.
    pub fn fields_without(&self, keys: &[&str]) -> Map<String, Value> {
        let mut map = self.fields();
        for key in keys {
            map.remove(*key);
        }
        map
    }

    /// Bring GA4 client-id session data into a single shape.
    ///
    /// SDKs report GA4 sessions either as `sessionIds` or as `sessions`, often
    /// as nested structures. When either is present the `ga4` entry becomes
    /// `{clientId, sessionIds}` with `sessionIds` serialized to JSON text
    /// (`sessions` wins when both are set). Events without GA4 session data are
    /// returned borrowed.
    pub fn repair_client_ids(&self) -> Cow<'_, AnalyticsEvent> {
        let Some(ga4) = self
            .context
            .as_ref()
            .and_then(|c| c.client_ids.as_ref())
            .and_then(|ids| ids.get("ga4"))
            .and_then(Value::as_object)
        else {
            return Cow::Borrowed(self);
        };

        let sessions = ga4.get("sessions").filter(|v| is_truthy(v));
        let session_ids = ga4.get("sessionIds").filter(|v| is_truthy(v));

        let serialized = match (sessions, session_ids) {
            (Some(sessions), _) => sessions.to_string(),
            // Already canonical
            (None, Some(Value::String(_))) => return Cow::Borrowed(self),
            (None, Some(ids)) => ids.to_string(),
            (None, None) => return Cow::Borrowed(self),
        };

        let mut repaired = Map::new();
        if let Some(client_id) = ga4.get("clientId") {
            repaired.insert("clientId".to_string(), client_id.clone());
        }
        repaired.insert("sessionIds".to_string(), Value::String(serialized));

        let mut event = self.clone();
        if let Some(ids) = event.context.as_mut().and_then(|c| c.client_ids.as_mut()) {
            ids.insert("ga4".to_string(), Value::Object(repaired));
        }
        Cow::Owned(event)
    }
}

impl Context {
    /// All context fields under their wire names.
    pub fn fields(&self) -> Map<String, Value> {
        let mut map = Map::new();
        put(&mut map, "page", self.page.clone().map(Value::Object));
        put(&mut map, "traits", self.traits.clone().map(Value::Object));
        put(&mut map, "campaign", self.campaign.clone());
        put(&mut map, "screen", self.screen.clone().map(Value::Object));
        put(&mut map, "clientIds", self.client_ids.clone().map(Value::Object));
        put(&mut map, "ip", self.ip.clone().map(Value::String));
        put(&mut map, "userAgent", self.user_agent.clone().map(Value::String));
        put(&mut map, "locale", self.locale.clone().map(Value::String));
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map
    }

    pub fn page_value(&self, key: &str) -> Option<&Value> {
        self.page.as_ref().and_then(|p| p.get(key))
    }

    pub fn screen_value(&self, key: &str) -> Option<&Value> {
        self.screen.as_ref().and_then(|s| s.get(key))
    }

    pub fn trait_value(&self, key: &str) -> Option<&Value> {
        self.traits.as_ref().and_then(|t| t.get(key))
    }
}

/// A present key, `null` included, deserializes to `Some`; only a missing
/// key falls back to the `None` default.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn put(map: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value);
    }
}

/// Loose truthiness as event producers use it: `null`, `false`, `0`, `NaN`
/// and `""` count as missing.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// First candidate that is present and truthy.
pub fn first_truthy<'a, I>(candidates: I) -> Option<&'a Value>
where
    I: IntoIterator<Item = Option<&'a Value>>,
{
    candidates.into_iter().flatten().find(|v| is_truthy(v))
}
