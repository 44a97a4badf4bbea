//! Data layouts.
//!
//! A layout decides which table(s) an event lands in and reshapes the event
//! into the row schema of that table. The [`Layout`] trait is the common
//! interface; [`DataLayout`] is the closed set selectable by configuration.
//!
//! ## Built-in Layouts
//!
//! ```text
//! Config name            | Implementation       | Tables
//! -----------------------|----------------------|-------------------------------
//! segment                | SegmentLayout        | identifies, groups, pages, tracks + one per event name
//! segment-single-table   | SegmentLayout        | events
//! jitsu-legacy           | LegacyLayout         | events
//! passthrough            | PassthroughLayout    | events
//! ```
//!
//! Every layout honors the table override carried by the event
//! (see [`crate::tables::TABLE_NAME_PARAMETER`]).

pub mod legacy;
pub mod passthrough;
pub mod segment;

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;
use crate::event::AnalyticsEvent;
use crate::normalize::{normalize_keys, to_snake_case};

pub use legacy::LegacyLayout;
pub use passthrough::PassthroughLayout;
pub use segment::SegmentLayout;

/// One row destined for one table.
pub type Record = Map<String, Value>;

/// A record paired with the table it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedEvent {
    pub record: Record,
    pub table: String,
}

impl MappedEvent {
    pub fn new(record: Record, table: impl Into<String>) -> Self {
        Self {
            record,
            table: table.into(),
        }
    }
}

/// The layout interface.
///
/// Layouts are pure: they never mutate the event and always produce at least
/// one [`MappedEvent`].
pub trait Layout: Send + Sync {
    /// Configuration name of this layout (e.g. "segment-single-table")
    fn name(&self) -> &'static str;

    /// Shape one event into one or more table rows, in delivery order.
    fn layout(&self, event: &AnalyticsEvent) -> Vec<MappedEvent>;
}

/// Layout selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataLayout {
    /// One table per event type, plus one table per track event name
    Segment,
    /// Everything in `events`, type-specific data nested
    #[default]
    SegmentSingleTable,
    /// Flat `events` rows with the classic fixed column set
    JitsuLegacy,
    /// The event as-is
    Passthrough,
}

impl DataLayout {
    pub const ALL: [DataLayout; 4] = [
        DataLayout::Segment,
        DataLayout::SegmentSingleTable,
        DataLayout::JitsuLegacy,
        DataLayout::Passthrough,
    ];

    pub fn as_str(&self) -> &'static str {
        self.implementation().name()
    }

    fn implementation(&self) -> &'static dyn Layout {
        match self {
            DataLayout::Segment => &SegmentLayout::MULTI_TABLE,
            DataLayout::SegmentSingleTable => &SegmentLayout::SINGLE_TABLE,
            DataLayout::JitsuLegacy => &LegacyLayout,
            DataLayout::Passthrough => &PassthroughLayout,
        }
    }

    /// Run the selected layout.
    pub fn layout(&self, event: &AnalyticsEvent) -> Vec<MappedEvent> {
        self.implementation().layout(event)
    }
}

impl FromStr for DataLayout {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataLayout::ALL
            .into_iter()
            .find(|layout| layout.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownLayout(s.to_string()))
    }
}

impl fmt::Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered merge of object sources; a later source overwrites earlier keys.
///
/// Keys are snake-cased (and values key-normalized) as they are layered, so
/// `userId` from a later source replaces `user_id` from an earlier one.
/// Skip lists match the raw source keys.
#[derive(Debug, Default)]
pub(crate) struct Merge(Record);

impl Merge {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Overlay every entry of `source`.
    pub(crate) fn layer(self, source: Option<&Record>) -> Self {
        self.layer_except(source, &[])
    }

    /// Overlay every entry of `source` except `skip`.
    pub(crate) fn layer_except(mut self, source: Option<&Record>, skip: &[&str]) -> Self {
        if let Some(source) = source {
            for (key, value) in source {
                if !skip.contains(&key.as_str()) {
                    self.insert(key, value.clone());
                }
            }
        }
        self
    }

    /// Set a single key when a value is present.
    pub(crate) fn set(mut self, key: &str, value: Option<Value>) -> Self {
        if let Some(value) = value {
            self.insert(key, value);
        }
        self
    }

    fn insert(&mut self, key: &str, value: Value) {
        self.0.insert(to_snake_case(key), normalize_keys(value));
    }

    pub(crate) fn finish(self) -> Record {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_layout_names() {
        assert_eq!(DataLayout::Segment.as_str(), "segment");
        assert_eq!(DataLayout::SegmentSingleTable.as_str(), "segment-single-table");
        assert_eq!(DataLayout::JitsuLegacy.as_str(), "jitsu-legacy");
        assert_eq!(DataLayout::Passthrough.as_str(), "passthrough");
        assert_eq!(DataLayout::default(), DataLayout::SegmentSingleTable);
    }

    #[test]
    fn test_parse_layout() {
        for layout in DataLayout::ALL {
            assert_eq!(layout.as_str().parse::<DataLayout>().unwrap(), layout);
        }

        let err = "star-schema".parse::<DataLayout>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLayout(ref name) if name == "star-schema"));
    }

    #[test]
    fn test_override_applies_to_every_layout() {
        let event: AnalyticsEvent = serde_json::from_value(json!({
            "type": "track",
            "event": "Signed Up",
            "userId": "u1",
            "properties": {"plan": "pro"},
            "context": {"ip": "1.2.3.4"},
            "JITSU_TABLE_NAME": "custom_table"
        }))
        .unwrap();

        for layout in DataLayout::ALL {
            let mapped = layout.layout(&event);
            assert!(!mapped.is_empty(), "{layout} produced nothing");
            for m in mapped {
                assert_eq!(m.table, "custom_table", "{layout} ignored the override");
                assert!(!m.record.contains_key("JITSU_TABLE_NAME"));
                assert!(!m.record.contains_key("jitsu_table_name"));
            }
        }
    }

    #[test]
    fn test_layouts_do_not_mutate_input() {
        let event: AnalyticsEvent = serde_json::from_value(json!({
            "type": "identify",
            "userId": "u1",
            "traits": {"name": "Ann", "groupId": "g1"},
            "context": {"traits": {"email": "a@b.c"}}
        }))
        .unwrap();
        let before = event.clone();

        for layout in DataLayout::ALL {
            layout.layout(&event);
        }
        assert_eq!(event, before);
    }

    #[test]
    fn test_merge_later_wins() {
        let a = json!({"x": 1, "y": 1});
        let b = json!({"y": 2, "z": 2});

        let merged = Merge::new()
            .layer(a.as_object())
            .layer_except(b.as_object(), &["z"])
            .set("w", Some(json!(3)))
            .set("skipped", None)
            .finish();

        assert_eq!(Value::Object(merged), json!({"x": 1, "y": 2, "w": 3}));
    }

    #[test]
    fn test_merge_order_decides_colliding_columns() {
        let earlier = json!({"user_id": "from_props", "nested": {"innerKey": 1}});
        let later = json!({"userId": "u1"});

        let merged = Merge::new()
            .layer(earlier.as_object())
            .layer(later.as_object())
            .finish();
        assert_eq!(
            Value::Object(merged),
            json!({"user_id": "u1", "nested": {"inner_key": 1}})
        );

        // and the other way round
        let merged = Merge::new()
            .layer(later.as_object())
            .layer(earlier.as_object())
            .finish();
        assert_eq!(merged["user_id"], json!("from_props"));
    }
}
