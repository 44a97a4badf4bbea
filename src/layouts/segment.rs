//! Segment-compatible layouts.
//!
//! Both variants branch on the event type and merge a fixed, ordered list of
//! sources into one object. Keys are snake-cased as each source is merged, so
//! later sources win on collisions of the resulting column names.
//!
//! # Single table (`segment-single-table`)
//!
//! ```text
//! type      | sources, lowest precedence first                                   | table
//! ----------|--------------------------------------------------------------------|-------
//! identify  | context{traits: ctx.traits+traits -groupId, groupId}, properties,  | events
//!           | top-level -[context properties traits type]                        |
//! group     | context{group: traits, groupId}, properties,                       | events
//!           | top-level -[context properties traits type groupId]                |
//! track     | context{traits: ctx.traits+properties.traits -groupId, groupId},   | events
//!           | properties -traits, top-level -[context properties type]           |
//! other     | context{traits: ctx.traits -groupId, groupId}, properties,         | events
//!           | top-level -[context properties]                                    |
//! ```
//!
//! # Multi table (`segment`)
//!
//! Context fields are flattened into the row instead of nested.
//!
//! ```text
//! type      | sources, lowest precedence first                                   | table
//! ----------|--------------------------------------------------------------------|-----------
//! identify  | context -traits, properties, ctx.traits -groupId, traits -groupId, | identifies
//!           | top-level -[context properties traits type]                        |
//! group     | context -traits, properties, traits -groupId,                      | groups
//!           | top-level -[context properties traits type]                        |
//! track     | context, top-level -[context properties type]                      | tracks
//!   + named | context, properties, top-level -[context properties type]          | <event name>
//! other     | context, properties, top-level -[context properties]               | plural(type)
//! ```
//!
//! The table override key is always excluded from the top-level source. When
//! the override is set, exactly one row goes to the override table and keeps
//! `type`.

use serde_json::Value;

use super::{Layout, MappedEvent, Merge, Record};
use crate::event::{first_truthy, AnalyticsEvent};
use crate::tables::{pluralize, table_for_type, DEFAULT_TABLE, TABLE_NAME_PARAMETER};

const GROUP_ID: &str = "groupId";
const GROUP_ID_COLUMN: &str = "group_id";

const OMIT_IDENTIFY: &[&str] = &["context", "properties", "traits", "type", TABLE_NAME_PARAMETER];
const OMIT_GROUP_SINGLE: &[&str] = &[
    "context",
    "properties",
    "traits",
    "type",
    GROUP_ID,
    TABLE_NAME_PARAMETER,
];
const OMIT_TRACK: &[&str] = &["context", "properties", "type", TABLE_NAME_PARAMETER];
const OMIT_OTHER: &[&str] = &["context", "properties", TABLE_NAME_PARAMETER];

/// Segment layout, in single-table or multi-table flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLayout {
    single_table: bool,
}

/// Rows produced for one event before table assignment.
struct Shaped {
    record: Record,
    /// Multi-table track events only: the row for the generic `tracks` table
    base_track: Option<Record>,
}

impl SegmentLayout {
    pub const SINGLE_TABLE: SegmentLayout = SegmentLayout { single_table: true };
    pub const MULTI_TABLE: SegmentLayout = SegmentLayout { single_table: false };

    fn shape(&self, event: &AnalyticsEvent) -> Shaped {
        let (record, base_track) = match (event.kind(), self.single_table) {
            (Some("identify"), true) => (identify_single(event), None),
            (Some("identify"), false) => (identify_multi(event), None),
            (Some("group"), true) => (group_single(event), None),
            (Some("group"), false) => (group_multi(event), None),
            (Some("track"), true) => (track_single(event), None),
            (Some("track"), false) => {
                let (base, named) = track_multi(event);
                (named, Some(base))
            }
            (_, true) => (other_single(event), None),
            (_, false) => (other_multi(event), None),
        };

        Shaped {
            record,
            base_track,
        }
    }
}

impl Layout for SegmentLayout {
    fn name(&self) -> &'static str {
        if self.single_table {
            "segment-single-table"
        } else {
            "segment"
        }
    }

    fn layout(&self, event: &AnalyticsEvent) -> Vec<MappedEvent> {
        let Shaped {
            mut record,
            base_track,
        } = self.shape(event);

        if let Some(table) = event.table_override() {
            set_type(&mut record, event);
            return vec![MappedEvent::new(record, table)];
        }

        if self.single_table {
            set_type(&mut record, event);
            return vec![MappedEvent::new(record, DEFAULT_TABLE)];
        }

        match (event.kind(), event.event_name(), base_track) {
            (Some("track"), Some(name), Some(base)) => vec![
                MappedEvent::new(base, pluralize("track")),
                MappedEvent::new(record, name),
            ],
            (kind, _, _) => vec![MappedEvent::new(record, table_for_type(kind))],
        }
    }
}

fn set_type(record: &mut Record, event: &AnalyticsEvent) {
    if let Some(kind) = event.kind() {
        record.insert("type".to_string(), Value::String(kind.to_string()));
    }
}

/// Object with `groupId` removed.
fn without_group_id(source: Option<&Record>) -> Record {
    Merge::new().layer_except(source, &[GROUP_ID]).finish()
}

fn context_fields(event: &AnalyticsEvent) -> Option<Record> {
    event.context.as_ref().map(|c| c.fields())
}

fn identify_single(event: &AnalyticsEvent) -> Record {
    let context = (event.context.is_some() || event.traits.is_some()).then(|| {
        let traits = Merge::new()
            .layer_except(event.context_traits(), &[GROUP_ID])
            .layer_except(event.traits.as_ref(), &[GROUP_ID])
            .finish();
        Merge::new()
            .layer(context_fields(event).as_ref())
            .set("traits", Some(Value::Object(traits)))
            .set(GROUP_ID, identify_group_id(event).cloned())
            .finish()
    });

    let mut record = Merge::new()
        .set("context", context.map(Value::Object))
        .layer(event.properties.as_ref())
        .layer(Some(&event.fields_without(OMIT_IDENTIFY)))
        .finish();

    // The group a user belongs to is also a first-class column
    if let Some(group_id) = identify_group_id(event) {
        record
            .entry(GROUP_ID_COLUMN.to_string())
            .or_insert_with(|| group_id.clone());
    }
    record
}

fn identify_group_id(event: &AnalyticsEvent) -> Option<&Value> {
    first_truthy([
        event.trait_value(GROUP_ID),
        event.context.as_ref().and_then(|c| c.trait_value(GROUP_ID)),
    ])
}

fn identify_multi(event: &AnalyticsEvent) -> Record {
    Merge::new()
        .layer_except(context_fields(event).as_ref(), &["traits"])
        .layer(event.properties.as_ref())
        .layer(Some(&without_group_id(event.context_traits())))
        .layer(Some(&without_group_id(event.traits.as_ref())))
        .layer(Some(&event.fields_without(OMIT_IDENTIFY)))
        .finish()
}

fn group_single(event: &AnalyticsEvent) -> Record {
    let context = (event.context.is_some() || event.traits.is_some()).then(|| {
        Merge::new()
            .layer(context_fields(event).as_ref())
            .set("group", event.traits.clone().map(Value::Object))
            .set(GROUP_ID, event.group_id.clone())
            .finish()
    });

    Merge::new()
        .set("context", context.map(Value::Object))
        .layer(event.properties.as_ref())
        .layer(Some(&event.fields_without(OMIT_GROUP_SINGLE)))
        .finish()
}

fn group_multi(event: &AnalyticsEvent) -> Record {
    Merge::new()
        .layer_except(context_fields(event).as_ref(), &["traits"])
        .layer(event.properties.as_ref())
        .layer(Some(&without_group_id(event.traits.as_ref())))
        .layer(Some(&event.fields_without(OMIT_IDENTIFY)))
        .finish()
}

fn track_single(event: &AnalyticsEvent) -> Record {
    let property_traits = event.property("traits").and_then(Value::as_object);

    let context = (event.context.is_some() || property_traits.is_some()).then(|| {
        let traits = Merge::new()
            .layer_except(event.context_traits(), &[GROUP_ID])
            .layer_except(property_traits, &[GROUP_ID])
            .finish();
        Merge::new()
            .layer(context_fields(event).as_ref())
            .set("traits", Some(Value::Object(traits)))
            .set(
                GROUP_ID,
                event
                    .context
                    .as_ref()
                    .and_then(|c| c.trait_value(GROUP_ID))
                    .cloned(),
            )
            .finish()
    });

    Merge::new()
        .set("context", context.map(Value::Object))
        .layer_except(event.properties.as_ref(), &["traits"])
        .layer(Some(&event.fields_without(OMIT_TRACK)))
        .finish()
}

/// Returns `(row without properties, row with properties)`.
fn track_multi(event: &AnalyticsEvent) -> (Record, Record) {
    let context = context_fields(event);
    let top_level = event.fields_without(OMIT_TRACK);

    let base = Merge::new()
        .layer(context.as_ref())
        .layer(Some(&top_level))
        .finish();
    let named = Merge::new()
        .layer(context.as_ref())
        .layer(event.properties.as_ref())
        .layer(Some(&top_level))
        .finish();
    (base, named)
}

fn other_single(event: &AnalyticsEvent) -> Record {
    let context = event.context.as_ref().map(|c| {
        Merge::new()
            .layer(Some(&c.fields()))
            .set("traits", Some(Value::Object(without_group_id(c.traits.as_ref()))))
            .set(GROUP_ID, c.trait_value(GROUP_ID).cloned())
            .finish()
    });

    Merge::new()
        .set("context", context.map(Value::Object))
        .layer(event.properties.as_ref())
        .layer(Some(&event.fields_without(OMIT_OTHER)))
        .finish()
}

fn other_multi(event: &AnalyticsEvent) -> Record {
    Merge::new()
        .layer(context_fields(event).as_ref())
        .layer(event.properties.as_ref())
        .layer(Some(&event.fields_without(OMIT_OTHER)))
        .finish()
}
