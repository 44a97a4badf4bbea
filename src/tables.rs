//! Destination table names.
//!
//! Multi-table layouts name tables after the event type. An upstream producer
//! can force a table by setting [`TABLE_NAME_PARAMETER`] on the event; that
//! always beats whatever the layout would have picked.

/// Reserved top-level event key carrying an explicit destination table.
pub const TABLE_NAME_PARAMETER: &str = "JITSU_TABLE_NAME";

/// Table used by single-table layouts and as the last-resort fallback.
pub const DEFAULT_TABLE: &str = "events";

/// Plural table name for an event type.
///
/// Only the four well-known types are pluralized; any other tag is used
/// verbatim. There is deliberately no general English pluralization.
pub fn pluralize(event_type: &str) -> &str {
    match event_type {
        "identify" => "identifies",
        "page" => "pages",
        "track" => "tracks",
        "group" => "groups",
        other => other,
    }
}

/// Table for an event of the given type in a multi-table layout.
///
/// Events without a usable type land in [`DEFAULT_TABLE`].
pub fn table_for_type(event_type: Option<&str>) -> String {
    match event_type {
        Some(t) if !t.is_empty() => pluralize(t).to_string(),
        _ => DEFAULT_TABLE.to_string(),
    }
}

/// Pick the explicit override when present, otherwise the computed name.
pub fn resolve_table(table_override: Option<&str>, computed: &str) -> String {
    table_override.unwrap_or(computed).to_string()
}
