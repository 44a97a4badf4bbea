//! Passthrough layout: the event goes out as received.

use super::{Layout, MappedEvent};
use crate::event::AnalyticsEvent;
use crate::tables::{resolve_table, DEFAULT_TABLE, TABLE_NAME_PARAMETER};

/// Sends the event unchanged, minus the table override key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassthroughLayout;

impl Layout for PassthroughLayout {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn layout(&self, event: &AnalyticsEvent) -> Vec<MappedEvent> {
        vec![MappedEvent::new(
            event.fields_without(&[TABLE_NAME_PARAMETER]),
            resolve_table(event.table_override(), DEFAULT_TABLE),
        )]
    }
}
