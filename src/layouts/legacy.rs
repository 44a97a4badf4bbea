//! Legacy flat layout (`jitsu-legacy`).
//!
//! Produces the classic flat `events` row: a fixed set of columns derived
//! from context, page and URL data, plus a synthesized `user` object. Track
//! events additionally carry their properties at the top level; named columns
//! win over same-named properties.

use serde_json::{Map, Value};
use url::Url;

use super::{Layout, MappedEvent};
use crate::anonymize::anonymize_ip;
use crate::event::{first_truthy, is_truthy, AnalyticsEvent, Context};
use crate::normalize::Draft;
use crate::tables::{resolve_table, DEFAULT_TABLE};

/// Value of the `src` column.
const SOURCE_TAG: &str = "jitsu";

/// Legacy flat layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LegacyLayout;

/// Components derived from the page URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub host: String,
    pub path: String,
    /// Query string including the leading `?`; empty when there is no
    /// query or a bare `?`
    pub search: String,
}

/// Split an absolute URL into host, path and query.
pub fn parse_url(raw: &str) -> Result<UrlParts, url::ParseError> {
    let url = Url::parse(raw)?;
    Ok(UrlParts {
        host: url.host_str().unwrap_or_default().to_string(),
        path: url.path().to_string(),
        search: url
            .query()
            .filter(|q| !q.is_empty())
            .map(|q| format!("?{q}"))
            .unwrap_or_default(),
    })
}

impl Layout for LegacyLayout {
    fn name(&self) -> &'static str {
        "jitsu-legacy"
    }

    fn layout(&self, event: &AnalyticsEvent) -> Vec<MappedEvent> {
        let record = match flat_record(event).normalize_keys().strip_absent().into_value() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        vec![MappedEvent::new(
            record,
            resolve_table(event.table_override(), DEFAULT_TABLE),
        )]
    }
}

fn flat_record(event: &AnalyticsEvent) -> Draft {
    let empty = Context::default();
    let ctx = event.context.as_ref().unwrap_or(&empty);

    let url_value = [ctx.page_value("url"), event.property("url")]
        .into_iter()
        .flatten()
        .filter(|v| is_truthy(v))
        .find_map(Value::as_str);
    // Unparseable URLs just leave the doc_* columns out
    let url_parts = url_value.and_then(|raw| parse_url(raw).ok());

    let mut entries: Vec<(String, Draft)> = Vec::new();

    if event.kind() == Some("track") {
        if let Some(properties) = &event.properties {
            entries.extend(
                properties
                    .iter()
                    .map(|(k, v)| (k.clone(), Draft::from(v.clone()))),
            );
        }
    }

    let named = [
        ("anon_ip", Draft::from(anonymize_ip(ctx.ip.as_deref()))),
        (
            "api_key",
            Draft::from(
                first_truthy([event.write_key.as_ref()])
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new())),
            ),
        ),
        ("click_id", Draft::from(Value::Object(Map::new()))),
        (
            "doc_encoding",
            Draft::from(first_truthy([
                ctx.page_value("encoding"),
                event.property("encoding"),
            ])),
        ),
        (
            "doc_host",
            Draft::from(url_parts.as_ref().map(|u| u.host.clone())),
        ),
        (
            "doc_path",
            Draft::from(url_parts.as_ref().map(|u| u.path.clone())),
        ),
        (
            "doc_search",
            Draft::from(url_parts.as_ref().map(|u| u.search.clone())),
        ),
        ("eventn_ctx_event_id", Draft::from(event.message_id.clone())),
        (
            "event_type",
            Draft::from(event.event_name().or(event.kind()).map(str::to_string)),
        ),
        (
            "local_tz_offset",
            Draft::from(first_truthy([
                ctx.page_value("timezoneOffset"),
                event.property("timezoneOffset"),
            ])),
        ),
        ("page_title", Draft::from(ctx.page_value("title"))),
        ("referer", Draft::from(ctx.page_value("referrer"))),
        (
            "screen_resolution",
            Draft::from(ctx.page_value("screenResolution")),
        ),
        ("source_ip", Draft::from(ctx.ip.clone())),
        ("src", Draft::from(SOURCE_TAG)),
        ("url", Draft::from(url_value.unwrap_or_default())),
        ("user", user_object(event, ctx)),
        ("user_agent", Draft::from(ctx.user_agent.clone())),
        ("user_language", Draft::from(ctx.locale.clone())),
        ("utc_time", Draft::from(event.timestamp.clone())),
        ("_timestamp", Draft::from(event.timestamp.clone())),
        ("utm", Draft::from(ctx.campaign.clone())),
        ("vp_size", Draft::from(viewport_size(ctx))),
    ];
    entries.extend(named.into_iter().map(|(k, v)| (k.to_string(), v)));

    Draft::Object(entries)
}

/// `user` column: every trait (context first, top-level overriding), with
/// `id`, `email` and `name` resolved explicitly on top.
fn user_object(event: &AnalyticsEvent, ctx: &Context) -> Draft {
    let mut entries: Vec<(String, Draft)> = Vec::new();

    for traits in [ctx.traits.as_ref(), event.traits.as_ref()].into_iter().flatten() {
        for (key, value) in traits {
            if key != "email" && key != "name" {
                entries.push((key.clone(), Draft::from(value.clone())));
            }
        }
    }

    entries.push(("id".to_string(), Draft::from(event.user_id.clone())));
    for key in ["email", "name"] {
        entries.push((
            key.to_string(),
            Draft::from(first_truthy([event.trait_value(key), ctx.trait_value(key)])),
        ));
    }

    Draft::Object(entries)
}

/// `"<innerWidth>x<innerHeight>"`, missing dimensions count as 0.
fn viewport_size(ctx: &Context) -> String {
    format!(
        "{}x{}",
        dimension(ctx.screen_value("innerWidth")),
        dimension(ctx.screen_value("innerHeight"))
    )
}

fn dimension(value: Option<&Value>) -> f64 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite()).unwrap_or(0.0)
}
