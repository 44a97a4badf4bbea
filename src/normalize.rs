//! Key normalization for outbound records.
//!
//! Producers send field names in whatever casing their SDK uses (`userId`,
//! `screenResolution`, `utmSource`). Warehouse columns are lower snake case, so
//! every record passes through [`normalize_keys`] before it is delivered.
//!
//! Records that are assembled field by field (the legacy layout) are built as a
//! [`Draft`], which can hold explicitly absent entries. [`Draft::strip_absent`]
//! prunes them; `null` is a value and is always kept.
//!
//! ```text
//! userId            -> user_id
//! screenResolution  -> screen_resolution
//! UTMSource         -> u_t_m_source
//! already_snake     -> already_snake
//! ```

use serde_json::{Map, Value};

/// Convert a single field name to lower snake case.
///
/// An underscore is inserted before every ASCII uppercase letter that directly
/// follows an ASCII letter or digit, then the whole name is lowercased.
pub fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev: Option<char> = None;

    for c in key.chars() {
        if c.is_ascii_uppercase() && prev.is_some_and(|p| p.is_ascii_alphanumeric()) {
            out.push('_');
        }
        out.push(c);
        prev = Some(c);
    }

    out.to_lowercase()
}

/// Recursively rewrite every mapping key in `value` to snake case.
///
/// Sequences keep their order and length; scalars are returned untouched.
/// When two keys collapse to the same name the one iterated last wins.
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        Value::Object(map) => Value::Object(normalize_map(map)),
        scalar => scalar,
    }
}

/// [`normalize_keys`] for a top-level mapping.
pub fn normalize_map(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| (to_snake_case(&key), normalize_keys(value)))
        .collect()
}

/// A record under construction.
///
/// Unlike [`Value`], a draft can carry [`Draft::Absent`] entries: slots that
/// were looked up but had nothing in them. They are dropped by
/// [`Draft::strip_absent`] and never reach the wire as `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Draft {
    Absent,
    Value(Value),
    Object(Vec<(String, Draft)>),
    Array(Vec<Draft>),
}

impl Draft {
    /// Build an object draft from `(key, field)` pairs. Later pairs win.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Draft)>,
    {
        Draft::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Draft::Absent)
    }

    /// Remove absent mapping entries at every depth.
    ///
    /// Sequence elements are never removed, absent or not.
    pub fn strip_absent(self) -> Self {
        match self {
            Draft::Object(entries) => Draft::Object(
                entries
                    .into_iter()
                    .filter(|(_, v)| !v.is_absent())
                    .map(|(k, v)| (k, v.strip_absent()))
                    .collect(),
            ),
            Draft::Array(items) => Draft::Array(items.into_iter().map(Draft::strip_absent).collect()),
            other => other,
        }
    }

    /// Snake-case every key, including keys inside embedded JSON values.
    pub fn normalize_keys(self) -> Self {
        match self {
            Draft::Object(entries) => Draft::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (to_snake_case(&k), v.normalize_keys()))
                    .collect(),
            ),
            Draft::Array(items) => Draft::Array(items.into_iter().map(Draft::normalize_keys).collect()),
            Draft::Value(value) => Draft::Value(normalize_keys(value)),
            Draft::Absent => Draft::Absent,
        }
    }

    /// Render the draft as JSON.
    ///
    /// Absent object entries are skipped and absent sequence elements become
    /// `null`, which is how they serialize on the wire.
    pub fn into_value(self) -> Value {
        match self {
            Draft::Absent => Value::Null,
            Draft::Value(value) => value,
            Draft::Array(items) => Value::Array(items.into_iter().map(Draft::into_value).collect()),
            Draft::Object(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    if !value.is_absent() {
                        map.insert(key, value.into_value());
                    }
                }
                Value::Object(map)
            }
        }
    }
}

impl From<Value> for Draft {
    fn from(value: Value) -> Self {
        Draft::Value(value)
    }
}

impl From<Option<Value>> for Draft {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Draft::Absent, Draft::Value)
    }
}

impl From<Option<&Value>> for Draft {
    fn from(value: Option<&Value>) -> Self {
        value.cloned().into()
    }
}

impl From<&str> for Draft {
    fn from(value: &str) -> Self {
        Draft::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Draft {
    fn from(value: String) -> Self {
        Draft::Value(Value::String(value))
    }
}

impl From<Option<String>> for Draft {
    fn from(value: Option<String>) -> Self {
        value.map_or(Draft::Absent, Draft::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("userId"), "user_id");
        assert_eq!(to_snake_case("screenResolution"), "screen_resolution");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_snake_case("ID"), "i_d");
        assert_eq!(to_snake_case("utm2Source"), "utm2_source");
        assert_eq!(to_snake_case("Leading"), "leading");
        assert_eq!(to_snake_case("_private"), "_private");
        assert_eq!(to_snake_case("a_B"), "a_b");
        assert_eq!(to_snake_case(""), "");
    }

    #[test]
    fn test_normalize_nested() {
        let input = json!({
            "userId": "u1",
            "contextPage": {"pageTitle": "Home", "innerWidth": 10},
            "items": [{"skuId": 1}, "rawString", [{"deepKey": null}]],
            "flagOn": true
        });

        let output = normalize_keys(input);

        assert_eq!(
            output,
            json!({
                "user_id": "u1",
                "context_page": {"page_title": "Home", "inner_width": 10},
                "items": [{"sku_id": 1}, "rawString", [{"deep_key": null}]],
                "flag_on": true
            })
        );
    }

    #[test]
    fn test_normalize_scalars_untouched() {
        assert_eq!(normalize_keys(json!("camelCase")), json!("camelCase"));
        assert_eq!(normalize_keys(json!(42)), json!(42));
        assert_eq!(normalize_keys(Value::Null), Value::Null);
    }

    #[test]
    fn test_normalize_idempotent() {
        let input = json!({
            "userId": 1,
            "user_id": 2,
            "someObject": {"innerKey": [{"aB": 1}]},
            "URLPath": "/x"
        });

        let once = normalize_keys(input);
        let twice = normalize_keys(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_strip_keeps_null() {
        let draft = Draft::object([
            ("present", Draft::from(json!(1))),
            ("null", Draft::Value(Value::Null)),
            ("missing", Draft::Absent),
            (
                "nested",
                Draft::object([("gone", Draft::Absent), ("kept", Draft::from("x"))]),
            ),
        ]);

        let stripped = draft.strip_absent();
        assert_eq!(
            stripped.clone().into_value(),
            json!({"present": 1, "null": null, "nested": {"kept": "x"}})
        );
        assert_eq!(stripped.clone().strip_absent(), stripped);
    }

    #[test]
    fn test_strip_keeps_sequence_elements() {
        let draft = Draft::Array(vec![Draft::Absent, Draft::from(json!(1))]);
        let stripped = draft.clone().strip_absent();

        assert_eq!(stripped, draft);
        assert_eq!(stripped.into_value(), json!([null, 1]));
    }

    #[test]
    fn test_strip_and_normalize_commute() {
        let draft = Draft::object([
            ("userId", Draft::from("u1")),
            ("pageTitle", Draft::Absent),
            (
                "userTraits",
                Draft::object([("firstName", Draft::Absent), ("lastName", Draft::from("B"))]),
            ),
        ]);

        let a = draft.clone().strip_absent().normalize_keys();
        let b = draft.normalize_keys().strip_absent();
        assert_eq!(a, b);
        assert_eq!(a.into_value(), json!({"user_id": "u1", "user_traits": {"last_name": "B"}}));
    }

    #[test]
    fn test_later_entries_win() {
        let draft = Draft::object([("a", Draft::from(json!(1))), ("a", Draft::from(json!(2)))]);
        assert_eq!(draft.into_value(), json!({"a": 2}));
    }
}
