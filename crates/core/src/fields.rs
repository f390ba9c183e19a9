//! Normalized field values and the display-side filtering policy.
//!
//! The store keeps every field exactly as received. [`FieldNode`] is the
//! structured view used when a value has to be inspected or shown, and
//! [`DisplayFilter`] is the only place reserved dispatch keys are dropped.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::{
    store::SpanRecord,
    types::{FieldValue, SpanKind},
};

/// Keys the instrumented runtime uses for its own dispatch bookkeeping.
pub const DEFAULT_DISPLAY_EXCLUDED_KEYS: [&str; 4] = ["cmd", "callback", "error", "__tauriModule"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldNode {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    List(Vec<FieldNode>),
    Map(BTreeMap<String, FieldNode>),
    /// Text that looked structured but did not parse. Kept verbatim.
    Opaque(String),
}

impl FieldNode {
    /// Parses a serialized structured payload, degrading to [`FieldNode::Opaque`].
    pub fn parse_structured(raw: &str) -> FieldNode {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => FieldNode::from(value),
            Err(err) => {
                tracing::debug!(error = %err, len = raw.len(), "structured field did not parse");
                FieldNode::Opaque(raw.to_owned())
            }
        }
    }

    pub fn from_field_value(value: &FieldValue) -> FieldNode {
        match value {
            FieldValue::Debug(s) | FieldValue::Str(s) => {
                if looks_structured(s) {
                    FieldNode::parse_structured(s)
                } else {
                    FieldNode::Str(s.clone())
                }
            }
            FieldValue::U64(v) => FieldNode::U64(*v),
            FieldValue::I64(v) => FieldNode::I64(*v),
            FieldValue::Bool(v) => FieldNode::Bool(*v),
            FieldValue::F64(v) => FieldNode::F64(*v),
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, FieldNode>> {
        match self {
            FieldNode::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Compact single-line rendering; nested values are shown as JSON.
    pub fn display_string(&self) -> String {
        match self {
            FieldNode::Null => "null".to_owned(),
            FieldNode::Bool(v) => v.to_string(),
            FieldNode::I64(v) => v.to_string(),
            FieldNode::U64(v) => v.to_string(),
            FieldNode::F64(v) => v.to_string(),
            FieldNode::Str(s) | FieldNode::Opaque(s) => s.clone(),
            FieldNode::List(_) | FieldNode::Map(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }
}

fn looks_structured(s: &str) -> bool {
    let trimmed = s.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

impl From<serde_json::Value> for FieldNode {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => FieldNode::Null,
            Value::Bool(v) => FieldNode::Bool(v),
            Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    FieldNode::U64(v)
                } else if let Some(v) = n.as_i64() {
                    FieldNode::I64(v)
                } else {
                    FieldNode::F64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => FieldNode::Str(s),
            Value::Array(items) => FieldNode::List(items.into_iter().map(FieldNode::from).collect()),
            Value::Object(map) => {
                FieldNode::Map(map.into_iter().map(|(k, v)| (k, FieldNode::from(v))).collect())
            }
        }
    }
}

/// Key/value set prepared for display, with reserved keys removed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgsSummary {
    pub title: &'static str,
    pub entries: Vec<(String, FieldNode)>,
}

/// Declared set of keys hidden from display-oriented summaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFilter {
    excluded: BTreeSet<String>,
}

impl Default for DisplayFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_EXCLUDED_KEYS)
    }
}

impl DisplayFilter {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// A filter that hides nothing.
    pub fn none() -> Self {
        Self {
            excluded: BTreeSet::new(),
        }
    }

    pub fn is_excluded(&self, key: &str) -> bool {
        self.excluded.contains(key)
    }

    pub fn excluded_keys(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }

    pub fn summarize(&self, span: &SpanRecord) -> ArgsSummary {
        let title = if span.inputs.is_some() || span.kind == SpanKind::Ipc {
            "Inputs"
        } else if span.kind == SpanKind::Event {
            "Args"
        } else {
            "Fields"
        };

        let mut entries = Vec::new();
        for raw in [&span.tauri_inputs, &span.inputs].into_iter().flatten() {
            match FieldNode::parse_structured(raw) {
                FieldNode::Map(map) => entries.extend(
                    map.into_iter()
                        .filter(|(key, _)| !self.is_excluded(key)),
                ),
                // Non-object payloads have no keys to filter.
                other => entries.push((String::new(), other)),
            }
        }
        entries.extend(
            span.fields
                .iter()
                .filter(|(key, _)| !self.is_excluded(key))
                .map(|(key, value)| (key.clone(), FieldNode::from_field_value(value))),
        );

        ArgsSummary { title, entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpanId;

    #[test]
    fn structured_strings_are_parsed() {
        let node = FieldNode::from_field_value(&FieldValue::Str(
            r#" {"path": "/tmp", "flags": [1, -2, 0.5]} "#.into(),
        ));
        let map = node.as_map().unwrap();
        assert_eq!(map["path"], FieldNode::Str("/tmp".into()));
        assert_eq!(
            map["flags"],
            FieldNode::List(vec![
                FieldNode::U64(1),
                FieldNode::I64(-2),
                FieldNode::F64(0.5)
            ])
        );
    }

    #[test]
    fn broken_payload_degrades_to_opaque() {
        let raw = "{not json";
        assert_eq!(
            FieldNode::from_field_value(&FieldValue::Debug(raw.into())),
            FieldNode::Opaque(raw.into())
        );
        assert_eq!(FieldNode::Opaque(raw.into()).display_string(), raw);
    }

    #[test]
    fn plain_strings_stay_strings() {
        assert_eq!(
            FieldNode::from_field_value(&FieldValue::Debug("Some(3)".into())),
            FieldNode::Str("Some(3)".into())
        );
    }

    #[test]
    fn summary_drops_reserved_keys_only_at_top_level() {
        let mut span = SpanRecord::placeholder(SpanId(1), 0);
        span.kind = SpanKind::Ipc;
        span.inputs = Some(
            r#"{"cmd":"open","callback":1,"path":"/a","nested":{"cmd":"kept"}}"#.into(),
        );
        span.fields
            .insert("error".into(), FieldValue::Str("boom".into()));
        span.fields.insert("id".into(), FieldValue::U64(4));

        let summary = DisplayFilter::default().summarize(&span);
        assert_eq!(summary.title, "Inputs");
        let keys: Vec<_> = summary.entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["nested", "path", "id"]);
        assert!(summary.entries[0].1.as_map().unwrap().contains_key("cmd"));

        // the record itself is untouched
        assert!(span.fields.contains_key("error"));
    }

    #[test]
    fn summary_title_follows_kind() {
        let mut span = SpanRecord::placeholder(SpanId(2), 0);
        assert_eq!(DisplayFilter::none().summarize(&span).title, "Fields");
        span.kind = SpanKind::Event;
        assert_eq!(DisplayFilter::none().summarize(&span).title, "Args");
    }

    #[test]
    fn tauri_inputs_come_first() {
        let mut span = SpanRecord::placeholder(SpanId(3), 0);
        span.inputs = Some(r#"{"b":1}"#.into());
        span.tauri_inputs = Some(r#"{"a":2}"#.into());
        let summary = DisplayFilter::none().summarize(&span);
        let keys: Vec<_> = summary.entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["a", "b"]);
    }
}
