//! Typed records carried by the wire protocol.
//!
//! Identifiers are scoped to one connection session and carry no meaning
//! across reconnects.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SpanId(pub u64);

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "span#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MetaId(pub u64);

impl fmt::Display for MetaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "meta#{}", self.0)
    }
}

/// Wall-clock instant in the `google.protobuf.Timestamp` layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

const NANOS_PER_SECOND: u64 = 1_000_000_000;

impl Timestamp {
    pub fn from_unix_nanos(nanos: u64) -> Self {
        Self {
            seconds: (nanos / NANOS_PER_SECOND) as i64,
            nanos: (nanos % NANOS_PER_SECOND) as i32,
        }
    }

    /// Nanoseconds since the UNIX epoch; instants before the epoch clamp to 0.
    pub fn unix_nanos(&self) -> u64 {
        if self.seconds < 0 {
            return 0;
        }
        (self.seconds as u64)
            .saturating_mul(NANOS_PER_SECOND)
            .saturating_add(self.nanos.max(0) as u64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn from_wire(value: u64) -> Option<Self> {
        match value {
            0 => Some(Level::Trace),
            1 => Some(Level::Debug),
            2 => Some(Level::Info),
            3 => Some(Level::Warn),
            4 => Some(Level::Error),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u64 {
        self as u64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    #[default]
    Generic,
    Ipc,
    Event,
}

impl SpanKind {
    pub fn from_wire(value: u64) -> Option<Self> {
        match value {
            0 => Some(SpanKind::Generic),
            1 => Some(SpanKind::Ipc),
            2 => Some(SpanKind::Event),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u64 {
        self as u64
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SpanKind::Generic => "span",
            SpanKind::Ipc => "ipc",
            SpanKind::Event => "event",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

/// Static per-call-site metadata, delivered once and shared by many spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetaInfo {
    pub id: MetaId,
    pub name: String,
    pub target: String,
    pub location: Option<Location>,
    pub level: Level,
    pub field_names: Vec<String>,
    pub is_span: bool,
}

impl MetaInfo {
    pub fn new(id: MetaId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            target: String::new(),
            location: None,
            level: Level::default(),
            field_names: Vec::new(),
            is_span: false,
        }
    }
}

/// A single scalar as it travels on the wire.
///
/// `Debug` and `Str` values may hold a serialized structured payload; see
/// [`crate::fields::FieldNode`] for the normalized form.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Debug(String),
    Str(String),
    U64(u64),
    I64(i64),
    Bool(bool),
    F64(f64),
}

impl FieldValue {
    /// Like `==`, but floats compare by bit pattern, so a NaN equals itself.
    pub fn is_identical(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::F64(a), FieldValue::F64(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
}

impl Field {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn str(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, FieldValue::Str(value.into()))
    }
}

/// Field lists equal in order, names and bit-identical values.
pub(crate) fn identical_fields(a: &[Field], b: &[Field]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| x.name == y.name && x.value.is_identical(&y.value))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub message: String,
    pub parent: Option<SpanId>,
    pub metadata_id: MetaId,
    pub fields: Vec<Field>,
    pub at: Option<Timestamp>,
}

/// A span as delivered by one message. Several messages may describe the
/// same span; the store merges them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Span {
    pub id: SpanId,
    pub parent: Option<SpanId>,
    pub metadata_id: Option<MetaId>,
    pub kind: SpanKind,
    pub created_at: Option<Timestamp>,
    pub closed_at: Option<Timestamp>,
    pub fields: Vec<Field>,
    /// Raw IPC argument capture, usually a JSON document.
    pub inputs: Option<String>,
    /// Transport-specific IPC argument capture.
    pub tauri_inputs: Option<String>,
}

impl Span {
    pub fn new(id: SpanId) -> Self {
        Self {
            id,
            parent: None,
            metadata_id: None,
            kind: SpanKind::Generic,
            created_at: None,
            closed_at: None,
            fields: Vec::new(),
            inputs: None,
            tauri_inputs: None,
        }
    }
}

/// A batch of log events plus the sender's cumulative drop counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Update {
    pub log_events: Vec<LogEvent>,
    pub dropped_events: u64,
    /// Explicit sender-side reset of `dropped_events`.
    pub session_reset: bool,
}

/// One typed record produced by decoding an envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Update(Update),
    Span(Span),
    Metadata(MetaInfo),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_nanos_roundtrip() {
        let ts = Timestamp::from_unix_nanos(1_700_000_000_123_456_789);
        assert_eq!(ts.seconds, 1_700_000_000);
        assert_eq!(ts.nanos, 123_456_789);
        assert_eq!(ts.unix_nanos(), 1_700_000_000_123_456_789);
    }

    #[test]
    fn timestamp_before_epoch_clamps() {
        let ts = Timestamp {
            seconds: -5,
            nanos: 10,
        };
        assert_eq!(ts.unix_nanos(), 0);
    }

    #[test]
    fn wire_enums_reject_unknown_values() {
        assert_eq!(Level::from_wire(3), Some(Level::Warn));
        assert_eq!(Level::from_wire(9), None);
        assert_eq!(SpanKind::from_wire(1), Some(SpanKind::Ipc));
        assert_eq!(SpanKind::from_wire(7), None);
        assert_eq!(SpanKind::Event.as_str(), "event");
    }
}
