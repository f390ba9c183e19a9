//! Authoritative in-memory model of one session: spans, log events and
//! call-site metadata.
//!
//! Spans live in an arena keyed by [`SpanId`]. A parent that is referenced
//! before it is delivered gets a placeholder entry with `resolved == false`;
//! the edge to it is recorded immediately and never rewritten, the real
//! record only fills in the placeholder's attributes.

use std::{
    collections::{BTreeMap, HashMap, hash_map::DefaultHasher},
    fmt,
    hash::{Hash, Hasher},
};

use serde::Serialize;

use crate::types::{
    Field, FieldValue, LogEvent, MetaId, MetaInfo, Span, SpanId, SpanKind, Timestamp, Update,
    identical_fields,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRecord {
    pub id: SpanId,
    pub parent: Option<SpanId>,
    pub metadata_id: Option<MetaId>,
    pub kind: SpanKind,
    pub start: Option<Timestamp>,
    /// Only ever moves forward. `None` means the span is still open.
    pub end: Option<Timestamp>,
    pub fields: BTreeMap<String, FieldValue>,
    pub inputs: Option<String>,
    pub tauri_inputs: Option<String>,
    /// `false` while this entry only exists because something referenced it.
    pub resolved: bool,
    /// Insertion sequence within the session.
    pub seq: u64,
}

impl SpanRecord {
    pub fn placeholder(id: SpanId, seq: u64) -> Self {
        Self {
            id,
            parent: None,
            metadata_id: None,
            kind: SpanKind::Generic,
            start: None,
            end: None,
            fields: BTreeMap::new(),
            inputs: None,
            tauri_inputs: None,
            resolved: false,
            seq,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn start_nanos(&self) -> Option<u64> {
        self.start.map(|ts| ts.unix_nanos())
    }

    pub fn end_nanos(&self) -> Option<u64> {
        self.end.map(|ts| ts.unix_nanos())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LogId(pub u64);

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub id: LogId,
    pub event: LogEvent,
}

/// What a single apply call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub inserted: usize,
    pub merged: usize,
    pub duplicates: usize,
    pub placeholders_created: usize,
    pub placeholders_resolved: usize,
    pub parent_conflicts: usize,
}

impl ApplyOutcome {
    pub fn absorb(&mut self, other: ApplyOutcome) {
        self.inserted += other.inserted;
        self.merged += other.merged;
        self.duplicates += other.duplicates;
        self.placeholders_created += other.placeholders_created;
        self.placeholders_resolved += other.placeholders_resolved;
        self.parent_conflicts += other.parent_conflicts;
    }

    /// True when observable store state did not change.
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.merged == 0 && self.placeholders_created == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanStore {
    spans: HashMap<SpanId, SpanRecord>,
    span_order: Vec<SpanId>,
    children: HashMap<SpanId, Vec<SpanId>>,
    /// Every distinct span message applied so far, keyed by span.
    span_messages: HashMap<SpanId, Vec<(u64, Span)>>,
    logs: Vec<LogRecord>,
    log_fingerprints: HashMap<u64, Vec<LogId>>,
    logs_by_span: HashMap<SpanId, Vec<LogId>>,
    metadata: HashMap<MetaId, MetaInfo>,
    next_seq: u64,
}

impl SpanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges the log events of `update`. The drop counter is not the
    /// store's concern.
    pub fn apply_update(&mut self, update: &Update) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        for event in &update.log_events {
            outcome.absorb(self.apply_log_event(event));
        }
        outcome
    }

    /// Whether an identical log event is already stored.
    pub fn contains_log(&self, event: &LogEvent) -> bool {
        self.log_fingerprints
            .get(&fingerprint(event))
            .is_some_and(|ids| {
                ids.iter()
                    .any(|id| identical_logs(&self.logs[id.0 as usize].event, event))
            })
    }

    pub fn apply_log_event(&mut self, event: &LogEvent) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        if self.contains_log(event) {
            tracing::debug!(message = %event.message, "duplicate log event");
            outcome.duplicates += 1;
            return outcome;
        }

        if let Some(parent) = event.parent {
            outcome.placeholders_created += self.ensure_span(parent);
        }

        let fingerprint = fingerprint(event);
        let id = LogId(self.logs.len() as u64);
        self.logs.push(LogRecord {
            id,
            event: event.clone(),
        });
        self.log_fingerprints.entry(fingerprint).or_default().push(id);
        if let Some(parent) = event.parent {
            self.logs_by_span.entry(parent).or_default().push(id);
        }
        outcome.inserted += 1;
        outcome
    }

    pub fn apply_span(&mut self, span: Span) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        // An older version arriving again must not roll back newer values.
        let fingerprint = span_fingerprint(&span);
        let messages = self.span_messages.entry(span.id).or_default();
        if messages
            .iter()
            .any(|(seen, message)| *seen == fingerprint && identical_spans(message, &span))
        {
            tracing::debug!(span = %span.id, "duplicate span message");
            outcome.duplicates += 1;
            return outcome;
        }
        messages.push((fingerprint, span.clone()));

        // The placeholder goes in first so that child-first and parent-first
        // delivery produce the same insertion order.
        let links_parent = self
            .spans
            .get(&span.id)
            .is_none_or(|existing| existing.parent.is_none());
        if let Some(parent) = span.parent.filter(|parent| *parent != span.id)
            && links_parent
        {
            outcome.placeholders_created += self.ensure_span(parent);
        }

        let Some(record) = self.spans.get_mut(&span.id) else {
            let seq = self.next_seq();
            let record = SpanRecord {
                id: span.id,
                parent: span.parent,
                metadata_id: span.metadata_id,
                kind: span.kind,
                start: span.created_at,
                end: span.closed_at,
                fields: span.fields.into_iter().map(|f| (f.name, f.value)).collect(),
                inputs: span.inputs,
                tauri_inputs: span.tauri_inputs,
                resolved: true,
                seq,
            };
            if let Some(parent) = record.parent {
                self.children.entry(parent).or_default().push(record.id);
            }
            self.span_order.push(record.id);
            self.spans.insert(record.id, record);
            outcome.inserted += 1;
            return outcome;
        };

        let before = record.clone();
        if !record.resolved {
            record.resolved = true;
            outcome.placeholders_resolved += 1;
        }

        let mut new_edge = None;
        match (record.parent, span.parent) {
            (None, Some(parent)) => {
                record.parent = Some(parent);
                new_edge = Some(parent);
            }
            (Some(current), Some(parent)) if current != parent => {
                tracing::warn!(
                    span = %span.id,
                    current = %current,
                    ignored = %parent,
                    "conflicting parent ignored"
                );
                outcome.parent_conflicts += 1;
            }
            _ => {}
        }

        if record.metadata_id.is_none() {
            record.metadata_id = span.metadata_id;
        }
        if span.kind != SpanKind::Generic {
            record.kind = span.kind;
        }
        if record.start.is_none() {
            record.start = span.created_at;
        }
        if let Some(closed_at) = span.closed_at
            && record.end.is_none_or(|end| closed_at > end)
        {
            record.end = Some(closed_at);
        }
        for field in span.fields {
            record.fields.insert(field.name, field.value);
        }
        if span.inputs.is_some() {
            record.inputs = span.inputs;
        }
        if span.tauri_inputs.is_some() {
            record.tauri_inputs = span.tauri_inputs;
        }

        if *record == before {
            outcome.duplicates += 1;
        } else {
            outcome.merged += 1;
        }

        if let Some(parent) = new_edge {
            self.children.entry(parent).or_default().push(span.id);
        }
        outcome
    }

    /// Metadata is immutable per id; a conflicting delivery replaces it.
    pub fn apply_metadata(&mut self, meta: MetaInfo) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        match self.metadata.get(&meta.id) {
            Some(existing) if *existing == meta => outcome.duplicates += 1,
            Some(_) => {
                tracing::debug!(id = %meta.id, "metadata replaced");
                self.metadata.insert(meta.id, meta);
                outcome.merged += 1;
            }
            None => {
                self.metadata.insert(meta.id, meta);
                outcome.inserted += 1;
            }
        }
        outcome
    }

    pub fn span(&self, id: SpanId) -> Option<&SpanRecord> {
        self.spans.get(&id)
    }

    pub fn contains(&self, id: SpanId) -> bool {
        self.spans.contains_key(&id)
    }

    /// Spans in insertion order.
    pub fn spans(&self) -> impl Iterator<Item = &SpanRecord> {
        self.span_order.iter().filter_map(|id| self.spans.get(id))
    }

    /// Spans sorted by start time; spans without a start go last, ties keep
    /// insertion order.
    pub fn spans_by_start(&self) -> Vec<&SpanRecord> {
        let mut spans: Vec<_> = self.spans().collect();
        spans.sort_by_key(|span| (span.start.is_none(), span.start, span.seq));
        spans
    }

    pub fn children(&self, id: SpanId) -> &[SpanId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn log(&self, id: LogId) -> Option<&LogRecord> {
        self.logs.get(id.0 as usize)
    }

    pub fn logs(&self) -> impl Iterator<Item = &LogRecord> {
        self.logs.iter()
    }

    pub fn logs_for_span(&self, id: SpanId) -> impl Iterator<Item = &LogRecord> {
        self.logs_by_span
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|log| self.logs.get(log.0 as usize))
    }

    pub fn metadata(&self, id: MetaId) -> Option<&MetaInfo> {
        self.metadata.get(&id)
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    pub fn log_count(&self) -> usize {
        self.logs.len()
    }

    pub fn metadata_count(&self) -> usize {
        self.metadata.len()
    }

    pub fn placeholder_count(&self) -> usize {
        self.spans.values().filter(|span| !span.resolved).count()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty() && self.logs.is_empty() && self.metadata.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn ensure_span(&mut self, id: SpanId) -> usize {
        if self.spans.contains_key(&id) {
            return 0;
        }
        let seq = self.next_seq();
        self.spans.insert(id, SpanRecord::placeholder(id, seq));
        self.span_order.push(id);
        1
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

fn fingerprint(event: &LogEvent) -> u64 {
    let mut hasher = DefaultHasher::new();
    event.message.hash(&mut hasher);
    event.parent.hash(&mut hasher);
    event.metadata_id.hash(&mut hasher);
    event.at.hash(&mut hasher);
    hash_fields(&event.fields, &mut hasher);
    hasher.finish()
}

fn span_fingerprint(span: &Span) -> u64 {
    let mut hasher = DefaultHasher::new();
    span.id.hash(&mut hasher);
    span.parent.hash(&mut hasher);
    span.metadata_id.hash(&mut hasher);
    span.kind.hash(&mut hasher);
    span.created_at.hash(&mut hasher);
    span.closed_at.hash(&mut hasher);
    span.inputs.hash(&mut hasher);
    span.tauri_inputs.hash(&mut hasher);
    hash_fields(&span.fields, &mut hasher);
    hasher.finish()
}

fn hash_fields(fields: &[Field], hasher: &mut DefaultHasher) {
    for field in fields {
        field.name.hash(hasher);
        match &field.value {
            FieldValue::Debug(s) => (0u8, s).hash(hasher),
            FieldValue::Str(s) => (1u8, s).hash(hasher),
            FieldValue::U64(v) => (2u8, v).hash(hasher),
            FieldValue::I64(v) => (3u8, v).hash(hasher),
            FieldValue::Bool(v) => (4u8, v).hash(hasher),
            FieldValue::F64(v) => (5u8, v.to_bits()).hash(hasher),
        }
    }
}

fn identical_logs(a: &LogEvent, b: &LogEvent) -> bool {
    a.message == b.message
        && a.parent == b.parent
        && a.metadata_id == b.metadata_id
        && a.at == b.at
        && identical_fields(&a.fields, &b.fields)
}

fn identical_spans(a: &Span, b: &Span) -> bool {
    a.id == b.id
        && a.parent == b.parent
        && a.metadata_id == b.metadata_id
        && a.kind == b.kind
        && a.created_at == b.created_at
        && a.closed_at == b.closed_at
        && a.inputs == b.inputs
        && a.tauri_inputs == b.tauri_inputs
        && identical_fields(&a.fields, &b.fields)
}
