use prost::{
    bytes::BufMut,
    encoding::{WireType, encode_key, encode_varint},
};

use crate::{
    codec::tags,
    types::{
        Field, FieldValue, Level, Location, LogEvent, MetaInfo, Record, Span, SpanKind,
        Timestamp, Update,
    },
};

/// Encode records as one envelope, without a length prefix.
pub fn encode_envelope(records: &[Record]) -> Vec<u8> {
    let mut buf = Vec::new();
    for record in records {
        match record {
            Record::Update(update) => {
                put_bytes(tags::envelope::UPDATE, &encode_update(update), &mut buf);
            }
            Record::Span(span) => put_bytes(tags::envelope::SPAN, &encode_span(span), &mut buf),
            Record::Metadata(meta) => {
                put_bytes(tags::envelope::METADATA, &encode_metadata(meta), &mut buf);
            }
        }
    }
    buf
}

/// Encode records as one length-prefixed stream frame.
pub fn encode_frame(records: &[Record]) -> Vec<u8> {
    let body = encode_envelope(records);
    let mut frame = Vec::with_capacity(body.len() + 10);
    encode_varint(body.len() as u64, &mut frame);
    frame.extend_from_slice(&body);
    frame
}

pub fn encode_update(update: &Update) -> Vec<u8> {
    let mut buf = Vec::new();
    for event in &update.log_events {
        put_bytes(tags::update::LOG_EVENTS, &encode_log_event(event), &mut buf);
    }
    if update.dropped_events != 0 {
        put_varint(tags::update::DROPPED_EVENTS, update.dropped_events, &mut buf);
    }
    if update.session_reset {
        put_varint(tags::update::SESSION_RESET, 1, &mut buf);
    }
    buf
}

pub fn encode_log_event(event: &LogEvent) -> Vec<u8> {
    let mut buf = Vec::new();
    if !event.message.is_empty() {
        put_bytes(tags::log_event::MESSAGE, event.message.as_bytes(), &mut buf);
    }
    if let Some(parent) = event.parent {
        put_varint(tags::log_event::PARENT, parent.0, &mut buf);
    }
    if event.metadata_id.0 != 0 {
        put_varint(tags::log_event::METADATA_ID, event.metadata_id.0, &mut buf);
    }
    for field in &event.fields {
        put_bytes(tags::log_event::FIELDS, &encode_field(field), &mut buf);
    }
    if let Some(at) = &event.at {
        put_bytes(tags::log_event::AT, &encode_timestamp(at), &mut buf);
    }
    buf
}

pub fn encode_span(span: &Span) -> Vec<u8> {
    let mut buf = Vec::new();
    // Always present: a span without an id is rejected by the decoder.
    put_varint(tags::span::ID, span.id.0, &mut buf);
    if let Some(parent) = span.parent {
        put_varint(tags::span::PARENT, parent.0, &mut buf);
    }
    if let Some(meta) = span.metadata_id {
        put_varint(tags::span::METADATA_ID, meta.0, &mut buf);
    }
    for field in &span.fields {
        put_bytes(tags::span::FIELDS, &encode_field(field), &mut buf);
    }
    if let Some(created_at) = &span.created_at {
        put_bytes(tags::span::CREATED_AT, &encode_timestamp(created_at), &mut buf);
    }
    if let Some(closed_at) = &span.closed_at {
        put_bytes(tags::span::CLOSED_AT, &encode_timestamp(closed_at), &mut buf);
    }
    if span.kind != SpanKind::Generic {
        put_varint(tags::span::KIND, span.kind.to_wire(), &mut buf);
    }
    if let Some(inputs) = &span.inputs {
        put_bytes(tags::span::INPUTS, inputs.as_bytes(), &mut buf);
    }
    if let Some(tauri_inputs) = &span.tauri_inputs {
        put_bytes(tags::span::TAURI_INPUTS, tauri_inputs.as_bytes(), &mut buf);
    }
    buf
}

pub fn encode_field(field: &Field) -> Vec<u8> {
    let mut buf = Vec::new();
    if !field.name.is_empty() {
        put_bytes(tags::field::NAME, field.name.as_bytes(), &mut buf);
    }
    // oneof member: written even when it holds the default value
    match &field.value {
        FieldValue::Debug(s) => put_bytes(tags::field::DEBUG_VAL, s.as_bytes(), &mut buf),
        FieldValue::Str(s) => put_bytes(tags::field::STR_VAL, s.as_bytes(), &mut buf),
        FieldValue::U64(v) => put_varint(tags::field::U64_VAL, *v, &mut buf),
        FieldValue::I64(v) => put_varint(tags::field::I64_VAL, zigzag_encode(*v), &mut buf),
        FieldValue::Bool(v) => put_varint(tags::field::BOOL_VAL, u64::from(*v), &mut buf),
        FieldValue::F64(v) => {
            encode_key(tags::field::F64_VAL, WireType::SixtyFourBit, &mut buf);
            buf.put_u64_le(v.to_bits());
        }
    }
    buf
}

pub fn encode_metadata(meta: &MetaInfo) -> Vec<u8> {
    let mut buf = Vec::new();
    if meta.id.0 != 0 {
        put_varint(tags::metadata::ID, meta.id.0, &mut buf);
    }
    if !meta.name.is_empty() {
        put_bytes(tags::metadata::NAME, meta.name.as_bytes(), &mut buf);
    }
    if !meta.target.is_empty() {
        put_bytes(tags::metadata::TARGET, meta.target.as_bytes(), &mut buf);
    }
    if let Some(location) = &meta.location {
        put_bytes(tags::metadata::LOCATION, &encode_location(location), &mut buf);
    }
    if meta.level != Level::Trace {
        put_varint(tags::metadata::LEVEL, meta.level.to_wire(), &mut buf);
    }
    for name in &meta.field_names {
        put_bytes(tags::metadata::FIELD_NAMES, name.as_bytes(), &mut buf);
    }
    if meta.is_span {
        put_varint(tags::metadata::IS_SPAN, 1, &mut buf);
    }
    buf
}

fn encode_location(location: &Location) -> Vec<u8> {
    let mut buf = Vec::new();
    if !location.file.is_empty() {
        put_bytes(tags::location::FILE, location.file.as_bytes(), &mut buf);
    }
    if location.line != 0 {
        put_varint(tags::location::LINE, u64::from(location.line), &mut buf);
    }
    if location.column != 0 {
        put_varint(tags::location::COLUMN, u64::from(location.column), &mut buf);
    }
    buf
}

fn encode_timestamp(ts: &Timestamp) -> Vec<u8> {
    let mut buf = Vec::new();
    if ts.seconds != 0 {
        put_varint(tags::timestamp::SECONDS, ts.seconds as u64, &mut buf);
    }
    if ts.nanos != 0 {
        // int32 is sign-extended to 64 bits on the wire
        put_varint(tags::timestamp::NANOS, i64::from(ts.nanos) as u64, &mut buf);
    }
    buf
}

fn put_varint(tag: u32, value: u64, buf: &mut Vec<u8>) {
    encode_key(tag, WireType::Varint, buf);
    encode_varint(value, buf);
}

fn put_bytes(tag: u32, bytes: &[u8], buf: &mut Vec<u8>) {
    encode_key(tag, WireType::LengthDelimited, buf);
    encode_varint(bytes.len() as u64, buf);
    buf.extend_from_slice(bytes);
}

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}
