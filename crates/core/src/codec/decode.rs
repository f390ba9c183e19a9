use prost::{
    bytes::Buf,
    encoding::{WireType, decode_key, decode_varint},
};

use crate::{
    codec::{
        tags,
        unknown::{UnknownField, UnknownFieldPolicy},
    },
    error::DecodeError,
    types::{
        Field, FieldValue, Level, Location, LogEvent, MetaId, MetaInfo, Record, Span, SpanId,
        SpanKind, Timestamp, Update,
    },
};

/// Schema-driven decoder for the envelope and all nested messages.
///
/// Cloning is cheap; the policy's observer is shared.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    policy: UnknownFieldPolicy,
}

impl Decoder {
    pub fn new(policy: UnknownFieldPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &UnknownFieldPolicy {
        &self.policy
    }

    /// Decode one envelope into its records, in wire order.
    pub fn decode_envelope(&self, buf: &[u8]) -> Result<Vec<Record>, DecodeError> {
        let mut records = Vec::new();
        self.for_each_field("Envelope", buf, |tag, wire_type, buf| {
            match tag {
                tags::envelope::UPDATE => {
                    let body = read_message("Envelope.update", wire_type, buf)?;
                    records.push(Record::Update(self.decode_update(body)?));
                }
                tags::envelope::SPAN => {
                    let body = read_message("Envelope.spans", wire_type, buf)?;
                    records.push(Record::Span(self.decode_span(body)?));
                }
                tags::envelope::METADATA => {
                    let body = read_message("Envelope.metadata", wire_type, buf)?;
                    records.push(Record::Metadata(self.decode_metadata(body)?));
                }
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        Ok(records)
    }

    pub fn decode_update(&self, buf: &[u8]) -> Result<Update, DecodeError> {
        let mut update = Update::default();
        self.for_each_field("Update", buf, |tag, wire_type, buf| {
            match tag {
                tags::update::LOG_EVENTS => {
                    let body = read_message("Update.log_events", wire_type, buf)?;
                    update.log_events.push(self.decode_log_event(body)?);
                }
                tags::update::DROPPED_EVENTS => {
                    update.dropped_events = read_varint("Update.dropped_events", wire_type, buf)?;
                }
                tags::update::SESSION_RESET => {
                    update.session_reset = read_varint("Update.session_reset", wire_type, buf)? != 0;
                }
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        Ok(update)
    }

    pub fn decode_log_event(&self, buf: &[u8]) -> Result<LogEvent, DecodeError> {
        let mut event = LogEvent {
            message: String::new(),
            parent: None,
            metadata_id: MetaId(0),
            fields: Vec::new(),
            at: None,
        };
        self.for_each_field("LogEvent", buf, |tag, wire_type, buf| {
            match tag {
                tags::log_event::MESSAGE => {
                    event.message = read_string("LogEvent.message", wire_type, buf)?;
                }
                tags::log_event::PARENT => {
                    event.parent = Some(SpanId(read_varint("LogEvent.parent", wire_type, buf)?));
                }
                tags::log_event::METADATA_ID => {
                    event.metadata_id = MetaId(read_varint("LogEvent.metadata_id", wire_type, buf)?);
                }
                tags::log_event::FIELDS => {
                    let body = read_message("LogEvent.fields", wire_type, buf)?;
                    event.fields.push(self.decode_field(body)?);
                }
                tags::log_event::AT => {
                    let body = read_message("LogEvent.at", wire_type, buf)?;
                    event.at = Some(self.decode_timestamp(body)?);
                }
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        Ok(event)
    }

    pub fn decode_span(&self, buf: &[u8]) -> Result<Span, DecodeError> {
        let mut id = None;
        let mut span = Span::new(SpanId(0));
        self.for_each_field("Span", buf, |tag, wire_type, buf| {
            match tag {
                tags::span::ID => {
                    id = Some(SpanId(read_varint("Span.id", wire_type, buf)?));
                }
                tags::span::PARENT => {
                    span.parent = Some(SpanId(read_varint("Span.parent", wire_type, buf)?));
                }
                tags::span::METADATA_ID => {
                    span.metadata_id = Some(MetaId(read_varint("Span.metadata_id", wire_type, buf)?));
                }
                tags::span::FIELDS => {
                    let body = read_message("Span.fields", wire_type, buf)?;
                    span.fields.push(self.decode_field(body)?);
                }
                tags::span::CREATED_AT => {
                    let body = read_message("Span.created_at", wire_type, buf)?;
                    span.created_at = Some(self.decode_timestamp(body)?);
                }
                tags::span::CLOSED_AT => {
                    let body = read_message("Span.closed_at", wire_type, buf)?;
                    span.closed_at = Some(self.decode_timestamp(body)?);
                }
                tags::span::KIND => {
                    let raw = read_varint("Span.kind", wire_type, buf)?;
                    span.kind = SpanKind::from_wire(raw).unwrap_or_else(|| {
                        tracing::debug!(kind = raw, "unknown span kind, treating as generic");
                        SpanKind::Generic
                    });
                }
                tags::span::INPUTS => {
                    span.inputs = Some(read_string("Span.inputs", wire_type, buf)?);
                }
                tags::span::TAURI_INPUTS => {
                    span.tauri_inputs = Some(read_string("Span.tauri_inputs", wire_type, buf)?);
                }
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        span.id = id.ok_or_else(|| DecodeError::malformed("Span.id is missing"))?;
        Ok(span)
    }

    pub fn decode_field(&self, buf: &[u8]) -> Result<Field, DecodeError> {
        let mut name = String::new();
        let mut value = None;
        self.for_each_field("Field", buf, |tag, wire_type, buf| {
            match tag {
                tags::field::NAME => name = read_string("Field.name", wire_type, buf)?,
                tags::field::DEBUG_VAL => {
                    value = Some(FieldValue::Debug(read_string("Field.debug_val", wire_type, buf)?));
                }
                tags::field::STR_VAL => {
                    value = Some(FieldValue::Str(read_string("Field.str_val", wire_type, buf)?));
                }
                tags::field::U64_VAL => {
                    value = Some(FieldValue::U64(read_varint("Field.u64_val", wire_type, buf)?));
                }
                tags::field::I64_VAL => {
                    let raw = read_varint("Field.i64_val", wire_type, buf)?;
                    value = Some(FieldValue::I64(zigzag_decode(raw)));
                }
                tags::field::BOOL_VAL => {
                    value = Some(FieldValue::Bool(read_varint("Field.bool_val", wire_type, buf)? != 0));
                }
                tags::field::F64_VAL => {
                    let raw = read_fixed64("Field.f64_val", wire_type, buf)?;
                    value = Some(FieldValue::F64(f64::from_bits(raw)));
                }
                _ => return Ok(false),
            }
            Ok(true)
        })?;

        // A value type added by a newer sender was skipped as unknown.
        let value = value.unwrap_or_else(|| FieldValue::Debug(String::new()));
        Ok(Field { name, value })
    }

    pub fn decode_metadata(&self, buf: &[u8]) -> Result<MetaInfo, DecodeError> {
        let mut meta = MetaInfo::new(MetaId(0), "");
        self.for_each_field("Metadata", buf, |tag, wire_type, buf| {
            match tag {
                tags::metadata::ID => meta.id = MetaId(read_varint("Metadata.id", wire_type, buf)?),
                tags::metadata::NAME => meta.name = read_string("Metadata.name", wire_type, buf)?,
                tags::metadata::TARGET => {
                    meta.target = read_string("Metadata.target", wire_type, buf)?;
                }
                tags::metadata::LOCATION => {
                    let body = read_message("Metadata.location", wire_type, buf)?;
                    meta.location = Some(self.decode_location(body)?);
                }
                tags::metadata::LEVEL => {
                    let raw = read_varint("Metadata.level", wire_type, buf)?;
                    meta.level = Level::from_wire(raw).unwrap_or_else(|| {
                        tracing::debug!(level = raw, "unknown level, treating as trace");
                        Level::Trace
                    });
                }
                tags::metadata::FIELD_NAMES => {
                    meta.field_names
                        .push(read_string("Metadata.field_names", wire_type, buf)?);
                }
                tags::metadata::IS_SPAN => {
                    meta.is_span = read_varint("Metadata.is_span", wire_type, buf)? != 0;
                }
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        Ok(meta)
    }

    fn decode_location(&self, buf: &[u8]) -> Result<Location, DecodeError> {
        let mut location = Location::default();
        self.for_each_field("Location", buf, |tag, wire_type, buf| {
            match tag {
                tags::location::FILE => {
                    location.file = read_string("Location.file", wire_type, buf)?;
                }
                tags::location::LINE => {
                    location.line = read_u32("Location.line", wire_type, buf)?;
                }
                tags::location::COLUMN => {
                    location.column = read_u32("Location.column", wire_type, buf)?;
                }
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        Ok(location)
    }

    fn decode_timestamp(&self, buf: &[u8]) -> Result<Timestamp, DecodeError> {
        let mut ts = Timestamp::default();
        self.for_each_field("Timestamp", buf, |tag, wire_type, buf| {
            match tag {
                tags::timestamp::SECONDS => {
                    ts.seconds = read_varint("Timestamp.seconds", wire_type, buf)? as i64;
                }
                tags::timestamp::NANOS => {
                    ts.nanos = read_varint("Timestamp.nanos", wire_type, buf)? as i64 as i32;
                }
                _ => return Ok(false),
            }
            Ok(true)
        })?;
        Ok(ts)
    }

    /// Walks the fields of one message. `visit` returns `false` for field
    /// numbers it does not know, without consuming anything; those are
    /// skipped by wire type and reported to the policy.
    fn for_each_field<'a, F>(
        &self,
        message: &'static str,
        mut buf: &'a [u8],
        mut visit: F,
    ) -> Result<(), DecodeError>
    where
        F: FnMut(u32, WireType, &mut &'a [u8]) -> Result<bool, DecodeError>,
    {
        while buf.has_remaining() {
            let (tag, wire_type) = decode_key(&mut buf)?;
            if visit(tag, wire_type, &mut buf)? {
                continue;
            }

            let raw = skip_field(wire_type, &mut buf)?;
            match &self.policy {
                UnknownFieldPolicy::Discard => {}
                UnknownFieldPolicy::Observe(observer) => {
                    tracing::debug!(
                        msg_type = message,
                        tag,
                        ?wire_type,
                        len = raw.len(),
                        "unknown field"
                    );
                    observer.on_unknown_field(UnknownField {
                        message,
                        tag,
                        wire_type,
                        raw: raw.to_vec(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn expect_wire_type(
    field: &'static str,
    actual: WireType,
    expected: WireType,
) -> Result<(), DecodeError> {
    if actual == expected {
        Ok(())
    } else {
        Err(DecodeError::malformed(format!(
            "{field}: expected wire type {expected:?}, got {actual:?}"
        )))
    }
}

fn read_varint(
    field: &'static str,
    wire_type: WireType,
    buf: &mut &[u8],
) -> Result<u64, DecodeError> {
    expect_wire_type(field, wire_type, WireType::Varint)?;
    Ok(decode_varint(buf)?)
}

fn read_u32(field: &'static str, wire_type: WireType, buf: &mut &[u8]) -> Result<u32, DecodeError> {
    let raw = read_varint(field, wire_type, buf)?;
    u32::try_from(raw).map_err(|_| DecodeError::malformed(format!("{field}: {raw} overflows u32")))
}

fn read_fixed64(
    field: &'static str,
    wire_type: WireType,
    buf: &mut &[u8],
) -> Result<u64, DecodeError> {
    expect_wire_type(field, wire_type, WireType::SixtyFourBit)?;
    advance_checked(*buf, 8)?;
    let raw = buf_take::<8>(buf).ok_or_else(|| DecodeError::malformed("fixed64 underflow"))?;
    Ok(u64::from_le_bytes(raw))
}

fn read_message<'a>(
    field: &'static str,
    wire_type: WireType,
    buf: &mut &'a [u8],
) -> Result<&'a [u8], DecodeError> {
    expect_wire_type(field, wire_type, WireType::LengthDelimited)?;
    read_length_delimited(buf)
}

fn read_string(
    field: &'static str,
    wire_type: WireType,
    buf: &mut &[u8],
) -> Result<String, DecodeError> {
    let bytes = read_message(field, wire_type, buf)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| DecodeError::malformed(format!("{field}: invalid UTF-8")))
}

/// Reads a varint length and borrows that many bytes. A length larger than
/// what is left is a truncated message.
fn read_length_delimited<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], DecodeError> {
    let declared = decode_varint(buf)?;
    let remaining = buf.len();
    if declared > remaining as u64 {
        return Err(DecodeError::TruncatedMessage {
            declared,
            remaining,
        });
    }
    let whole: &'a [u8] = *buf;
    let (body, rest) = whole.split_at(declared as usize);
    *buf = rest;
    Ok(body)
}

fn advance_checked(buf: &[u8], len: usize) -> Result<(), DecodeError> {
    if buf.len() < len {
        return Err(DecodeError::TruncatedMessage {
            declared: len as u64,
            remaining: buf.len(),
        });
    }
    Ok(())
}

fn buf_take<'a, const N: usize>(buf: &mut &'a [u8]) -> Option<[u8; N]> {
    let whole: &'a [u8] = *buf;
    let (head, rest) = whole.split_first_chunk::<N>()?;
    *buf = rest;
    Some(*head)
}

fn skip_field<'a>(wire_type: WireType, buf: &mut &'a [u8]) -> Result<&'a [u8], DecodeError> {
    let start: &'a [u8] = *buf;
    match wire_type {
        WireType::Varint => {
            decode_varint(buf)?;
        }
        WireType::SixtyFourBit => {
            advance_checked(*buf, 8)?;
            buf.advance(8);
        }
        WireType::LengthDelimited => {
            read_length_delimited(buf)?;
        }
        WireType::ThirtyTwoBit => {
            advance_checked(*buf, 4)?;
            buf.advance(4);
        }
        WireType::StartGroup | WireType::EndGroup => {
            return Err(DecodeError::malformed("group wire types are not supported"));
        }
    }
    let consumed = start.len() - buf.len();
    Ok(&start[..consumed])
}

fn zigzag_decode(raw: u64) -> i64 {
    ((raw >> 1) as i64) ^ -((raw & 1) as i64)
}
