//! Devlens Core Library
//!
//! Ingestion and reconciliation engine for live span/log streams coming from
//! an instrumented process: decodes length-prefixed frames, merges spans and
//! log events into a per-session store, derives the call tree and buckets
//! spans into a concurrency timeline.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod fields;
pub mod ingest;
pub mod loss;
pub mod queues;
pub mod routes;
pub mod session;
pub mod store;
pub mod timeline;
pub mod tree;
pub mod types;
pub mod workers;

pub use codec::{
    Decoder, FrameDecoder, UnknownField, UnknownFieldLog, UnknownFieldPolicy, encode_envelope,
    encode_frame, split_frames,
};
pub use config::{EngineConfig, UnknownFieldMode};
pub use connection::{ChannelConnection, ChannelPeer, Connection, ReaderConnection, ServingStatus};
pub use error::{ConfigError, DecodeError, EngineError, Result, TimelineError};
pub use fields::{ArgsSummary, DisplayFilter, FieldNode};
pub use ingest::{IngestEnd, IngestReport, Ingestor};
pub use loss::{LossObservation, LossTracker, ResetCause};
pub use session::Session;
pub use store::{ApplyOutcome, LogId, LogRecord, SpanRecord, SpanStore};
pub use timeline::{Bucket, Granularity, TimeRange, TimelineEngine, TimelineView};
pub use tree::{CallTree, TopologyWarning};
pub use types::{
    Field, FieldValue, Level, Location, LogEvent, MetaId, MetaInfo, Record, Span, SpanId,
    SpanKind, Timestamp, Update,
};
