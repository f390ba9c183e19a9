//! Shared helpers for the devlens-core integration tests.

#![allow(dead_code)]

use std::{sync::Once, time::Duration};

use devlens_core::{Field, FieldValue, LogEvent, MetaId, Span, SpanId, SpanKind, Timestamp, Update};
use proptest::test_runner::Config as ProptestConfig;
use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging. `RUST_LOG` overrides the default `debug` filter.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    ProptestConfig::with_cases(cases)
}

pub fn ts(nanos: u64) -> Timestamp {
    Timestamp::from_unix_nanos(nanos)
}

pub fn span(id: u64, parent: Option<u64>) -> Span {
    let mut span = Span::new(SpanId(id));
    span.parent = parent.map(SpanId);
    span
}

pub fn timed_span(id: u64, parent: Option<u64>, start: u64, end: Option<u64>) -> Span {
    let mut span = span(id, parent);
    span.created_at = Some(ts(start));
    span.closed_at = end.map(ts);
    span
}

pub fn ipc_span(id: u64, inputs: &str) -> Span {
    let mut span = span(id, None);
    span.kind = SpanKind::Ipc;
    span.inputs = Some(inputs.to_owned());
    span
}

pub fn log(message: &str, parent: Option<u64>) -> LogEvent {
    LogEvent {
        message: message.to_owned(),
        parent: parent.map(SpanId),
        metadata_id: MetaId(1),
        fields: vec![Field::new("level", FieldValue::Str("info".into()))],
        at: None,
    }
}

pub fn update(log_events: Vec<LogEvent>, dropped_events: u64) -> Update {
    Update {
        log_events,
        dropped_events,
        session_reset: false,
    }
}

/// Polls `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
