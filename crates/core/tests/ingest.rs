//! End-to-end ingestion: connection -> decode -> store -> notices.

mod common;

use std::{sync::Arc, time::Duration};

use common::{eventually, init_test_logging, ipc_span, log, span, timed_span, update};
use devlens_core::{
    EngineConfig, IngestEnd, Ingestor, ReaderConnection, Record, ServingStatus, Session, SpanId,
    UnknownFieldMode,
    codec::{encode_envelope, encode_frame},
    connection::channel,
    events::EventBusBuilder,
    workers::{HealthHandle, HealthWorker, Worker},
};
use tokio::{io::AsyncWriteExt, sync::broadcast};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

/// Session wired to a running health worker.
fn session_with_health(
    config: &EngineConfig,
    shutdown: &broadcast::Sender<()>,
) -> (Arc<Session>, HealthHandle) {
    let (bus, mut wiring, tasks) = EventBusBuilder::new(config.bus_config(Uuid::new_v4()))
        .subscribe(HealthWorker::subscription())
        .build()
        .unwrap();
    tasks.spawn_all();

    let worker = HealthWorker::new();
    let health = worker.handle_ref();
    let inputs = wiring.take(HealthWorker::SUBSCRIBER_ID).unwrap();
    tokio::spawn(worker.run(inputs, Arc::new(bus.clone()), shutdown.subscribe()));

    (Arc::new(Session::new(config).with_bus(bus)), health)
}

#[tokio::test]
async fn frames_are_applied_in_arrival_order() {
    init_test_logging();
    let config = EngineConfig::default();
    let session = Arc::new(Session::new(&config));
    let (peer, conn) = channel(16);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let ingest = tokio::spawn(Ingestor::new(Arc::clone(&session), conn, &config).run(shutdown_rx));

    // the same span delivered twice with different ends; the later end wins
    peer.send_records(&[Record::Span(timed_span(1, None, 0, Some(10)))])
        .await
        .unwrap();
    peer.send_records(&[Record::Span(timed_span(1, None, 0, Some(20)))])
        .await
        .unwrap();
    peer.send_records(&[Record::Span(timed_span(2, Some(1), 5, Some(8)))])
        .await
        .unwrap();
    peer.close();

    let report = ingest.await.unwrap();
    assert_eq!(report.ended, IngestEnd::Closed);
    assert_eq!(report.frames_applied, 3);
    assert_eq!(report.frames_discarded, 0);
    assert_eq!(report.outcome.inserted, 2);
    assert_eq!(report.outcome.merged, 1);

    assert_eq!(session.span(SpanId(1)).unwrap().end_nanos(), Some(20));
    assert_eq!(session.children(SpanId(1)), vec![SpanId(2)]);
    assert_eq!(session.status(), ServingStatus::NotServing);
}

#[tokio::test]
async fn malformed_frame_is_discarded_and_stream_continues() {
    init_test_logging();
    let config = EngineConfig::default();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (session, health) = session_with_health(&config, &shutdown_tx);
    let (peer, conn) = channel(16);
    let ingest = tokio::spawn(Ingestor::new(Arc::clone(&session), conn, &config).run(shutdown_rx));

    peer.send_records(&[Record::Span(span(1, None))]).await.unwrap();
    peer.send(vec![0x12, 0x05, 0x08]).await.unwrap();
    peer.send_records(&[Record::Span(span(2, None))]).await.unwrap();
    peer.close();

    let report = ingest.await.unwrap();
    assert_eq!(report.frames_applied, 2);
    assert_eq!(report.frames_discarded, 1);
    assert!(session.span(SpanId(1)).is_some());
    assert!(session.span(SpanId(2)).is_some());

    assert!(eventually(WAIT, || health.snapshot().discarded_frames == 1).await);
    assert!(eventually(WAIT, || health.snapshot().status == ServingStatus::NotServing).await);
    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn shutdown_stops_a_live_connection() {
    init_test_logging();
    let config = EngineConfig::default();
    let session = Arc::new(Session::new(&config));
    let (peer, conn) = channel(16);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let ingest = tokio::spawn(Ingestor::new(Arc::clone(&session), conn, &config).run(shutdown_rx));

    peer.send_records(&[Record::Span(span(5, None))]).await.unwrap();
    assert!(eventually(WAIT, || session.span(SpanId(5)).is_some()).await);

    shutdown_tx.send(()).unwrap();
    let report = ingest.await.unwrap();
    assert_eq!(report.ended, IngestEnd::Shutdown);
    assert_eq!(report.frames_applied, 1);
    // the peer is still connected; status is left as the transport reported it
    assert_eq!(session.status(), ServingStatus::Serving);
    drop(peer);
}

#[tokio::test]
async fn loss_and_resets_reach_the_health_worker() {
    init_test_logging();
    let config = EngineConfig::default();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (session, health) = session_with_health(&config, &shutdown_tx);
    let (peer, conn) = channel(16);
    let ingest = tokio::spawn(Ingestor::new(Arc::clone(&session), conn, &config).run(shutdown_rx));

    for dropped in [0, 5, 5, 12, 3] {
        peer.send_records(&[Record::Update(update(Vec::new(), dropped))])
            .await
            .unwrap();
    }
    peer.close();
    ingest.await.unwrap();

    assert_eq!(session.loss_count(), 12);
    assert_eq!(session.discontinuities(), 1);
    assert!(eventually(WAIT, || {
        let summary = health.snapshot();
        summary.total_lost == 12 && summary.resets == 1
    })
    .await);
    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn reported_unknown_fields_become_notices() {
    init_test_logging();
    let config = EngineConfig {
        unknown_fields: UnknownFieldMode::Report,
        ..EngineConfig::default()
    };
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (session, health) = session_with_health(&config, &shutdown_tx);
    let (peer, conn) = channel(16);
    let ingest = tokio::spawn(Ingestor::new(Arc::clone(&session), conn, &config).run(shutdown_rx));

    let mut body = encode_envelope(&[Record::Span(ipc_span(9, r#"{"path":"/tmp"}"#))]);
    // field 15, varint: a record type this build does not know
    body.extend_from_slice(&[0x78, 0x01]);
    peer.send(body).await.unwrap();
    peer.close();

    let report = ingest.await.unwrap();
    assert_eq!(report.frames_applied, 1);
    assert!(session.span(SpanId(9)).is_some());
    assert!(eventually(WAIT, || health.snapshot().unknown_fields == 1).await);
    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn stream_connection_feeds_the_session() {
    init_test_logging();
    let config = EngineConfig::default();
    let session = Arc::new(Session::new(&config));
    let (mut tx, rx) = tokio::io::duplex(32);
    let conn = ReaderConnection::new(rx, config.ingest.max_frame_len, 7);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let ingest = tokio::spawn(Ingestor::new(Arc::clone(&session), conn, &config).run(shutdown_rx));

    let mut stream = encode_frame(&[Record::Span(ipc_span(1, r#"{"a":1}"#))]);
    stream.extend(encode_frame(&[Record::Update(update(
        vec![log("inside", Some(1)), log("orphan", Some(2))],
        0,
    ))]));
    tx.write_all(&stream).await.unwrap();
    drop(tx);

    let report = ingest.await.unwrap();
    assert_eq!(report.ended, IngestEnd::Closed);
    assert_eq!(report.frames_applied, 2);
    assert_eq!(report.outcome.placeholders_created, 1);

    assert_eq!(session.logs_for_span(SpanId(1)).len(), 1);
    assert!(!session.span(SpanId(2)).unwrap().resolved);
    let summary = session.summarize(SpanId(1)).unwrap();
    assert_eq!(summary.title, "Inputs");
    assert_eq!(summary.entries[0].0, "a");
}
