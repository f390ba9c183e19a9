//! The single writer of a session.
//!
//! Frames are decoded on the blocking pool, up to `decode_window` at a time,
//! and applied strictly in the order they arrived. Nothing that goes wrong
//! with a frame stops the loop; only shutdown or connection closure does.

use std::{collections::VecDeque, sync::Arc};

use serde::Serialize;
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{
    codec::{Decoder, UnknownField, UnknownFieldPolicy},
    config::{EngineConfig, UnknownFieldMode},
    connection::{Connection, ServingStatus},
    error::DecodeError,
    events::MessageDiscarded,
    session::Session,
    store::ApplyOutcome,
    types::Record,
};

type DecodeTask = JoinHandle<Result<Vec<Record>, DecodeError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestEnd {
    Shutdown,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub frames_applied: u64,
    pub frames_discarded: u64,
    pub outcome: ApplyOutcome,
    pub ended: IngestEnd,
}

pub struct Ingestor<C> {
    session: Arc<Session>,
    connection: C,
    decoder: Decoder,
    decode_window: usize,
}

impl<C: Connection> Ingestor<C> {
    pub fn new(session: Arc<Session>, connection: C, config: &EngineConfig) -> Self {
        let policy = match config.unknown_fields {
            UnknownFieldMode::Discard => UnknownFieldPolicy::Discard,
            UnknownFieldMode::Report => {
                let session = Arc::downgrade(&session);
                UnknownFieldPolicy::observe(move |field: UnknownField| {
                    if let Some(session) = session.upgrade() {
                        session.report_unknown_field(&field);
                    }
                })
            }
        };

        Self {
            session,
            connection,
            decoder: Decoder::new(policy),
            decode_window: config.ingest.decode_window.max(1),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Runs until `shutdown` fires or the connection closes. Frames still
    /// being decoded at shutdown are abandoned; after closure the ones
    /// already received are applied first.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> IngestReport {
        let session_id = self.session.id();
        let mut status = self.connection.status();
        let mut status_open = true;
        self.session.set_status(*status.borrow_and_update());

        let mut in_flight: VecDeque<(u64, DecodeTask)> = VecDeque::new();
        let mut next_index: u64 = 0;
        let mut closed = false;
        let mut report = IngestReport {
            frames_applied: 0,
            frames_discarded: 0,
            outcome: ApplyOutcome::default(),
            ended: IngestEnd::Closed,
        };

        tracing::info!(session = %session_id, "ingestion started");

        report.ended = loop {
            if closed && in_flight.is_empty() {
                break IngestEnd::Closed;
            }
            let can_read = !closed && in_flight.len() < self.decode_window;

            tokio::select! {
                biased;

                _ = shutdown.recv() => break IngestEnd::Shutdown,

                (index, decoded) = next_decoded(&mut in_flight) => {
                    self.finish_frame(index, decoded, &mut report);
                }

                frame = self.connection.next_frame(), if can_read => {
                    let index = next_index;
                    next_index += 1;
                    match frame {
                        Some(Ok(bytes)) => {
                            let decoder = self.decoder.clone();
                            let task = tokio::task::spawn_blocking(move || {
                                decoder.decode_envelope(&bytes)
                            });
                            in_flight.push_back((index, task));
                        }
                        Some(Err(err)) => self.discard(index, &err, &mut report),
                        None => {
                            tracing::info!(session = %session_id, "connection closed");
                            closed = true;
                        }
                    }
                }

                changed = status.changed(), if status_open => match changed {
                    Ok(()) => self.session.set_status(*status.borrow_and_update()),
                    Err(_) => status_open = false,
                },
            }
        };

        for (_, task) in in_flight.drain(..) {
            task.abort();
        }
        self.session.mark_disconnected();
        if report.ended == IngestEnd::Closed {
            self.session.set_status(ServingStatus::NotServing);
        }

        tracing::info!(
            session = %session_id,
            ended = ?report.ended,
            applied = report.frames_applied,
            discarded = report.frames_discarded,
            "ingestion stopped"
        );
        report
    }

    fn finish_frame(
        &self,
        index: u64,
        decoded: Result<Result<Vec<Record>, DecodeError>, tokio::task::JoinError>,
        report: &mut IngestReport,
    ) {
        match decoded {
            Ok(Ok(records)) => {
                let outcome = self.session.apply_records(records);
                if outcome.duplicates > 0 {
                    tracing::debug!(
                        frame = index,
                        duplicates = outcome.duplicates,
                        "duplicate records"
                    );
                }
                report.outcome.absorb(outcome);
                report.frames_applied += 1;
            }
            Ok(Err(err)) => self.discard(index, &err, report),
            Err(join_err) => {
                self.discard(index, &DecodeError::malformed(join_err.to_string()), report)
            }
        }
    }

    fn discard(&self, index: u64, err: &DecodeError, report: &mut IngestReport) {
        tracing::warn!(frame = index, error = %err, "discarding frame");
        report.frames_discarded += 1;
        self.session
            .publish(Arc::new(MessageDiscarded::new(self.session.id(), index, err)));
    }
}

/// Resolves with the oldest in-flight decode; pending while there is none.
async fn next_decoded(
    in_flight: &mut VecDeque<(u64, DecodeTask)>,
) -> (
    u64,
    Result<Result<Vec<Record>, DecodeError>, tokio::task::JoinError>,
) {
    let Some((index, task)) = in_flight.front_mut() else {
        return std::future::pending().await;
    };
    let index = *index;
    let decoded = task.await;
    in_flight.pop_front();
    (index, decoded)
}
