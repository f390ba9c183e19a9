use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use serde::Serialize;

use crate::{
    connection::ServingStatus,
    events::{
        EnrichedEvent, EventBus, LossObserved, MessageDiscarded, SessionReset, StatusChanged,
        TopologyCorrupted, UnknownFieldSeen,
    },
    queues::QueueKind,
    workers::{InputSpec, SubscriptionSpec, Worker},
};

const NOTICE_BACKLOG: usize = 256;

/// Folded view of every notice the engine published.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub total_lost: u64,
    pub resets: u64,
    pub discarded_frames: u64,
    pub topology_warnings: u64,
    pub unknown_fields: u64,
    pub status: ServingStatus,
}

/// Read side of a [`HealthWorker`].
#[derive(Debug, Clone, Default)]
pub struct HealthHandle {
    summary: Arc<RwLock<HealthSummary>>,
}

impl HealthHandle {
    pub fn snapshot(&self) -> HealthSummary {
        self.summary.read().clone()
    }
}

#[derive(Debug, Default)]
pub struct HealthWorker {
    summary: Arc<RwLock<HealthSummary>>,
}

impl HealthWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_ref(&self) -> HealthHandle {
        HealthHandle {
            summary: Arc::clone(&self.summary),
        }
    }
}

impl Worker for HealthWorker {
    const SUBSCRIBER_ID: &'static str = "health";

    fn subscription() -> SubscriptionSpec {
        let fifo = QueueKind::FifoDropOldest {
            capacity: NOTICE_BACKLOG,
        };
        SubscriptionSpec {
            subscriber_id: Self::SUBSCRIBER_ID,
            inputs: vec![
                InputSpec::new(LossObserved::EVENT_TYPE, fifo),
                InputSpec::new(SessionReset::EVENT_TYPE, fifo),
                InputSpec::new(MessageDiscarded::EVENT_TYPE, fifo),
                InputSpec::new(TopologyCorrupted::EVENT_TYPE, fifo),
                InputSpec::new(UnknownFieldSeen::EVENT_TYPE, fifo),
                // only the current status matters
                InputSpec::new(StatusChanged::EVENT_TYPE, QueueKind::Latest1),
            ],
        }
    }

    async fn handle(&mut self, event: Arc<EnrichedEvent>, _bus: &EventBus) -> Result<()> {
        let event_type = event.event_type();
        let mut summary = self.summary.write();
        match event_type {
            LossObserved::EVENT_TYPE => {
                summary.total_lost = event.downcast::<LossObserved>()?.total_lost;
            }
            SessionReset::EVENT_TYPE => {
                event.downcast::<SessionReset>()?;
                summary.resets += 1;
            }
            MessageDiscarded::EVENT_TYPE => {
                event.downcast::<MessageDiscarded>()?;
                summary.discarded_frames += 1;
            }
            TopologyCorrupted::EVENT_TYPE => {
                event.downcast::<TopologyCorrupted>()?;
                summary.topology_warnings += 1;
            }
            UnknownFieldSeen::EVENT_TYPE => {
                event.downcast::<UnknownFieldSeen>()?;
                summary.unknown_fields += 1;
            }
            StatusChanged::EVENT_TYPE => {
                summary.status = event.downcast::<StatusChanged>()?.status;
            }
            other => anyhow::bail!("unexpected event_type={other}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BusConfig, Event, EventBusBuilder, NoticeHeader};
    use tokio::time::Instant;
    use uuid::Uuid;

    fn enriched(event: Arc<dyn Event>) -> Arc<EnrichedEvent> {
        Arc::new(EnrichedEvent {
            event,
            seq: 0,
            published_at: Instant::now(),
        })
    }

    #[tokio::test]
    async fn folds_notices_into_summary() {
        let session = Uuid::new_v4();
        let (bus, _wiring, _tasks) = EventBusBuilder::new(BusConfig::new(session))
            .subscribe(HealthWorker::subscription())
            .build()
            .unwrap();
        let mut worker = HealthWorker::new();
        let health = worker.handle_ref();

        for total_lost in [4, 9] {
            let notice = LossObserved {
                header: NoticeHeader::new(session),
                lost: 4,
                total_lost,
            };
            worker.handle(enriched(Arc::new(notice)), &bus).await.unwrap();
        }
        let status = StatusChanged {
            header: NoticeHeader::new(session),
            status: ServingStatus::Serving,
        };
        worker.handle(enriched(Arc::new(status)), &bus).await.unwrap();

        let summary = health.snapshot();
        assert_eq!(summary.total_lost, 9);
        assert_eq!(summary.status, ServingStatus::Serving);
        assert_eq!(summary.resets, 0);
    }
}
