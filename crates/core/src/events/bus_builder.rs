use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Result;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{
    events::{EnrichedEvent, EventBus, NOTICE_TYPES},
    queues::{FifoDropOldestQueue, IsolatedForwarder, Latest1Queue, QueueKind, StartupTasks},
    routes::{Route, RouteInbox, Routes},
    workers::{
        FifoInput, FifoSource, InputSpec, SnapshotInput, SubscriptionSpec, WorkerInputs,
        WorkerWiring,
    },
};

pub struct BusConfig {
    pub session_id: Uuid,
    /// Refuse to build unless every engine notice type has a subscriber.
    pub strict_routing: bool,
}

impl BusConfig {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            strict_routing: false,
        }
    }

    pub fn strict(mut self, strict_routing: bool) -> Self {
        self.strict_routing = strict_routing;
        self
    }
}

#[derive(Debug, Default)]
pub struct BusMetrics {
    unrouted: AtomicU64,
    superseded: AtomicU64,
}

impl BusMetrics {
    pub(crate) fn record_unrouted(&self, event_type: &'static str) {
        self.unrouted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(event_type, "published event has no subscriber");
    }

    pub(crate) fn record_superseded(&self) {
        self.superseded.fetch_add(1, Ordering::Relaxed);
    }

    /// Publishes nobody subscribed to.
    pub fn unrouted(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }

    /// Snapshots replaced before their worker took them.
    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }
}

pub struct EventBusBuilder {
    cfg: BusConfig,
    subs: Vec<SubscriptionSpec>,
}

impl EventBusBuilder {
    pub fn new(cfg: BusConfig) -> Self {
        Self {
            cfg,
            subs: Vec::new(),
        }
    }

    pub fn subscribe(mut self, spec: SubscriptionSpec) -> Self {
        self.subs.push(spec);
        self
    }

    fn check(&self) -> Result<()> {
        let mut subscribers = HashSet::new();
        for spec in &self.subs {
            spec.check()?;
            anyhow::ensure!(
                subscribers.insert(spec.subscriber_id),
                "duplicate subscriber_id={}",
                spec.subscriber_id
            );
        }

        if self.cfg.strict_routing {
            let routed: HashSet<&str> = self
                .subs
                .iter()
                .flat_map(|spec| spec.inputs.iter().map(|input| input.event_type))
                .collect();
            if let Some(missing) = NOTICE_TYPES.iter().find(|t| !routed.contains(*t)) {
                anyhow::bail!("strict routing: no subscriber for event_type={missing}");
            }
        }
        Ok(())
    }

    pub fn build(self) -> Result<(EventBus, WorkerWiring, StartupTasks)> {
        self.check()?;

        let mut routes = Routes::default();
        let mut wiring = HashMap::new();
        let mut tasks = StartupTasks::default();

        for spec in self.subs {
            let mut inputs = WorkerInputs::new(Arc::new(Notify::new()));
            for input in spec.inputs {
                let inbox = attach(&mut inputs, &input, &mut tasks);
                routes.add(input.event_type, Route::new(spec.subscriber_id, inbox));
            }
            wiring.insert(spec.subscriber_id, inputs);
        }

        tracing::debug!(
            session = %self.cfg.session_id,
            subscribers = wiring.len(),
            forwarders = tasks.len(),
            "event bus built"
        );
        let bus = EventBus::new(self.cfg.session_id, routes);
        Ok((bus, WorkerWiring::new(wiring), tasks))
    }
}

/// Creates the inbox for one input: the bus keeps the sending side, the
/// worker the receiving side.
fn attach(inputs: &mut WorkerInputs, input: &InputSpec, tasks: &mut StartupTasks) -> RouteInbox {
    let wake = inputs.wake();
    match input.queue_kind {
        QueueKind::Latest1 => {
            let slot = Arc::new(Latest1Queue::new(wake));
            inputs.add_snapshot(SnapshotInput {
                event_type: input.event_type,
                slot: Arc::clone(&slot),
            });
            RouteInbox::Latest1(slot)
        }
        QueueKind::FifoDropOldest { capacity } => {
            let queue = Arc::new(FifoDropOldestQueue::new(capacity, wake));
            inputs.add_fifo(FifoInput {
                event_type: input.event_type,
                source: FifoSource::DropOldest(Arc::clone(&queue)),
            });
            RouteInbox::FifoDropOldest(queue)
        }
        QueueKind::Isolated { output_buffer } => {
            let (fwd, output, task) =
                IsolatedForwarder::<Arc<EnrichedEvent>>::new(output_buffer, wake);
            tasks.push(task);
            inputs.add_fifo(FifoInput {
                event_type: input.event_type,
                source: FifoSource::Isolated(output),
            });
            RouteInbox::Isolated(fwd)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{LossObserved, NoticeHeader, StatusChanged};
    use crate::{connection::ServingStatus, workers::WorkerBatch};

    fn spec(id: &'static str, types: &[&'static str], kind: QueueKind) -> SubscriptionSpec {
        SubscriptionSpec {
            subscriber_id: id,
            inputs: types.iter().map(|t| InputSpec::new(*t, kind)).collect(),
        }
    }

    fn fifo(capacity: usize) -> QueueKind {
        QueueKind::FifoDropOldest { capacity }
    }

    fn loss(session: Uuid, lost: u64) -> Arc<LossObserved> {
        Arc::new(LossObserved {
            header: NoticeHeader::new(session),
            lost,
            total_lost: lost,
        })
    }

    #[test]
    fn rejects_duplicate_subscribers() {
        let err = EventBusBuilder::new(BusConfig::new(Uuid::new_v4()))
            .subscribe(spec("health", &[LossObserved::EVENT_TYPE], fifo(2)))
            .subscribe(spec("health", &[LossObserved::EVENT_TYPE], fifo(2)))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("duplicate subscriber_id=health"));
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = EventBusBuilder::new(BusConfig::new(Uuid::new_v4()))
            .subscribe(spec("health", &[LossObserved::EVENT_TYPE], fifo(0)))
            .build()
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("capacity must be > 0"));
    }

    #[test]
    fn strict_routing_requires_every_notice() {
        let err = EventBusBuilder::new(BusConfig::new(Uuid::new_v4()).strict(true))
            .subscribe(spec("health", &[LossObserved::EVENT_TYPE], fifo(2)))
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().starts_with("strict routing"));

        assert!(
            EventBusBuilder::new(BusConfig::new(Uuid::new_v4()).strict(true))
                .subscribe(spec("health", &NOTICE_TYPES, fifo(2)))
                .build()
                .is_ok()
        );
    }

    #[test]
    fn drop_oldest_counts_evictions() {
        let session = Uuid::new_v4();
        let (bus, _wiring, _tasks) = EventBusBuilder::new(BusConfig::new(session))
            .subscribe(spec("health", &[LossObserved::EVENT_TYPE], fifo(2)))
            .build()
            .unwrap();

        let delivered: usize = (0..5).map(|lost| bus.publish(loss(session, lost))).sum();
        assert_eq!(delivered, 2);
        assert_eq!(bus.drops_for("health"), 3);
        assert_eq!(bus.metrics().unrouted(), 0);

        bus.publish(Arc::new(StatusChanged {
            header: NoticeHeader::new(session),
            status: ServingStatus::Serving,
        }));
        assert_eq!(bus.metrics().unrouted(), 1);
    }

    #[tokio::test]
    async fn snapshots_are_served_before_fifo_items() {
        let session = Uuid::new_v4();
        let (bus, mut wiring, _tasks) = EventBusBuilder::new(BusConfig::new(session))
            .subscribe(SubscriptionSpec {
                subscriber_id: "health",
                inputs: vec![
                    InputSpec::new(LossObserved::EVENT_TYPE, fifo(8)),
                    InputSpec::new(StatusChanged::EVENT_TYPE, QueueKind::Latest1),
                ],
            })
            .build()
            .unwrap();
        let mut inputs = wiring.take("health").unwrap();
        assert!(wiring.take("health").is_none());

        bus.publish(loss(session, 1));
        for status in [ServingStatus::Serving, ServingStatus::NotServing] {
            bus.publish(Arc::new(StatusChanged {
                header: NoticeHeader::new(session),
                status,
            }));
        }
        assert_eq!(bus.metrics().superseded(), 1);

        let WorkerBatch::Snapshots(snapshots) = inputs.next().await else {
            panic!("expected snapshots first");
        };
        assert_eq!(snapshots.len(), 1);
        let status = snapshots[0].event.downcast::<StatusChanged>().unwrap();
        assert_eq!(status.status, ServingStatus::NotServing);

        let WorkerBatch::FifoItem { event, .. } = inputs.next().await else {
            panic!("expected the loss notice");
        };
        assert_eq!(event.downcast::<LossObserved>().unwrap().lost, 1);
        assert!(event.downcast::<StatusChanged>().is_err());
    }
}
