use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    events::{BusMetrics, EnrichedEvent, Event},
    routes::{Delivery, Routes},
};

/// Cheap to clone; every clone publishes into the same routes.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

struct EventBusInner {
    session_id: Uuid,
    next_seq: AtomicU64,
    routes: Routes,
    metrics: BusMetrics,
}

impl EventBus {
    pub(crate) fn new(session_id: Uuid, routes: Routes) -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                session_id,
                next_seq: AtomicU64::new(0),
                routes,
                metrics: BusMetrics::default(),
            }),
        }
    }

    /// Offers `event` to every subscriber of its type and returns how many
    /// inboxes took it without losing anything.
    pub fn publish(&self, event: Arc<dyn Event>) -> usize {
        let event_type = event.event_type();
        let enriched = Arc::new(EnrichedEvent {
            event,
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            published_at: Instant::now(),
        });

        let Some(outcomes) = self.inner.routes.deliver(&enriched) else {
            self.inner.metrics.record_unrouted(event_type);
            return 0;
        };

        let mut clean = 0;
        for (subscriber, delivery) in outcomes {
            match delivery {
                Delivery::Queued => clean += 1,
                Delivery::Superseded => {
                    self.inner.metrics.record_superseded();
                    clean += 1;
                }
                Delivery::EvictedOldest | Delivery::Rejected => {
                    tracing::debug!(subscriber, event_type, ?delivery, "subscriber lost an event");
                }
            }
        }
        clean
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn metrics(&self) -> &BusMetrics {
        &self.inner.metrics
    }

    pub fn drops_for(&self, subscriber_id: &str) -> u64 {
        self.inner.routes.drops_for(subscriber_id)
    }
}
