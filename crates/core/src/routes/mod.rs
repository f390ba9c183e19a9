//! Event type -> subscriber inbox table used by the bus.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    events::EnrichedEvent,
    queues::{FifoDropOldestQueue, IsolatedForwarder, Latest1Queue},
};

pub enum RouteInbox {
    Latest1(Arc<Latest1Queue<Arc<EnrichedEvent>>>),
    FifoDropOldest(Arc<FifoDropOldestQueue<Arc<EnrichedEvent>>>),
    Isolated(IsolatedForwarder<Arc<EnrichedEvent>>),
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// A pending snapshot was replaced. Not a loss.
    Superseded,
    /// The oldest queued event was evicted to make room.
    EvictedOldest,
    /// The inbox was full and this event was dropped.
    Rejected,
}

impl Delivery {
    pub fn is_loss(self) -> bool {
        matches!(self, Delivery::EvictedOldest | Delivery::Rejected)
    }
}

impl RouteInbox {
    pub fn deliver(&self, event: Arc<EnrichedEvent>) -> Delivery {
        match self {
            RouteInbox::Latest1(slot) => {
                if slot.set(event) {
                    Delivery::Superseded
                } else {
                    Delivery::Queued
                }
            }
            RouteInbox::FifoDropOldest(queue) => match queue.push(event) {
                Some(_) => Delivery::EvictedOldest,
                None => Delivery::Queued,
            },
            RouteInbox::Isolated(fwd) => {
                if fwd.offer(event) {
                    Delivery::Queued
                } else {
                    Delivery::Rejected
                }
            }
        }
    }
}

pub struct Route {
    pub subscriber_id: &'static str,
    pub inbox: RouteInbox,
    drops: AtomicU64,
}

impl Route {
    pub fn new(subscriber_id: &'static str, inbox: RouteInbox) -> Self {
        Self {
            subscriber_id,
            inbox,
            drops: AtomicU64::new(0),
        }
    }

    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct Routes {
    table: HashMap<&'static str, Vec<Route>>,
}

impl Routes {
    pub fn add(&mut self, event_type: &'static str, route: Route) {
        self.table.entry(event_type).or_default().push(route);
    }

    /// Offers `event` to every route of its type. `None` when nobody
    /// subscribed to it.
    pub fn deliver(&self, event: &Arc<EnrichedEvent>) -> Option<Vec<(&'static str, Delivery)>> {
        let routes = self.table.get(event.event_type())?;
        let outcomes = routes
            .iter()
            .map(|route| {
                let delivery = route.inbox.deliver(Arc::clone(event));
                if delivery.is_loss() {
                    route.drops.fetch_add(1, Ordering::Relaxed);
                }
                (route.subscriber_id, delivery)
            })
            .collect();
        Some(outcomes)
    }

    /// Events `subscriber_id` lost across all of its inboxes.
    pub fn drops_for(&self, subscriber_id: &str) -> u64 {
        self.table
            .values()
            .flatten()
            .filter(|route| route.subscriber_id == subscriber_id)
            .map(Route::drops)
            .sum()
    }
}
