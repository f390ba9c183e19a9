//! Per-connection engine state.
//!
//! A [`Session`] is created when a monitored process connects and torn down
//! when it goes away. Writes go through the ingestion loop only; queries may
//! come from any thread and copy what they need out of a read lock.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    codec::UnknownField,
    config::EngineConfig,
    connection::ServingStatus,
    error::Result,
    events::{
        Event, EventBus, LossObserved, NoticeHeader, SessionReset, StatusChanged,
        TopologyCorrupted, UnknownFieldSeen,
    },
    fields::{ArgsSummary, DisplayFilter},
    loss::{LossObservation, LossTracker},
    store::{ApplyOutcome, LogRecord, SpanRecord, SpanStore},
    timeline::{Granularity, TimeRange, TimelineEngine, TimelineView},
    tree::{CallTree, TopologyWarning},
    types::{MetaId, MetaInfo, Record, Span, SpanId, Update},
};

pub struct Session {
    id: Uuid,
    store: RwLock<SpanStore>,
    loss: Mutex<LossTracker>,
    granularity: AtomicU32,
    timeline: TimelineEngine,
    display: DisplayFilter,
    status: watch::Sender<ServingStatus>,
    bus: Option<EventBus>,
    reported_cycles: Mutex<HashSet<Vec<SpanId>>>,
    invalidate_on_reset: bool,
}

impl Session {
    pub fn new(config: &EngineConfig) -> Self {
        let (status, _) = watch::channel(ServingStatus::Unknown);
        Self {
            id: Uuid::new_v4(),
            store: RwLock::new(SpanStore::new()),
            loss: Mutex::new(LossTracker::new()),
            granularity: AtomicU32::new(config.default_granularity().get()),
            timeline: config.timeline.engine(),
            display: config.display_filter(),
            status,
            bus: None,
            reported_cycles: Mutex::new(HashSet::new()),
            invalidate_on_reset: config.invalidate_on_reset,
        }
    }

    /// Publishes notices on `bus`; the session takes the bus's session id.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.id = bus.session_id();
        self.bus = Some(bus);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Applies one decoded frame. The store stays write-locked for the
    /// whole batch so readers never see half of a frame.
    pub fn apply_records(&self, records: Vec<Record>) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        let mut notices: Vec<Arc<dyn Event>> = Vec::new();
        {
            let mut store = self.store.write();
            for record in records {
                let applied = match record {
                    Record::Update(update) => {
                        self.apply_update_locked(&mut store, &update, &mut notices)
                    }
                    Record::Span(span) => store.apply_span(span),
                    Record::Metadata(meta) => store.apply_metadata(meta),
                };
                outcome.absorb(applied);
            }
        }
        self.publish_all(notices);
        outcome
    }

    /// Observes the drop counter and merges the update's log events.
    pub fn apply_update(&self, update: &Update) -> ApplyOutcome {
        let mut notices = Vec::new();
        let outcome = {
            let mut store = self.store.write();
            self.apply_update_locked(&mut store, update, &mut notices)
        };
        self.publish_all(notices);
        outcome
    }

    pub fn apply_span(&self, span: Span) -> ApplyOutcome {
        self.store.write().apply_span(span)
    }

    pub fn apply_metadata(&self, meta: MetaInfo) -> ApplyOutcome {
        self.store.write().apply_metadata(meta)
    }

    fn apply_update_locked(
        &self,
        store: &mut SpanStore,
        update: &Update,
        notices: &mut Vec<Arc<dyn Event>>,
    ) -> ApplyOutcome {
        let (observation, total_lost) = {
            let mut loss = self.loss.lock();
            let repeated = update.session_reset
                && loss.repeats_explicit_reset(update.dropped_events)
                && update.log_events.iter().all(|event| store.contains_log(event));
            if repeated {
                tracing::debug!(session = %self.id, "reset update delivered again");
                return store.apply_update(update);
            }
            let observation = loss.observe(update.dropped_events, update.session_reset);
            (observation, loss.total_lost())
        };

        match observation {
            LossObservation::Reset { .. } => {
                let clear = self.invalidate_on_reset && !store.is_empty();
                if clear {
                    tracing::info!(session = %self.id, "clearing store after sender reset");
                    store.clear();
                    self.reported_cycles.lock().clear();
                }
                if let Some(notice) = SessionReset::from_observation(self.id, &observation, clear) {
                    notices.push(Arc::new(notice));
                }
            }
            _ if observation.lost() > 0 => {
                notices.push(Arc::new(LossObserved {
                    header: NoticeHeader::new(self.id),
                    lost: observation.lost(),
                    total_lost,
                }));
            }
            _ => {}
        }

        store.apply_update(update)
    }

    pub fn span(&self, id: SpanId) -> Option<SpanRecord> {
        self.store.read().span(id).cloned()
    }

    pub fn metadata(&self, id: MetaId) -> Option<MetaInfo> {
        self.store.read().metadata(id).cloned()
    }

    pub fn logs_for_span(&self, id: SpanId) -> Vec<LogRecord> {
        self.store.read().logs_for_span(id).cloned().collect()
    }

    /// Runs `f` against a consistent view of the store.
    pub fn with_store<T>(&self, f: impl FnOnce(&SpanStore) -> T) -> T {
        f(&self.store.read())
    }

    /// Builds the call tree and reports each parent cycle once.
    pub fn call_tree(&self) -> CallTree {
        let tree = CallTree::build(&self.store.read());
        if tree.is_corrupt() {
            let fresh: Vec<TopologyWarning> = {
                let mut reported = self.reported_cycles.lock();
                tree.warnings()
                    .iter()
                    .filter(|warning| {
                        let TopologyWarning::CorruptTopology { cycle, .. } = warning;
                        reported.insert(cycle.clone())
                    })
                    .cloned()
                    .collect()
            };
            self.publish_all(
                fresh
                    .into_iter()
                    .map(|warning| {
                        Arc::new(TopologyCorrupted {
                            header: NoticeHeader::new(self.id),
                            warning,
                        }) as Arc<dyn Event>
                    })
                    .collect(),
            );
        }
        tree
    }

    pub fn roots(&self) -> Vec<SpanId> {
        self.call_tree().roots().to_vec()
    }

    pub fn children(&self, id: SpanId) -> Vec<SpanId> {
        self.call_tree().children(id).to_vec()
    }

    pub fn summarize(&self, id: SpanId) -> Option<ArgsSummary> {
        let store = self.store.read();
        store.span(id).map(|span| self.display.summarize(span))
    }

    pub fn display_filter(&self) -> &DisplayFilter {
        &self.display
    }

    /// Timeline at the session's current granularity.
    pub fn timeline(&self, range: TimeRange) -> Result<TimelineView> {
        self.timeline_with(range, self.granularity())
    }

    pub fn timeline_with(&self, range: TimeRange, granularity: Granularity) -> Result<TimelineView> {
        let store = self.store.read();
        Ok(self.timeline.compute(store.spans(), range, granularity)?)
    }

    /// Range covering every span with a known start.
    pub fn time_range(&self) -> Option<TimeRange> {
        TimeRange::covering(self.store.read().spans())
    }

    pub fn granularity(&self) -> Granularity {
        Granularity::new(self.granularity.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn set_granularity(&self, value: u32) -> Result<Granularity> {
        let granularity = Granularity::new(value)?;
        self.granularity.store(granularity.get(), Ordering::Release);
        Ok(granularity)
    }

    pub fn loss_count(&self) -> u64 {
        self.loss.lock().total_lost()
    }

    pub fn discontinuities(&self) -> u64 {
        self.loss.lock().discontinuities()
    }

    pub fn mark_disconnected(&self) {
        self.loss.lock().mark_disconnected();
    }

    pub fn status(&self) -> ServingStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ServingStatus> {
        self.status.subscribe()
    }

    pub fn set_status(&self, status: ServingStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            tracing::info!(session = %self.id, ?status, "connection status changed");
            self.publish(Arc::new(StatusChanged {
                header: NoticeHeader::new(self.id),
                status,
            }));
        }
    }

    pub fn report_unknown_field(&self, field: &UnknownField) {
        self.publish(Arc::new(UnknownFieldSeen::new(self.id, field)));
    }

    /// Drops every record and counter of the session.
    pub fn teardown(&self) {
        self.store.write().clear();
        *self.loss.lock() = LossTracker::new();
        self.reported_cycles.lock().clear();
        self.set_status(ServingStatus::NotServing);
        tracing::info!(session = %self.id, "session torn down");
    }

    pub(crate) fn publish(&self, notice: Arc<dyn Event>) {
        if let Some(bus) = &self.bus {
            bus.publish(notice);
        }
    }

    fn publish_all(&self, notices: Vec<Arc<dyn Event>>) {
        for notice in notices {
            self.publish(notice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogEvent, Timestamp};

    fn update(dropped: u64) -> Update {
        Update {
            dropped_events: dropped,
            ..Update::default()
        }
    }

    #[test]
    fn granularity_is_bounded() {
        let session = Session::new(&EngineConfig::default());
        assert_eq!(session.granularity().get(), 1);
        assert!(session.set_granularity(0).is_err());
        assert!(session.set_granularity(10_001).is_err());
        assert_eq!(session.set_granularity(250).unwrap().get(), 250);
        assert_eq!(session.granularity().get(), 250);
    }

    #[test]
    fn granularity_change_leaves_store_alone() {
        let session = Session::new(&EngineConfig::default());
        let mut span = Span::new(SpanId(1));
        span.created_at = Some(Timestamp::from_unix_nanos(0));
        span.closed_at = Some(Timestamp::from_unix_nanos(10));
        session.apply_span(span);

        let before = session.with_store(SpanStore::clone);
        session.set_granularity(5).unwrap();
        let view = session.timeline(TimeRange::new(0, 10)).unwrap();
        assert_eq!(view.buckets.len(), 2);
        assert!(view.skewed);
        assert_eq!(session.with_store(SpanStore::clone), before);
    }

    #[test]
    fn loss_is_tracked_per_update() {
        let session = Session::new(&EngineConfig::default());
        for dropped in [0, 5, 5, 12, 3] {
            session.apply_update(&update(dropped));
        }
        assert_eq!(session.loss_count(), 12);
        assert_eq!(session.discontinuities(), 1);
    }

    #[test]
    fn reset_can_invalidate_store() {
        let config = EngineConfig {
            invalidate_on_reset: true,
            ..EngineConfig::default()
        };
        let session = Session::new(&config);
        session.apply_update(&Update {
            log_events: vec![LogEvent {
                message: "before".into(),
                parent: Some(SpanId(1)),
                metadata_id: MetaId(1),
                fields: Vec::new(),
                at: None,
            }],
            dropped_events: 4,
            session_reset: false,
        });
        assert!(session.span(SpanId(1)).is_some());

        session.apply_update(&update(1));
        assert!(session.span(SpanId(1)).is_none());
        assert_eq!(session.with_store(|s| s.log_count()), 0);
    }

    #[test]
    fn redelivered_reset_update_is_not_a_second_reset() {
        let config = EngineConfig {
            invalidate_on_reset: true,
            ..EngineConfig::default()
        };
        let session = Session::new(&config);
        session.apply_update(&update(7));
        let reset = Update {
            log_events: vec![LogEvent {
                message: "restarted".into(),
                parent: Some(SpanId(2)),
                metadata_id: MetaId(1),
                fields: Vec::new(),
                at: None,
            }],
            dropped_events: 0,
            session_reset: true,
        };

        assert_eq!(session.apply_update(&reset).inserted, 1);
        session.apply_span(Span::new(SpanId(5)));
        let outcome = session.apply_update(&reset);

        assert_eq!(outcome.duplicates, 1);
        assert_eq!(session.discontinuities(), 1);
        assert!(session.span(SpanId(5)).is_some());
        assert_eq!(session.with_store(|s| s.log_count()), 1);
    }

    #[test]
    fn teardown_clears_everything() {
        let session = Session::new(&EngineConfig::default());
        session.apply_span(Span::new(SpanId(3)));
        session.apply_update(&update(9));
        session.teardown();

        assert!(session.with_store(SpanStore::is_empty));
        assert_eq!(session.loss_count(), 0);
        assert_eq!(session.status(), ServingStatus::NotServing);
    }
}
