use std::sync::Arc;

use tokio::sync::Notify;

use crate::{
    events::EnrichedEvent,
    queues::{FifoDropOldestQueue, IsolatedOutput, Latest1Queue},
};

type Shared = Arc<EnrichedEvent>;

pub struct SnapshotInput {
    pub event_type: &'static str,
    pub slot: Arc<Latest1Queue<Shared>>,
}

pub enum FifoSource {
    DropOldest(Arc<FifoDropOldestQueue<Shared>>),
    Isolated(IsolatedOutput<Shared>),
}

impl FifoSource {
    fn try_recv(&mut self) -> Option<Shared> {
        match self {
            FifoSource::DropOldest(queue) => queue.pop(),
            FifoSource::Isolated(output) => output.try_recv(),
        }
    }
}

pub struct FifoInput {
    pub event_type: &'static str,
    pub source: FifoSource,
}

pub enum WorkerBatch {
    /// Every snapshot input that changed since the last batch.
    Snapshots(Vec<SnapshotUpdate>),
    FifoItem {
        event_type: &'static str,
        event: Shared,
    },
}

pub struct SnapshotUpdate {
    pub event_type: &'static str,
    pub event: Shared,
}

/// Every inbox of one subscriber. All of them wake the same `Notify`.
pub struct WorkerInputs {
    snapshots: Vec<SnapshotInput>,
    fifos: Vec<FifoInput>,
    wake: Arc<Notify>,
    cursor: usize,
}

impl WorkerInputs {
    pub fn new(wake: Arc<Notify>) -> Self {
        Self {
            snapshots: Vec::new(),
            fifos: Vec::new(),
            wake,
            cursor: 0,
        }
    }

    pub(crate) fn wake(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    pub fn add_snapshot(&mut self, input: SnapshotInput) {
        self.snapshots.push(input);
    }

    pub fn add_fifo(&mut self, input: FifoInput) {
        self.fifos.push(input);
    }

    /// Snapshots come first. FIFO inputs take turns so a chatty notice type
    /// cannot starve a quiet one.
    pub async fn next(&mut self) -> WorkerBatch {
        loop {
            let changed: Vec<SnapshotUpdate> = self
                .snapshots
                .iter()
                .filter_map(|input| {
                    input.slot.take().map(|event| SnapshotUpdate {
                        event_type: input.event_type,
                        event,
                    })
                })
                .collect();
            if !changed.is_empty() {
                return WorkerBatch::Snapshots(changed);
            }

            let count = self.fifos.len();
            for step in 0..count {
                let i = (self.cursor + step) % count;
                if let Some(event) = self.fifos[i].source.try_recv() {
                    self.cursor = (i + 1) % count;
                    return WorkerBatch::FifoItem {
                        event_type: self.fifos[i].event_type,
                        event,
                    };
                }
            }

            self.wake.notified().await;
        }
    }
}
