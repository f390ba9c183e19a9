use std::{future::Future, sync::Arc};

use anyhow::Result;
use tokio::sync::broadcast;

use crate::{
    events::{EnrichedEvent, EventBus},
    workers::{SubscriptionSpec, WorkerBatch, WorkerInputs},
};

pub trait Worker: Send + Sized + 'static {
    const SUBSCRIBER_ID: &'static str;

    fn subscription() -> SubscriptionSpec;

    fn handle(
        &mut self,
        event: Arc<EnrichedEvent>,
        bus: &EventBus,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Runs until `shutdown` fires. Handler errors are logged and the loop
    /// keeps going.
    fn run(
        mut self,
        mut inputs: WorkerInputs,
        bus: Arc<EventBus>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return Ok(()),
                    batch = inputs.next() => match batch {
                        WorkerBatch::Snapshots(snapshots) => {
                            for snapshot in snapshots {
                                self.dispatch(snapshot.event_type, snapshot.event, &bus).await;
                            }
                        }
                        WorkerBatch::FifoItem { event_type, event } => {
                            self.dispatch(event_type, event, &bus).await;
                        }
                    }
                }
            }
        }
    }

    #[doc(hidden)]
    fn dispatch(
        &mut self,
        event_type: &'static str,
        event: Arc<EnrichedEvent>,
        bus: &EventBus,
    ) -> impl Future<Output = ()> + Send {
        async move {
            if let Err(e) = self.handle(event, bus).await {
                tracing::warn!(
                    subscriber = Self::SUBSCRIBER_ID,
                    event_type,
                    error = %e,
                    "worker failed to handle event"
                );
            }
        }
    }
}
