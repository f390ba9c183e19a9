use std::{any::Any, sync::Arc, time::SystemTime};

use erased_serde::Serialize as ErasedSerialize;
use tokio::time::Instant;
use uuid::Uuid;

/// Anything the engine publishes on the bus.
pub trait Event: Send + Sync + ErasedSerialize + 'static {
    fn event_id(&self) -> Uuid;
    fn event_type(&self) -> &'static str;
    /// Session the event was raised for.
    fn session_id(&self) -> Uuid;
    fn timestamp(&self) -> SystemTime;
    fn as_any(&self) -> &dyn Any;
}

erased_serde::serialize_trait_object!(Event);

/// An event as a subscriber receives it: stamped with its publish order on
/// the bus.
pub struct EnrichedEvent {
    pub event: Arc<dyn Event>,
    pub seq: u64,
    pub published_at: Instant,
}

impl EnrichedEvent {
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }

    /// The concrete notice, or an error naming both types when the event is
    /// something else.
    pub fn downcast<T: Event>(&self) -> anyhow::Result<&T> {
        self.event.as_any().downcast_ref::<T>().ok_or_else(|| {
            anyhow::anyhow!(
                "event_type={} is not a {}",
                self.event_type(),
                std::any::type_name::<T>()
            )
        })
    }
}
