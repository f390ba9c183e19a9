use std::collections::{HashMap, HashSet};

use anyhow::Result;

use crate::{queues::QueueKind, workers::WorkerInputs};

/// What one subscriber wants delivered, and through which inbox kind.
pub struct SubscriptionSpec {
    pub subscriber_id: &'static str,
    pub inputs: Vec<InputSpec>,
}

pub struct InputSpec {
    pub event_type: &'static str,
    pub queue_kind: QueueKind,
}

impl InputSpec {
    pub fn new(event_type: &'static str, queue_kind: QueueKind) -> Self {
        Self {
            event_type,
            queue_kind,
        }
    }
}

impl SubscriptionSpec {
    pub fn check(&self) -> Result<()> {
        let id = self.subscriber_id;
        anyhow::ensure!(!id.trim().is_empty(), "empty subscriber_id");
        anyhow::ensure!(!self.inputs.is_empty(), "subscriber_id={id} has no inputs");

        let mut seen = HashSet::new();
        for input in &self.inputs {
            anyhow::ensure!(
                !input.event_type.trim().is_empty(),
                "subscriber_id={id} has empty event_type"
            );
            anyhow::ensure!(
                seen.insert(input.event_type),
                "subscriber_id={id} has duplicate input event_type={}",
                input.event_type
            );
            input
                .queue_kind
                .check()
                .map_err(|e| e.context(format!("subscriber_id={id} event_type={}", input.event_type)))?;
        }
        Ok(())
    }
}

/// Inputs built by the bus, handed out once per subscriber.
pub struct WorkerWiring {
    inputs: HashMap<&'static str, WorkerInputs>,
}

impl WorkerWiring {
    pub(crate) fn new(inputs: HashMap<&'static str, WorkerInputs>) -> Self {
        Self { inputs }
    }

    pub fn take(&mut self, subscriber_id: &'static str) -> Option<WorkerInputs> {
        self.inputs.remove(subscriber_id)
    }
}
