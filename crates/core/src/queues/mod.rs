//! Subscriber inboxes. Publishing never blocks on any of them.

pub mod fifo_drop_oldest_queue;
pub mod isolated_forwarder;
pub mod latest1_queue;

pub use fifo_drop_oldest_queue::*;
pub use isolated_forwarder::*;
pub use latest1_queue::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Only the newest event is kept; workers see it as a snapshot.
    Latest1,
    FifoDropOldest { capacity: usize },
    /// Bounded channel drained by its own task.
    Isolated { output_buffer: usize },
}

impl QueueKind {
    pub fn check(&self) -> anyhow::Result<()> {
        match *self {
            QueueKind::Latest1 => Ok(()),
            QueueKind::FifoDropOldest { capacity } => {
                anyhow::ensure!(capacity > 0, "fifo capacity must be > 0");
                Ok(())
            }
            QueueKind::Isolated { output_buffer } => {
                anyhow::ensure!(output_buffer > 0, "isolated output_buffer must be > 0");
                Ok(())
            }
        }
    }
}
