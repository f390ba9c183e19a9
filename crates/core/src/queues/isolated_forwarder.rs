use std::{future::Future, pin::Pin, sync::Arc};

use tokio::sync::{Notify, mpsc};

/// Slots between the publisher and the forwarding task.
const HANDOFF_CAPACITY: usize = 16;

pub type StartupTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Forwarding tasks created while building the bus. The caller decides on
/// which runtime they run.
#[derive(Default)]
pub struct StartupTasks {
    tasks: Vec<StartupTask>,
}

impl StartupTasks {
    pub fn push(&mut self, task: StartupTask) {
        self.tasks.push(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn spawn_all(self) -> Vec<tokio::task::JoinHandle<()>> {
        self.tasks.into_iter().map(tokio::spawn).collect()
    }
}

/// Publisher side of an inbox drained by its own task, so a slow worker
/// never stalls `publish`. When the handoff is full the event is lost.
pub struct IsolatedForwarder<T> {
    handoff: mpsc::Sender<T>,
}

/// Worker side of an [`IsolatedForwarder`].
pub struct IsolatedOutput<T> {
    rx: mpsc::Receiver<T>,
}

impl<T: Send + 'static> IsolatedForwarder<T> {
    pub fn new(output_buffer: usize, wake: Arc<Notify>) -> (Self, IsolatedOutput<T>, StartupTask) {
        let (handoff, mut pending) = mpsc::channel::<T>(HANDOFF_CAPACITY);
        let (out, rx) = mpsc::channel::<T>(output_buffer.max(1));

        let forward: StartupTask = Box::pin(async move {
            while let Some(value) = pending.recv().await {
                if out.send(value).await.is_err() {
                    tracing::debug!("isolated inbox closed, forwarder exiting");
                    return;
                }
                wake.notify_one();
            }
        });

        (Self { handoff }, IsolatedOutput { rx }, forward)
    }

    /// `false` when the value was dropped.
    pub fn offer(&self, value: T) -> bool {
        self.handoff.try_send(value).is_ok()
    }
}

impl<T> IsolatedOutput<T> {
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn forwards_in_order_and_wakes() {
        let wake = Arc::new(Notify::new());
        let (fwd, mut out, task) = IsolatedForwarder::new(4, Arc::clone(&wake));
        let mut tasks = StartupTasks::default();
        tasks.push(task);
        assert_eq!(tasks.len(), 1);
        let handles = tasks.spawn_all();

        assert!(fwd.offer(1u32));
        assert!(fwd.offer(2u32));
        wake.notified().await;
        let mut seen = Vec::new();
        while seen.len() < 2 {
            match out.try_recv() {
                Some(v) => seen.push(v),
                None => tokio::task::yield_now().await,
            }
        }
        assert_eq!(seen, vec![1, 2]);

        drop(fwd);
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
