use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Single-slot inbox: a subscriber only ever sees the newest value.
pub struct Latest1Queue<T> {
    slot: Mutex<Option<T>>,
    wake: Arc<Notify>,
}

impl<T> Latest1Queue<T> {
    pub fn new(wake: Arc<Notify>) -> Self {
        Self {
            slot: Mutex::new(None),
            wake,
        }
    }

    /// Stores `value`; returns `true` if it superseded one never taken.
    pub fn set(&self, value: T) -> bool {
        let superseded = self.slot.lock().replace(value).is_some();
        self.wake.notify_one();
        superseded
    }

    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_value_wins() {
        let slot = Latest1Queue::new(Arc::new(Notify::new()));
        assert!(!slot.set("serving"));
        assert!(slot.set("not_serving"));
        assert_eq!(slot.take(), Some("not_serving"));
        assert_eq!(slot.take(), None);
    }
}
