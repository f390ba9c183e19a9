//! Turns the sender's cumulative drop counter into loss deltas.
//!
//! The counter only ever grows within one sender session. A value below the
//! last one seen means the sender started over; the tracker re-baselines and
//! reports a discontinuity instead of negative loss.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetCause {
    /// The sender flagged the reset on the wire.
    Explicit,
    /// The counter went down without a reset flag.
    CounterDecreased,
    /// First observation after the connection was lost.
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LossObservation {
    /// First counter seen on this connection; everything it reports was
    /// lost since connect.
    Initial { lost: u64 },
    Delta { lost: u64 },
    Reset {
        cause: ResetCause,
        previous: Option<u64>,
        baseline: u64,
    },
}

impl LossObservation {
    pub fn lost(&self) -> u64 {
        match self {
            LossObservation::Initial { lost } | LossObservation::Delta { lost } => *lost,
            LossObservation::Reset { .. } => 0,
        }
    }

    pub fn is_reset(&self) -> bool {
        matches!(self, LossObservation::Reset { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LossTracker {
    last: Option<u64>,
    reconnecting: bool,
    /// Baseline set by the latest observation, if that was an explicit reset.
    explicit_baseline: Option<u64>,
    total_lost: u64,
    discontinuities: u64,
}

impl LossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never fails; the counter is informational.
    pub fn observe(&mut self, dropped: u64, explicit_reset: bool) -> LossObservation {
        let previous = self.last.replace(dropped);

        let cause = if explicit_reset {
            Some(ResetCause::Explicit)
        } else if self.reconnecting {
            Some(ResetCause::Reconnect)
        } else {
            previous
                .filter(|prev| dropped < *prev)
                .map(|_| ResetCause::CounterDecreased)
        };
        self.reconnecting = false;
        self.explicit_baseline = (cause == Some(ResetCause::Explicit)).then_some(dropped);

        if let Some(cause) = cause {
            self.discontinuities += 1;
            match cause {
                ResetCause::CounterDecreased => tracing::warn!(
                    previous = ?previous,
                    baseline = dropped,
                    "drop counter decreased without reset signal; re-baselining"
                ),
                _ => tracing::info!(?cause, baseline = dropped, "drop counter re-baselined"),
            }
            return LossObservation::Reset {
                cause,
                previous,
                baseline: dropped,
            };
        }

        let observation = match previous {
            None => LossObservation::Initial { lost: dropped },
            Some(prev) => LossObservation::Delta {
                lost: dropped - prev,
            },
        };
        self.total_lost = self.total_lost.saturating_add(observation.lost());
        observation
    }

    /// The next counter is treated as coming from a new sender session.
    pub fn mark_disconnected(&mut self) {
        self.reconnecting = true;
    }

    /// True when an explicit reset at `dropped` would only repeat the
    /// previous observation.
    pub fn repeats_explicit_reset(&self, dropped: u64) -> bool {
        !self.reconnecting && self.explicit_baseline == Some(dropped)
    }

    pub fn last_observed(&self) -> Option<u64> {
        self.last
    }

    pub fn total_lost(&self) -> u64 {
        self.total_lost
    }

    pub fn discontinuities(&self) -> u64 {
        self.discontinuities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_sequence_with_implicit_reset() {
        let mut tracker = LossTracker::new();
        let seen: Vec<_> = [0, 5, 5, 12, 3]
            .into_iter()
            .map(|n| tracker.observe(n, false))
            .collect();

        assert_eq!(
            seen,
            vec![
                LossObservation::Initial { lost: 0 },
                LossObservation::Delta { lost: 5 },
                LossObservation::Delta { lost: 0 },
                LossObservation::Delta { lost: 7 },
                LossObservation::Reset {
                    cause: ResetCause::CounterDecreased,
                    previous: Some(12),
                    baseline: 3,
                },
            ]
        );
        assert_eq!(tracker.total_lost(), 12);
        assert_eq!(tracker.discontinuities(), 1);

        assert_eq!(tracker.observe(4, false), LossObservation::Delta { lost: 1 });
    }

    #[test]
    fn explicit_reset_reports_no_loss() {
        let mut tracker = LossTracker::new();
        tracker.observe(10, false);
        let obs = tracker.observe(20, true);
        assert_eq!(obs.lost(), 0);
        assert!(matches!(
            obs,
            LossObservation::Reset {
                cause: ResetCause::Explicit,
                ..
            }
        ));
        assert_eq!(tracker.total_lost(), 10);
    }

    #[test]
    fn repeated_explicit_reset_is_recognized() {
        let mut tracker = LossTracker::new();
        tracker.observe(4, false);
        tracker.observe(0, true);
        assert!(tracker.repeats_explicit_reset(0));
        assert!(!tracker.repeats_explicit_reset(2));

        tracker.observe(2, false);
        assert!(!tracker.repeats_explicit_reset(2));

        tracker.observe(0, true);
        tracker.mark_disconnected();
        assert!(!tracker.repeats_explicit_reset(0));
    }

    #[test]
    fn reconnect_rebaselines_even_when_counter_grows() {
        let mut tracker = LossTracker::new();
        tracker.observe(2, false);
        tracker.mark_disconnected();

        let obs = tracker.observe(40, false);
        assert_eq!(
            obs,
            LossObservation::Reset {
                cause: ResetCause::Reconnect,
                previous: Some(2),
                baseline: 40,
            }
        );
        assert_eq!(tracker.observe(41, false).lost(), 1);
    }
}
