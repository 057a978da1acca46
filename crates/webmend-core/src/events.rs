//! Run state transitions as observable events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// States of one healing run. A run moves strictly forward except for the
/// detect/heal/validate loop, and lands on exactly one terminal state before
/// `Reported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Detecting,
    Diagnosing,
    Healing,
    Validating,
    Resolved,
    PartialFailure,
    Escalated,
    Reported,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Resolved | RunState::PartialFailure | RunState::Escalated
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Detecting => "detecting",
            RunState::Diagnosing => "diagnosing",
            RunState::Healing => "healing",
            RunState::Validating => "validating",
            RunState::Resolved => "resolved",
            RunState::PartialFailure => "partial_failure",
            RunState::Escalated => "escalated",
            RunState::Reported => "reported",
        };
        f.write_str(s)
    }
}

/// One state transition, emitted exactly once, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub run_id: Uuid,
    pub seq: u64,
    pub state: RunState,
    pub at: DateTime<Utc>,
    pub detail: Option<String>,
}

/// Receives transition events as the run progresses.
pub trait EventSink: Send {
    fn emit(&mut self, event: TransitionEvent);
}

/// Collects events in memory; the default sink and the test observer.
#[derive(Debug, Default)]
pub struct VecSink {
    pub events: Vec<TransitionEvent>,
}

impl EventSink for VecSink {
    fn emit(&mut self, event: TransitionEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(RunState::Resolved.is_terminal());
        assert!(RunState::Escalated.is_terminal());
        assert!(!RunState::Validating.is_terminal());
        assert!(!RunState::Reported.is_terminal());
    }

    #[test]
    fn vec_sink_preserves_order() {
        let mut sink = VecSink::default();
        let run_id = Uuid::new_v4();
        for (seq, state) in [(0, RunState::Idle), (1, RunState::Detecting)] {
            sink.emit(TransitionEvent {
                run_id,
                seq,
                state,
                at: Utc::now(),
                detail: None,
            });
        }
        assert_eq!(sink.events[0].state, RunState::Idle);
        assert_eq!(sink.events[1].state, RunState::Detecting);
    }
}
