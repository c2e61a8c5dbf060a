//! Phases of one orchestration cycle.
//!
//! `Idle -> ContextBuilt -> Planning -> Validated -> Applying -> Done`.
//! `Failed` is reachable only from `Planning`.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    ContextBuilt,
    Planning,
    Validated,
    Applying,
    Done,
    Failed,
}

impl CyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CyclePhase::Idle => "idle",
            CyclePhase::ContextBuilt => "context_built",
            CyclePhase::Planning => "planning",
            CyclePhase::Validated => "validated",
            CyclePhase::Applying => "applying",
            CyclePhase::Done => "done",
            CyclePhase::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CyclePhase::Done | CyclePhase::Failed)
    }

    /// Whether the cycle may move from `self` to `next`.
    ///
    /// Planner errors and plan rejection both fail the cycle before anything
    /// is applied; per-action errors never do.
    pub fn can_transition_to(self, next: CyclePhase) -> bool {
        matches!(
            (self, next),
            (CyclePhase::Idle, CyclePhase::ContextBuilt)
                | (CyclePhase::ContextBuilt, CyclePhase::Planning)
                | (CyclePhase::Planning, CyclePhase::Validated)
                | (CyclePhase::Planning, CyclePhase::Failed)
                | (CyclePhase::Validated, CyclePhase::Applying)
                | (CyclePhase::Applying, CyclePhase::Done)
        )
    }
}
