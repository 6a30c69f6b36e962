use serde::{Deserialize, Serialize};

use drip_core::types::EnrollmentStatus;
use drip_core::{DripError, DripResult};

/// Describes a single valid state transition for an enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: EnrollmentStatus,
    pub to: EnrollmentStatus,
    pub trigger: String,
}

/// Guards enrollment lifecycle by enforcing a finite set of valid
/// state transitions. Completed and canceled have no outgoing edges.
#[derive(Debug, Clone)]
pub struct EnrollmentStateMachine {
    pub transitions: Vec<StateTransition>,
}

impl EnrollmentStateMachine {
    pub fn new() -> Self {
        use EnrollmentStatus::*;

        let edge = |from, to, trigger: &str| StateTransition {
            from,
            to,
            trigger: trigger.to_string(),
        };

        let transitions = vec![
            // Active ->
            edge(Active, Paused, "pause"),
            edge(Active, Completed, "last_step_sent"),
            edge(Active, Error, "send_failed"),
            edge(Active, Canceled, "cancel"),
            // Paused -> (an in-flight send may still finish or fail)
            edge(Paused, Active, "resume"),
            edge(Paused, Completed, "last_step_sent"),
            edge(Paused, Error, "send_failed"),
            edge(Paused, Canceled, "cancel"),
            // Error -> (requires a human)
            edge(Error, Active, "resume"),
            edge(Error, Canceled, "cancel"),
        ];

        Self { transitions }
    }

    /// Returns `true` if the given transition is allowed.
    pub fn can_transition(&self, from: EnrollmentStatus, to: EnrollmentStatus) -> bool {
        self.transitions.iter().any(|t| t.from == from && t.to == to)
    }

    /// Errors with `InvalidTransition` unless `from -> to` is allowed.
    pub fn check(&self, from: EnrollmentStatus, to: EnrollmentStatus) -> DripResult<()> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(DripError::InvalidTransition { from, to })
        }
    }
}

impl Default for EnrollmentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
