use serde::{Deserialize, Serialize};

use outreach_core::error::{OutreachError, OutreachResult};

use crate::types::ContactSequenceStatus;

/// Describes a single valid state transition for a contact within a sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: ContactSequenceStatus,
    pub to: ContactSequenceStatus,
    pub trigger: String,
}

/// Guards the per-(contact, sequence) lifecycle by enforcing a finite set of
/// valid state transitions.
#[derive(Debug, Clone)]
pub struct SequenceStateMachine {
    pub transitions: Vec<StateTransition>,
}

impl SequenceStateMachine {
    /// Creates a state machine with all valid transitions pre-configured.
    pub fn new() -> Self {
        use ContactSequenceStatus::*;

        let transition = |from, to, trigger: &str| StateTransition {
            from,
            to,
            trigger: trigger.to_string(),
        };

        let transitions = vec![
            // NotStarted ->
            transition(NotStarted, InCampaign, "entered_sequence"),
            // InCampaign ->
            transition(InCampaign, PendingTransition, "link_conditions_met"),
            transition(InCampaign, SequenceComplete, "chain_end_reached"),
            transition(InCampaign, SequenceExited, "all_links_failed"),
            // PendingTransition ->
            transition(PendingTransition, InCampaign, "enqueued_into_next_campaign"),
            transition(PendingTransition, SequenceExited, "transition_abandoned"),
        ];

        Self { transitions }
    }

    /// Returns `true` if the given transition is allowed.
    pub fn can_transition(
        &self,
        from: ContactSequenceStatus,
        to: ContactSequenceStatus,
    ) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.to == to)
    }

    /// Validates a transition, returning an error when it is not permitted.
    pub fn check(
        &self,
        from: ContactSequenceStatus,
        to: ContactSequenceStatus,
    ) -> OutreachResult<()> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(OutreachError::InvalidConfiguration(format!(
                "invalid sequence state transition from {from:?} to {to:?}"
            )))
        }
    }
}

impl Default for SequenceStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
