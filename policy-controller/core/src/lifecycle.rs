//! The per-policy reconciliation state machine.
//!
//! Transitions are pure; the controller performs the writes a transition
//! requires and then records the resulting state.

use crate::policy::Desired;
use sovereignty_controller_k8s_api::policy::Phase;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Pending,
    Active,
    Failed,
    Expired,
    /// The policy object is gone. Never persisted.
    Deleted,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// A new generation of the spec was observed.
    SpecChanged,
    /// All writes for the desired state succeeded.
    Converged,
    /// Validation failed, the target namespace is missing or claimed, or
    /// writes failed after retries.
    Rejected,
    /// The expiry date was reached, or had already passed when observed.
    ExpiryReached,
    Deleted,
}

/// What a new generation of an `Active` policy requires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Plan {
    /// No previous desired state is known; converge by read-compare-write.
    Converge,
    /// Annotations must be rewritten and the constraint replaced.
    Replace,
    /// Nothing that is written changed.
    Unchanged,
    /// The target namespace was changed after creation.
    Retargeted { previous: String },
}

impl State {
    /// Returns the state reached by applying `trigger`, or `None` if the
    /// trigger does not apply in this state.
    pub fn next(self, trigger: Trigger) -> Option<Self> {
        use Trigger::*;

        match (self, trigger) {
            (State::Deleted, _) => None,
            (_, Deleted) => Some(State::Deleted),

            (State::Pending | State::Active, Converged) => Some(State::Active),
            (State::Pending | State::Active, Rejected) => Some(State::Failed),
            (State::Pending | State::Active, ExpiryReached) => Some(State::Expired),

            (State::Pending, SpecChanged) => Some(State::Pending),
            (State::Active, SpecChanged) => Some(State::Active),
            (State::Failed | State::Expired, SpecChanged) => Some(State::Pending),

            (State::Failed | State::Expired, Converged | Rejected | ExpiryReached) => None,
        }
    }

    pub fn phase(self) -> Option<Phase> {
        match self {
            Self::Pending => Some(Phase::Pending),
            Self::Active => Some(Phase::Active),
            Self::Failed => Some(Phase::Failed),
            Self::Expired => Some(Phase::Expired),
            Self::Deleted => None,
        }
    }

    pub fn is_converging(self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

impl From<Phase> for State {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Pending => Self::Pending,
            Phase::Active => Self::Active,
            Phase::Failed => Self::Failed,
            Phase::Expired => Self::Expired,
        }
    }
}

/// Compares the last converged desired state with a new one.
pub fn plan(previous: Option<&Desired>, next: &Desired) -> Plan {
    match previous {
        None => Plan::Converge,
        Some(prev) if prev.target_namespace != next.target_namespace => Plan::Retargeted {
            previous: prev.target_namespace.clone(),
        },
        Some(prev) if prev.differs_from(next) => Plan::Replace,
        Some(_) => Plan::Unchanged,
    }
}
