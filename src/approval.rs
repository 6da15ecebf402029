//! Approval gate: not_required -> pending -> approved | rejected, and back to
//! not_required only through an explicit clear.
use crate::document::TimeStamp;
use chrono::Utc;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval can only be requested from not_required, current: {0:?}")]
    CannotRequest(ApprovalStatus),
    #[error("only a pending approval can be decided, current: {0:?}")]
    NotPending(ApprovalStatus),
    #[error("only an approved or rejected decision can be cleared, current: {0:?}")]
    NothingToClear(ApprovalStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalStatus {
    NotRequired,
    Pending,
    Approved,
    Rejected,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDecision {
    #[n(0)]
    pub decided_by: String,
    #[n(1)]
    pub decided_at: TimeStamp<Utc>,
    #[n(2)]
    pub notes: Option<String>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum ApprovalState {
    #[n(0)]
    NotRequired,
    #[n(1)]
    Pending {
        #[n(0)]
        requested_by: String,
        #[n(1)]
        requested_at: TimeStamp<Utc>,
    },
    #[n(2)]
    Approved {
        #[n(0)]
        decision: ApprovalDecision,
    },
    #[n(3)]
    Rejected {
        #[n(0)]
        decision: ApprovalDecision,
    },
}

/// What the gate says about issuing right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Clear,
    /// Approval is needed and has not been given yet.
    AwaitingApproval(ApprovalStatus),
    Rejected { notes: Option<String> },
}

impl ApprovalState {
    pub fn status(&self) -> ApprovalStatus {
        match self {
            ApprovalState::NotRequired => ApprovalStatus::NotRequired,
            ApprovalState::Pending { .. } => ApprovalStatus::Pending,
            ApprovalState::Approved { .. } => ApprovalStatus::Approved,
            ApprovalState::Rejected { .. } => ApprovalStatus::Rejected,
        }
    }

    pub fn request(&self, requested_by: &str) -> Result<ApprovalState, ApprovalError> {
        match self {
            ApprovalState::NotRequired => Ok(ApprovalState::Pending {
                requested_by: requested_by.to_string(),
                requested_at: TimeStamp::new(),
            }),
            other => Err(ApprovalError::CannotRequest(other.status())),
        }
    }

    pub fn approve(
        &self,
        approver: &str,
        notes: Option<String>,
    ) -> Result<ApprovalState, ApprovalError> {
        match self {
            ApprovalState::Pending { .. } => Ok(ApprovalState::Approved {
                decision: ApprovalDecision {
                    decided_by: approver.to_string(),
                    decided_at: TimeStamp::new(),
                    notes,
                },
            }),
            other => Err(ApprovalError::NotPending(other.status())),
        }
    }

    pub fn reject(
        &self,
        approver: &str,
        notes: Option<String>,
    ) -> Result<ApprovalState, ApprovalError> {
        match self {
            ApprovalState::Pending { .. } => Ok(ApprovalState::Rejected {
                decision: ApprovalDecision {
                    decided_by: approver.to_string(),
                    decided_at: TimeStamp::new(),
                    notes,
                },
            }),
            other => Err(ApprovalError::NotPending(other.status())),
        }
    }

    /// Administrative reset of a decided approval.
    pub fn clear(&self) -> Result<ApprovalState, ApprovalError> {
        match self {
            ApprovalState::Approved { .. } | ApprovalState::Rejected { .. } => {
                Ok(ApprovalState::NotRequired)
            }
            other => Err(ApprovalError::NothingToClear(other.status())),
        }
    }

    pub fn decision(&self) -> Option<&ApprovalDecision> {
        match self {
            ApprovalState::Approved { decision } | ApprovalState::Rejected { decision } => {
                Some(decision)
            }
            _ => None,
        }
    }

    /// Pending and rejected always block. When the organisation requires
    /// approval, only an approved decision clears the gate.
    ///
    /// `NotRequired` only satisfies the gate for organisations that do not
    /// require approval. Where approval is required it reads as "never
    /// requested" and blocks, so a draft cannot skip the request step.
    pub fn gate(&self, approval_required: bool) -> GateOutcome {
        match self {
            ApprovalState::Approved { .. } => GateOutcome::Clear,
            ApprovalState::NotRequired if !approval_required => GateOutcome::Clear,
            ApprovalState::NotRequired => GateOutcome::AwaitingApproval(ApprovalStatus::NotRequired),
            ApprovalState::Pending { .. } => GateOutcome::AwaitingApproval(ApprovalStatus::Pending),
            ApprovalState::Rejected { decision } => GateOutcome::Rejected {
                notes: decision.notes.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_approval_cycle() {
        let state = ApprovalState::NotRequired;
        let pending = state.request("user_a").unwrap();
        assert_eq!(pending.status(), ApprovalStatus::Pending);

        let approved = pending.approve("user_b", Some("ok".into())).unwrap();
        assert_eq!(approved.status(), ApprovalStatus::Approved);
        assert_eq!(approved.decision().unwrap().decided_by, "user_b");

        let cleared = approved.clear().unwrap();
        assert_eq!(cleared, ApprovalState::NotRequired);
    }

    #[test]
    fn decisions_require_pending() {
        let state = ApprovalState::NotRequired;
        assert_eq!(
            state.approve("user_b", None),
            Err(ApprovalError::NotPending(ApprovalStatus::NotRequired))
        );
        let rejected = state
            .request("user_a")
            .unwrap()
            .reject("user_b", Some("missing drawings".into()))
            .unwrap();
        assert!(rejected.approve("user_b", None).is_err());
        assert!(rejected.request("user_a").is_err());
    }

    #[test]
    fn pending_cannot_be_cleared() {
        let pending = ApprovalState::NotRequired.request("user_a").unwrap();
        assert_eq!(
            pending.clear(),
            Err(ApprovalError::NothingToClear(ApprovalStatus::Pending))
        );
    }

    #[test]
    fn gate_outcomes() {
        let not_required = ApprovalState::NotRequired;
        assert_eq!(not_required.gate(false), GateOutcome::Clear);
        assert_eq!(
            not_required.gate(true),
            GateOutcome::AwaitingApproval(ApprovalStatus::NotRequired)
        );

        let pending = not_required.request("user_a").unwrap();
        assert_eq!(
            pending.gate(false),
            GateOutcome::AwaitingApproval(ApprovalStatus::Pending)
        );

        let approved = pending.approve("user_b", None).unwrap();
        assert_eq!(approved.gate(true), GateOutcome::Clear);

        let rejected = ApprovalState::NotRequired
            .request("user_a")
            .unwrap()
            .reject("user_b", Some("no".into()))
            .unwrap();
        assert_eq!(
            rejected.gate(false),
            GateOutcome::Rejected {
                notes: Some("no".into())
            }
        );
    }
}
