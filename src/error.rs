use crate::approval::ApprovalError;
use crate::document::{ChainId, VersionId};
use crate::lifecycle::{IssueStatus, TransitionError};
use crate::validation::ValidationIssue;
use std::time::Duration;

/// Failures of the embedded store itself.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to encode {what}: {reason}")]
    Encode { what: &'static str, reason: String },
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: minicbor::decode::Error,
    },
    #[error("malformed id: {0}")]
    Id(String),
}

/// A mutation was attempted against a version that is no longer a draft.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("version {version_id} is {status} and cannot be modified")]
pub struct LockedError {
    pub version_id: VersionId,
    pub status: IssueStatus,
    pub deleted: bool,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainViolation {
    #[error("chain already has a live draft ({0})")]
    DraftAlreadyExists(VersionId),
    #[error("chain has {0} issued versions")]
    MultipleIssued(usize),
    #[error("chain has {0} live drafts")]
    MultipleDrafts(usize),
    #[error("version numbers are not contiguous at position {position}: found v{found}")]
    NumberingGap { position: usize, found: u32 },
    #[error("{version} is superseded by {successor} which is not a later version of this chain")]
    BadSupersession {
        version: VersionId,
        successor: VersionId,
    },
    #[error("version {0} is listed in the chain but missing from the store")]
    MissingVersion(VersionId),
    #[error("draft {0} is not the head of its chain")]
    DraftNotHead(VersionId),
}

/// Why an access link did not resolve.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessDenied {
    #[error("unknown access token")]
    UnknownToken,
    #[error("access link has been revoked")]
    Revoked,
    #[error("access link has expired")]
    Expired,
    #[error("document has no issued version")]
    NotIssued,
}

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("validation failed: {}", .0.iter().map(|i| i.message.as_str()).collect::<Vec<_>>().join("; "))]
    ValidationFailed(Vec<ValidationIssue>),
    #[error("approval is required before issue (current: {0})")]
    ApprovalRequired(String),
    #[error("approval was rejected{}", .0.as_ref().map(|n| format!(": {n}")).unwrap_or_default())]
    ApprovalRejected(Option<String>),
    #[error("artifact generation failed: {0}")]
    ArtifactGenerationFailed(String),
    #[error("artifact generation timed out after {0:?}")]
    ArtifactGenerationTimedOut(Duration),
    #[error("artifact at {path} could not be verified after write: {reason}")]
    ArtifactPersistenceUnverified { path: String, reason: String },
    #[error(transparent)]
    Locked(#[from] LockedError),
    #[error("concurrent change on chain {chain}, re-read and retry")]
    Conflict { chain: ChainId },
    #[error("chain {chain} invariant violated: {violation}")]
    ChainInvariantViolation {
        chain: ChainId,
        violation: ChainViolation,
    },
    #[error("document {0} has no issued version to derive from")]
    NoIssuedVersion(ChainId),
    #[error("actor {actor} may not edit documents of {org_id}")]
    PermissionDenied { actor: String, org_id: String },
    #[error("version not found: {0}")]
    VersionNotFound(VersionId),
    #[error("document not found: {0}")]
    ChainNotFound(ChainId),
    #[error("work item not found: {0}")]
    WorkItemNotFound(String),
    #[error("evidence not found: {0}")]
    EvidenceNotFound(String),
    #[error("access link not found: {0}")]
    LinkNotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(#[from] AccessDenied),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    /// Whether repeating the whole operation can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LifecycleError::ArtifactGenerationFailed(_)
                | LifecycleError::ArtifactGenerationTimedOut(_)
                | LifecycleError::Conflict { .. }
        )
    }

    pub fn is_approval_error(&self) -> bool {
        matches!(
            self,
            LifecycleError::ApprovalRequired(_) | LifecycleError::ApprovalRejected(_)
        )
    }

    pub(crate) fn violation(chain: &ChainId, violation: ChainViolation) -> Self {
        tracing::error!(chain = %chain, %violation, "chain invariant violation");
        LifecycleError::ChainInvariantViolation {
            chain: chain.clone(),
            violation,
        }
    }
}

impl From<sled::Error> for LifecycleError {
    fn from(value: sled::Error) -> Self {
        LifecycleError::Store(StoreError::Sled(value))
    }
}
