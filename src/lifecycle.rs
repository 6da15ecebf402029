//! Version records and the draft -> issued -> superseded state machine.
//!
//! `issue_status` is never stored as a free-standing field. A version carries
//! an [`IssueState`] whose variants hold exactly the data that exists in that
//! state (an issued version always has its locked artifact, a superseded one
//! always has its successor), and the only way to move between variants is
//! through the transition functions below.
use crate::approval::ApprovalState;
use crate::document::{ChainId, DocumentContent, DocumentKind, TimeStamp, VersionId};
use chrono::Utc;
use std::fmt;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot issue a version that is {0}")]
    NotDraft(IssueStatus),
    #[error("cannot supersede a version that is {0}")]
    NotIssued(IssueStatus),
    #[error("successor {successor} (v{successor_number}) cannot supersede v{current_number}")]
    SupersessionOrder {
        successor: VersionId,
        successor_number: u32,
        current_number: u32,
    },
    #[error("successor {0} belongs to a different chain")]
    ForeignChain(VersionId),
    #[error("version has been deleted")]
    Deleted,
}

/// The flat view of [`IssueState`], used for reporting and comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueStatus {
    Draft,
    Issued,
    Superseded,
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueStatus::Draft => "draft",
            IssueStatus::Issued => "issued",
            IssueStatus::Superseded => "superseded",
        };
        f.write_str(s)
    }
}

/// The durably stored rendering produced at issue time.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LockedArtifact {
    #[n(0)]
    pub path: String,
    #[n(1)]
    pub sha256: String,
    #[n(2)]
    pub size_bytes: u64,
    #[n(3)]
    pub generated_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct IssueRecord {
    #[n(0)]
    pub issue_date: TimeStamp<Utc>,
    #[n(1)]
    pub issued_by: String,
    #[n(2)]
    pub artifact: LockedArtifact,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum IssueState {
    #[n(0)]
    Draft,
    #[n(1)]
    Issued {
        #[n(0)]
        record: IssueRecord,
    },
    #[n(2)]
    Superseded {
        #[n(0)]
        record: IssueRecord,
        #[n(1)]
        superseded_by: VersionId,
        #[n(2)]
        superseded_date: TimeStamp<Utc>,
    },
}

impl IssueState {
    pub fn status(&self) -> IssueStatus {
        match self {
            IssueState::Draft => IssueStatus::Draft,
            IssueState::Issued { .. } => IssueStatus::Issued,
            IssueState::Superseded { .. } => IssueStatus::Superseded,
        }
    }

    /// draft -> issued
    pub fn issue(&self, record: IssueRecord) -> Result<IssueState, TransitionError> {
        match self {
            IssueState::Draft => Ok(IssueState::Issued { record }),
            other => Err(TransitionError::NotDraft(other.status())),
        }
    }

    /// issued -> superseded
    pub fn supersede(
        &self,
        superseded_by: VersionId,
        superseded_date: TimeStamp<Utc>,
    ) -> Result<IssueState, TransitionError> {
        match self {
            IssueState::Issued { record } => Ok(IssueState::Superseded {
                record: record.clone(),
                superseded_by,
                superseded_date,
            }),
            other => Err(TransitionError::NotIssued(other.status())),
        }
    }

    pub fn issue_record(&self) -> Option<&IssueRecord> {
        match self {
            IssueState::Draft => None,
            IssueState::Issued { record } | IssueState::Superseded { record, .. } => Some(record),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    #[n(0)]
    pub deleted_by: String,
    #[n(1)]
    pub deleted_at: TimeStamp<Utc>,
}

/// One row of a version chain.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct DocumentVersion {
    #[n(0)]
    pub id: VersionId,
    #[n(1)]
    pub base_document_id: ChainId,
    #[n(2)]
    pub org_id: String,
    #[n(3)]
    pub version_number: u32,
    #[n(4)]
    pub kind: DocumentKind,
    #[n(5)]
    state: IssueState,
    #[n(6)]
    approval: ApprovalState,
    #[n(7)]
    pub content: DocumentContent,
    // bumped by every draft edit, including child rows
    #[n(8)]
    pub revision: u64,
    #[n(9)]
    pub derived_from: Option<VersionId>,
    #[n(10)]
    pub created_by: String,
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
    #[n(12)]
    deletion: Option<Deletion>,
}

impl DocumentVersion {
    /// A fresh draft. Every version starts life here.
    pub(crate) fn new_draft(
        id: VersionId,
        base_document_id: ChainId,
        org_id: &str,
        version_number: u32,
        kind: DocumentKind,
        content: DocumentContent,
        created_by: &str,
    ) -> Self {
        Self {
            id,
            base_document_id,
            org_id: org_id.to_string(),
            version_number,
            kind,
            state: IssueState::Draft,
            approval: ApprovalState::NotRequired,
            content,
            revision: 0,
            derived_from: None,
            created_by: created_by.to_string(),
            created_at: TimeStamp::new(),
            deletion: None,
        }
    }

    pub fn state(&self) -> &IssueState {
        &self.state
    }

    pub fn issue_status(&self) -> IssueStatus {
        self.state.status()
    }

    pub fn is_draft(&self) -> bool {
        self.issue_status() == IssueStatus::Draft
    }

    /// Editable means draft and not soft-deleted.
    pub fn is_editable(&self) -> bool {
        self.is_draft() && !self.is_deleted()
    }

    pub fn approval(&self) -> &ApprovalState {
        &self.approval
    }

    pub fn deletion(&self) -> Option<&Deletion> {
        self.deletion.as_ref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deletion.is_some()
    }

    pub fn issue_date(&self) -> Option<&TimeStamp<Utc>> {
        self.state.issue_record().map(|r| &r.issue_date)
    }

    pub fn issued_by(&self) -> Option<&str> {
        self.state.issue_record().map(|r| r.issued_by.as_str())
    }

    pub fn locked_artifact(&self) -> Option<&LockedArtifact> {
        self.state.issue_record().map(|r| &r.artifact)
    }

    pub fn superseded_by(&self) -> Option<&VersionId> {
        match &self.state {
            IssueState::Superseded { superseded_by, .. } => Some(superseded_by),
            _ => None,
        }
    }

    pub fn superseded_date(&self) -> Option<&TimeStamp<Utc>> {
        match &self.state {
            IssueState::Superseded {
                superseded_date, ..
            } => Some(superseded_date),
            _ => None,
        }
    }

    pub(crate) fn set_approval(&mut self, approval: ApprovalState) {
        self.approval = approval;
    }

    pub(crate) fn mark_issued(
        &mut self,
        issued_by: &str,
        issue_date: TimeStamp<Utc>,
        artifact: LockedArtifact,
    ) -> Result<(), TransitionError> {
        if self.is_deleted() {
            return Err(TransitionError::Deleted);
        }
        self.state = self.state.issue(IssueRecord {
            issue_date,
            issued_by: issued_by.to_string(),
            artifact,
        })?;
        Ok(())
    }

    /// Only ever called as the side effect of `successor` being issued.
    pub(crate) fn mark_superseded(
        &mut self,
        successor: &DocumentVersion,
        superseded_date: TimeStamp<Utc>,
    ) -> Result<(), TransitionError> {
        if successor.base_document_id != self.base_document_id {
            return Err(TransitionError::ForeignChain(successor.id.clone()));
        }
        if successor.version_number <= self.version_number {
            return Err(TransitionError::SupersessionOrder {
                successor: successor.id.clone(),
                successor_number: successor.version_number,
                current_number: self.version_number,
            });
        }
        self.state = self.state.supersede(successor.id.clone(), superseded_date)?;
        Ok(())
    }

    pub(crate) fn mark_deleted(&mut self, deleted_by: &str) -> Result<(), TransitionError> {
        if !self.is_draft() {
            return Err(TransitionError::NotDraft(self.issue_status()));
        }
        if self.is_deleted() {
            return Err(TransitionError::Deleted);
        }
        self.deletion = Some(Deletion {
            deleted_by: deleted_by.to_string(),
            deleted_at: TimeStamp::new(),
        });
        Ok(())
    }
}
