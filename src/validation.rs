//! Pre-issue checks. Errors block issue, warnings never do.
use crate::approval::{ApprovalStatus, GateOutcome};
use crate::document::{Priority, TimeStamp};
use crate::error::LifecycleError;
use crate::store::VersionSnapshot;
use chrono::Utc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueCode {
    NotDraft,
    Deleted,
    PermissionDenied,
    ApprovalRequired,
    ApprovalPending,
    ApprovalRejected(Option<String>),
    MissingTitle,
    MissingAssessor,
    MissingAssessmentDate,
    MissingModule(String),
    IncompleteModule(String),
    // warnings
    NoEvidence,
    MissingReviewDate,
    ReviewDateInPast,
    WorkItemsWithoutTarget(usize),
    UrgentWorkItemsOpen(usize),
}

impl IssueCode {
    fn is_approval(&self) -> bool {
        matches!(
            self,
            IssueCode::ApprovalRequired | IssueCode::ApprovalPending | IssueCode::ApprovalRejected(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub message: String,
}

impl ValidationIssue {
    fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|i| i.message.clone()).collect()
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(|i| i.message.clone()).collect()
    }

    pub fn has_error(&self, code: &IssueCode) -> bool {
        self.errors.iter().any(|i| &i.code == code)
    }

    /// The error to hand back when issue is blocked. When approval is the only
    /// thing in the way the caller gets an approval error, so the actor can be
    /// sent to the approval flow rather than back to editing.
    pub fn blocking_error(&self) -> Option<LifecycleError> {
        if self.errors.is_empty() {
            return None;
        }
        if self.errors.iter().all(|i| i.code.is_approval()) {
            return Some(match &self.errors[0].code {
                IssueCode::ApprovalRejected(notes) => LifecycleError::ApprovalRejected(notes.clone()),
                IssueCode::ApprovalPending => LifecycleError::ApprovalRequired("pending".into()),
                _ => LifecycleError::ApprovalRequired("not requested".into()),
            });
        }
        Some(LifecycleError::ValidationFailed(self.errors.clone()))
    }
}

/// Runs every check against one snapshot. `approval_required` and
/// `can_edit` come from the organisation config and permission resolver.
pub fn validate_snapshot(
    snapshot: &VersionSnapshot,
    approval_required: bool,
    can_edit: bool,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let version = &snapshot.version;
    let content = &version.content;
    let errors = &mut report.errors;

    if !version.is_draft() {
        errors.push(ValidationIssue::new(
            IssueCode::NotDraft,
            format!(
                "Version {} is {}; only drafts can be issued",
                version.version_number,
                version.issue_status()
            ),
        ));
    }
    if version.is_deleted() {
        errors.push(ValidationIssue::new(
            IssueCode::Deleted,
            "Version has been deleted",
        ));
    }
    if !can_edit {
        errors.push(ValidationIssue::new(
            IssueCode::PermissionDenied,
            "You do not have permission to issue this document",
        ));
    }

    match version.approval().gate(approval_required) {
        GateOutcome::Clear => {}
        GateOutcome::AwaitingApproval(ApprovalStatus::Pending) => errors.push(ValidationIssue::new(
            IssueCode::ApprovalPending,
            "Approval is pending",
        )),
        GateOutcome::AwaitingApproval(_) => errors.push(ValidationIssue::new(
            IssueCode::ApprovalRequired,
            "Approval is required before issue",
        )),
        GateOutcome::Rejected { notes } => {
            let message = match &notes {
                Some(notes) => format!("Approval was rejected: {notes}"),
                None => "Approval was rejected".to_string(),
            };
            errors.push(ValidationIssue::new(IssueCode::ApprovalRejected(notes), message))
        }
    }

    if content.title.trim().is_empty() {
        errors.push(ValidationIssue::new(
            IssueCode::MissingTitle,
            "Document title is required",
        ));
    }
    if content.assessor.as_deref().is_none_or(|a| a.trim().is_empty()) {
        errors.push(ValidationIssue::new(
            IssueCode::MissingAssessor,
            "Assessor name is required",
        ));
    }
    if content.assessment_date.is_none() {
        errors.push(ValidationIssue::new(
            IssueCode::MissingAssessmentDate,
            "Assessment date is required",
        ));
    }
    for key in version.kind.required_modules() {
        match content.module(key) {
            None => errors.push(ValidationIssue::new(
                IssueCode::MissingModule(key.to_string()),
                format!("Required module {key} is missing"),
            )),
            Some(module) if !module.completed => errors.push(ValidationIssue::new(
                IssueCode::IncompleteModule(key.to_string()),
                format!("Required module {key} is not complete"),
            )),
            Some(_) => {}
        }
    }

    let warnings = &mut report.warnings;
    if snapshot.evidence.is_empty() {
        warnings.push(ValidationIssue::new(
            IssueCode::NoEvidence,
            "No evidence is attached",
        ));
    }
    match &content.review_date {
        None => warnings.push(ValidationIssue::new(
            IssueCode::MissingReviewDate,
            "No review date is set",
        )),
        Some(review) if review.is_before(&TimeStamp::<Utc>::new()) => {
            warnings.push(ValidationIssue::new(
                IssueCode::ReviewDateInPast,
                "Review date is in the past",
            ))
        }
        Some(_) => {}
    }

    let live: Vec<_> = snapshot
        .work_items
        .iter()
        .filter(|i| i.details.status.carries_forward())
        .collect();
    let untargeted = live.iter().filter(|i| i.details.target_date.is_none()).count();
    if untargeted > 0 {
        warnings.push(ValidationIssue::new(
            IssueCode::WorkItemsWithoutTarget(untargeted),
            format!("{untargeted} open action(s) have no target date"),
        ));
    }
    let urgent = live
        .iter()
        .filter(|i| i.details.priority >= Priority::High)
        .count();
    if urgent > 0 {
        warnings.push(ValidationIssue::new(
            IssueCode::UrgentWorkItemsOpen(urgent),
            format!("{urgent} high or critical action(s) remain open"),
        ));
    }

    report
}
