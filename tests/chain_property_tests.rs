//! Property-based tests for version chains
//!
//! Random sequences of issue, derive, edit and delete operations are run
//! against a real store. Whatever the sequence, and whichever operations
//! fail along the way, the chain must stay well formed.
//!
//! These property tests cover:
//!
//! 1. At most one draft and at most one issued version per chain
//! 2. Issued and superseded content never changes after issue
//! 3. Issue status only moves forward (draft, issued, superseded)
//! 4. Version numbers are dense and never reused
//! 5. The approval sub-machine only allows its documented transitions
//!
//! What these tests DON'T cover (deliberately):
//!
//! - Artifact timeouts and storage failures (see scenarios.rs)
//! - Concurrent callers (a single caller interleaving is enough here)
//!
use doc_lifecycle::approval::{ApprovalState, ApprovalStatus};
use doc_lifecycle::config::{LifecycleConfig, OrgConfig};
use doc_lifecycle::document::{
    DocumentContent, DocumentKind, ModuleInstance, Priority, TimeStamp, VersionId,
    WorkItemDetails, WorkItemStatus,
};
use doc_lifecycle::lifecycle::IssueStatus;
use doc_lifecycle::service::{Collaborators, DocumentService};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::tempdir;

const ORG: &str = "org_prop";
const EDITOR: &str = "user_prop";

#[derive(Debug, Clone)]
enum Op {
    Issue,
    Derive { carry_evidence: bool },
    Edit { title: u16 },
    AddWorkItem { status: WorkItemStatus },
    DeleteDraft,
}

fn status_strategy() -> impl Strategy<Value = WorkItemStatus> {
    prop_oneof![
        Just(WorkItemStatus::Open),
        Just(WorkItemStatus::InProgress),
        Just(WorkItemStatus::Deferred),
        Just(WorkItemStatus::Closed),
        Just(WorkItemStatus::NotApplicable),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Issue),
        3 => any::<bool>().prop_map(|carry_evidence| Op::Derive { carry_evidence }),
        2 => any::<u16>().prop_map(|title| Op::Edit { title }),
        2 => status_strategy().prop_map(|status| Op::AddWorkItem { status }),
        1 => Just(Op::DeleteDraft),
    ]
}

fn content(title: &str) -> DocumentContent {
    let kind = DocumentKind::FireStrategy;
    let mut content = DocumentContent::new()
        .set_title(title)
        .set_assessor("Prop Assessor")
        .set_assessment_date(TimeStamp::new_with(2026, 5, 1, 0, 0, 0));
    for key in kind.required_modules() {
        content = content.with_module(ModuleInstance::new(key).complete());
    }
    content
}

fn rank(status: IssueStatus) -> u8 {
    match status {
        IssueStatus::Draft => 0,
        IssueStatus::Issued => 1,
        IssueStatus::Superseded => 2,
    }
}

fn service(dir: &std::path::Path) -> anyhow::Result<DocumentService> {
    let mut config = LifecycleConfig::default();
    config.organisations.insert(
        ORG.into(),
        OrgConfig {
            editors: [EDITOR.to_string()].into(),
            ..OrgConfig::default()
        },
    );
    let db = Arc::new(sled::open(dir.join("prop.db"))?);
    let collaborators = Collaborators::local(&config, dir.join("blobs"));
    Ok(DocumentService::new(db, &config, collaborators)?)
}

/// Runs `ops` and checks the chain after every step.
async fn run_sequence(ops: Vec<Op>) -> anyhow::Result<()> {
    let dir = tempdir()?;
    let service = service(dir.path())?;
    let v1 = service
        .create_document(ORG, EDITOR, DocumentKind::FireStrategy, content("v1"))
        .await?;
    let chain = v1.base_document_id.clone();

    let mut frozen: HashMap<VersionId, DocumentContent> = HashMap::new();
    let mut last_rank: HashMap<VersionId, u8> = HashMap::new();

    for op in ops {
        let history = service.get_version_history(&chain)?;
        let draft = history
            .iter()
            .find(|s| s.issue_status == IssueStatus::Draft && !s.deleted)
            .map(|s| s.id.clone());

        // failures are expected, only the resulting chain matters
        match (&op, &draft) {
            (Op::Issue, Some(id)) => {
                if let Ok(issued) = service.issue(id, EDITOR, ORG).await {
                    frozen.insert(id.clone(), issued.version.content.clone());
                }
            }
            (Op::Issue, None) => {
                let last = history.last().map(|s| s.id.clone());
                if let Some(id) = last {
                    assert!(service.issue(&id, EDITOR, ORG).await.is_err());
                }
            }
            (Op::Derive { carry_evidence }, _) => {
                let res = service
                    .derive_new_version(&chain, EDITOR, ORG, *carry_evidence)
                    .await;
                if draft.is_some() {
                    assert!(res.is_err());
                }
            }
            (Op::Edit { title }, Some(id)) => {
                service
                    .editor()
                    .update_content(id, EDITOR, ORG, content(&format!("edit {title}")))
                    .await?;
            }
            (Op::AddWorkItem { status }, Some(id)) => {
                let details = WorkItemDetails::new("P1", "Property item", Priority::Low).set_status(*status);
                service.editor().add_work_item(id, EDITOR, ORG, details).await?;
            }
            (Op::DeleteDraft, Some(id)) => {
                service.delete_draft(id, EDITOR, ORG).await?;
            }
            // edits with no live draft go to the newest version and must bounce
            (_, None) => {
                if let Some(last) = history.last() {
                    assert!(
                        service
                            .editor()
                            .update_content(&last.id, EDITOR, ORG, content("stale client"))
                            .await
                            .is_err()
                    );
                }
            }
        }

        let heads = service.verify_chain(&chain)?;
        let history = service.get_version_history(&chain)?;

        let drafts = history
            .iter()
            .filter(|s| s.issue_status == IssueStatus::Draft && !s.deleted)
            .count();
        let issued = history
            .iter()
            .filter(|s| s.issue_status == IssueStatus::Issued)
            .count();
        assert!(drafts <= 1);
        assert!(issued <= 1);
        assert_eq!(heads.issued.is_some(), issued == 1);

        for (position, summary) in history.iter().enumerate() {
            assert_eq!(summary.version_number as usize, position + 1);

            let now = rank(summary.issue_status);
            let before = last_rank.insert(summary.id.clone(), now).unwrap_or(0);
            assert!(now >= before, "status moved backwards for {}", summary.id);

            if summary.issue_status != IssueStatus::Draft {
                let stored = service.get_version(&summary.id)?;
                assert_eq!(Some(&stored.content), frozen.get(&summary.id));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
enum ApprovalOp {
    Request,
    Approve,
    Reject,
    Clear,
}

fn approval_op_strategy() -> impl Strategy<Value = ApprovalOp> {
    prop_oneof![
        Just(ApprovalOp::Request),
        Just(ApprovalOp::Approve),
        Just(ApprovalOp::Reject),
        Just(ApprovalOp::Clear),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any interleaving of lifecycle operations leaves a well formed chain.
    #[test]
    fn chain_invariants_hold(ops in prop::collection::vec(op_strategy(), 1..=16)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let res = runtime.block_on(run_sequence(ops));
        prop_assert!(res.is_ok(), "sequence failed: {:?}", res.err());
    }
}

proptest! {
    /// Each approval operation either follows the documented transition or
    /// is refused without changing the state.
    #[test]
    fn approval_transitions_are_closed(ops in prop::collection::vec(approval_op_strategy(), 1..=20)) {
        let mut state = ApprovalState::NotRequired;
        for op in ops {
            let before = state.status();
            let next = match op {
                ApprovalOp::Request => state.request("user_a"),
                ApprovalOp::Approve => state.approve("user_b", None),
                ApprovalOp::Reject => state.reject("user_b", Some("no".into())),
                ApprovalOp::Clear => state.clear(),
            };
            let allowed = matches!(
                (&op, before),
                (ApprovalOp::Request, ApprovalStatus::NotRequired)
                    | (ApprovalOp::Approve, ApprovalStatus::Pending)
                    | (ApprovalOp::Reject, ApprovalStatus::Pending)
                    | (ApprovalOp::Clear, ApprovalStatus::Approved)
                    | (ApprovalOp::Clear, ApprovalStatus::Rejected)
            );
            prop_assert_eq!(next.is_ok(), allowed);
            if let Ok(next) = next {
                state = next;
            }
            prop_assert!(state.decision().is_some() == matches!(
                state.status(),
                ApprovalStatus::Approved | ApprovalStatus::Rejected
            ));
        }
    }
}
