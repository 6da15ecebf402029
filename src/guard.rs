//! Write-lock guard. Every mutation path asks the store, never the caller,
//! whether the target version is still a draft.
use crate::collaborators::PermissionResolver;
use crate::document::VersionId;
use crate::error::{LifecycleError, LockedError};
use crate::lifecycle::DocumentVersion;
use crate::store::{ChainTx, DocumentStore, TxResult, abort};

fn locked(version: &DocumentVersion) -> LockedError {
    LockedError {
        version_id: version.id.clone(),
        status: version.issue_status(),
        deleted: version.is_deleted(),
    }
}

/// Reads the version fresh from the store and returns it if it can still be
/// edited.
#[tracing::instrument(level = "debug", skip(store))]
pub fn assert_editable(
    store: &DocumentStore,
    version_id: &VersionId,
) -> Result<DocumentVersion, LifecycleError> {
    let version = store.load_version(version_id)?;
    if !version.is_editable() {
        tracing::warn!(status = %version.issue_status(), "rejected mutation of locked version");
        return Err(locked(&version).into());
    }
    Ok(version)
}

/// Same check inside a transaction, so the check and the write it protects
/// commit together.
pub(crate) fn editable_in_tx(tx: &ChainTx<'_>, version_id: &VersionId) -> TxResult<DocumentVersion> {
    let version = tx.version(version_id)?;
    if !version.is_editable() {
        tracing::warn!(version = %version_id, status = %version.issue_status(), "rejected mutation of locked version");
        return abort(locked(&version));
    }
    Ok(version)
}

/// Refuses actors outside the owning organisation and actors the resolver
/// does not let edit.
pub(crate) async fn authorize(
    permissions: &dyn PermissionResolver,
    actor_id: &str,
    org_id: &str,
    owner_org: &str,
) -> Result<(), LifecycleError> {
    if owner_org != org_id || !permissions.can_edit(actor_id, org_id).await {
        tracing::warn!(actor = actor_id, org = org_id, owner = owner_org, "permission denied");
        return Err(LifecycleError::PermissionDenied {
            actor: actor_id.to_string(),
            org_id: org_id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OrgConfig, StaticOrgDirectory};
    use crate::document::{ChainId, DocumentContent, DocumentKind, TimeStamp};
    use crate::lifecycle::{IssueStatus, LockedArtifact};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn issued_versions_are_locked() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join("guard.db"))?);
        let store = DocumentStore::open(db)?;

        let mut version = DocumentVersion::new_draft(
            VersionId::from("ver_a"),
            ChainId::from("doc_a"),
            "org_a",
            1,
            DocumentKind::FireRiskAssessment,
            DocumentContent::new(),
            "user_a",
        );
        store.transaction(|tx| tx.put_version(&version))?;
        assert!(assert_editable(&store, &version.id).is_ok());

        version.mark_issued(
            "user_a",
            TimeStamp::new(),
            LockedArtifact {
                path: "p".into(),
                sha256: "s".into(),
                size_bytes: 1,
                generated_at: TimeStamp::new(),
            },
        )?;
        store.transaction(|tx| tx.put_version(&version))?;

        match assert_editable(&store, &version.id) {
            Err(LifecycleError::Locked(err)) => {
                assert_eq!(err.status, IssueStatus::Issued);
                assert!(!err.deleted);
            }
            other => panic!("expected LockedError, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn missing_version_is_not_found() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join("guard.db"))?);
        let store = DocumentStore::open(db)?;

        let res = assert_editable(&store, &VersionId::from("ver_missing"));
        assert!(matches!(res, Err(LifecycleError::VersionNotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn authorize_needs_matching_org_and_editor() {
        let directory = StaticOrgDirectory::default().with_org(
            "org_a",
            OrgConfig {
                editors: ["user_a".to_string()].into(),
                ..OrgConfig::default()
            },
        );

        assert!(authorize(&directory, "user_a", "org_a", "org_a").await.is_ok());
        // claiming the owner's org does not help an actor who is not its editor
        assert!(matches!(
            authorize(&directory, "user_b", "org_a", "org_a").await,
            Err(LifecycleError::PermissionDenied { .. })
        ));
        assert!(matches!(
            authorize(&directory, "user_a", "org_a", "org_b").await,
            Err(LifecycleError::PermissionDenied { .. })
        ));
    }
}
