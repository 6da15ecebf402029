//! Draft mutation entry points.
//!
//! Each operation first checks that the actor may edit for the organisation
//! owning the version. It then runs the write-lock check and its write in one
//! transaction and bumps the version's content revision, so an issue attempt
//! that read the version earlier can tell its artifact no longer matches.
use crate::approval::ApprovalState;
use crate::collaborators::PermissionResolver;
use crate::document::{
    DocumentContent, EvidenceLink, EvidenceRecord, EvidenceUpload, ModuleInstance, TimeStamp,
    VersionId, WorkItem, WorkItemDetails, WorkItemStatus,
};
use crate::error::LifecycleError;
use crate::guard::{authorize, editable_in_tx};
use crate::lifecycle::DocumentVersion;
use crate::store::{ChainTx, DocumentStore, TxResult, abort};
use crate::utils::{EVIDENCE_HRP, WORK_ITEM_HRP, new_id};
use std::sync::Arc;
use tracing::debug;

pub struct Editor {
    store: Arc<DocumentStore>,
    permissions: Arc<dyn PermissionResolver>,
}

impl Editor {
    pub fn new(store: Arc<DocumentStore>, permissions: Arc<dyn PermissionResolver>) -> Self {
        Self { store, permissions }
    }

    /// Authorize, then guard, bump the revision, apply `f` and write the
    /// version row back.
    async fn edit<T, F>(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
        f: F,
    ) -> Result<T, LifecycleError>
    where
        F: Fn(&ChainTx<'_>, &mut DocumentVersion) -> TxResult<T>,
    {
        // owning org is immutable
        let owner_org = self.store.load_version(version_id)?.org_id;
        authorize(self.permissions.as_ref(), actor_id, org_id, &owner_org).await?;

        self.store.transaction(|tx| {
            let mut version = editable_in_tx(tx, version_id)?;
            version.revision += 1;
            let out = f(tx, &mut version)?;
            tx.put_version(&version)?;
            Ok(out)
        })
    }

    #[tracing::instrument(skip(self, content))]
    pub async fn update_content(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
        content: DocumentContent,
    ) -> Result<DocumentVersion, LifecycleError> {
        self.edit(version_id, actor_id, org_id, |_, version| {
            version.content = content.clone();
            Ok(version.clone())
        })
        .await
    }

    #[tracing::instrument(skip(self, module), fields(module = %module.module_key))]
    pub async fn upsert_module(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
        module: ModuleInstance,
    ) -> Result<(), LifecycleError> {
        self.edit(version_id, actor_id, org_id, |_, version| {
            version.content.upsert_module(module.clone());
            Ok(())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_module(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
        module_key: &str,
    ) -> Result<bool, LifecycleError> {
        self.edit(version_id, actor_id, org_id, |_, version| {
            Ok(version.content.remove_module(module_key))
        })
        .await
    }

    #[tracing::instrument(skip(self, details), fields(reference = %details.reference))]
    pub async fn add_work_item(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
        details: WorkItemDetails,
    ) -> Result<WorkItem, LifecycleError> {
        let item = WorkItem {
            id: new_id(WORK_ITEM_HRP)?,
            version_id: version_id.clone(),
            details,
            carried_from: None,
            created_at: TimeStamp::new(),
        };
        self.edit(version_id, actor_id, org_id, |tx, _| {
            tx.put_work_item(&item)?;
            Ok(())
        })
        .await?;
        debug!(item = %item.id, "work item added");
        Ok(item)
    }

    #[tracing::instrument(skip(self, details))]
    pub async fn update_work_item(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
        item_id: &str,
        details: WorkItemDetails,
    ) -> Result<WorkItem, LifecycleError> {
        self.edit(version_id, actor_id, org_id, |tx, _| {
            let mut item = tx.work_item(version_id, item_id)?;
            item.details = details.clone();
            tx.put_work_item(&item)?;
            Ok(item)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_work_item_status(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
        item_id: &str,
        status: WorkItemStatus,
    ) -> Result<WorkItem, LifecycleError> {
        self.edit(version_id, actor_id, org_id, |tx, _| {
            let mut item = tx.work_item(version_id, item_id)?;
            item.details.status = status;
            tx.put_work_item(&item)?;
            Ok(item)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_work_item(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
        item_id: &str,
    ) -> Result<(), LifecycleError> {
        self.edit(version_id, actor_id, org_id, |tx, _| {
            if !tx.remove_work_item(version_id, item_id)? {
                return abort(LifecycleError::WorkItemNotFound(item_id.to_string()));
            }
            Ok(())
        })
        .await
    }

    /// Records a new evidence file and links it to this draft.
    #[tracing::instrument(skip(self, upload, caption))]
    pub async fn add_evidence(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
        upload: EvidenceUpload,
        caption: Option<String>,
        module_key: Option<String>,
    ) -> Result<(EvidenceRecord, EvidenceLink), LifecycleError> {
        let evidence_id = new_id(EVIDENCE_HRP)?;
        let now = TimeStamp::new();

        self.edit(version_id, actor_id, org_id, |tx, version| {
            let record = EvidenceRecord {
                id: evidence_id.clone(),
                org_id: version.org_id.clone(),
                upload: upload.clone(),
                uploaded_by: actor_id.to_string(),
                uploaded_at: now.clone(),
            };
            let link = EvidenceLink {
                evidence_id: evidence_id.clone(),
                version_id: version_id.clone(),
                caption: caption.clone(),
                module_key: module_key.clone(),
                linked_at: now.clone(),
            };
            tx.put_evidence(&record)?;
            tx.put_link(&link)?;
            Ok((record, link))
        })
        .await
    }

    /// Captions live on the link, so older versions sharing the file keep
    /// their own caption.
    #[tracing::instrument(skip(self, caption))]
    pub async fn set_evidence_caption(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
        evidence_id: &str,
        caption: Option<String>,
    ) -> Result<EvidenceLink, LifecycleError> {
        self.edit(version_id, actor_id, org_id, |tx, _| {
            let mut link = tx.link(version_id, evidence_id)?;
            link.caption = caption.clone();
            tx.put_link(&link)?;
            Ok(link)
        })
        .await
    }

    /// Removes the link only. The evidence record stays for any other
    /// version that references it.
    #[tracing::instrument(skip(self))]
    pub async fn unlink_evidence(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
        evidence_id: &str,
    ) -> Result<(), LifecycleError> {
        self.edit(version_id, actor_id, org_id, |tx, _| {
            if !tx.remove_link(version_id, evidence_id)? {
                return abort(LifecycleError::EvidenceNotFound(evidence_id.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn transition_approval<F>(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
        f: F,
    ) -> Result<ApprovalState, LifecycleError>
    where
        F: Fn(&ApprovalState) -> Result<ApprovalState, crate::approval::ApprovalError>,
    {
        self.edit(version_id, actor_id, org_id, |_, version| {
            let next = match f(version.approval()) {
                Ok(next) => next,
                Err(e) => return abort(e),
            };
            version.set_approval(next.clone());
            Ok(next)
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn request_approval(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
    ) -> Result<ApprovalState, LifecycleError> {
        self.transition_approval(version_id, actor_id, org_id, |state| state.request(actor_id))
            .await
    }

    /// Only an editor of the owning organisation can decide.
    #[tracing::instrument(skip(self, notes))]
    pub async fn approve(
        &self,
        version_id: &VersionId,
        approver: &str,
        org_id: &str,
        notes: Option<String>,
    ) -> Result<ApprovalState, LifecycleError> {
        self.transition_approval(version_id, approver, org_id, |state| {
            state.approve(approver, notes.clone())
        })
        .await
    }

    #[tracing::instrument(skip(self, notes))]
    pub async fn reject(
        &self,
        version_id: &VersionId,
        approver: &str,
        org_id: &str,
        notes: Option<String>,
    ) -> Result<ApprovalState, LifecycleError> {
        self.transition_approval(version_id, approver, org_id, |state| {
            state.reject(approver, notes.clone())
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn clear_approval(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
    ) -> Result<ApprovalState, LifecycleError> {
        debug!(actor = actor_id, "clearing approval decision");
        self.transition_approval(version_id, actor_id, org_id, |state| state.clear())
            .await
    }
}
