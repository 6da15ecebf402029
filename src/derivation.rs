//! Version creation: the first draft of a chain, version N+1 derived from the
//! issued version N, and soft deletion of a draft nobody has built on.
use crate::collaborators::PermissionResolver;
use crate::document::{
    ChainId, DocumentContent, DocumentKind, EvidenceLink, TimeStamp, VersionId, WorkItem,
};
use crate::error::{ChainViolation, LifecycleError};
use crate::events::{DispatchReport, EventBus, LifecycleEvent};
use crate::guard::{authorize, editable_in_tx};
use crate::lifecycle::{DocumentVersion, IssueStatus};
use crate::store::{ChainRecord, DocumentStore, abort, audit_chain};
use crate::utils::{CHAIN_HRP, VERSION_HRP, WORK_ITEM_HRP, new_id};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct DerivedVersion {
    pub new_id: VersionId,
    pub new_version_number: u32,
    pub carried_items: usize,
    pub linked_evidence: usize,
    pub dispatch: DispatchReport,
}

pub struct VersionDeriver {
    store: Arc<DocumentStore>,
    permissions: Arc<dyn PermissionResolver>,
    events: EventBus,
}

impl VersionDeriver {
    pub fn new(
        store: Arc<DocumentStore>,
        permissions: Arc<dyn PermissionResolver>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            permissions,
            events,
        }
    }

    async fn authorize(&self, actor_id: &str, org_id: &str, owner_org: &str) -> Result<(), LifecycleError> {
        authorize(self.permissions.as_ref(), actor_id, org_id, owner_org).await
    }

    /// Starts a new chain whose only member is a v1 draft.
    #[tracing::instrument(skip(self, content))]
    pub async fn create_document(
        &self,
        org_id: &str,
        actor_id: &str,
        kind: DocumentKind,
        content: DocumentContent,
    ) -> Result<DocumentVersion, LifecycleError> {
        self.authorize(actor_id, org_id, org_id).await?;

        let chain_id = ChainId(new_id(CHAIN_HRP)?);
        let version = DocumentVersion::new_draft(
            VersionId(new_id(VERSION_HRP)?),
            chain_id.clone(),
            org_id,
            1,
            kind,
            content,
            actor_id,
        );
        let chain = ChainRecord {
            id: chain_id.clone(),
            org_id: org_id.to_string(),
            kind,
            versions: vec![version.id.clone()],
            revision: 0,
            created_at: TimeStamp::new(),
        };

        self.store.transaction(|tx| {
            if tx.chain_exists(&chain.id)? {
                return abort(LifecycleError::InvalidRequest(format!(
                    "document {} already exists",
                    chain.id
                )));
            }
            tx.put_chain(&chain)?;
            tx.put_version(&version)
        })?;

        info!(chain = %chain_id, version = %version.id, "document created");
        Ok(version)
    }

    /// Creates version N+1 as a draft from the chain's issued version N.
    #[tracing::instrument(skip(self))]
    pub async fn derive_new_version(
        &self,
        base_document_id: &ChainId,
        actor_id: &str,
        org_id: &str,
        carry_forward_evidence: bool,
    ) -> Result<DerivedVersion, LifecycleError> {
        let chain = self.store.load_chain(base_document_id)?;
        self.authorize(actor_id, org_id, &chain.org_id).await?;

        let versions = self.store.chain_versions(&chain)?;
        let heads = audit_chain(&chain, &versions)
            .map_err(|v| LifecycleError::violation(base_document_id, v))?;
        if let Some(at) = heads.draft {
            return Err(LifecycleError::violation(
                base_document_id,
                ChainViolation::DraftAlreadyExists(versions[at].id.clone()),
            ));
        }
        let Some(source_at) = heads.issued else {
            info!(chain = %base_document_id, "nothing issued to derive from");
            return Err(LifecycleError::NoIssuedVersion(base_document_id.clone()));
        };
        let source = &versions[source_at];

        // children of an issued version can no longer change
        let work_items = self.store.work_items(&source.id)?;
        let links = if carry_forward_evidence {
            self.store.evidence_links(&source.id)?
        } else {
            Vec::new()
        };

        let mut draft = DocumentVersion::new_draft(
            VersionId(new_id(VERSION_HRP)?),
            chain.id.clone(),
            &chain.org_id,
            chain.next_version_number(),
            source.kind,
            source.content.clone(),
            actor_id,
        );
        draft.derived_from = Some(source.id.clone());

        let now = TimeStamp::new();
        let mut carried = Vec::new();
        for item in work_items.iter().filter(|i| i.details.status.carries_forward()) {
            carried.push(WorkItem {
                id: new_id(WORK_ITEM_HRP)?,
                version_id: draft.id.clone(),
                details: item.details.clone(),
                carried_from: Some(item.id.clone()),
                created_at: now.clone(),
            });
        }
        let linked: Vec<EvidenceLink> = links
            .into_iter()
            .map(|link| EvidenceLink {
                version_id: draft.id.clone(),
                linked_at: now.clone(),
                ..link
            })
            .collect();

        let expected_revision = chain.revision;
        let source_id = source.id.clone();
        self.store.transaction(|tx| {
            let mut chain = tx.chain(base_document_id)?;
            if chain.revision != expected_revision {
                return abort(LifecycleError::Conflict {
                    chain: base_document_id.clone(),
                });
            }
            if tx.version(&source_id)?.issue_status() != IssueStatus::Issued {
                return abort(LifecycleError::Conflict {
                    chain: base_document_id.clone(),
                });
            }
            tx.put_version(&draft)?;
            for item in &carried {
                tx.put_work_item(item)?;
            }
            for link in &linked {
                // records are shared, so the file must still be on record
                tx.evidence(&link.evidence_id)?;
                tx.put_link(link)?;
            }
            chain.versions.push(draft.id.clone());
            chain.revision += 1;
            tx.put_chain(&chain)
        })?;

        info!(
            version = %draft.id,
            number = draft.version_number,
            carried = carried.len(),
            evidence = linked.len(),
            "new version derived"
        );

        let dispatch = self
            .events
            .publish(&LifecycleEvent::VersionDerived {
                version_id: draft.id.clone(),
                base_document_id: base_document_id.clone(),
                org_id: chain.org_id.clone(),
                version_number: draft.version_number,
                derived_from: source_id,
                carried_items: carried.len(),
                linked_evidence: linked.len(),
            })
            .await;

        Ok(DerivedVersion {
            new_id: draft.id,
            new_version_number: draft.version_number,
            carried_items: carried.len(),
            linked_evidence: linked.len(),
            dispatch,
        })
    }

    /// Soft-deletes a draft that has no successor. Its number is not reused.
    #[tracing::instrument(skip(self))]
    pub async fn delete_draft(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
    ) -> Result<DocumentVersion, LifecycleError> {
        let current = self.store.load_version(version_id)?;
        self.authorize(actor_id, org_id, &current.org_id).await?;
        let chain_id = current.base_document_id.clone();

        let deleted = self.store.transaction(|tx| {
            let mut version = editable_in_tx(tx, version_id)?;
            let mut chain = tx.chain(&chain_id)?;
            if chain.versions.last() != Some(&version.id) {
                return abort(LifecycleError::violation(
                    &chain_id,
                    ChainViolation::DraftNotHead(version.id.clone()),
                ));
            }
            if let Err(e) = version.mark_deleted(actor_id) {
                return abort(e);
            }
            tx.put_version(&version)?;
            chain.revision += 1;
            tx.put_chain(&chain)?;
            Ok(version)
        })?;

        info!(version = %version_id, "draft deleted");
        self.events
            .publish(&LifecycleEvent::DraftDeleted {
                version_id: version_id.clone(),
                base_document_id: chain_id,
                deleted_by: actor_id.to_string(),
            })
            .await;
        Ok(deleted)
    }
}
