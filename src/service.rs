//! Service layer API for the document lifecycle.
use crate::access::{AccessLink, AccessResolver, ClientDocument, CreatedLink};
use crate::collaborators::{
    ArtifactBuilder, BlobStore, CborArtifactBuilder, FsBlobStore, OrgSettings, PermissionResolver,
};
use crate::config::{LifecycleConfig, StaticOrgDirectory};
use crate::derivation::{DerivedVersion, VersionDeriver};
use crate::document::{ChainId, DocumentContent, DocumentKind, TimeStamp, VersionId};
use crate::editor::Editor;
use crate::error::LifecycleError;
use crate::events::{EventBus, EventHandler, ReferenceNumberAssigner, reference_number};
use crate::guard;
use crate::issuance::{IssuanceOrchestrator, IssuedVersion};
use crate::lifecycle::{DocumentVersion, IssueStatus};
use crate::store::{ChainHeads, DocumentStore, VersionSnapshot, audit_chain};
use crate::validation::ValidationReport;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// External services the engine depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub artifact_builder: Arc<dyn ArtifactBuilder>,
    pub blob_store: Arc<dyn BlobStore>,
    pub permissions: Arc<dyn PermissionResolver>,
    pub org_settings: Arc<dyn OrgSettings>,
}

impl Collaborators {
    /// CBOR rendering, filesystem blobs and organisations from config.
    pub fn local(config: &LifecycleConfig, blob_root: impl Into<PathBuf>) -> Self {
        let directory = Arc::new(StaticOrgDirectory::from_config(config));
        Self {
            artifact_builder: Arc::new(CborArtifactBuilder),
            blob_store: Arc::new(FsBlobStore::new(blob_root)),
            permissions: directory.clone(),
            org_settings: directory,
        }
    }
}

/// One row of a chain's history, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSummary {
    pub id: VersionId,
    pub version_number: u32,
    pub issue_status: IssueStatus,
    pub issue_date: Option<TimeStamp<Utc>>,
    pub superseded_date: Option<TimeStamp<Utc>>,
    pub deleted: bool,
}

impl From<&DocumentVersion> for VersionSummary {
    fn from(version: &DocumentVersion) -> Self {
        Self {
            id: version.id.clone(),
            version_number: version.version_number,
            issue_status: version.issue_status(),
            issue_date: version.issue_date().cloned(),
            superseded_date: version.superseded_date().cloned(),
            deleted: version.is_deleted(),
        }
    }
}

pub struct DocumentService {
    instance: Arc<sled::Db>,
    store: Arc<DocumentStore>,
    issuance: IssuanceOrchestrator,
    deriver: VersionDeriver,
    editor: Editor,
    access: AccessResolver,
}

impl DocumentService {
    pub fn new(
        instance: Arc<sled::Db>,
        config: &LifecycleConfig,
        collaborators: Collaborators,
    ) -> Result<Self, LifecycleError> {
        Self::with_handlers(instance, config, collaborators, Vec::new())
    }

    /// Like [`DocumentService::new`], with extra post-commit handlers
    /// subscribed after the built-in reference number assigner.
    pub fn with_handlers(
        instance: Arc<sled::Db>,
        config: &LifecycleConfig,
        collaborators: Collaborators,
        handlers: Vec<Arc<dyn EventHandler>>,
    ) -> Result<Self, LifecycleError> {
        let store = Arc::new(DocumentStore::open(instance.clone())?);

        let mut events = EventBus::new();
        events.subscribe(Arc::new(ReferenceNumberAssigner::new(
            store.clone(),
            collaborators.org_settings.clone(),
        )));
        for handler in handlers {
            events.subscribe(handler);
        }

        let issuance = IssuanceOrchestrator::new(
            store.clone(),
            collaborators.artifact_builder,
            collaborators.blob_store,
            collaborators.permissions.clone(),
            collaborators.org_settings,
            events.clone(),
        )
        .with_artifact_timeout(config.artifact_timeout());
        let editor = Editor::new(store.clone(), collaborators.permissions.clone());
        let deriver = VersionDeriver::new(store.clone(), collaborators.permissions, events);
        let access = AccessResolver::new(store.clone(), &config.public_base_url)
            .with_expiry_limits(config.default_link_expiry_days, config.max_link_expiry_days);

        Ok(Self {
            editor,
            instance,
            store,
            issuance,
            deriver,
            access,
        })
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Draft mutations. Each is refused for actors who cannot edit for the
    /// owning organisation, and once the version has left draft.
    pub fn editor(&self) -> &Editor {
        &self.editor
    }

    pub fn flush(&self) -> Result<(), LifecycleError> {
        self.instance.flush()?;
        Ok(())
    }

    pub async fn create_document(
        &self,
        org_id: &str,
        actor_id: &str,
        kind: DocumentKind,
        content: DocumentContent,
    ) -> Result<DocumentVersion, LifecycleError> {
        self.deriver
            .create_document(org_id, actor_id, kind, content)
            .await
    }

    pub fn get_version(&self, version_id: &VersionId) -> Result<DocumentVersion, LifecycleError> {
        self.store.load_version(version_id)
    }

    pub fn snapshot(&self, version_id: &VersionId) -> Result<VersionSnapshot, LifecycleError> {
        self.store.snapshot(version_id)
    }

    /// Fails with [`LifecycleError::Locked`] unless the version is a live draft.
    pub fn assert_editable(&self, version_id: &VersionId) -> Result<DocumentVersion, LifecycleError> {
        guard::assert_editable(&self.store, version_id)
    }

    pub async fn validate_for_issue(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
    ) -> Result<ValidationReport, LifecycleError> {
        self.issuance
            .validate_for_issue(version_id, actor_id, org_id)
            .await
    }

    pub async fn issue(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
    ) -> Result<IssuedVersion, LifecycleError> {
        self.issuance.issue(version_id, actor_id, org_id).await
    }

    pub async fn derive_new_version(
        &self,
        base_document_id: &ChainId,
        actor_id: &str,
        org_id: &str,
        carry_forward_evidence: bool,
    ) -> Result<DerivedVersion, LifecycleError> {
        self.deriver
            .derive_new_version(base_document_id, actor_id, org_id, carry_forward_evidence)
            .await
    }

    pub async fn delete_draft(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
    ) -> Result<DocumentVersion, LifecycleError> {
        self.deriver.delete_draft(version_id, actor_id, org_id).await
    }

    pub fn get_version_history(&self, base_document_id: &ChainId) -> Result<Vec<VersionSummary>, LifecycleError> {
        let chain = self.store.load_chain(base_document_id)?;
        let versions = self.store.chain_versions(&chain)?;
        Ok(versions.iter().map(VersionSummary::from).collect())
    }

    /// Re-checks the chain invariants against what is stored.
    pub fn verify_chain(&self, base_document_id: &ChainId) -> Result<ChainHeads, LifecycleError> {
        let chain = self.store.load_chain(base_document_id)?;
        let versions = self.store.chain_versions(&chain)?;
        audit_chain(&chain, &versions).map_err(|v| LifecycleError::violation(base_document_id, v))
    }

    pub fn reference_number(&self, base_document_id: &ChainId) -> Option<String> {
        reference_number(&self.store, base_document_id).unwrap_or_else(|e| {
            warn!(chain = %base_document_id, error = %e, "reference number lookup failed");
            None
        })
    }

    pub fn create_access_link(
        &self,
        base_document_id: &ChainId,
        org_id: &str,
        expires_in_days: Option<u32>,
        label: Option<String>,
    ) -> Result<CreatedLink, LifecycleError> {
        self.access
            .create_access_link(base_document_id, org_id, expires_in_days, label)
    }

    pub fn revoke_access_link(&self, link_id: &str, org_id: &str) -> Result<AccessLink, LifecycleError> {
        self.access.revoke(link_id, org_id)
    }

    pub fn delete_access_link(&self, link_id: &str, org_id: &str) -> Result<(), LifecycleError> {
        self.access.delete(link_id, org_id)
    }

    pub fn list_access_links(
        &self,
        base_document_id: &ChainId,
        org_id: &str,
    ) -> Result<Vec<AccessLink>, LifecycleError> {
        self.access.list_links(base_document_id, org_id)
    }

    pub fn resolve_external_token(&self, token: &str) -> Result<ClientDocument, LifecycleError> {
        self.access.resolve_external_token(token)
    }
}
