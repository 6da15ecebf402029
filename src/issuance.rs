//! Issuance orchestrator: validate, build and persist the locked artifact,
//! read it back, then commit the issue and supersession in one transaction.
//!
//! The artifact is always verified as durable before the status flip is
//! attempted, so a version is never observed as issued without a readable
//! artifact. Anything that fails before the commit leaves the version a draft.
use crate::collaborators::{ArtifactBuilder, BlobStore, OrgSettings, PermissionResolver};
use crate::document::{TimeStamp, VersionId};
use crate::error::LifecycleError;
use crate::events::{DispatchReport, EventBus, LifecycleEvent};
use crate::guard::editable_in_tx;
use crate::lifecycle::{DocumentVersion, LockedArtifact};
use crate::store::{DocumentStore, VersionSnapshot, abort, audit_chain};
use crate::validation::{ValidationIssue, ValidationReport, validate_snapshot};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_ARTIFACT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct IssuedVersion {
    pub version: DocumentVersion,
    pub superseded: Option<VersionId>,
    pub warnings: Vec<ValidationIssue>,
    pub dispatch: DispatchReport,
}

pub struct IssuanceOrchestrator {
    store: Arc<DocumentStore>,
    artifact_builder: Arc<dyn ArtifactBuilder>,
    blob_store: Arc<dyn BlobStore>,
    permissions: Arc<dyn PermissionResolver>,
    org_settings: Arc<dyn OrgSettings>,
    events: EventBus,
    artifact_timeout: Duration,
}

impl IssuanceOrchestrator {
    pub fn new(
        store: Arc<DocumentStore>,
        artifact_builder: Arc<dyn ArtifactBuilder>,
        blob_store: Arc<dyn BlobStore>,
        permissions: Arc<dyn PermissionResolver>,
        org_settings: Arc<dyn OrgSettings>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            artifact_builder,
            blob_store,
            permissions,
            org_settings,
            events,
            artifact_timeout: DEFAULT_ARTIFACT_TIMEOUT,
        }
    }

    pub fn with_artifact_timeout(mut self, timeout: Duration) -> Self {
        self.artifact_timeout = timeout;
        self
    }

    #[tracing::instrument(skip(self))]
    pub async fn validate_for_issue(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
    ) -> Result<ValidationReport, LifecycleError> {
        let snapshot = self.store.snapshot(version_id)?;
        Ok(self.validate(&snapshot, actor_id, org_id).await)
    }

    async fn validate(&self, snapshot: &VersionSnapshot, actor_id: &str, org_id: &str) -> ValidationReport {
        let same_org = snapshot.version.org_id == org_id;
        let can_edit = same_org && self.permissions.can_edit(actor_id, org_id).await;
        let approval_required = self.org_settings.approval_required(org_id).await;
        validate_snapshot(snapshot, approval_required, can_edit)
    }

    #[tracing::instrument(skip(self), fields(chain = tracing::field::Empty))]
    pub async fn issue(
        &self,
        version_id: &VersionId,
        actor_id: &str,
        org_id: &str,
    ) -> Result<IssuedVersion, LifecycleError> {
        let snapshot = self.store.snapshot(version_id)?;
        let chain_id = snapshot.version.base_document_id.clone();
        tracing::Span::current().record("chain", tracing::field::display(&chain_id));
        let chain_revision = self.store.load_chain(&chain_id)?.revision;

        let report = self.validate(&snapshot, actor_id, org_id).await;
        if let Some(err) = report.blocking_error() {
            info!(errors = report.errors.len(), "issue blocked by validation");
            return Err(err);
        }

        let artifact = match tokio::time::timeout(self.artifact_timeout, self.produce_artifact(&snapshot)).await {
            Ok(artifact) => artifact?,
            Err(_) => {
                warn!(timeout = ?self.artifact_timeout, "artifact generation timed out");
                return Err(LifecycleError::ArtifactGenerationTimedOut(self.artifact_timeout));
            }
        };

        let committed = match self.commit(&snapshot, chain_revision, actor_id, &artifact) {
            Err(LifecycleError::Conflict { .. }) => self.retry_commit(&snapshot, actor_id, &artifact),
            other => other,
        };
        let (version, superseded) = match committed {
            Ok(done) => done,
            Err(e) => {
                // nothing references the blob now
                if let Err(cleanup) = self.blob_store.remove(&artifact.path).await {
                    warn!(path = %artifact.path, error = %cleanup, "failed to remove orphaned artifact");
                }
                return Err(e);
            }
        };
        info!(
            version_number = version.version_number,
            superseded = ?superseded,
            artifact = %artifact.path,
            "version issued"
        );

        let event = LifecycleEvent::VersionIssued {
            version_id: version.id.clone(),
            base_document_id: version.base_document_id.clone(),
            org_id: version.org_id.clone(),
            kind: version.kind,
            version_number: version.version_number,
            issued_by: actor_id.to_string(),
            issued_at: version.issue_date().cloned().unwrap_or_default(),
            superseded: superseded.clone(),
        };
        let dispatch = self.events.publish(&event).await;

        Ok(IssuedVersion {
            version,
            superseded,
            warnings: report.warnings,
            dispatch,
        })
    }

    /// Build, upload, and read back the artifact.
    async fn produce_artifact(&self, snapshot: &VersionSnapshot) -> Result<LockedArtifact, LifecycleError> {
        let bytes = self
            .artifact_builder
            .build_artifact(snapshot)
            .await
            .map_err(|e| LifecycleError::ArtifactGenerationFailed(e.to_string()))?;
        if bytes.is_empty() {
            return Err(LifecycleError::ArtifactGenerationFailed(
                "artifact builder returned no bytes".into(),
            ));
        }

        let digest = sha256::digest(&bytes);
        let version = &snapshot.version;
        // one object per attempt, so cleanup after a lost race never touches
        // the winner's artifact
        let attempt = hex::encode(&uuid7::uuid7().as_bytes()[8..]);
        let key = format!(
            "locked/{}/v{}-{}-{}.pdf",
            version.base_document_id,
            version.version_number,
            &digest[..12],
            attempt
        );
        let stored = self
            .blob_store
            .put(&key, &bytes)
            .await
            .map_err(|e| LifecycleError::ArtifactGenerationFailed(format!("upload failed: {e}")))?;

        let unverified = |reason: String| {
            error!(path = %stored.path, %reason, "artifact persistence could not be verified");
            LifecycleError::ArtifactPersistenceUnverified {
                path: stored.path.clone(),
                reason,
            }
        };
        if stored.sha256 != digest || stored.size_bytes != bytes.len() as u64 {
            return Err(unverified("blob store reported a different hash or size".into()));
        }
        match self.blob_store.get(&stored.path).await {
            Ok(Some(read)) if read.len() == bytes.len() && sha256::digest(&read) == digest => {}
            Ok(Some(_)) => return Err(unverified("read-back content does not match".into())),
            Ok(None) => return Err(unverified("nothing stored at path after write".into())),
            Err(e) => return Err(unverified(format!("read-back failed: {e}"))),
        }

        Ok(LockedArtifact {
            path: stored.path,
            sha256: digest,
            size_bytes: bytes.len() as u64,
            generated_at: TimeStamp::new(),
        })
    }

    /// Flip the version to issued and its predecessor to superseded, provided
    /// neither the chain nor the version's content moved since `snapshot`.
    fn commit(
        &self,
        snapshot: &VersionSnapshot,
        expected_chain_revision: u64,
        actor_id: &str,
        artifact: &LockedArtifact,
    ) -> Result<(DocumentVersion, Option<VersionId>), LifecycleError> {
        let version_id = &snapshot.version.id;
        let chain_id = &snapshot.version.base_document_id;
        let expected_content_revision = snapshot.version.revision;
        let issued_at = TimeStamp::new();

        self.store.transaction(|tx| {
            let mut chain = tx.chain(chain_id)?;
            if chain.revision != expected_chain_revision {
                return abort(LifecycleError::Conflict {
                    chain: chain_id.clone(),
                });
            }
            let mut version = editable_in_tx(tx, version_id)?;
            if version.revision != expected_content_revision {
                return abort(LifecycleError::Conflict {
                    chain: chain_id.clone(),
                });
            }

            let versions = tx.chain_versions(&chain)?;
            let heads = match audit_chain(&chain, &versions) {
                Ok(heads) => heads,
                Err(violation) => return abort(LifecycleError::violation(chain_id, violation)),
            };

            if let Err(e) = version.mark_issued(actor_id, issued_at.clone(), artifact.clone()) {
                return abort(e);
            }

            let mut superseded = None;
            if let Some(position) = heads.issued {
                let mut predecessor = versions[position].clone();
                if let Err(e) = predecessor.mark_superseded(&version, issued_at.clone()) {
                    return abort(e);
                }
                tx.put_version(&predecessor)?;
                superseded = Some(predecessor.id);
            }

            tx.put_version(&version)?;
            chain.revision += 1;
            tx.put_chain(&chain)?;
            Ok((version, superseded))
        })
    }

    /// One retry after a conflict, only when the content the artifact was
    /// built from is still the current content.
    fn retry_commit(
        &self,
        snapshot: &VersionSnapshot,
        actor_id: &str,
        artifact: &LockedArtifact,
    ) -> Result<(DocumentVersion, Option<VersionId>), LifecycleError> {
        let chain_id = &snapshot.version.base_document_id;
        let current = self.store.load_version(&snapshot.version.id)?;
        if current.revision != snapshot.version.revision || !current.is_editable() {
            warn!("content or status changed during issue, not retrying");
            return Err(LifecycleError::Conflict {
                chain: chain_id.clone(),
            });
        }
        let chain = self.store.load_chain(chain_id)?;
        info!(revision = chain.revision, "retrying issue commit after conflict");
        self.commit(snapshot, chain.revision, actor_id, artifact)
    }
}
