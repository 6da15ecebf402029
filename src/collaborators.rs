//! Interfaces to the services the lifecycle engine calls but does not own:
//! rendering, blob storage, permissions and organisation settings.
use crate::store::{VersionSnapshot, encode};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Produces the canonical rendering of a version. The same snapshot must
/// always produce the same bytes.
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    async fn build_artifact(&self, snapshot: &VersionSnapshot) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> anyhow::Result<StoredBlob>;
    /// `Ok(None)` when nothing is stored at `path`.
    async fn get(&self, path: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn remove(&self, path: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PermissionResolver: Send + Sync {
    async fn can_edit(&self, actor_id: &str, org_id: &str) -> bool;
}

#[async_trait]
pub trait OrgSettings: Send + Sync {
    async fn approval_required(&self, org_id: &str) -> bool;
    /// Overrides the per-kind default prefix for reference numbers.
    async fn reference_prefix(&self, org_id: &str) -> Option<String>;
}

/// Renders the snapshot as CBOR. Stand-in for the PDF renderer wherever a
/// byte-stable artifact is all that matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct CborArtifactBuilder;

#[async_trait]
impl ArtifactBuilder for CborArtifactBuilder {
    async fn build_artifact(&self, snapshot: &VersionSnapshot) -> anyhow::Result<Vec<u8>> {
        Ok(encode("artifact", snapshot)?)
    }
}

/// Blob store on the local filesystem. Writes go to a temporary file that is
/// synced and renamed into place, so a blob is either fully present or absent.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            anyhow::bail!("blob key must be a plain relative path: {key}");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> anyhow::Result<StoredBlob> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("partial");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        Ok(StoredBlob {
            path: key.to_string(),
            sha256: sha256::digest(bytes),
            size_bytes: bytes.len() as u64,
        })
    }

    async fn get(&self, path: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.resolve(path)?).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, path: &str) -> anyhow::Result<()> {
        match tokio::fs::remove_file(self.resolve(path)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
