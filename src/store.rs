//! Persistent version chains over sled.
//!
//! Every multi-row change goes through [`DocumentStore::transaction`], which
//! opens a serializable sled transaction over all document trees and hands
//! the closure a [`ChainTx`] with typed accessors. The closure may be re-run
//! by sled on internal conflicts, so it must not have side effects beyond the
//! transaction itself.
use crate::document::{
    ChainId, DocumentKind, EvidenceLink, EvidenceRecord, TimeStamp, VersionId, WorkItem,
};
use crate::error::{ChainViolation, LifecycleError, StoreError};
use crate::lifecycle::{DocumentVersion, IssueStatus};
use chrono::Utc;
use sled::Tree;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::Transactional;
use std::sync::Arc;

pub(crate) type TxResult<T> = ConflictableTransactionResult<T, LifecycleError>;

/// The chain index row: which versions exist, in order.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ChainRecord {
    #[n(0)]
    pub id: ChainId,
    #[n(1)]
    pub org_id: String,
    #[n(2)]
    pub kind: DocumentKind,
    #[n(3)]
    pub versions: Vec<VersionId>, // index i holds version i + 1
    // bumped by every change to chain membership or issue state
    #[n(4)]
    pub revision: u64,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
}

impl ChainRecord {
    pub fn next_version_number(&self) -> u32 {
        self.versions.len() as u32 + 1
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LinkedEvidence {
    #[n(0)]
    pub link: EvidenceLink,
    #[n(1)]
    pub record: EvidenceRecord,
}

/// A version together with its child rows, as read at one point in time.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct VersionSnapshot {
    #[n(0)]
    pub version: DocumentVersion,
    #[n(1)]
    pub work_items: Vec<WorkItem>,
    #[n(2)]
    pub evidence: Vec<LinkedEvidence>,
}

pub(crate) fn encode<T: minicbor::Encode<()>>(
    what: &'static str,
    value: &T,
) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(value).map_err(|e| StoreError::Encode {
        what,
        reason: e.to_string(),
    })
}

pub(crate) fn decode<T>(what: &'static str, bytes: &[u8]) -> Result<T, StoreError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|source| StoreError::Decode { what, source })
}

pub(crate) fn child_key(version_id: &VersionId, child_id: &str) -> String {
    format!("{}/{}", version_id.as_str(), child_id)
}

fn child_prefix(version_id: &VersionId) -> String {
    format!("{}/", version_id.as_str())
}

pub(crate) fn abort<T>(err: impl Into<LifecycleError>) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err.into()))
}

fn tx_get<T>(tree: &TransactionalTree, key: &[u8], what: &'static str) -> TxResult<Option<T>>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    match tree.get(key)? {
        Some(bytes) => match decode(what, &bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => abort(e),
        },
        None => Ok(None),
    }
}

fn tx_put<T: minicbor::Encode<()>>(
    tree: &TransactionalTree,
    key: &[u8],
    what: &'static str,
    value: &T,
) -> TxResult<()> {
    match encode(what, value) {
        Ok(bytes) => {
            tree.insert(key, bytes)?;
            Ok(())
        }
        Err(e) => abort(e),
    }
}

/// Typed view over the document trees inside one transaction.
pub(crate) struct ChainTx<'a> {
    versions: &'a TransactionalTree,
    chains: &'a TransactionalTree,
    work_items: &'a TransactionalTree,
    evidence: &'a TransactionalTree,
    evidence_links: &'a TransactionalTree,
}

impl ChainTx<'_> {
    pub(crate) fn version(&self, id: &VersionId) -> TxResult<DocumentVersion> {
        match tx_get(self.versions, id.as_str().as_bytes(), "version")? {
            Some(v) => Ok(v),
            None => abort(LifecycleError::VersionNotFound(id.clone())),
        }
    }

    pub(crate) fn put_version(&self, version: &DocumentVersion) -> TxResult<()> {
        tx_put(
            self.versions,
            version.id.as_str().as_bytes(),
            "version",
            version,
        )
    }

    pub(crate) fn chain(&self, id: &ChainId) -> TxResult<ChainRecord> {
        match tx_get(self.chains, id.as_str().as_bytes(), "chain")? {
            Some(c) => Ok(c),
            None => abort(LifecycleError::ChainNotFound(id.clone())),
        }
    }

    pub(crate) fn chain_exists(&self, id: &ChainId) -> TxResult<bool> {
        Ok(self.chains.get(id.as_str().as_bytes())?.is_some())
    }

    pub(crate) fn put_chain(&self, chain: &ChainRecord) -> TxResult<()> {
        tx_put(self.chains, chain.id.as_str().as_bytes(), "chain", chain)
    }

    /// All versions of the chain in version order.
    pub(crate) fn chain_versions(&self, chain: &ChainRecord) -> TxResult<Vec<DocumentVersion>> {
        let mut out = Vec::with_capacity(chain.versions.len());
        for id in &chain.versions {
            match tx_get(self.versions, id.as_str().as_bytes(), "version")? {
                Some(v) => out.push(v),
                None => {
                    return abort(LifecycleError::violation(
                        &chain.id,
                        ChainViolation::MissingVersion(id.clone()),
                    ));
                }
            }
        }
        Ok(out)
    }

    pub(crate) fn work_item(&self, version_id: &VersionId, item_id: &str) -> TxResult<WorkItem> {
        let key = child_key(version_id, item_id);
        match tx_get(self.work_items, key.as_bytes(), "work item")? {
            Some(item) => Ok(item),
            None => abort(LifecycleError::WorkItemNotFound(item_id.to_string())),
        }
    }

    pub(crate) fn put_work_item(&self, item: &WorkItem) -> TxResult<()> {
        let key = child_key(&item.version_id, &item.id);
        tx_put(self.work_items, key.as_bytes(), "work item", item)
    }

    pub(crate) fn remove_work_item(&self, version_id: &VersionId, item_id: &str) -> TxResult<bool> {
        let key = child_key(version_id, item_id);
        Ok(self.work_items.remove(key.as_bytes())?.is_some())
    }

    pub(crate) fn evidence(&self, evidence_id: &str) -> TxResult<EvidenceRecord> {
        match tx_get(self.evidence, evidence_id.as_bytes(), "evidence")? {
            Some(record) => Ok(record),
            None => abort(LifecycleError::EvidenceNotFound(evidence_id.to_string())),
        }
    }

    pub(crate) fn put_evidence(&self, record: &EvidenceRecord) -> TxResult<()> {
        tx_put(self.evidence, record.id.as_bytes(), "evidence", record)
    }

    pub(crate) fn link(&self, version_id: &VersionId, evidence_id: &str) -> TxResult<EvidenceLink> {
        let key = child_key(version_id, evidence_id);
        match tx_get(self.evidence_links, key.as_bytes(), "evidence link")? {
            Some(link) => Ok(link),
            None => abort(LifecycleError::EvidenceNotFound(evidence_id.to_string())),
        }
    }

    pub(crate) fn put_link(&self, link: &EvidenceLink) -> TxResult<()> {
        let key = child_key(&link.version_id, &link.evidence_id);
        tx_put(self.evidence_links, key.as_bytes(), "evidence link", link)
    }

    pub(crate) fn remove_link(&self, version_id: &VersionId, evidence_id: &str) -> TxResult<bool> {
        let key = child_key(version_id, evidence_id);
        Ok(self.evidence_links.remove(key.as_bytes())?.is_some())
    }
}

pub struct DocumentStore {
    db: Arc<sled::Db>,
    versions: Tree,
    chains: Tree,
    work_items: Tree,
    evidence: Tree,
    evidence_links: Tree,
    pub(crate) access_links: Tree,
    pub(crate) access_link_ids: Tree,
    pub(crate) references: Tree,
    pub(crate) counters: Tree,
}

impl DocumentStore {
    pub fn open(db: Arc<sled::Db>) -> Result<Self, StoreError> {
        Ok(Self {
            versions: db.open_tree("versions")?,
            chains: db.open_tree("chains")?,
            work_items: db.open_tree("work_items")?,
            evidence: db.open_tree("evidence")?,
            evidence_links: db.open_tree("evidence_links")?,
            access_links: db.open_tree("access_links")?,
            access_link_ids: db.open_tree("access_link_ids")?,
            references: db.open_tree("references")?,
            counters: db.open_tree("counters")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    /// Run `f` as one serializable transaction over the document trees.
    pub(crate) fn transaction<T, F>(&self, f: F) -> Result<T, LifecycleError>
    where
        F: Fn(&ChainTx<'_>) -> TxResult<T>,
    {
        let res = (
            &self.versions,
            &self.chains,
            &self.work_items,
            &self.evidence,
            &self.evidence_links,
        )
            .transaction(|(versions, chains, work_items, evidence, evidence_links)| {
                let tx = ChainTx {
                    versions,
                    chains,
                    work_items,
                    evidence,
                    evidence_links,
                };
                f(&tx)
            });

        res.map_err(|e| match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StoreError::Sled(e).into(),
        })
    }

    pub fn get_version(&self, id: &VersionId) -> Result<Option<DocumentVersion>, StoreError> {
        match self.versions.get(id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(decode("version", &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn load_version(&self, id: &VersionId) -> Result<DocumentVersion, LifecycleError> {
        self.get_version(id)?
            .ok_or_else(|| LifecycleError::VersionNotFound(id.clone()))
    }

    pub fn get_chain(&self, id: &ChainId) -> Result<Option<ChainRecord>, StoreError> {
        match self.chains.get(id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(decode("chain", &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn load_chain(&self, id: &ChainId) -> Result<ChainRecord, LifecycleError> {
        self.get_chain(id)?
            .ok_or_else(|| LifecycleError::ChainNotFound(id.clone()))
    }

    pub fn chain_versions(&self, chain: &ChainRecord) -> Result<Vec<DocumentVersion>, LifecycleError> {
        chain
            .versions
            .iter()
            .map(|id| {
                self.get_version(id)?.ok_or_else(|| {
                    LifecycleError::violation(&chain.id, ChainViolation::MissingVersion(id.clone()))
                })
            })
            .collect()
    }

    pub fn work_items(&self, version_id: &VersionId) -> Result<Vec<WorkItem>, StoreError> {
        self.work_items
            .scan_prefix(child_prefix(version_id).as_bytes())
            .values()
            .map(|bytes| decode("work item", &bytes?))
            .collect()
    }

    pub fn evidence_links(&self, version_id: &VersionId) -> Result<Vec<EvidenceLink>, StoreError> {
        self.evidence_links
            .scan_prefix(child_prefix(version_id).as_bytes())
            .values()
            .map(|bytes| decode("evidence link", &bytes?))
            .collect()
    }

    pub fn get_evidence(&self, evidence_id: &str) -> Result<Option<EvidenceRecord>, StoreError> {
        match self.evidence.get(evidence_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode("evidence", &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn snapshot(&self, version_id: &VersionId) -> Result<VersionSnapshot, LifecycleError> {
        let version = self.load_version(version_id)?;
        let work_items = self.work_items(version_id)?;

        let mut evidence = Vec::new();
        for link in self.evidence_links(version_id)? {
            let record = self
                .get_evidence(&link.evidence_id)?
                .ok_or_else(|| LifecycleError::EvidenceNotFound(link.evidence_id.clone()))?;
            evidence.push(LinkedEvidence { link, record });
        }

        Ok(VersionSnapshot {
            version,
            work_items,
            evidence,
        })
    }
}

/// Positions of the interesting versions in a chain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChainHeads {
    pub issued: Option<usize>,
    pub draft: Option<usize>,
}

/// Checks the chain-wide invariants and reports where the current issued
/// version and live draft sit.
pub fn audit_chain(
    chain: &ChainRecord,
    versions: &[DocumentVersion],
) -> Result<ChainHeads, ChainViolation> {
    let mut issued = Vec::new();
    let mut drafts = Vec::new();

    for (position, version) in versions.iter().enumerate() {
        if version.version_number as usize != position + 1 {
            return Err(ChainViolation::NumberingGap {
                position,
                found: version.version_number,
            });
        }
        match version.issue_status() {
            IssueStatus::Issued => issued.push(position),
            IssueStatus::Draft if !version.is_deleted() => drafts.push(position),
            IssueStatus::Draft => {}
            IssueStatus::Superseded => {
                let successor = version.superseded_by().and_then(|id| {
                    chain.versions.iter().position(|candidate| candidate == id)
                });
                match successor {
                    Some(at) if at > position => {}
                    _ => {
                        return Err(ChainViolation::BadSupersession {
                            version: version.id.clone(),
                            successor: version.superseded_by().cloned().unwrap_or_else(|| {
                                VersionId(String::new())
                            }),
                        });
                    }
                }
            }
        }
    }

    if issued.len() > 1 {
        return Err(ChainViolation::MultipleIssued(issued.len()));
    }
    if drafts.len() > 1 {
        return Err(ChainViolation::MultipleDrafts(drafts.len()));
    }
    if let Some(&at) = drafts.first() {
        if at + 1 != versions.len() {
            return Err(ChainViolation::DraftNotHead(versions[at].id.clone()));
        }
    }

    Ok(ChainHeads {
        issued: issued.first().copied(),
        draft: drafts.first().copied(),
    })
}
