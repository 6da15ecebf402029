//! Client-facing access links.
//!
//! A link is bound to a chain, never to a version row. Resolution looks up the
//! chain's single issued version at access time, so issuing a new version
//! moves every existing link forward without touching the links themselves.
use crate::document::{ChainId, DocumentContent, TimeStamp, VersionId, WorkItem};
use crate::error::{AccessDenied, LifecycleError, StoreError};
use crate::events::reference_number;
use crate::lifecycle::LockedArtifact;
use crate::store::{DocumentStore, LinkedEvidence, TxResult, abort, audit_chain, decode, encode};
use crate::utils::{LINK_HRP, new_access_token, new_id};
use chrono::Utc;
use sled::Transactional;
use sled::transaction::{TransactionError, TransactionalTree};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_LINK_EXPIRY_DAYS: u32 = 30;
pub const MAX_LINK_EXPIRY_DAYS: u32 = 365;

// key is the token in the access link tree
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AccessLink {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub token: String,
    #[n(2)]
    pub base_document_id: ChainId,
    #[n(3)]
    pub org_id: String,
    #[n(4)]
    pub label: Option<String>,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
    #[n(6)]
    pub expires_at: TimeStamp<Utc>,
    #[n(7)]
    pub revoked_at: Option<TimeStamp<Utc>>,
    #[n(8)]
    pub access_count: u64,
    #[n(9)]
    pub last_accessed_at: Option<TimeStamp<Utc>>,
}

impl AccessLink {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired_at(&self, now: &TimeStamp<Utc>) -> bool {
        !now.is_before(&self.expires_at)
    }
}

#[derive(Debug, Clone)]
pub struct CreatedLink {
    pub link: AccessLink,
    pub url: String,
}

/// What a client sees: the current issued version of the chain.
#[derive(Debug, Clone)]
pub struct ClientDocument {
    pub base_document_id: ChainId,
    pub version_id: VersionId,
    pub version_number: u32,
    pub issue_date: TimeStamp<Utc>,
    pub reference_number: Option<String>,
    pub content: DocumentContent,
    pub artifact: LockedArtifact,
    pub work_items: Vec<WorkItem>,
    pub evidence: Vec<LinkedEvidence>,
}

pub struct AccessResolver {
    store: Arc<DocumentStore>,
    public_base_url: String,
    default_expiry_days: u32,
    max_expiry_days: u32,
}

impl AccessResolver {
    pub fn new(store: Arc<DocumentStore>, public_base_url: &str) -> Self {
        Self {
            store,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            default_expiry_days: DEFAULT_LINK_EXPIRY_DAYS,
            max_expiry_days: MAX_LINK_EXPIRY_DAYS,
        }
    }

    pub fn with_expiry_limits(mut self, default_days: u32, max_days: u32) -> Self {
        self.default_expiry_days = default_days.min(max_days);
        self.max_expiry_days = max_days;
        self
    }

    fn url_for(&self, token: &str) -> String {
        format!("{}/client/{}", self.public_base_url, token)
    }

    fn get_by_token(&self, token: &str) -> Result<Option<AccessLink>, StoreError> {
        match self.store.access_links.get(token.as_bytes())? {
            Some(bytes) => Ok(Some(decode("access link", &bytes)?)),
            None => Ok(None),
        }
    }

    /// Runs `f` over the link and link id trees as one transaction.
    fn link_transaction<T, F>(&self, f: F) -> Result<T, LifecycleError>
    where
        F: Fn(&TransactionalTree, &TransactionalTree) -> TxResult<T>,
    {
        (&self.store.access_links, &self.store.access_link_ids)
            .transaction(|(links, ids)| f(links, ids))
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => LifecycleError::from(e),
            })
    }

    #[tracing::instrument(skip(self, label))]
    pub fn create_access_link(
        &self,
        base_document_id: &ChainId,
        org_id: &str,
        expires_in_days: Option<u32>,
        label: Option<String>,
    ) -> Result<CreatedLink, LifecycleError> {
        let expires_in_days = expires_in_days.unwrap_or(self.default_expiry_days);
        let chain = self.store.load_chain(base_document_id)?;
        if chain.org_id != org_id {
            return Err(LifecycleError::ChainNotFound(base_document_id.clone()));
        }
        if expires_in_days == 0 || expires_in_days > self.max_expiry_days {
            return Err(LifecycleError::InvalidRequest(format!(
                "link expiry must be between 1 and {} days",
                self.max_expiry_days
            )));
        }

        let now = TimeStamp::new();
        let expires_at = now
            .plus_days(i64::from(expires_in_days))
            .ok_or_else(|| LifecycleError::InvalidRequest("link expiry out of range".into()))?;
        let link = AccessLink {
            id: new_id(LINK_HRP)?,
            token: new_access_token(),
            base_document_id: base_document_id.clone(),
            org_id: org_id.to_string(),
            label,
            created_at: now,
            expires_at,
            revoked_at: None,
            access_count: 0,
            last_accessed_at: None,
        };

        let bytes = encode("access link", &link)?;
        self.link_transaction(|links, ids| {
            links.insert(link.token.as_bytes(), bytes.clone())?;
            ids.insert(link.id.as_bytes(), link.token.as_bytes())?;
            Ok(())
        })?;

        info!(link = %link.id, chain = %base_document_id, "access link created");
        Ok(CreatedLink {
            url: self.url_for(&link.token),
            link,
        })
    }

    /// Sets `revoked_at` once. The row is re-read inside the transaction, so
    /// a concurrent delete wins and access counts are never rolled back.
    #[tracing::instrument(skip(self))]
    pub fn revoke(&self, link_id: &str, org_id: &str) -> Result<AccessLink, LifecycleError> {
        let now = TimeStamp::new();
        let (link, revoked) = self.link_transaction(|links, ids| {
            let mut link = link_in_tx(links, ids, link_id, org_id)?;
            if link.is_revoked() {
                return Ok((link, false));
            }
            link.revoked_at = Some(now.clone());
            let bytes = match encode("access link", &link) {
                Ok(bytes) => bytes,
                Err(e) => return abort(e),
            };
            links.insert(link.token.as_bytes(), bytes)?;
            Ok((link, true))
        })?;
        if revoked {
            info!(link = %link_id, "access link revoked");
        }
        Ok(link)
    }

    #[tracing::instrument(skip(self))]
    pub fn delete(&self, link_id: &str, org_id: &str) -> Result<(), LifecycleError> {
        self.link_transaction(|links, ids| {
            let link = link_in_tx(links, ids, link_id, org_id)?;
            links.remove(link.token.as_bytes())?;
            ids.remove(link_id.as_bytes())?;
            Ok(())
        })?;
        info!(link = %link_id, "access link deleted");
        Ok(())
    }

    /// Links of one chain, oldest first. Chains of other organisations read
    /// as not found.
    pub fn list_links(
        &self,
        base_document_id: &ChainId,
        org_id: &str,
    ) -> Result<Vec<AccessLink>, LifecycleError> {
        let chain = self.store.load_chain(base_document_id)?;
        if chain.org_id != org_id {
            return Err(LifecycleError::ChainNotFound(base_document_id.clone()));
        }
        let mut out = Vec::new();
        for bytes in self.store.access_links.iter().values() {
            let link: AccessLink = decode("access link", &bytes?)?;
            if &link.base_document_id == base_document_id && link.org_id == org_id {
                out.push(link);
            }
        }
        out.sort_by_key(|l| l.created_at.to_datetime_utc());
        Ok(out)
    }

    /// Resolves a token to the chain's current issued version. Revoked and
    /// expired links are denied outright.
    #[tracing::instrument(skip_all)]
    pub fn resolve_external_token(&self, token: &str) -> Result<ClientDocument, LifecycleError> {
        let link = self.get_by_token(token)?.ok_or(AccessDenied::UnknownToken)?;
        if link.is_revoked() {
            debug!(link = %link.id, "revoked link used");
            return Err(AccessDenied::Revoked.into());
        }
        if link.is_expired_at(&TimeStamp::new()) {
            debug!(link = %link.id, "expired link used");
            return Err(AccessDenied::Expired.into());
        }

        let chain = self.store.load_chain(&link.base_document_id)?;
        let versions = self.store.chain_versions(&chain)?;
        let heads = audit_chain(&chain, &versions)
            .map_err(|v| LifecycleError::violation(&chain.id, v))?;
        let issued = heads
            .issued
            .map(|at| &versions[at])
            .ok_or(AccessDenied::NotIssued)?;

        let snapshot = self.store.snapshot(&issued.id)?;
        let (issue_date, artifact) = match snapshot.version.state().issue_record() {
            Some(record) => (record.issue_date.clone(), record.artifact.clone()),
            None => return Err(AccessDenied::NotIssued.into()),
        };
        let reference = reference_number(&self.store, &chain.id).unwrap_or_else(|e| {
            warn!(error = %e, "reference number lookup failed");
            None
        });

        self.record_access(token);

        Ok(ClientDocument {
            base_document_id: chain.id.clone(),
            version_id: snapshot.version.id.clone(),
            version_number: snapshot.version.version_number,
            issue_date,
            reference_number: reference,
            content: snapshot.version.content,
            artifact,
            work_items: snapshot.work_items,
            evidence: snapshot.evidence,
        })
    }

    // counters are informational, a failed update never denies access
    fn record_access(&self, token: &str) {
        let res = self.store.access_links.update_and_fetch(token.as_bytes(), |old| {
            let bytes = old?;
            // returning None would delete the row
            let Ok(mut link) = decode::<AccessLink>("access link", bytes) else {
                return Some(bytes.to_vec());
            };
            link.access_count += 1;
            link.last_accessed_at = Some(TimeStamp::new());
            encode("access link", &link).ok().or_else(|| Some(bytes.to_vec()))
        });
        if let Err(e) = res {
            warn!(error = %e, "failed to record link access");
        }
    }
}

/// Finds a link by id inside a link transaction. Links of other
/// organisations read as not found.
fn link_in_tx(
    links: &TransactionalTree,
    ids: &TransactionalTree,
    link_id: &str,
    org_id: &str,
) -> TxResult<AccessLink> {
    let Some(token) = ids.get(link_id.as_bytes())? else {
        return abort(LifecycleError::LinkNotFound(link_id.to_string()));
    };
    let Some(bytes) = links.get(&token)? else {
        return abort(LifecycleError::LinkNotFound(link_id.to_string()));
    };
    let link: AccessLink = match decode("access link", &bytes) {
        Ok(link) => link,
        Err(e) => return abort(e),
    };
    if link.org_id != org_id {
        return abort(LifecycleError::LinkNotFound(link_id.to_string()));
    }
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_exclusive_of_the_instant() {
        let created = TimeStamp::new_with(2026, 1, 1, 0, 0, 0);
        let link = AccessLink {
            id: "lnk_1".into(),
            token: "t".into(),
            base_document_id: ChainId::from("doc_a"),
            org_id: "org_a".into(),
            label: None,
            created_at: created.clone(),
            expires_at: created.plus_days(30).unwrap(),
            revoked_at: None,
            access_count: 0,
            last_accessed_at: None,
        };

        assert!(!link.is_expired_at(&TimeStamp::new_with(2026, 1, 30, 23, 59, 59)));
        assert!(link.is_expired_at(&TimeStamp::new_with(2026, 1, 31, 0, 0, 0)));
        assert!(link.is_expired_at(&TimeStamp::new_with(2027, 1, 1, 0, 0, 0)));
    }

    fn resolver(dir: &std::path::Path) -> anyhow::Result<AccessResolver> {
        let db = Arc::new(sled::open(dir.join("access.db"))?);
        let store = Arc::new(DocumentStore::open(db)?);
        Ok(AccessResolver::new(store, "https://docs.example.com/"))
    }

    fn stored_link(resolver: &AccessResolver, id: &str, token: &str) -> anyhow::Result<AccessLink> {
        let now = TimeStamp::new();
        let link = AccessLink {
            id: id.into(),
            token: token.into(),
            base_document_id: ChainId::from("doc_a"),
            org_id: "org_a".into(),
            label: None,
            expires_at: now.plus_days(30).unwrap(),
            created_at: now,
            revoked_at: None,
            access_count: 0,
            last_accessed_at: None,
        };
        resolver
            .store
            .access_links
            .insert(token.as_bytes(), encode("access link", &link)?)?;
        resolver.store.access_link_ids.insert(id.as_bytes(), token.as_bytes())?;
        Ok(link)
    }

    #[test]
    fn unreadable_row_survives_access_bump() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let resolver = resolver(temp_dir.path())?;
        resolver.store.access_links.insert(b"t_bad", b"not cbor".to_vec())?;

        resolver.record_access("t_bad");

        let row = resolver.store.access_links.get(b"t_bad")?;
        assert_eq!(row.as_deref(), Some(&b"not cbor"[..]));
        Ok(())
    }

    #[test]
    fn revoke_keeps_access_counts() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let resolver = resolver(temp_dir.path())?;
        stored_link(&resolver, "lnk_a", "t_a")?;
        resolver.record_access("t_a");
        resolver.record_access("t_a");

        let revoked = resolver.revoke("lnk_a", "org_a")?;
        assert!(revoked.is_revoked());
        assert_eq!(revoked.access_count, 2);

        // a second revoke leaves the first timestamp alone
        let again = resolver.revoke("lnk_a", "org_a")?;
        assert_eq!(again.revoked_at, revoked.revoked_at);

        let stored = resolver.get_by_token("t_a")?.unwrap();
        assert_eq!(stored.access_count, 2);
        assert_eq!(stored.revoked_at, revoked.revoked_at);
        Ok(())
    }

    #[test]
    fn revoke_after_delete_does_not_restore_the_link() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let resolver = resolver(temp_dir.path())?;
        stored_link(&resolver, "lnk_a", "t_a")?;

        assert!(matches!(
            resolver.revoke("lnk_a", "org_other"),
            Err(LifecycleError::LinkNotFound(_))
        ));
        resolver.delete("lnk_a", "org_a")?;
        assert!(matches!(
            resolver.revoke("lnk_a", "org_a"),
            Err(LifecycleError::LinkNotFound(_))
        ));
        assert!(!resolver.store.access_links.contains_key(b"t_a")?);
        assert!(!resolver.store.access_link_ids.contains_key(b"lnk_a")?);
        Ok(())
    }
}
