//! Events published after a lifecycle change has committed.
//!
//! Handlers do follow-on work that must never undo or fail the change that
//! triggered them. The bus awaits each handler in turn, logs failures and
//! reports them, but the primary operation's result is already decided.
use crate::collaborators::OrgSettings;
use crate::document::{ChainId, DocumentKind, TimeStamp, VersionId};
use crate::store::DocumentStore;
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    VersionIssued {
        version_id: VersionId,
        base_document_id: ChainId,
        org_id: String,
        kind: DocumentKind,
        version_number: u32,
        issued_by: String,
        issued_at: TimeStamp<Utc>,
        superseded: Option<VersionId>,
    },
    VersionDerived {
        version_id: VersionId,
        base_document_id: ChainId,
        org_id: String,
        version_number: u32,
        derived_from: VersionId,
        carried_items: usize,
        linked_evidence: usize,
    },
    DraftDeleted {
        version_id: VersionId,
        base_document_id: ChainId,
        deleted_by: String,
    },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::VersionIssued { .. } => "version_issued",
            LifecycleEvent::VersionDerived { .. } => "version_derived",
            LifecycleEvent::DraftDeleted { .. } => "draft_deleted",
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;
    async fn handle(&self, event: &LifecycleEvent) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failures: Vec<(&'static str, String)>,
}

#[derive(Default, Clone)]
pub struct EventBus {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub async fn publish(&self, event: &LifecycleEvent) -> DispatchReport {
        let mut report = DispatchReport::default();
        for handler in &self.handlers {
            match handler.handle(event).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        handler = handler.name(),
                        event = event.name(),
                        error = %e,
                        "best-effort handler failed"
                    );
                    report.failures.push((handler.name(), e.to_string()));
                }
            }
        }
        debug!(event = event.name(), delivered = report.delivered, "event dispatched");
        report
    }
}

/// Gives a chain its client-facing reference number on first issue, e.g.
/// `FRA-2026-0007`. Later issues of the same chain keep the number.
pub struct ReferenceNumberAssigner {
    store: Arc<DocumentStore>,
    settings: Arc<dyn OrgSettings>,
}

impl ReferenceNumberAssigner {
    pub fn new(store: Arc<DocumentStore>, settings: Arc<dyn OrgSettings>) -> Self {
        Self { store, settings }
    }

    pub fn reference_for(&self, chain: &ChainId) -> anyhow::Result<Option<String>> {
        reference_number(&self.store, chain)
    }

    fn next_sequence(&self, counter_key: &str) -> anyhow::Result<u64> {
        let updated = self.store.counters.update_and_fetch(counter_key, |old| {
            let current = old
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .map(u64::from_be_bytes)
                .unwrap_or(0);
            Some((current + 1).to_be_bytes().to_vec())
        })?;

        updated
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_ref()).ok())
            .map(u64::from_be_bytes)
            .ok_or_else(|| anyhow::anyhow!("counter {counter_key} missing after update"))
    }
}

pub fn reference_number(store: &DocumentStore, chain: &ChainId) -> anyhow::Result<Option<String>> {
    Ok(store
        .references
        .get(chain.as_str().as_bytes())?
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
}

#[async_trait]
impl EventHandler for ReferenceNumberAssigner {
    fn name(&self) -> &'static str {
        "reference_number"
    }

    async fn handle(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        let LifecycleEvent::VersionIssued {
            base_document_id,
            org_id,
            kind,
            issued_at,
            ..
        } = event
        else {
            return Ok(());
        };

        if self.reference_for(base_document_id)?.is_some() {
            return Ok(());
        }

        let prefix = match self.settings.reference_prefix(org_id).await {
            Some(prefix) => prefix,
            None => kind.default_reference_prefix().to_string(),
        };
        let year = issued_at.to_datetime_utc().year();
        let seq = self.next_sequence(&format!("{org_id}/{prefix}/{year}"))?;
        let reference = format!("{prefix}-{year}-{seq:04}");

        // first writer wins if two issues race
        let swapped = self.store.references.compare_and_swap(
            base_document_id.as_str().as_bytes(),
            None as Option<&[u8]>,
            Some(reference.as_bytes()),
        )?;
        if swapped.is_ok() {
            info!(chain = %base_document_id, %reference, "reference number assigned");
        }
        Ok(())
    }
}
