//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! artifact_timeout_secs = 30
//! public_base_url = "https://docs.example.com"
//! default_link_expiry_days = 30
//! max_link_expiry_days = 365
//! log_filter = "doc_lifecycle=debug,info"
//!
//! [organisations.org_acme]
//! approval_required = true
//! editors = ["user_alice", "user_bob"]
//! reference_prefix = "ACME"
//! ```
use crate::access::{DEFAULT_LINK_EXPIRY_DAYS, MAX_LINK_EXPIRY_DAYS};
use crate::collaborators::{OrgSettings, PermissionResolver};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LifecycleConfig {
    pub artifact_timeout_secs: u64,
    pub public_base_url: String,
    pub default_link_expiry_days: u32,
    pub max_link_expiry_days: u32,
    pub log_filter: String,
    pub organisations: BTreeMap<String, OrgConfig>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            artifact_timeout_secs: 30,
            public_base_url: "http://localhost:8080".into(),
            default_link_expiry_days: DEFAULT_LINK_EXPIRY_DAYS,
            max_link_expiry_days: MAX_LINK_EXPIRY_DAYS,
            log_filter: "info".into(),
            organisations: BTreeMap::new(),
        }
    }
}

/// `[organisations.<org_id>]`
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrgConfig {
    pub approval_required: bool,
    pub editors: BTreeSet<String>,
    pub reference_prefix: Option<String>,
}

impl LifecycleConfig {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw).context("invalid lifecycle config")?;
        config.check()?;
        Ok(config)
    }

    pub fn artifact_timeout(&self) -> Duration {
        Duration::from_secs(self.artifact_timeout_secs)
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.artifact_timeout_secs == 0 {
            anyhow::bail!("artifact_timeout_secs must be positive");
        }
        if self.max_link_expiry_days == 0 {
            anyhow::bail!("max_link_expiry_days must be positive");
        }
        if self.default_link_expiry_days > self.max_link_expiry_days {
            anyhow::bail!(
                "default_link_expiry_days ({}) exceeds max_link_expiry_days ({})",
                self.default_link_expiry_days,
                self.max_link_expiry_days
            );
        }
        Ok(())
    }
}

pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<LifecycleConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    LifecycleConfig::from_toml_str(&raw)
}

/// Installs the global fmt subscriber. Safe to call more than once; later
/// calls are ignored.
pub fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Permissions and organisation settings served straight from config.
/// Unknown organisations get no editors and no approval requirement.
#[derive(Debug, Clone, Default)]
pub struct StaticOrgDirectory {
    organisations: BTreeMap<String, OrgConfig>,
}

impl StaticOrgDirectory {
    pub fn new(organisations: BTreeMap<String, OrgConfig>) -> Self {
        Self { organisations }
    }

    pub fn from_config(config: &LifecycleConfig) -> Self {
        Self::new(config.organisations.clone())
    }

    pub fn with_org(mut self, org_id: &str, org: OrgConfig) -> Self {
        self.organisations.insert(org_id.to_string(), org);
        self
    }
}

#[async_trait]
impl PermissionResolver for StaticOrgDirectory {
    async fn can_edit(&self, actor_id: &str, org_id: &str) -> bool {
        self.organisations
            .get(org_id)
            .is_some_and(|org| org.editors.contains(actor_id))
    }
}

#[async_trait]
impl OrgSettings for StaticOrgDirectory {
    async fn approval_required(&self, org_id: &str) -> bool {
        self.organisations
            .get(org_id)
            .is_some_and(|org| org.approval_required)
    }

    async fn reference_prefix(&self, org_id: &str) -> Option<String> {
        self.organisations
            .get(org_id)
            .and_then(|org| org.reference_prefix.clone())
    }
}
