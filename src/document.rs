//! Core document content, work item and evidence types
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::fmt;

// newtype over the bech32 encoded id, shared by every version of one document
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cbor(transparent)]
pub struct ChainId(#[n(0)] pub String);

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cbor(transparent)]
pub struct VersionId(#[n(0)] pub String);

impl ChainId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl VersionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(value: &str) -> Self {
        ChainId(value.to_string())
    }
}

impl From<&str> for VersionId {
    fn from(value: &str) -> Self {
        VersionId(value.to_string())
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .unwrap_or_default()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// `None` when the offset overflows the representable range.
    pub fn plus_days(&self, days: i64) -> Option<Self> {
        let delta = chrono::TimeDelta::try_days(days)?;
        self.0.checked_add_signed(delta).map(TimeStamp)
    }
    pub fn is_before(&self, other: &TimeStamp<Utc>) -> bool {
        self.0 < other.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    #[n(0)]
    FireRiskAssessment,
    #[n(1)]
    FireStrategy,
    #[n(2)]
    ExplosiveAtmosphere,
}

impl DocumentKind {
    /// Modules that must be present and completed before a version of this
    /// kind can be issued.
    pub fn required_modules(&self) -> &'static [&'static str] {
        match self {
            DocumentKind::FireRiskAssessment => &[
                "a1_document_control",
                "a2_building_profile",
                "a3_persons_at_risk",
                "fra_1_hazards",
                "fra_2_means_of_escape",
                "fra_3_fire_protection",
                "fra_4_management",
            ],
            DocumentKind::FireStrategy => &[
                "a1_document_control",
                "a2_building_profile",
                "fsd_1_evacuation_strategy",
                "fsd_2_means_of_escape",
                "fsd_3_fire_service_access",
            ],
            DocumentKind::ExplosiveAtmosphere => &[
                "a1_document_control",
                "dsear_1_substances",
                "dsear_2_zoning",
                "dsear_3_ignition_sources",
                "dsear_4_controls",
            ],
        }
    }

    pub fn default_reference_prefix(&self) -> &'static str {
        match self {
            DocumentKind::FireRiskAssessment => "FRA",
            DocumentKind::FireStrategy => "FSD",
            DocumentKind::ExplosiveAtmosphere => "DSEAR",
        }
    }
}

/// One assessment module as filled in by the assessor. Field values are kept
/// as opaque strings; scoring happens elsewhere.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ModuleInstance {
    #[n(0)]
    pub module_key: String,
    #[n(1)]
    pub completed: bool,
    #[n(2)]
    pub outcome: Option<String>,
    #[n(3)]
    pub fields: BTreeMap<String, String>,
}

impl ModuleInstance {
    pub fn new(module_key: &str) -> Self {
        Self {
            module_key: module_key.to_string(),
            completed: false,
            outcome: None,
            fields: BTreeMap::new(),
        }
    }
    pub fn complete(mut self) -> Self {
        self.completed = true;
        self
    }
    pub fn with_outcome(mut self, outcome: &str) -> Self {
        self.outcome = Some(outcome.to_string());
        self
    }
    pub fn with_field(mut self, key: &str, value: &str) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }
}

// The editable payload of a version. Copied wholesale on derivation.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentContent {
    #[n(0)]
    pub title: String,
    #[n(1)]
    pub premises_name: Option<String>,
    #[n(2)]
    pub premises_address: Option<String>,
    #[n(3)]
    pub responsible_person: Option<String>,
    #[n(4)]
    pub assessor: Option<String>,
    #[n(5)]
    pub assessment_date: Option<TimeStamp<Utc>>,
    #[n(6)]
    pub review_date: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub scope: Option<String>,
    #[n(8)]
    pub modules: Vec<ModuleInstance>,
}

impl DocumentContent {
    /// Construct an empty payload, this becomes the basis for a first draft
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }
    pub fn set_premises(mut self, name: &str, address: &str) -> Self {
        self.premises_name = Some(name.to_string());
        self.premises_address = Some(address.to_string());
        self
    }
    pub fn set_responsible_person(mut self, person: &str) -> Self {
        self.responsible_person = Some(person.to_string());
        self
    }
    pub fn set_assessor(mut self, assessor: &str) -> Self {
        self.assessor = Some(assessor.to_string());
        self
    }
    pub fn set_assessment_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.assessment_date = Some(date);
        self
    }
    pub fn set_review_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.review_date = Some(date);
        self
    }
    pub fn set_scope(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_string());
        self
    }
    pub fn with_module(mut self, module: ModuleInstance) -> Self {
        self.upsert_module(module);
        self
    }
    pub fn module(&self, key: &str) -> Option<&ModuleInstance> {
        self.modules.iter().find(|m| m.module_key == key)
    }
    /// Replaces a module with the same key or appends it.
    pub fn upsert_module(&mut self, module: ModuleInstance) {
        match self
            .modules
            .iter_mut()
            .find(|m| m.module_key == module.module_key)
        {
            Some(existing) => *existing = module,
            None => self.modules.push(module),
        }
    }
    pub fn remove_module(&mut self, key: &str) -> bool {
        let before = self.modules.len();
        self.modules.retain(|m| m.module_key != key);
        before != self.modules.len()
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    #[n(0)]
    Low,
    #[n(1)]
    Medium,
    #[n(2)]
    High,
    #[n(3)]
    Critical,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkItemStatus {
    #[n(0)]
    Open,
    #[n(1)]
    InProgress,
    #[n(2)]
    Deferred,
    #[n(3)]
    Closed,
    #[n(4)]
    NotApplicable,
}

impl WorkItemStatus {
    /// Items still needing attention move into the next version; terminal
    /// ones stay with the version that closed them.
    pub fn carries_forward(&self) -> bool {
        matches!(
            self,
            WorkItemStatus::Open | WorkItemStatus::InProgress | WorkItemStatus::Deferred
        )
    }
}

/// The caller-editable part of a work item (recommendation / action).
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct WorkItemDetails {
    #[n(0)]
    pub reference: String,
    #[n(1)]
    pub description: String,
    #[n(2)]
    pub priority: Priority,
    #[n(3)]
    pub status: WorkItemStatus,
    #[n(4)]
    pub target_date: Option<TimeStamp<Utc>>,
    #[n(5)]
    pub module_key: Option<String>,
}

impl WorkItemDetails {
    pub fn new(reference: &str, description: &str, priority: Priority) -> Self {
        Self {
            reference: reference.to_string(),
            description: description.to_string(),
            priority,
            status: WorkItemStatus::Open,
            target_date: None,
            module_key: None,
        }
    }
    pub fn set_status(mut self, status: WorkItemStatus) -> Self {
        self.status = status;
        self
    }
    pub fn set_target_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.target_date = Some(date);
        self
    }
    pub fn set_module(mut self, module_key: &str) -> Self {
        self.module_key = Some(module_key.to_string());
        self
    }
}

// key is "{version_id}/{id}" in the work item tree
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub version_id: VersionId,
    #[n(2)]
    pub details: WorkItemDetails,
    #[n(3)]
    pub carried_from: Option<String>, // id of the item this was copied from
    #[n(4)]
    pub created_at: TimeStamp<Utc>,
}

/// Metadata for an uploaded evidence file. The bytes live in blob storage
/// and are never copied between versions.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct EvidenceUpload {
    #[n(0)]
    pub file_path: String,
    #[n(1)]
    pub sha256: String,
    #[n(2)]
    pub size_bytes: u64,
    #[n(3)]
    pub content_type: String,
}

// shared between every version that links it
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct EvidenceRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub org_id: String,
    #[n(2)]
    pub upload: EvidenceUpload,
    #[n(3)]
    pub uploaded_by: String,
    #[n(4)]
    pub uploaded_at: TimeStamp<Utc>,
}

// key is "{version_id}/{evidence_id}". Captions are per version.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct EvidenceLink {
    #[n(0)]
    pub evidence_id: String,
    #[n(1)]
    pub version_id: VersionId,
    #[n(2)]
    pub caption: Option<String>,
    #[n(3)]
    pub module_key: Option<String>,
    #[n(4)]
    pub linked_at: TimeStamp<Utc>,
}
