//! Smoke screen unit tests for the document lifecycle components
//!
//! These tests span the public API of each module in isolation from the
//! integration scenarios. They are intended as a smoke screen and mostly
//! test the happy path.
//!
use chrono::{Datelike, Timelike, Utc};
use doc_lifecycle::{
    approval::{ApprovalState, ApprovalStatus, GateOutcome},
    document::{
        DocumentContent, DocumentKind, ModuleInstance, Priority, TimeStamp, WorkItemDetails,
        WorkItemStatus,
    },
    utils::{CHAIN_HRP, VERSION_HRP, new_access_token, new_uuid_to_bech32},
};

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Ids carry their prefix and are unique
    #[test]
    fn ids_are_prefixed_and_unique() {
        let a = new_uuid_to_bech32(CHAIN_HRP).unwrap();
        let b = new_uuid_to_bech32(CHAIN_HRP).unwrap();
        let v = new_uuid_to_bech32(VERSION_HRP).unwrap();

        assert!(a.starts_with("doc_1"));
        assert!(v.starts_with("ver_1"));
        assert_ne!(a, b);
    }

    /// Empty prefixes are rejected
    #[test]
    fn handles_empty_hrp() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    /// Access tokens are 64 hex chars and never repeat
    #[test]
    fn access_tokens_are_hex() {
        let t1 = new_access_token();
        let t2 = new_access_token();
        assert_eq!(t1.len(), 64);
        assert!(t1.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(t1, t2);
    }
}

// DOCUMENT MODULE TESTS
#[cfg(test)]
mod document_tests {
    use super::*;

    /// TimeStamp::new() is close to the current time
    #[test]
    fn timestamp_new_creates_current_time() {
        let ts = TimeStamp::new();
        let diff = (Utc::now() - ts.to_datetime_utc()).num_seconds().abs();
        assert!(diff < 1);
    }

    /// TimeStamp can be built from calendar values
    #[test]
    fn timestamp_new_with_specific_values() {
        let ts = TimeStamp::new_with(2026, 10, 19, 14, 30, 5);
        let dt = ts.to_datetime_utc();
        assert_eq!(dt.year(), 2026);
        assert_eq!(dt.month(), 10);
        assert_eq!(dt.day(), 19);
        assert_eq!(dt.hour(), 14);
        assert_eq!(dt.minute(), 30);
        assert_eq!(dt.second(), 5);
    }

    /// Adding days moves forward and keeps ordering
    #[test]
    fn timestamp_plus_days() {
        let ts = TimeStamp::new_with(2026, 1, 1, 0, 0, 0);
        let later = ts.plus_days(31).unwrap();
        assert_eq!(later.to_datetime_utc().month(), 2);
        assert!(ts.is_before(&later));
        assert!(!later.is_before(&ts));
    }

    /// The content builder sets every field and replaces modules by key
    #[test]
    fn content_builder_and_modules() {
        let mut content = DocumentContent::new()
            .set_title("Warehouse 4")
            .set_assessor("J. Smith")
            .with_module(ModuleInstance::new("fra_1_hazards"));
        assert_eq!(content.title, "Warehouse 4");
        assert_eq!(content.assessor.as_deref(), Some("J. Smith"));
        assert!(!content.module("fra_1_hazards").unwrap().completed);

        content.upsert_module(
            ModuleInstance::new("fra_1_hazards")
                .complete()
                .with_outcome("tolerable")
                .with_field("ignition_sources", "portable heaters"),
        );
        let module = content.module("fra_1_hazards").unwrap();
        assert!(module.completed);
        assert_eq!(module.outcome.as_deref(), Some("tolerable"));
        assert_eq!(content.modules.len(), 1);

        assert!(content.remove_module("fra_1_hazards"));
        assert!(!content.remove_module("fra_1_hazards"));
    }

    /// Every kind needs document control and has its own prefix
    #[test]
    fn kinds_have_modules_and_prefixes() {
        for kind in [
            DocumentKind::FireRiskAssessment,
            DocumentKind::FireStrategy,
            DocumentKind::ExplosiveAtmosphere,
        ] {
            assert!(kind.required_modules().contains(&"a1_document_control"));
            assert!(!kind.default_reference_prefix().is_empty());
        }
    }

    /// Only unfinished work carries forward
    #[test]
    fn work_item_carry_forward_rule() {
        assert!(WorkItemStatus::Open.carries_forward());
        assert!(WorkItemStatus::InProgress.carries_forward());
        assert!(WorkItemStatus::Deferred.carries_forward());
        assert!(!WorkItemStatus::Closed.carries_forward());
        assert!(!WorkItemStatus::NotApplicable.carries_forward());

        let details = WorkItemDetails::new("A1", "Fit intumescent strips", Priority::High);
        assert_eq!(details.status, WorkItemStatus::Open);
        assert!(Priority::Critical > Priority::High);
    }
}

// APPROVAL MODULE TESTS
#[cfg(test)]
mod approval_tests {
    use super::*;

    /// The happy path from request to approved clears the gate
    #[test]
    fn request_then_approve_clears_gate() {
        let state = ApprovalState::NotRequired;
        assert_eq!(state.gate(false), GateOutcome::Clear);
        assert_eq!(
            state.gate(true),
            GateOutcome::AwaitingApproval(ApprovalStatus::NotRequired)
        );

        let pending = state.request("user_a").unwrap();
        assert_eq!(
            pending.gate(false),
            GateOutcome::AwaitingApproval(ApprovalStatus::Pending)
        );

        let approved = pending.approve("user_b", Some("fine".into())).unwrap();
        assert_eq!(approved.status(), ApprovalStatus::Approved);
        assert_eq!(approved.gate(true), GateOutcome::Clear);
        assert_eq!(approved.decision().unwrap().decided_by, "user_b");
    }

    /// A rejection blocks and carries its notes
    #[test]
    fn rejection_blocks_with_notes() {
        let rejected = ApprovalState::NotRequired
            .request("user_a")
            .unwrap()
            .reject("user_b", Some("missing plans".into()))
            .unwrap();
        assert_eq!(
            rejected.gate(false),
            GateOutcome::Rejected {
                notes: Some("missing plans".into())
            }
        );
        assert_eq!(rejected.clear().unwrap(), ApprovalState::NotRequired);
    }
}
