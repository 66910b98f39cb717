//! Profile reconciliation
//!
//! Compares the freshly mapped profile against the stored customer record,
//! field by field over the intersection of populated fields. Any change on
//! a material field forces a mismatch; everything else is an update the
//! pipeline may absorb automatically. Diffs come out in canonical schema
//! order so two runs over the same inputs produce byte-identical output.

use crate::mapper::{FieldSchema, FieldValue, MappedProfile};
use kycflow_common::db::models::CustomerProfile;
use serde::{Deserialize, Serialize};

/// Fields whose change always requires human review
pub const MATERIAL_FIELDS: &[&str] = &[
    "entity_legal_name",
    "date_of_incorporation",
    "ownership_percentage",
    "id_number",
    "client_regulated",
    "name_of_regulator",
];

/// Reconciliation classification for the case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconOutcome {
    /// No populated field differs
    Match,
    /// Only non-material fields differ
    MatchWithUpdates,
    /// At least one material field differs
    Mismatch,
}

impl ReconOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconOutcome::Match => "match",
            ReconOutcome::MatchWithUpdates => "match_with_updates",
            ReconOutcome::Mismatch => "mismatch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "match" => Some(ReconOutcome::Match),
            "match_with_updates" => Some(ReconOutcome::MatchWithUpdates),
            "mismatch" => Some(ReconOutcome::Mismatch),
            _ => None,
        }
    }
}

/// One field that changed between stored and incoming profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub stored: serde_json::Value,
    pub incoming: serde_json::Value,
    pub material: bool,
}

/// Full reconciliation output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub outcome: ReconOutcome,
    pub diffs: Vec<FieldDiff>,
}

impl ReconciliationResult {
    /// The diffs safe to merge into the stored profile
    pub fn non_material_diffs(&self) -> impl Iterator<Item = &FieldDiff> {
        self.diffs.iter().filter(|diff| !diff.material)
    }

    pub fn has_changes(&self) -> bool {
        !self.diffs.is_empty()
    }
}

/// Reconcile the incoming mapped profile against the stored one.
///
/// Only fields populated on both sides are compared; a field present on
/// one side only is neither a match nor a change.
pub fn reconcile(
    stored: &MappedProfile,
    incoming: &MappedProfile,
    schema: &FieldSchema,
) -> ReconciliationResult {
    let mut diffs = Vec::new();

    for spec in schema.fields() {
        let (Some(old), Some(new)) = (stored.get(spec.name), incoming.get(spec.name)) else {
            continue;
        };
        if old.normalized_eq(new) {
            continue;
        }
        diffs.push(FieldDiff {
            field: spec.name.to_string(),
            stored: old.to_json(),
            incoming: new.to_json(),
            material: MATERIAL_FIELDS.contains(&spec.name),
        });
    }

    let outcome = if diffs.iter().any(|diff| diff.material) {
        ReconOutcome::Mismatch
    } else if diffs.is_empty() {
        ReconOutcome::Match
    } else {
        ReconOutcome::MatchWithUpdates
    };

    ReconciliationResult { outcome, diffs }
}

/// Project the stored customer record onto the mapped-profile shape so the
/// same comparison code serves both sides
pub fn profile_to_mapped(profile: &CustomerProfile) -> MappedProfile {
    let mut mapped = MappedProfile::default();

    let mut text = |name: &str, value: &Option<String>| {
        if let Some(v) = value {
            mapped.fields.insert(name.to_string(), FieldValue::Text(v.clone()));
        }
    };

    text("document_name", &profile.document_name);
    text("document_type", &profile.document_type);
    text("entity_legal_name", &profile.entity_legal_name);
    text("dba_name", &profile.dba_name);
    text("dba_address", &profile.dba_address);
    text("phone_number", &profile.phone_number);
    text("number_of_employees", &profile.number_of_employees);
    text("number_of_branches", &profile.number_of_branches);
    text("name_of_regulator", &profile.name_of_regulator);
    text("id_number", &profile.id_number);
    text("country_issuing_id", &profile.country_issuing_id);
    text("id_type", &profile.id_type);
    text("member_type", &profile.member_type);
    text("member_association", &profile.member_association);
    text("member_role", &profile.member_role);
    text("member_legal_name", &profile.member_legal_name);
    text("member_first_name", &profile.member_first_name);
    text("member_middle_name", &profile.member_middle_name);
    text("member_last_name", &profile.member_last_name);
    text("identification_number", &profile.identification_number);
    text("issuing_country", &profile.issuing_country);
    text("identification_type", &profile.identification_type);
    text("address_line_1", &profile.address_line_1);
    text("address_line_2", &profile.address_line_2);
    text("address_country", &profile.address_country);
    text("country_of_citizenship", &profile.country_of_citizenship);
    text("city_of_birth", &profile.city_of_birth);
    text("country_of_birth", &profile.country_of_birth);

    let mut date = |name: &str, value: &Option<chrono::NaiveDate>| {
        if let Some(v) = value {
            mapped.fields.insert(name.to_string(), FieldValue::Date(*v));
        }
    };
    date("date_of_incorporation", &profile.date_of_incorporation);
    date("date_of_id_issuance", &profile.date_of_id_issuance);
    date("id_expiry_date", &profile.id_expiry_date);
    date("date_of_birth", &profile.date_of_birth);

    if let Some(v) = profile.client_regulated {
        mapped
            .fields
            .insert("client_regulated".to_string(), FieldValue::Boolean(v));
    }
    if let Some(v) = profile.is_payment_intermediary {
        mapped
            .fields
            .insert("is_payment_intermediary".to_string(), FieldValue::Boolean(v));
    }
    if let Some(v) = profile.ownership_percentage {
        mapped
            .fields
            .insert("ownership_percentage".to_string(), FieldValue::Percentage(v));
    }

    mapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn mapped(fields: &[(&str, FieldValue)]) -> MappedProfile {
        let mut profile = MappedProfile::default();
        for (name, value) in fields {
            profile.fields.insert(name.to_string(), value.clone());
        }
        profile
    }

    #[test]
    fn test_identical_profiles_match() {
        let schema = FieldSchema::onboarding();
        let stored = mapped(&[
            ("entity_legal_name", FieldValue::Text("Acme Corp".to_string())),
            ("phone_number", FieldValue::Text("555-0100".to_string())),
        ]);

        let result = reconcile(&stored, &stored.clone(), &schema);
        assert_eq!(result.outcome, ReconOutcome::Match);
        assert!(result.diffs.is_empty());
    }

    #[test]
    fn test_non_material_change_is_update() {
        let schema = FieldSchema::onboarding();
        let stored = mapped(&[
            ("entity_legal_name", FieldValue::Text("Acme Corp".to_string())),
            ("phone_number", FieldValue::Text("555-0100".to_string())),
        ]);
        let incoming = mapped(&[
            ("entity_legal_name", FieldValue::Text("Acme Corp".to_string())),
            ("phone_number", FieldValue::Text("555-0199".to_string())),
        ]);

        let result = reconcile(&stored, &incoming, &schema);
        assert_eq!(result.outcome, ReconOutcome::MatchWithUpdates);
        assert_eq!(result.diffs.len(), 1);
        assert_eq!(result.diffs[0].field, "phone_number");
        assert!(!result.diffs[0].material);
    }

    #[test]
    fn test_material_change_is_mismatch() {
        let schema = FieldSchema::onboarding();
        let stored = mapped(&[
            ("entity_legal_name", FieldValue::Text("Acme Corp".to_string())),
            ("phone_number", FieldValue::Text("555-0100".to_string())),
        ]);
        let incoming = mapped(&[
            ("entity_legal_name", FieldValue::Text("Acme Holdings Corp".to_string())),
            ("phone_number", FieldValue::Text("555-0199".to_string())),
        ]);

        let result = reconcile(&stored, &incoming, &schema);
        assert_eq!(result.outcome, ReconOutcome::Mismatch);
        assert_eq!(result.diffs.len(), 2);
        // Schema order: legal name before phone
        assert_eq!(result.diffs[0].field, "entity_legal_name");
        assert!(result.diffs[0].material);
        assert_eq!(result.non_material_diffs().count(), 1);
    }

    #[test]
    fn test_one_sided_fields_are_ignored() {
        let schema = FieldSchema::onboarding();
        let stored = mapped(&[(
            "entity_legal_name",
            FieldValue::Text("Acme Corp".to_string()),
        )]);
        let incoming = mapped(&[
            ("entity_legal_name", FieldValue::Text("Acme Corp".to_string())),
            ("dba_name", FieldValue::Text("Acme".to_string())),
        ]);

        let result = reconcile(&stored, &incoming, &schema);
        assert_eq!(result.outcome, ReconOutcome::Match);
    }

    #[test]
    fn test_text_comparison_is_case_insensitive() {
        let schema = FieldSchema::onboarding();
        let stored = mapped(&[(
            "entity_legal_name",
            FieldValue::Text("ACME CORP".to_string()),
        )]);
        let incoming = mapped(&[(
            "entity_legal_name",
            FieldValue::Text("Acme Corp".to_string()),
        )]);

        let result = reconcile(&stored, &incoming, &schema);
        assert_eq!(result.outcome, ReconOutcome::Match);
    }

    #[test]
    fn test_deterministic_diff_order() {
        let schema = FieldSchema::onboarding();
        let stored = mapped(&[
            ("phone_number", FieldValue::Text("555-0100".to_string())),
            ("dba_name", FieldValue::Text("Acme".to_string())),
            ("id_number", FieldValue::Text("R-100".to_string())),
        ]);
        let incoming = mapped(&[
            ("phone_number", FieldValue::Text("555-0199".to_string())),
            ("dba_name", FieldValue::Text("Acme Trading".to_string())),
            ("id_number", FieldValue::Text("R-200".to_string())),
        ]);

        let first = reconcile(&stored, &incoming, &schema);
        let second = reconcile(&stored, &incoming, &schema);

        let order: Vec<&str> = first.diffs.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(order, vec!["dba_name", "id_number", "phone_number"]);
        assert_eq!(
            serde_json::to_string(&first.diffs).unwrap(),
            serde_json::to_string(&second.diffs).unwrap()
        );
    }

    #[test]
    fn test_profile_projection() {
        let profile = CustomerProfile {
            id: 1,
            client_identifier: "CL-1".to_string(),
            document_name: None,
            document_type: None,
            entity_legal_name: Some("Acme Corp".to_string()),
            date_of_incorporation: NaiveDate::from_ymd_opt(2015, 6, 1),
            dba_name: None,
            dba_address: None,
            phone_number: Some("555-0100".to_string()),
            number_of_employees: None,
            number_of_branches: None,
            client_regulated: Some(true),
            name_of_regulator: Some("FCA".to_string()),
            id_number: None,
            country_issuing_id: None,
            id_type: None,
            date_of_id_issuance: None,
            id_expiry_date: None,
            is_payment_intermediary: None,
            member_type: None,
            member_association: None,
            member_role: None,
            member_legal_name: None,
            member_first_name: None,
            member_middle_name: None,
            member_last_name: None,
            ownership_percentage: Some(40.0),
            identification_number: None,
            issuing_country: None,
            identification_type: None,
            address_line_1: None,
            address_line_2: None,
            address_country: None,
            date_of_birth: None,
            country_of_citizenship: None,
            city_of_birth: None,
            country_of_birth: None,
            created_at: chrono::Utc::now().into(),
            updated_at: chrono::Utc::now().into(),
        };

        let mapped = profile_to_mapped(&profile);
        assert_eq!(mapped.text("entity_legal_name"), Some("Acme Corp"));
        assert_eq!(
            mapped.get("client_regulated"),
            Some(&FieldValue::Boolean(true))
        );
        assert_eq!(
            mapped.get("ownership_percentage"),
            Some(&FieldValue::Percentage(40.0))
        );
        assert_eq!(
            mapped.date("date_of_incorporation"),
            NaiveDate::from_ymd_opt(2015, 6, 1)
        );
        assert!(mapped.get("dba_name").is_none());
    }
}
