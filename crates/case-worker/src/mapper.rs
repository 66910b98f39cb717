//! Field mapping from extracted documents onto the onboarding schema
//!
//! Extraction output is a pile of labeled key/value pairs and tables; this
//! module turns it into a typed profile snapshot. Labels are normalized and
//! matched against the fixed schema (with an alias table for common label
//! variants), values are coerced per field type, and every failure is
//! collected so a recapture request can name all the problems at once.

use crate::extraction::ExtractedDocument;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value type a schema field coerces to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Date,
    Boolean,
    Percentage,
}

/// One field of the onboarding schema
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
}

/// Date formats accepted for date-typed fields, tried in order.
/// ISO wins ambiguity, then day-first, then US ordering.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%m/%d/%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

/// The fixed onboarding schema, in canonical field order
const SCHEMA_FIELDS: &[FieldSpec] = &[
    FieldSpec { name: "document_name", field_type: FieldType::Text, required: false },
    FieldSpec { name: "document_type", field_type: FieldType::Text, required: false },
    FieldSpec { name: "entity_legal_name", field_type: FieldType::Text, required: true },
    FieldSpec { name: "date_of_incorporation", field_type: FieldType::Date, required: false },
    FieldSpec { name: "dba_name", field_type: FieldType::Text, required: false },
    FieldSpec { name: "dba_address", field_type: FieldType::Text, required: false },
    FieldSpec { name: "phone_number", field_type: FieldType::Text, required: false },
    FieldSpec { name: "number_of_employees", field_type: FieldType::Text, required: false },
    FieldSpec { name: "number_of_branches", field_type: FieldType::Text, required: false },
    FieldSpec { name: "client_regulated", field_type: FieldType::Boolean, required: false },
    FieldSpec { name: "name_of_regulator", field_type: FieldType::Text, required: false },
    FieldSpec { name: "id_number", field_type: FieldType::Text, required: false },
    FieldSpec { name: "country_issuing_id", field_type: FieldType::Text, required: false },
    FieldSpec { name: "id_type", field_type: FieldType::Text, required: false },
    FieldSpec { name: "date_of_id_issuance", field_type: FieldType::Date, required: false },
    FieldSpec { name: "id_expiry_date", field_type: FieldType::Date, required: false },
    FieldSpec { name: "is_payment_intermediary", field_type: FieldType::Boolean, required: false },
    FieldSpec { name: "member_type", field_type: FieldType::Text, required: false },
    FieldSpec { name: "member_association", field_type: FieldType::Text, required: false },
    FieldSpec { name: "member_role", field_type: FieldType::Text, required: false },
    FieldSpec { name: "member_legal_name", field_type: FieldType::Text, required: false },
    FieldSpec { name: "member_first_name", field_type: FieldType::Text, required: false },
    FieldSpec { name: "member_middle_name", field_type: FieldType::Text, required: false },
    FieldSpec { name: "member_last_name", field_type: FieldType::Text, required: false },
    FieldSpec { name: "ownership_percentage", field_type: FieldType::Percentage, required: false },
    FieldSpec { name: "identification_number", field_type: FieldType::Text, required: false },
    FieldSpec { name: "issuing_country", field_type: FieldType::Text, required: false },
    FieldSpec { name: "identification_type", field_type: FieldType::Text, required: false },
    FieldSpec { name: "address_line_1", field_type: FieldType::Text, required: false },
    FieldSpec { name: "address_line_2", field_type: FieldType::Text, required: false },
    FieldSpec { name: "address_country", field_type: FieldType::Text, required: false },
    FieldSpec { name: "date_of_birth", field_type: FieldType::Date, required: false },
    FieldSpec { name: "country_of_citizenship", field_type: FieldType::Text, required: false },
    FieldSpec { name: "city_of_birth", field_type: FieldType::Text, required: false },
    FieldSpec { name: "country_of_birth", field_type: FieldType::Text, required: false },
];

/// Label variants seen in real documents, normalized-label to field name
const LABEL_ALIASES: &[(&str, &str)] = &[
    ("legal name", "entity_legal_name"),
    ("legal name of entity", "entity_legal_name"),
    ("entity name", "entity_legal_name"),
    ("company name", "entity_legal_name"),
    ("registered name", "entity_legal_name"),
    ("incorporation date", "date_of_incorporation"),
    ("date of formation", "date_of_incorporation"),
    ("doing business as", "dba_name"),
    ("trade name", "dba_name"),
    ("dba", "dba_name"),
    ("business address", "dba_address"),
    ("phone", "phone_number"),
    ("telephone", "phone_number"),
    ("telephone number", "phone_number"),
    ("contact number", "phone_number"),
    ("employees", "number_of_employees"),
    ("employee count", "number_of_employees"),
    ("branches", "number_of_branches"),
    ("branch count", "number_of_branches"),
    ("regulated", "client_regulated"),
    ("is the client regulated", "client_regulated"),
    ("regulator", "name_of_regulator"),
    ("regulator name", "name_of_regulator"),
    ("registration number", "id_number"),
    ("id no", "id_number"),
    ("issuing country", "country_issuing_id"),
    ("type of id", "id_type"),
    ("issuance date", "date_of_id_issuance"),
    ("date of issuance", "date_of_id_issuance"),
    ("expiry date", "id_expiry_date"),
    ("expiration date", "id_expiry_date"),
    ("date of expiry", "id_expiry_date"),
    ("payment intermediary", "is_payment_intermediary"),
    ("role", "member_role"),
    ("ownership", "ownership_percentage"),
    ("ownership percent", "ownership_percentage"),
    ("percentage of ownership", "ownership_percentage"),
    ("first name", "member_first_name"),
    ("middle name", "member_middle_name"),
    ("last name", "member_last_name"),
    ("surname", "member_last_name"),
    ("address line 1", "address_line_1"),
    ("address line 2", "address_line_2"),
    ("street address", "address_line_1"),
    ("country", "address_country"),
    ("dob", "date_of_birth"),
    ("birth date", "date_of_birth"),
    ("citizenship", "country_of_citizenship"),
    ("nationality", "country_of_citizenship"),
    ("place of birth", "city_of_birth"),
];

/// The onboarding field schema with its alias table
pub struct FieldSchema {
    fields: &'static [FieldSpec],
    aliases: BTreeMap<&'static str, &'static str>,
}

impl FieldSchema {
    pub fn onboarding() -> Self {
        Self {
            fields: SCHEMA_FIELDS,
            aliases: LABEL_ALIASES.iter().copied().collect(),
        }
    }

    /// Fields in canonical order
    pub fn fields(&self) -> &[FieldSpec] {
        self.fields
    }

    pub fn spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.name == name)
    }

    /// Resolve a normalized label to a schema field name
    fn resolve(&self, normalized_label: &str) -> Option<&'static str> {
        if let Some(spec) = self
            .fields
            .iter()
            .find(|spec| spec.name.replace('_', " ") == normalized_label)
        {
            return Some(spec.name);
        }
        self.aliases.get(normalized_label).copied()
    }
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self::onboarding()
    }
}

/// A typed, coerced field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Date(NaiveDate),
    Boolean(bool),
    Percentage(f64),
}

impl FieldValue {
    /// JSON representation used for snapshots and profile writes.
    /// Dates serialize as ISO strings so the store-side setter can
    /// parse them back.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            FieldValue::Boolean(b) => serde_json::Value::Bool(*b),
            FieldValue::Percentage(p) => serde_json::json!(p),
        }
    }

    /// Equality for reconciliation: text compares trimmed and
    /// case-insensitively, everything else exactly
    pub fn normalized_eq(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => {
                a.trim().eq_ignore_ascii_case(b.trim())
            }
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Boolean(b) => write!(f, "{}", b),
            FieldValue::Percentage(p) => write!(f, "{}", p),
        }
    }
}

/// One mapping failure; all failures for a document are reported together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingError {
    pub field: String,
    pub reason: String,
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// The mapped profile snapshot plus the leftovers mapping could not place
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappedProfile {
    pub fields: BTreeMap<String, FieldValue>,
    /// Extracted labels that matched no schema field, kept for audit
    pub unmapped: Vec<String>,
}

impl MappedProfile {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        match self.fields.get(field) {
            Some(FieldValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        match self.fields.get(field) {
            Some(FieldValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    /// Snapshot as a flat JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }

    /// Rehydrate a snapshot, typing each value against the schema.
    /// Values that no longer coerce are dropped rather than failing the
    /// whole snapshot.
    pub fn from_json(value: &serde_json::Value, schema: &FieldSchema) -> Self {
        let mut profile = MappedProfile::default();
        let Some(object) = value.as_object() else {
            return profile;
        };
        for (name, raw) in object {
            let Some(spec) = schema.spec(name) else {
                continue;
            };
            let text = match raw {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => continue,
            };
            if let Ok(parsed) = coerce(&text, spec.field_type) {
                profile.fields.insert(name.clone(), parsed);
            }
        }
        profile
    }

    /// Field/JSON pairs in schema order, for profile writes
    pub fn to_field_values(&self, schema: &FieldSchema) -> Vec<(String, serde_json::Value)> {
        schema
            .fields()
            .iter()
            .filter_map(|spec| {
                self.fields
                    .get(spec.name)
                    .map(|value| (spec.name.to_string(), value.to_json()))
            })
            .collect()
    }
}

/// Normalize an extracted label: lowercase, collapse whitespace, strip
/// trailing punctuation
fn normalize_label(label: &str) -> String {
    static WHITESPACE: std::sync::OnceLock<regex_lite::Regex> = std::sync::OnceLock::new();
    let ws = WHITESPACE.get_or_init(|| {
        regex_lite::Regex::new(r"\s+").unwrap_or_else(|e| panic!("invalid pattern: {}", e))
    });
    let lowered = label.to_lowercase();
    let collapsed = ws.replace_all(lowered.trim(), " ");
    collapsed
        .trim_end_matches([':', '?', '.', '*'])
        .trim()
        .to_string()
}

/// Coerce a raw extracted value to its schema type
fn coerce(raw: &str, field_type: FieldType) -> std::result::Result<FieldValue, String> {
    let trimmed = raw.trim();
    match field_type {
        FieldType::Text => Ok(FieldValue::Text(trimmed.to_string())),
        FieldType::Date => {
            for format in DATE_FORMATS {
                if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
                    return Ok(FieldValue::Date(date));
                }
            }
            Err(format!("unparseable date: {:?}", trimmed))
        }
        FieldType::Boolean => match trimmed.to_lowercase().as_str() {
            "yes" | "y" | "true" | "1" => Ok(FieldValue::Boolean(true)),
            "no" | "n" | "false" | "0" => Ok(FieldValue::Boolean(false)),
            other => Err(format!("unparseable boolean: {:?}", other)),
        },
        FieldType::Percentage => {
            let numeric = trimmed.trim_end_matches('%').trim();
            let value: f64 = numeric
                .parse()
                .map_err(|_| format!("unparseable percentage: {:?}", trimmed))?;
            if !(0.0..=100.0).contains(&value) {
                return Err(format!("percentage out of range: {}", value));
            }
            Ok(FieldValue::Percentage(value))
        }
    }
}

/// Map an extracted document onto the schema.
///
/// Candidates come from the labeled key/value pairs plus two-column table
/// rows, in document order; the first occurrence of a field wins. Returns
/// the mapped profile, or every failure found when any field fails.
pub fn map_document(
    document: &ExtractedDocument,
    schema: &FieldSchema,
) -> std::result::Result<MappedProfile, Vec<MappingError>> {
    let mut profile = MappedProfile::default();
    let mut errors: Vec<MappingError> = Vec::new();

    let table_pairs = document
        .tables
        .iter()
        .flat_map(|table| table.iter())
        .filter(|row| row.len() == 2)
        .map(|row| (row[0].as_str(), row[1].as_str()));

    let candidates = document
        .key_value_pairs
        .iter()
        .map(|pair| (pair.key.as_str(), pair.value.as_str()))
        .chain(table_pairs);

    for (label, raw_value) in candidates {
        let normalized = normalize_label(label);
        if normalized.is_empty() {
            continue;
        }

        let Some(field) = schema.resolve(&normalized) else {
            profile.unmapped.push(label.trim().to_string());
            continue;
        };

        if profile.fields.contains_key(field) {
            // First occurrence wins; later duplicates go to the audit list
            profile.unmapped.push(label.trim().to_string());
            continue;
        }

        if raw_value.trim().is_empty() {
            continue;
        }

        let spec = match schema.spec(field) {
            Some(spec) => spec,
            None => continue,
        };

        match coerce(raw_value, spec.field_type) {
            Ok(value) => {
                profile.fields.insert(field.to_string(), value);
            }
            Err(reason) => errors.push(MappingError {
                field: field.to_string(),
                reason,
            }),
        }
    }

    for spec in schema.fields() {
        if spec.required && !profile.fields.contains_key(spec.name) {
            errors.push(MappingError {
                field: spec.name.to_string(),
                reason: "required field missing from document".to_string(),
            });
        }
    }

    // Cross-field checks
    if let (Some(issued), Some(expiry)) = (
        profile.date("date_of_id_issuance"),
        profile.date("id_expiry_date"),
    ) {
        if expiry < issued {
            errors.push(MappingError {
                field: "id_expiry_date".to_string(),
                reason: format!("expiry {} precedes issuance {}", expiry, issued),
            });
        }
    }

    if errors.is_empty() {
        Ok(profile)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::KeyValuePair;

    fn doc(pairs: &[(&str, &str)]) -> ExtractedDocument {
        ExtractedDocument {
            key_value_pairs: pairs
                .iter()
                .map(|(k, v)| KeyValuePair {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_maps_canonical_and_alias_labels() {
        let schema = FieldSchema::onboarding();
        let document = doc(&[
            ("Entity Legal Name:", "Acme Corp"),
            ("Incorporation Date", "2015-06-01"),
            ("Phone", "555-0100"),
            ("Regulated?", "Yes"),
            ("Ownership", "25%"),
        ]);

        let profile = map_document(&document, &schema).unwrap();
        assert_eq!(profile.text("entity_legal_name"), Some("Acme Corp"));
        assert_eq!(
            profile.date("date_of_incorporation"),
            NaiveDate::from_ymd_opt(2015, 6, 1)
        );
        assert_eq!(profile.text("phone_number"), Some("555-0100"));
        assert_eq!(
            profile.get("client_regulated"),
            Some(&FieldValue::Boolean(true))
        );
        assert_eq!(
            profile.get("ownership_percentage"),
            Some(&FieldValue::Percentage(25.0))
        );
    }

    #[test]
    fn test_unmatched_labels_go_to_unmapped() {
        let schema = FieldSchema::onboarding();
        let document = doc(&[
            ("Entity Legal Name", "Acme Corp"),
            ("Favorite Color", "blue"),
        ]);

        let profile = map_document(&document, &schema).unwrap();
        assert_eq!(profile.unmapped, vec!["Favorite Color".to_string()]);
    }

    #[test]
    fn test_first_occurrence_wins() {
        let schema = FieldSchema::onboarding();
        let document = doc(&[
            ("Entity Legal Name", "Acme Corp"),
            ("Company Name", "Acme Corporation Ltd"),
        ]);

        let profile = map_document(&document, &schema).unwrap();
        assert_eq!(profile.text("entity_legal_name"), Some("Acme Corp"));
        assert_eq!(profile.unmapped.len(), 1);
    }

    #[test]
    fn test_collects_all_errors() {
        let schema = FieldSchema::onboarding();
        let document = doc(&[
            ("Incorporation Date", "not a date"),
            ("Ownership", "140%"),
        ]);

        let errors = map_document(&document, &schema).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        // Bad date, bad percentage, and the missing required name
        assert!(fields.contains(&"date_of_incorporation"));
        assert!(fields.contains(&"ownership_percentage"));
        assert!(fields.contains(&"entity_legal_name"));
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_expiry_before_issuance_rejected() {
        let schema = FieldSchema::onboarding();
        let document = doc(&[
            ("Entity Legal Name", "Acme Corp"),
            ("Date of Issuance", "2024-01-01"),
            ("Expiry Date", "2020-01-01"),
        ]);

        let errors = map_document(&document, &schema).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "id_expiry_date");
    }

    #[test]
    fn test_table_rows_as_candidates() {
        let schema = FieldSchema::onboarding();
        let document = ExtractedDocument {
            tables: vec![vec![
                vec!["Entity Legal Name".to_string(), "Globex LLC".to_string()],
                vec!["DOB".to_string(), "12/03/1980".to_string()],
            ]],
            ..Default::default()
        };

        let profile = map_document(&document, &schema).unwrap();
        assert_eq!(profile.text("entity_legal_name"), Some("Globex LLC"));
        // Day-first ordering preferred over US
        assert_eq!(
            profile.date("date_of_birth"),
            NaiveDate::from_ymd_opt(1980, 3, 12)
        );
    }

    #[test]
    fn test_date_format_fallbacks() {
        for (raw, expected) in [
            ("2015-06-01", (2015, 6, 1)),
            ("01/06/2015", (2015, 6, 1)),
            ("1 June 2015", (2015, 6, 1)),
            ("June 1, 2015", (2015, 6, 1)),
        ] {
            let parsed = coerce(raw, FieldType::Date).unwrap();
            assert_eq!(
                parsed,
                FieldValue::Date(
                    NaiveDate::from_ymd_opt(expected.0, expected.1, expected.2).unwrap()
                ),
                "format {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_snapshot_round_trip() {
        let schema = FieldSchema::onboarding();
        let document = doc(&[
            ("Entity Legal Name", "Acme Corp"),
            ("Incorporation Date", "2015-06-01"),
            ("Regulated?", "no"),
            ("Ownership", "51"),
        ]);

        let profile = map_document(&document, &schema).unwrap();
        let restored = MappedProfile::from_json(&profile.to_json(), &schema);
        assert_eq!(profile.fields, restored.fields);
    }

    #[test]
    fn test_normalized_text_equality() {
        let a = FieldValue::Text("Acme Corp ".to_string());
        let b = FieldValue::Text("acme corp".to_string());
        let c = FieldValue::Text("Acme Corporation".to_string());
        assert!(a.normalized_eq(&b));
        assert!(!a.normalized_eq(&c));
    }
}
