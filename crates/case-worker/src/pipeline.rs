//! Case pipeline orchestration
//!
//! Drives one claimed case through extraction, mapping, reconciliation,
//! screening and resolution. Every state change goes through the guarded
//! transition in the repository, so a crashed worker leaves the case
//! claimable at the last completed stage and a rerun picks up where it
//! stopped. Stage work is repeatable by construction: snapshots are
//! immutable once stamped and the profile merge writes the same values on
//! a rerun.

use crate::errors::{PipelineError, Result};
use crate::extraction::DocumentExtractor;
use crate::mapper::{map_document, FieldSchema, MappedProfile};
use crate::reconcile::{profile_to_mapped, reconcile, ReconOutcome, ReconciliationResult};
use crate::screening::{screen, ScreeningIdentity, ScreeningOutcome};
use kycflow_common::db::models::{CaseKind, CaseState, KycCase};
use kycflow_common::db::{CaseUpdate, Repository};
use kycflow_common::metrics;
use kycflow_common::outreach::{OutreachGateway, OutreachReason};
use kycflow_common::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What the pipeline does with a fully screened case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Absorb non-material updates and close the case
    AutoUpdate,
    /// A material field changed; a human must review
    EscalateMismatch,
    /// Screening flagged the entity; a human must review
    EscalateScreening,
}

/// Resolution rule for a screened case.
///
/// A material mismatch takes precedence: even a screening hit rides the
/// mismatch ticket only after the profile question is settled, and a
/// screening hit escalates regardless of how cleanly the profile matched.
pub fn decide(recon: ReconOutcome, screening: ScreeningOutcome) -> Decision {
    if recon == ReconOutcome::Mismatch {
        Decision::EscalateMismatch
    } else if screening.requires_outreach() {
        Decision::EscalateScreening
    } else {
        Decision::AutoUpdate
    }
}

/// Extract the field updates safe to merge from a stamped diff list
pub fn non_material_updates(diffs: &serde_json::Value) -> Vec<(String, serde_json::Value)> {
    let Some(list) = diffs.as_array() else {
        return Vec::new();
    };
    list.iter()
        .filter(|diff| diff.get("material").and_then(|m| m.as_bool()) == Some(false))
        .filter_map(|diff| {
            let field = diff.get("field")?.as_str()?.to_string();
            let incoming = diff.get("incoming")?.clone();
            Some((field, incoming))
        })
        .collect()
}

/// Exponential backoff between retry attempts, capped at 30s
async fn backoff(attempt: u32) {
    let millis = 500u64.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    tokio::time::sleep(Duration::from_millis(millis.min(30_000))).await;
}

/// Drives claimed cases through the pipeline stages
pub struct CasePipeline {
    repository: Repository,
    extractor: Arc<dyn DocumentExtractor>,
    outreach: Arc<dyn OutreachGateway>,
    schema: FieldSchema,
    config: Arc<AppConfig>,
}

impl CasePipeline {
    pub fn new(
        repository: Repository,
        extractor: Arc<dyn DocumentExtractor>,
        outreach: Arc<dyn OutreachGateway>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            repository,
            extractor,
            outreach,
            schema: FieldSchema::onboarding(),
            config,
        }
    }

    /// The underlying case store
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Claim the oldest available case, taking over claims whose lease
    /// has expired
    pub async fn claim_next(&self) -> kycflow_common::Result<Option<KycCase>> {
        self.repository
            .claim_next_case(self.config.worker.claim_lease_secs)
            .await
    }

    /// Process one claimed case until it parks in a pending, recapture or
    /// terminal state. The claim is released on transient errors so the
    /// case stays claimable; integrity faults hold the case first and the
    /// release is a no-op.
    pub async fn process_case(&self, case: KycCase) -> Result<KycCase> {
        let case_id = case.id;
        match self.run(case).await {
            Ok(case) => Ok(case),
            Err(error) => {
                if let Err(release_error) = self.repository.release_case(case_id).await {
                    warn!(
                        case_id = %case_id,
                        error = %release_error,
                        "Failed to release claim after pipeline error"
                    );
                }
                Err(error)
            }
        }
    }

    async fn run(&self, mut case: KycCase) -> Result<KycCase> {
        while case.case_state().is_claimable() {
            let from = case.case_state();
            case = match from {
                CaseState::Created => self.handle_created(case).await?,
                CaseState::Extracted => self.handle_extracted(case).await?,
                CaseState::Reconciled => self.handle_reconciled(case).await?,
                CaseState::Screened => self.handle_screened(case).await?,
                CaseState::AutoUpdated => self.handle_auto_updated(case).await?,
                _ => break,
            };
            metrics::record_transition(from.as_str(), &case.state);
        }
        Ok(case)
    }

    /// CREATED: fetch the source document, extract, map onto the schema
    async fn handle_created(&self, case: KycCase) -> Result<KycCase> {
        let document = match tokio::fs::read(&case.document_ref).await {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(case_id = %case.id, error = %error, "Source document unreadable");
                return self
                    .route_to_recapture(
                        &case,
                        CaseState::Created,
                        "document_unreadable",
                        &error.to_string(),
                    )
                    .await;
            }
        };

        let max_retries = self.config.extraction.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=max_retries {
            let started = std::time::Instant::now();
            match self.extractor.extract(&document).await {
                Ok(extracted) => {
                    metrics::record_extraction(started.elapsed().as_secs_f64(), true);
                    return self.apply_mapping(case, &extracted, attempt as i32).await;
                }
                Err(error) => {
                    metrics::record_extraction(started.elapsed().as_secs_f64(), false);
                    warn!(
                        case_id = %case.id,
                        attempt,
                        max_retries,
                        error = %error,
                        "Extraction attempt failed"
                    );
                    last_error = Some(error);
                    if attempt < max_retries {
                        backoff(attempt).await;
                    }
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "extraction failed".to_string());
        self.route_to_recapture(&case, CaseState::Created, "extraction_failed", &message)
            .await
    }

    async fn apply_mapping(
        &self,
        case: KycCase,
        extracted: &crate::extraction::ExtractedDocument,
        attempts: i32,
    ) -> Result<KycCase> {
        match map_document(extracted, &self.schema) {
            Ok(profile) => {
                let entity_name = profile.text("entity_legal_name").map(|s| s.to_string());
                let update = CaseUpdate {
                    entity_name,
                    mapped_profile: Some(profile.to_json()),
                    unmapped_fields: Some(serde_json::json!(profile.unmapped)),
                    research_status: Some("complete".to_string()),
                    attempt_count: Some(case.attempt_count + attempts),
                    ..Default::default()
                };
                let case = self
                    .repository
                    .transition_case(case.id, CaseState::Created, CaseState::Extracted, update, false)
                    .await?;
                info!(
                    case_id = %case.id,
                    mapped = case.mapped_profile.is_some(),
                    "Document extracted and mapped"
                );
                Ok(case)
            }
            Err(errors) => {
                let joined = errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                warn!(case_id = %case.id, errors = %joined, "Mapping failed");

                // The extraction itself succeeded, so the case passes
                // through EXTRACTED before parking in recapture
                let case = self
                    .repository
                    .transition_case(
                        case.id,
                        CaseState::Created,
                        CaseState::Extracted,
                        CaseUpdate {
                            research_status: Some("complete".to_string()),
                            attempt_count: Some(case.attempt_count + attempts),
                            ..Default::default()
                        },
                        false,
                    )
                    .await?;

                let update = CaseUpdate {
                    analyst_status: Some("mapping_failed".to_string()),
                    error_message: Some(joined),
                    clear_claim: true,
                    ..Default::default()
                };
                self.repository
                    .transition_case(
                        case.id,
                        CaseState::Extracted,
                        CaseState::NeedsRecapture,
                        update,
                        false,
                    )
                    .await
                    .map_err(Into::into)
            }
        }
    }

    /// EXTRACTED: reconcile the mapped snapshot against the stored profile
    async fn handle_extracted(&self, case: KycCase) -> Result<KycCase> {
        let Some(snapshot) = case.mapped_profile.as_ref() else {
            return self.hold(&case, "mapped profile snapshot missing").await;
        };
        let incoming = MappedProfile::from_json(snapshot, &self.schema);

        let result = match case.case_kind() {
            // Onboarding has nothing stored to compare against
            CaseKind::Onboarding => ReconciliationResult {
                outcome: ReconOutcome::Match,
                diffs: Vec::new(),
            },
            CaseKind::Refresh => {
                let stored = self
                    .repository
                    .find_profile_by_client(&case.client_identifier)
                    .await?;
                let Some(stored) = stored else {
                    let message = format!(
                        "no stored profile for refresh client {}",
                        case.client_identifier
                    );
                    return self.hold(&case, &message).await;
                };
                reconcile(&profile_to_mapped(&stored), &incoming, &self.schema)
            }
        };

        info!(
            case_id = %case.id,
            outcome = result.outcome.as_str(),
            diffs = result.diffs.len(),
            "Reconciliation complete"
        );

        let update = CaseUpdate {
            analyst_status: Some(result.outcome.as_str().to_string()),
            field_diffs: Some(serde_json::to_value(&result.diffs)?),
            ..Default::default()
        };
        self.repository
            .transition_case(case.id, CaseState::Extracted, CaseState::Reconciled, update, false)
            .await
            .map_err(Into::into)
    }

    /// RECONCILED: screen the mapped identity against the active watchlist
    async fn handle_reconciled(&self, case: KycCase) -> Result<KycCase> {
        let Some(snapshot) = case.mapped_profile.as_ref() else {
            return self.hold(&case, "mapped profile snapshot missing").await;
        };
        let mapped = MappedProfile::from_json(snapshot, &self.schema);

        let watchlist = self.load_watchlist_with_retries(&case).await?;

        let identity = ScreeningIdentity {
            name: mapped
                .text("entity_legal_name")
                .or(case.entity_name.as_deref())
                .unwrap_or(&case.client_identifier)
                .to_string(),
            date_of_birth: mapped.date("date_of_birth"),
            country: mapped.text("address_country").map(|s| s.to_string()),
        };

        let result = screen(&identity, &watchlist, &self.config.screening);
        metrics::record_screening(result.outcome.as_str());

        info!(
            case_id = %case.id,
            outcome = result.outcome.as_str(),
            score = result.score,
            matches = result.matches.len(),
            "Screening complete"
        );

        let update = CaseUpdate {
            screening_status: Some(result.outcome.as_str().to_string()),
            screening_matches: Some(serde_json::to_value(&result.matches)?),
            ..Default::default()
        };
        self.repository
            .transition_case(case.id, CaseState::Reconciled, CaseState::Screened, update, false)
            .await
            .map_err(Into::into)
    }

    async fn load_watchlist_with_retries(
        &self,
        case: &KycCase,
    ) -> Result<Vec<kycflow_common::db::models::WatchlistEntry>> {
        let max_retries = self.config.screening.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=max_retries {
            match self.repository.load_active_watchlist().await {
                Ok(watchlist) => return Ok(watchlist),
                Err(error) => {
                    warn!(
                        case_id = %case.id,
                        attempt,
                        error = %error,
                        "Watchlist load failed"
                    );
                    last_error = Some(error);
                    if attempt < max_retries {
                        backoff(attempt).await;
                    }
                }
            }
        }

        Err(PipelineError::Screening {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "watchlist unavailable".to_string()),
        })
    }

    /// SCREENED: either escalate to outreach or take the automatic path.
    ///
    /// The outcome statuses are always stamped by the transitions that
    /// brought the case here; a missing or unreadable one means corrupt
    /// data, and the case parks rather than defaulting to the automatic
    /// path.
    async fn handle_screened(&self, case: KycCase) -> Result<KycCase> {
        let recon = case.analyst_status.as_deref().and_then(ReconOutcome::parse);
        let Some(recon) = recon else {
            return self
                .hold(&case, "reconciliation outcome missing or unreadable")
                .await;
        };
        let screening = case
            .screening_status
            .as_deref()
            .and_then(ScreeningOutcome::parse);
        let Some(screening) = screening else {
            return self
                .hold(&case, "screening outcome missing or unreadable")
                .await;
        };

        match decide(recon, screening) {
            Decision::EscalateMismatch => {
                self.escalate(
                    case,
                    OutreachReason::MaterialChange,
                    CaseState::PendingOutreachMismatch,
                )
                .await
            }
            Decision::EscalateScreening => {
                self.escalate(
                    case,
                    OutreachReason::ScreeningMateriality,
                    CaseState::PendingOutreachScreening,
                )
                .await
            }
            Decision::AutoUpdate => {
                let changed = case
                    .field_diffs
                    .as_ref()
                    .and_then(|d| d.as_array())
                    .map(|d| !d.is_empty())
                    .unwrap_or(false);
                let update = CaseUpdate {
                    refresh_status: Some(if changed { "yes" } else { "no" }.to_string()),
                    ..Default::default()
                };
                self.repository
                    .transition_case(case.id, CaseState::Screened, CaseState::AutoUpdated, update, false)
                    .await
                    .map_err(Into::into)
            }
        }
    }

    /// Raise the ticket before the transition: if the worker dies between
    /// the two, the rerun raises again and the gateway hands back the same
    /// open ticket.
    async fn escalate(
        &self,
        case: KycCase,
        reason: OutreachReason,
        next: CaseState,
    ) -> Result<KycCase> {
        let details = match reason {
            OutreachReason::MaterialChange => case
                .field_diffs
                .clone()
                .unwrap_or_else(|| serde_json::json!([])),
            OutreachReason::ScreeningMateriality => case
                .screening_matches
                .clone()
                .unwrap_or_else(|| serde_json::json!([])),
        };

        let ticket_id = self.outreach.raise(case.id, reason, details).await?;
        metrics::record_outreach(reason.as_str());

        info!(
            case_id = %case.id,
            ticket_id = %ticket_id,
            reason = reason.as_str(),
            "Case escalated to outreach"
        );

        let update = CaseUpdate {
            outreach_status: Some(ticket_id.to_string()),
            clear_claim: true,
            ..Default::default()
        };
        self.repository
            .transition_case(case.id, CaseState::Screened, next, update, false)
            .await
            .map_err(Into::into)
    }

    /// AUTO_UPDATED: merge the absorbed changes into the stored profile,
    /// then close. Rewriting the same values makes a rerun harmless.
    async fn handle_auto_updated(&self, case: KycCase) -> Result<KycCase> {
        match case.case_kind() {
            CaseKind::Onboarding => {
                if self
                    .repository
                    .find_profile_by_client(&case.client_identifier)
                    .await?
                    .is_none()
                {
                    let Some(snapshot) = case.mapped_profile.as_ref() else {
                        return self.hold(&case, "mapped profile snapshot missing").await;
                    };
                    let mapped = MappedProfile::from_json(snapshot, &self.schema);
                    self.repository
                        .insert_profile(
                            &case.client_identifier,
                            &mapped.to_field_values(&self.schema),
                        )
                        .await?;
                    info!(case_id = %case.id, client = %case.client_identifier, "Profile created");
                }
            }
            CaseKind::Refresh => {
                let updates = case
                    .field_diffs
                    .as_ref()
                    .map(non_material_updates)
                    .unwrap_or_default();
                if !updates.is_empty() {
                    self.repository
                        .apply_profile_updates(&case.client_identifier, &updates)
                        .await?;
                    info!(
                        case_id = %case.id,
                        client = %case.client_identifier,
                        fields = updates.len(),
                        "Profile updates absorbed"
                    );
                }
            }
        }

        let update = CaseUpdate {
            clear_claim: true,
            ..Default::default()
        };
        self.repository
            .transition_case(case.id, CaseState::AutoUpdated, CaseState::ClosedMatched, update, false)
            .await
            .map_err(Into::into)
    }

    /// Park the case on an integrity fault: stamp the error so the claim
    /// query skips it, then surface the fault to the worker loop. An
    /// operator resolves the case through the gateway.
    async fn hold<T>(&self, case: &KycCase, message: &str) -> Result<T> {
        warn!(case_id = %case.id, state = %case.state, reason = message, "Case held");
        self.repository.hold_case(case.id, message).await?;
        Err(PipelineError::Integrity {
            case_id: case.id,
            message: message.to_string(),
        })
    }

    async fn route_to_recapture(
        &self,
        case: &KycCase,
        from: CaseState,
        status: &str,
        message: &str,
    ) -> Result<KycCase> {
        let update = CaseUpdate {
            research_status: Some(status.to_string()),
            error_message: Some(message.to_string()),
            clear_claim: true,
            ..Default::default()
        };
        self.repository
            .transition_case(case.id, from, CaseState::NeedsRecapture, update, false)
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_escalates_regardless_of_screening() {
        for screening in [
            ScreeningOutcome::Clear,
            ScreeningOutcome::Review,
            ScreeningOutcome::Hit,
        ] {
            assert_eq!(
                decide(ReconOutcome::Mismatch, screening),
                Decision::EscalateMismatch
            );
        }
    }

    #[test]
    fn test_screening_escalates_regardless_of_match() {
        for recon in [ReconOutcome::Match, ReconOutcome::MatchWithUpdates] {
            assert_eq!(
                decide(recon, ScreeningOutcome::Hit),
                Decision::EscalateScreening
            );
            assert_eq!(
                decide(recon, ScreeningOutcome::Review),
                Decision::EscalateScreening
            );
        }
    }

    #[test]
    fn test_clean_case_auto_updates() {
        assert_eq!(
            decide(ReconOutcome::Match, ScreeningOutcome::Clear),
            Decision::AutoUpdate
        );
        assert_eq!(
            decide(ReconOutcome::MatchWithUpdates, ScreeningOutcome::Clear),
            Decision::AutoUpdate
        );
    }

    #[test]
    fn test_corrupt_outcome_stamps_do_not_parse() {
        // The screened stage parks the case when a stamp is missing or
        // unreadable; a corrupt value must never read as a clean outcome
        assert_eq!(ReconOutcome::parse("MATCH"), None);
        assert_eq!(ReconOutcome::parse(""), None);
        assert_eq!(ScreeningOutcome::parse("cleared"), None);
        assert_eq!(ScreeningOutcome::parse(""), None);
    }

    #[test]
    fn test_non_material_updates_filtering() {
        let diffs = serde_json::json!([
            {"field": "phone_number", "stored": "555-0100", "incoming": "555-0199", "material": false},
            {"field": "entity_legal_name", "stored": "Acme", "incoming": "Acme Ltd", "material": true},
            {"field": "dba_name", "stored": "A", "incoming": "B", "material": false}
        ]);

        let updates = non_material_updates(&diffs);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].0, "phone_number");
        assert_eq!(updates[0].1, serde_json::json!("555-0199"));
        assert_eq!(updates[1].0, "dba_name");
    }

    #[test]
    fn test_non_material_updates_on_malformed_input() {
        assert!(non_material_updates(&serde_json::json!(null)).is_empty());
        assert!(non_material_updates(&serde_json::json!({})).is_empty());
        assert!(non_material_updates(&serde_json::json!([{"material": false}])).is_empty());
    }
}
