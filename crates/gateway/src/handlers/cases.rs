//! Case intake, dashboard listing and detail handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use kycflow_common::{
    db::models::{CaseKind, CaseState, KycCase},
    db::{CaseFilter, CaseUpdate, Repository},
    errors::{AppError, Result},
    metrics,
};

/// Request to open a new case
#[derive(Debug, Deserialize, Validate)]
pub struct CreateCaseRequest {
    #[validate(length(min = 1, max = 128))]
    pub client_identifier: String,

    /// "onboarding" or "refresh"
    pub kind: String,

    #[validate(length(min = 1, max = 512))]
    pub document_name: String,

    /// Where the worker fetches the document bytes from
    #[validate(length(min = 1, max = 1024))]
    pub document_ref: String,
}

/// Response after opening a case
#[derive(Serialize)]
pub struct CreateCaseResponse {
    pub case_id: Uuid,
    pub state: String,
    pub poll_url: String,
}

/// Dashboard view of one case
#[derive(Serialize)]
pub struct CaseResponse {
    pub id: Uuid,
    pub client_identifier: String,
    pub kind: String,
    pub entity_name: Option<String>,
    pub document_name: String,
    pub state: String,
    /// Human-readable status text the dashboard shows
    pub display_status: String,
    /// Parked on an integrity fault, waiting on an operator
    pub held: bool,
    pub research_status: Option<String>,
    pub analyst_status: Option<String>,
    pub screening_status: Option<String>,
    pub outreach_status: Option<String>,
    pub refresh_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_diffs: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screening_matches: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub sla_deadline: String,
    pub sla_breached: bool,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl CaseResponse {
    pub fn from_case(case: KycCase, window_days: i64, now: DateTime<Utc>) -> Self {
        Self {
            display_status: case.display_status(),
            held: case.is_held(),
            sla_deadline: case.sla_deadline(window_days).to_rfc3339(),
            sla_breached: case.sla_breached(window_days, now),
            id: case.id,
            client_identifier: case.client_identifier,
            kind: case.kind,
            entity_name: case.entity_name,
            document_name: case.document_name,
            state: case.state,
            research_status: case.research_status,
            analyst_status: case.analyst_status,
            screening_status: case.screening_status,
            outreach_status: case.outreach_status,
            refresh_status: case.refresh_status,
            field_diffs: case.field_diffs,
            screening_matches: case.screening_matches,
            error_message: case.error_message,
            created_at: case.created_at.to_rfc3339(),
            updated_at: case.updated_at.to_rfc3339(),
            completed_at: case.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Dashboard list query: filters plus the page number
#[derive(Debug, Default, Deserialize)]
pub struct ListCasesQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    pub client_name: Option<String>,
    pub refresh_status: Option<String>,
    pub state: Option<String>,
    pub case_id: Option<Uuid>,
    pub document_name: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub sla_from: Option<DateTime<Utc>>,
    pub sla_to: Option<DateTime<Utc>>,
    pub completed_from: Option<DateTime<Utc>>,
    pub completed_to: Option<DateTime<Utc>>,
}

fn default_page() -> u64 {
    1
}

impl ListCasesQuery {
    fn into_filter(self) -> (CaseFilter, u64) {
        let filter = CaseFilter {
            client_name: self.client_name,
            refresh_status: self.refresh_status,
            state: self.state,
            case_id: self.case_id,
            document_name: self.document_name,
            created_from: self.created_from,
            created_to: self.created_to,
            sla_from: self.sla_from,
            sla_to: self.sla_to,
            completed_from: self.completed_from,
            completed_to: self.completed_to,
        };
        (filter, self.page.max(1))
    }
}

/// One page of the dashboard
#[derive(Serialize)]
pub struct ListCasesResponse {
    pub cases: Vec<CaseResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

/// Open a new onboarding or refresh case
pub async fn create_case(
    State(state): State<AppState>,
    Json(request): Json<CreateCaseRequest>,
) -> Result<(StatusCode, Json<CreateCaseResponse>)> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let kind = match request.kind.as_str() {
        "onboarding" => CaseKind::Onboarding,
        "refresh" => CaseKind::Refresh,
        other => {
            return Err(AppError::Validation {
                message: format!("unknown case kind: {:?}", other),
                field: Some("kind".to_string()),
            })
        }
    };

    let repo = Repository::new(state.db.clone());

    // A refresh needs something to refresh; an onboarding must not
    // clobber an existing profile
    let profile = repo
        .find_profile_by_client(&request.client_identifier)
        .await?;
    match kind {
        CaseKind::Refresh if profile.is_none() => {
            return Err(AppError::ProfileNotFound {
                client_identifier: request.client_identifier.clone(),
            })
        }
        CaseKind::Onboarding if profile.is_some() => {
            return Err(AppError::Duplicate {
                message: format!(
                    "client {} already has a profile; submit a refresh",
                    request.client_identifier
                ),
            })
        }
        _ => {}
    }

    let case = repo
        .create_case(
            &request.client_identifier,
            kind,
            &request.document_name,
            &request.document_ref,
        )
        .await?;

    metrics::record_case_created(&case.kind);

    tracing::info!(
        case_id = %case.id,
        client = %case.client_identifier,
        kind = %case.kind,
        document = %case.document_name,
        "Case created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateCaseResponse {
            case_id: case.id,
            state: case.state,
            poll_url: format!("/v1/cases/{}", case.id),
        }),
    ))
}

/// Dashboard list with filters and stateless pagination
pub async fn list_cases(
    State(state): State<AppState>,
    Query(query): Query<ListCasesQuery>,
) -> Result<Json<ListCasesResponse>> {
    let repo = Repository::new(state.db.clone());
    let (filter, page) = query.into_filter();

    let window_days = state.config.sla.window_days;
    let page_size = state.config.server.page_size;

    let result = repo
        .list_cases(&filter, page, page_size, window_days)
        .await?;

    let now = Utc::now();
    Ok(Json(ListCasesResponse {
        cases: result
            .cases
            .into_iter()
            .map(|case| CaseResponse::from_case(case, window_days, now))
            .collect(),
        total: result.total,
        page: result.page,
        page_size: result.page_size,
        total_pages: result.total_pages,
    }))
}

/// Case detail by id
pub async fn get_case(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
) -> Result<Json<CaseResponse>> {
    let repo = Repository::new(state.db.clone());

    let case = repo
        .find_case_by_id(case_id)
        .await?
        .ok_or_else(|| AppError::CaseNotFound {
            id: case_id.to_string(),
        })?;

    Ok(Json(CaseResponse::from_case(
        case,
        state.config.sla.window_days,
        Utc::now(),
    )))
}

/// Request to resubmit a recaptured document on an existing case
#[derive(Debug, Deserialize, Validate)]
pub struct ResubmitCaseRequest {
    /// Where the worker fetches the recaptured document bytes from
    #[validate(length(min = 1, max = 1024))]
    pub document_ref: String,

    /// New source document name; kept when omitted
    #[validate(length(min = 1, max = 512))]
    #[serde(default)]
    pub document_name: Option<String>,
}

/// Resubmit a recaptured document: the case re-enters the pipeline from
/// the top with the error cleared. Only legal from NEEDS_RECAPTURE; the
/// guarded transition rejects anything else.
pub async fn resubmit_case(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    Json(request): Json<ResubmitCaseRequest>,
) -> Result<Json<CreateCaseResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let repo = Repository::new(state.db.clone());

    let update = CaseUpdate {
        document_ref: Some(request.document_ref),
        document_name: request.document_name,
        clear_error: true,
        clear_claim: true,
        ..Default::default()
    };
    let case = repo
        .transition_case(
            case_id,
            CaseState::NeedsRecapture,
            CaseState::Created,
            update,
            true,
        )
        .await?;

    metrics::record_transition(
        CaseState::NeedsRecapture.as_str(),
        CaseState::Created.as_str(),
    );

    tracing::info!(
        case_id = %case.id,
        document = %case.document_name,
        "Recaptured document resubmitted"
    );

    Ok(Json(CreateCaseResponse {
        case_id: case.id,
        state: case.state,
        poll_url: format!("/v1/cases/{}", case.id),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn case(state: &str) -> KycCase {
        let now = Utc::now();
        KycCase {
            id: Uuid::new_v4(),
            client_identifier: "CL-1".to_string(),
            kind: "refresh".to_string(),
            entity_name: Some("Acme Corp".to_string()),
            document_name: "acme.pdf".to_string(),
            document_ref: "/data/acme.pdf".to_string(),
            state: state.to_string(),
            mapped_profile: None,
            unmapped_fields: None,
            field_diffs: None,
            screening_matches: None,
            research_status: None,
            analyst_status: None,
            screening_status: None,
            outreach_status: None,
            refresh_status: Some("yes".to_string()),
            error_message: None,
            attempt_count: 0,
            claimed_at: None,
            created_at: now.into(),
            updated_at: now.into(),
            completed_at: None,
        }
    }

    #[test]
    fn test_display_status_for_refreshed_case() {
        let response = CaseResponse::from_case(case("closed_matched"), 90, Utc::now());
        assert_eq!(response.display_status, "KYC status Refreshed");
        assert!(!response.sla_breached);
    }

    #[test]
    fn test_sla_breach_flag() {
        let mut open = case("created");
        open.created_at = (Utc::now() - Duration::days(120)).into();
        let response = CaseResponse::from_case(open, 90, Utc::now());
        assert!(response.sla_breached);

        // Terminal cases never flag, however old
        let mut closed = case("closed_matched");
        closed.created_at = (Utc::now() - Duration::days(120)).into();
        let response = CaseResponse::from_case(closed, 90, Utc::now());
        assert!(!response.sla_breached);
    }

    #[test]
    fn test_query_defaults() {
        let query: ListCasesQuery = serde_json::from_str("{}").unwrap();
        let (filter, page) = query.into_filter();
        assert_eq!(page, 1);
        assert!(filter.client_name.is_none());
        assert!(filter.case_id.is_none());
    }

    #[test]
    fn test_held_case_is_flagged_for_operators() {
        let mut held = case("extracted");
        held.error_message = Some("no stored profile for refresh client CL-1".to_string());
        let response = CaseResponse::from_case(held, 90, Utc::now());
        assert!(response.held);

        // A recapture case carries an error but is parked by state
        let mut recapture = case("needs_recapture");
        recapture.error_message = Some("extraction failed".to_string());
        let response = CaseResponse::from_case(recapture, 90, Utc::now());
        assert!(!response.held);

        assert!(!CaseResponse::from_case(case("extracted"), 90, Utc::now()).held);
    }

    #[test]
    fn test_resubmit_request_validation() {
        let request = ResubmitCaseRequest {
            document_ref: "/data/acme-v2.pdf".to_string(),
            document_name: Some("acme-v2.pdf".to_string()),
        };
        assert!(request.validate().is_ok());

        let request = ResubmitCaseRequest {
            document_ref: "".to_string(),
            document_name: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_resubmit_only_legal_from_recapture() {
        assert!(CaseState::NeedsRecapture.can_transition_to(CaseState::Created));
        assert!(!CaseState::Extracted.can_transition_to(CaseState::Created));
        assert!(!CaseState::ClosedExpired.can_transition_to(CaseState::Created));
    }

    #[test]
    fn test_create_request_validation() {
        let request = CreateCaseRequest {
            client_identifier: "".to_string(),
            kind: "refresh".to_string(),
            document_name: "doc.pdf".to_string(),
            document_ref: "/data/doc.pdf".to_string(),
        };
        assert!(request.validate().is_err());
    }
}
