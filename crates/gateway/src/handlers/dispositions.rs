//! Operator disposition and withdrawal handlers
//!
//! These are the only writes that race the worker pool, so both run the
//! guarded transition with the unclaimed check: a case mid-stage comes
//! back as a conflict instead of being yanked out from under a worker.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use kycflow_common::{
    db::models::{CaseState, KycCase},
    db::{CaseUpdate, Repository},
    errors::{AppError, Result},
    metrics,
};

/// Operator decision on an escalated case
#[derive(Debug, Deserialize)]
pub struct DispositionRequest {
    /// "escalate" closes the case as escalated; "expire" writes it off
    pub decision: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Serialize)]
pub struct DispositionResponse {
    pub case_id: Uuid,
    pub state: String,
    pub tickets_resolved: u64,
}

/// Apply an operator decision to a pending-outreach case.
///
/// An SLA write-off ("expire") is also accepted for a case stuck in
/// recapture, matching the state machine.
pub async fn dispose_case(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    Json(request): Json<DispositionRequest>,
) -> Result<Json<DispositionResponse>> {
    let repo = Repository::new(state.db.clone());
    let case = find_case(&repo, case_id).await?;
    let current = case.case_state();

    let next = match request.decision.as_str() {
        "escalate" => CaseState::ClosedEscalated,
        "expire" => CaseState::ClosedExpired,
        other => {
            return Err(AppError::Validation {
                message: format!("unknown disposition: {:?}", other),
                field: Some("decision".to_string()),
            })
        }
    };

    if case.is_terminal() {
        return Err(AppError::CaseTerminal {
            id: case_id.to_string(),
            state: case.state,
        });
    }

    let update = CaseUpdate {
        outreach_status: Some(request.decision.clone()),
        clear_claim: true,
        ..Default::default()
    };
    let case = repo
        .transition_case(case_id, current, next, update, true)
        .await?;
    metrics::record_transition(current.as_str(), &case.state);

    let disposition = match request.notes {
        Some(ref notes) => format!("{}: {}", request.decision, notes),
        None => request.decision.clone(),
    };
    let tickets_resolved = repo.resolve_outreach(case_id, &disposition).await?;

    tracing::info!(
        case_id = %case_id,
        decision = %request.decision,
        tickets_resolved,
        "Case disposed"
    );

    Ok(Json(DispositionResponse {
        case_id,
        state: case.state,
        tickets_resolved,
    }))
}

#[derive(Serialize)]
pub struct WithdrawResponse {
    pub case_id: Uuid,
    pub state: String,
}

/// Withdraw a non-terminal case
pub async fn withdraw_case(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
) -> Result<Json<WithdrawResponse>> {
    let repo = Repository::new(state.db.clone());
    let case = find_case(&repo, case_id).await?;
    let current = case.case_state();

    if case.is_terminal() {
        return Err(AppError::CaseTerminal {
            id: case_id.to_string(),
            state: case.state,
        });
    }

    let update = CaseUpdate {
        clear_claim: true,
        ..Default::default()
    };
    let case = repo
        .transition_case(case_id, current, CaseState::Withdrawn, update, true)
        .await?;
    metrics::record_transition(current.as_str(), &case.state);

    // Any open ticket dies with the case
    let tickets_resolved = repo.resolve_outreach(case_id, "withdrawn").await?;

    tracing::info!(case_id = %case_id, tickets_resolved, "Case withdrawn");

    Ok(Json(WithdrawResponse {
        case_id,
        state: case.state,
    }))
}

async fn find_case(repo: &Repository, case_id: Uuid) -> Result<KycCase> {
    repo.find_case_by_id(case_id)
        .await?
        .ok_or_else(|| AppError::CaseNotFound {
            id: case_id.to_string(),
        })
}
