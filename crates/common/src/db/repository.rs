//! Repository pattern for case store operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling and single-writer guarantees for
//! case transitions.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sea_orm::sea_query::extension::postgres::PgExpr;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, Statement,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dashboard list filter; every field is optional and combined with AND
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaseFilter {
    /// Substring match on the entity legal name, case-insensitive
    pub client_name: Option<String>,
    /// Exact match on refresh_status (yes/no)
    pub refresh_status: Option<String>,
    /// Exact match on the case state
    pub state: Option<String>,
    pub case_id: Option<Uuid>,
    /// Substring match on the source document name
    pub document_name: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub sla_from: Option<DateTime<Utc>>,
    pub sla_to: Option<DateTime<Utc>>,
    pub completed_from: Option<DateTime<Utc>>,
    pub completed_to: Option<DateTime<Utc>>,
}

/// One page of the dashboard case list
#[derive(Debug, Clone, Serialize)]
pub struct CasePage {
    pub cases: Vec<KycCase>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

/// Column stamps applied together with a state transition
#[derive(Debug, Clone, Default)]
pub struct CaseUpdate {
    pub entity_name: Option<String>,
    pub document_name: Option<String>,
    pub document_ref: Option<String>,
    pub mapped_profile: Option<serde_json::Value>,
    pub unmapped_fields: Option<serde_json::Value>,
    pub field_diffs: Option<serde_json::Value>,
    pub screening_matches: Option<serde_json::Value>,
    pub research_status: Option<String>,
    pub analyst_status: Option<String>,
    pub screening_status: Option<String>,
    pub outreach_status: Option<String>,
    pub refresh_status: Option<String>,
    pub error_message: Option<String>,
    pub attempt_count: Option<i32>,
    /// Release the worker claim as part of the transition
    pub clear_claim: bool,
    /// Null out the recorded error as part of the transition
    pub clear_error: bool,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Customer Profile Operations
    // ========================================================================

    /// Find the stored profile for a client identifier
    pub async fn find_profile_by_client(
        &self,
        client_identifier: &str,
    ) -> Result<Option<CustomerProfile>> {
        CustomerProfileEntity::find()
            .filter(CustomerProfileColumn::ClientIdentifier.eq(client_identifier))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Insert a new profile from mapped onboarding fields
    pub async fn insert_profile(
        &self,
        client_identifier: &str,
        fields: &[(String, serde_json::Value)],
    ) -> Result<CustomerProfile> {
        let now = chrono::Utc::now();

        let mut profile = CustomerProfileActiveModel {
            client_identifier: Set(client_identifier.to_string()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            ..Default::default()
        };

        for (field, value) in fields {
            set_profile_field(&mut profile, field, value)?;
        }

        profile.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Merge field updates into the stored profile.
    ///
    /// The caller restricts `fields` to non-material diffs; this method only
    /// applies what it is given, inside a single update.
    pub async fn apply_profile_updates(
        &self,
        client_identifier: &str,
        fields: &[(String, serde_json::Value)],
    ) -> Result<CustomerProfile> {
        let stored = self
            .find_profile_by_client(client_identifier)
            .await?
            .ok_or_else(|| AppError::ProfileNotFound {
                client_identifier: client_identifier.to_string(),
            })?;

        let mut profile: CustomerProfileActiveModel = stored.into();
        for (field, value) in fields {
            set_profile_field(&mut profile, field, value)?;
        }
        profile.updated_at = Set(chrono::Utc::now().into());

        profile.update(self.write_conn()).await.map_err(Into::into)
    }

    // ========================================================================
    // Case Operations
    // ========================================================================

    /// Create a new case in the CREATED state
    pub async fn create_case(
        &self,
        client_identifier: &str,
        kind: CaseKind,
        document_name: &str,
        document_ref: &str,
    ) -> Result<KycCase> {
        let now = chrono::Utc::now();

        // Stamp the display name from the stored profile when we have one
        let entity_name = self
            .find_profile_by_client(client_identifier)
            .await?
            .and_then(|p| p.entity_legal_name);

        let case = KycCaseActiveModel {
            id: Set(Uuid::new_v4()),
            client_identifier: Set(client_identifier.to_string()),
            kind: Set(String::from(kind)),
            entity_name: Set(entity_name),
            document_name: Set(document_name.to_string()),
            document_ref: Set(document_ref.to_string()),
            state: Set(String::from(CaseState::Created)),
            mapped_profile: Set(None),
            unmapped_fields: Set(None),
            field_diffs: Set(None),
            screening_matches: Set(None),
            research_status: Set(None),
            analyst_status: Set(None),
            screening_status: Set(None),
            outreach_status: Set(None),
            refresh_status: Set(None),
            error_message: Set(None),
            attempt_count: Set(0),
            claimed_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
            completed_at: Set(None),
        };

        case.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Find case by ID
    pub async fn find_case_by_id(&self, id: Uuid) -> Result<Option<KycCase>> {
        KycCaseEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Claim the oldest available case in a pipeline-claimable state.
    ///
    /// `FOR UPDATE SKIP LOCKED` plus the claim stamp gives at-most-one
    /// active stage execution per case across the worker pool. A claim
    /// older than the lease belongs to a worker that died mid-stage and
    /// is taken over. Cases holding a recorded error are skipped: they
    /// are parked for an operator, not retried.
    pub async fn claim_next_case(&self, lease_secs: u64) -> Result<Option<KycCase>> {
        let cutoff = stale_claim_cutoff(chrono::Utc::now(), lease_secs);
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE kyc_cases SET claimed_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM kyc_cases
                WHERE state IN ('created', 'extracted', 'reconciled', 'screened', 'auto_updated')
                  AND (claimed_at IS NULL OR claimed_at < $1)
                  AND error_message IS NULL
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id
            "#,
            vec![cutoff.into()],
        );

        let row = self.write_conn().query_one(stmt).await?;

        match row {
            Some(row) => {
                let id: Uuid = row
                    .try_get_by_index(0)
                    .map_err(|e| AppError::Internal {
                        message: format!("claim returned a bad id: {}", e),
                    })?;
                Ok(KycCaseEntity::find_by_id(id)
                    .one(self.write_conn())
                    .await?)
            }
            None => Ok(None),
        }
    }

    /// Release a claimed case without changing its state
    pub async fn release_case(&self, case_id: Uuid) -> Result<()> {
        let result = KycCaseEntity::update_many()
            .col_expr(KycCaseColumn::ClaimedAt, Expr::value(Option::<DateTime<Utc>>::None))
            .col_expr(KycCaseColumn::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(KycCaseColumn::Id.eq(case_id))
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::CaseNotFound {
                id: case_id.to_string(),
            });
        }
        Ok(())
    }

    /// Park a case out of the claim rotation, recording why.
    ///
    /// The case keeps its state but stops being claimed while the error
    /// stands; an operator resolves it through the gateway.
    pub async fn hold_case(&self, case_id: Uuid, message: &str) -> Result<()> {
        let result = KycCaseEntity::update_many()
            .col_expr(KycCaseColumn::ErrorMessage, Expr::value(Some(message)))
            .col_expr(KycCaseColumn::ClaimedAt, Expr::value(Option::<DateTime<Utc>>::None))
            .col_expr(KycCaseColumn::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(KycCaseColumn::Id.eq(case_id))
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::CaseNotFound {
                id: case_id.to_string(),
            });
        }
        Ok(())
    }

    /// Apply a state transition as one atomic guarded update.
    ///
    /// The update only lands when the case is still in `expected`; a zero
    /// row count means another writer got there first (or the transition
    /// is illegal), and the store is left untouched.
    pub async fn transition_case(
        &self,
        case_id: Uuid,
        expected: CaseState,
        next: CaseState,
        update: CaseUpdate,
        require_unclaimed: bool,
    ) -> Result<KycCase> {
        if !expected.can_transition_to(next) {
            return Err(AppError::InvalidTransition {
                from: expected.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        let now = chrono::Utc::now();

        let mut query = KycCaseEntity::update_many()
            .col_expr(KycCaseColumn::State, Expr::value(next.as_str()))
            .col_expr(KycCaseColumn::UpdatedAt, Expr::value(now))
            .filter(KycCaseColumn::Id.eq(case_id))
            .filter(KycCaseColumn::State.eq(expected.as_str()));

        if require_unclaimed {
            query = query.filter(KycCaseColumn::ClaimedAt.is_null());
        }

        if next.is_terminal() {
            query = query.col_expr(KycCaseColumn::CompletedAt, Expr::value(Some(now)));
        }

        if update.clear_claim {
            query = query.col_expr(
                KycCaseColumn::ClaimedAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            );
        }

        if update.clear_error {
            query = query.col_expr(
                KycCaseColumn::ErrorMessage,
                Expr::value(Option::<String>::None),
            );
        }

        if let Some(v) = update.entity_name {
            query = query.col_expr(KycCaseColumn::EntityName, Expr::value(Some(v)));
        }
        if let Some(v) = update.document_name {
            query = query.col_expr(KycCaseColumn::DocumentName, Expr::value(v));
        }
        if let Some(v) = update.document_ref {
            query = query.col_expr(KycCaseColumn::DocumentRef, Expr::value(v));
        }
        if let Some(v) = update.mapped_profile {
            query = query.col_expr(KycCaseColumn::MappedProfile, Expr::value(Some(v)));
        }
        if let Some(v) = update.unmapped_fields {
            query = query.col_expr(KycCaseColumn::UnmappedFields, Expr::value(Some(v)));
        }
        if let Some(v) = update.field_diffs {
            query = query.col_expr(KycCaseColumn::FieldDiffs, Expr::value(Some(v)));
        }
        if let Some(v) = update.screening_matches {
            query = query.col_expr(KycCaseColumn::ScreeningMatches, Expr::value(Some(v)));
        }
        if let Some(v) = update.research_status {
            query = query.col_expr(KycCaseColumn::ResearchStatus, Expr::value(Some(v)));
        }
        if let Some(v) = update.analyst_status {
            query = query.col_expr(KycCaseColumn::AnalystStatus, Expr::value(Some(v)));
        }
        if let Some(v) = update.screening_status {
            query = query.col_expr(KycCaseColumn::ScreeningStatus, Expr::value(Some(v)));
        }
        if let Some(v) = update.outreach_status {
            query = query.col_expr(KycCaseColumn::OutreachStatus, Expr::value(Some(v)));
        }
        if let Some(v) = update.refresh_status {
            query = query.col_expr(KycCaseColumn::RefreshStatus, Expr::value(Some(v)));
        }
        if let Some(v) = update.error_message {
            query = query.col_expr(KycCaseColumn::ErrorMessage, Expr::value(Some(v)));
        }
        if let Some(v) = update.attempt_count {
            query = query.col_expr(KycCaseColumn::AttemptCount, Expr::value(v));
        }

        let result = query.exec(self.write_conn()).await?;

        if result.rows_affected == 0 {
            // Distinguish a missing case from a guard failure for the caller
            let current = self.find_case_by_id(case_id).await?;
            return Err(match current {
                None => AppError::CaseNotFound {
                    id: case_id.to_string(),
                },
                Some(case) if require_unclaimed && case.claimed_at.is_some() => {
                    AppError::CaseInFlight {
                        id: case_id.to_string(),
                    }
                }
                Some(case) => AppError::InvalidTransition {
                    from: case.state,
                    to: next.as_str().to_string(),
                },
            });
        }

        self.find_case_by_id(case_id)
            .await?
            .ok_or_else(|| AppError::CaseNotFound {
                id: case_id.to_string(),
            })
    }

    /// List cases for the dashboard with filters and stateless pagination.
    ///
    /// `sla_window_days` is needed to translate SLA date filters back onto
    /// the creation timestamp, since the deadline is computed, never stored.
    pub async fn list_cases(
        &self,
        filter: &CaseFilter,
        page: u64,
        page_size: u64,
        sla_window_days: i64,
    ) -> Result<CasePage> {
        let mut select = KycCaseEntity::find();

        if let Some(ref name) = filter.client_name {
            select = select.filter(
                Expr::col(KycCaseColumn::EntityName).ilike(format!("%{}%", name)),
            );
        }
        if let Some(ref refresh) = filter.refresh_status {
            select = select.filter(KycCaseColumn::RefreshStatus.eq(refresh.to_lowercase()));
        }
        if let Some(ref state) = filter.state {
            select = select.filter(KycCaseColumn::State.eq(state.to_lowercase()));
        }
        if let Some(case_id) = filter.case_id {
            select = select.filter(KycCaseColumn::Id.eq(case_id));
        }
        if let Some(ref doc) = filter.document_name {
            select = select.filter(
                Expr::col(KycCaseColumn::DocumentName).ilike(format!("%{}%", doc)),
            );
        }
        if let Some(from) = filter.created_from {
            select = select.filter(KycCaseColumn::CreatedAt.gte(from));
        }
        if let Some(to) = filter.created_to {
            select = select.filter(KycCaseColumn::CreatedAt.lte(to));
        }
        // sla_deadline = created_at + window, so shift the bounds instead
        if let Some(from) = filter.sla_from {
            select = select.filter(KycCaseColumn::CreatedAt.gte(from - Duration::days(sla_window_days)));
        }
        if let Some(to) = filter.sla_to {
            select = select.filter(KycCaseColumn::CreatedAt.lte(to - Duration::days(sla_window_days)));
        }
        if let Some(from) = filter.completed_from {
            select = select.filter(KycCaseColumn::CompletedAt.gte(from));
        }
        if let Some(to) = filter.completed_to {
            select = select.filter(KycCaseColumn::CompletedAt.lte(to));
        }

        let paginator = select
            .order_by_desc(KycCaseColumn::CreatedAt)
            .paginate(self.read_conn(), page_size.max(1));

        let total = paginator.num_items().await?;
        let total_pages = total.div_ceil(page_size.max(1)).max(1);
        let page = page.clamp(1, total_pages);
        let cases = paginator.fetch_page(page - 1).await?;

        Ok(CasePage {
            cases,
            total,
            page,
            page_size,
            total_pages,
        })
    }

    /// Count cases not yet in a terminal state
    pub async fn count_pending_cases(&self) -> Result<u64> {
        KycCaseEntity::find()
            .filter(KycCaseColumn::State.is_not_in([
                CaseState::ClosedMatched.as_str(),
                CaseState::ClosedEscalated.as_str(),
                CaseState::ClosedExpired.as_str(),
                CaseState::Withdrawn.as_str(),
            ]))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Outreach Operations
    // ========================================================================

    /// Raise an outreach ticket for a case; idempotent per open
    /// `(case_id, reason)` pair via the partial unique index.
    pub async fn raise_outreach(
        &self,
        case_id: Uuid,
        reason: &str,
        details: serde_json::Value,
    ) -> Result<OutreachTicket> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO outreach_tickets (id, case_id, reason, details, status, created_at)
            VALUES ($1, $2, $3, $4, 'open', NOW())
            ON CONFLICT (case_id, reason) WHERE status = 'open' DO NOTHING
            "#,
            vec![
                Uuid::new_v4().into(),
                case_id.into(),
                reason.into(),
                details.into(),
            ],
        );

        self.write_conn().execute(stmt).await?;

        // The surviving ticket is the one to hand back, whether or not this
        // call inserted it
        OutreachTicketEntity::find()
            .filter(OutreachTicketColumn::CaseId.eq(case_id))
            .filter(OutreachTicketColumn::Reason.eq(reason))
            .filter(OutreachTicketColumn::Status.eq("open"))
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::TicketNotFound {
                case_id: case_id.to_string(),
            })
    }

    /// Find the open ticket for a case, if any
    pub async fn find_open_ticket(&self, case_id: Uuid) -> Result<Option<OutreachTicket>> {
        OutreachTicketEntity::find()
            .filter(OutreachTicketColumn::CaseId.eq(case_id))
            .filter(OutreachTicketColumn::Status.eq("open"))
            .order_by_asc(OutreachTicketColumn::CreatedAt)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Resolve all open tickets for a case, stamping the operator decision
    pub async fn resolve_outreach(&self, case_id: Uuid, disposition: &str) -> Result<u64> {
        let result = OutreachTicketEntity::update_many()
            .col_expr(OutreachTicketColumn::Status, Expr::value("resolved"))
            .col_expr(OutreachTicketColumn::Disposition, Expr::value(Some(disposition)))
            .col_expr(
                OutreachTicketColumn::ResolvedAt,
                Expr::value(Some(chrono::Utc::now())),
            )
            .filter(OutreachTicketColumn::CaseId.eq(case_id))
            .filter(OutreachTicketColumn::Status.eq("open"))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected)
    }

    // ========================================================================
    // Watchlist Operations
    // ========================================================================

    /// Load the active watchlist, ordered by id so tie-breaking downstream
    /// is deterministic
    pub async fn load_active_watchlist(&self) -> Result<Vec<WatchlistEntry>> {
        WatchlistEntryEntity::find()
            .filter(WatchlistEntryColumn::Active.eq(true))
            .order_by_asc(WatchlistEntryColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(|e| AppError::WatchlistUnavailable {
                message: e.to_string(),
            })
    }
}

/// Claims stamped before this instant belong to a dead worker and may be
/// taken over by `claim_next_case`
fn stale_claim_cutoff(now: DateTime<Utc>, lease_secs: u64) -> DateTime<Utc> {
    now - Duration::seconds(lease_secs.min(i64::MAX as u64) as i64)
}

/// Set one schema field on a profile active model from its mapped JSON value
fn set_profile_field(
    profile: &mut CustomerProfileActiveModel,
    field: &str,
    value: &serde_json::Value,
) -> Result<()> {
    let text = || -> Option<String> { value.as_str().map(|s| s.to_string()) };
    let date = || -> Result<Option<NaiveDate>> {
        match value.as_str() {
            None => Ok(None),
            Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Some)
                .map_err(|e| AppError::InvalidFormat {
                    message: format!("bad date for {}: {}", field, e),
                }),
        }
    };

    match field {
        "document_name" => profile.document_name = Set(text()),
        "document_type" => profile.document_type = Set(text()),
        "entity_legal_name" => profile.entity_legal_name = Set(text()),
        "date_of_incorporation" => profile.date_of_incorporation = Set(date()?),
        "dba_name" => profile.dba_name = Set(text()),
        "dba_address" => profile.dba_address = Set(text()),
        "phone_number" => profile.phone_number = Set(text()),
        "number_of_employees" => profile.number_of_employees = Set(text()),
        "number_of_branches" => profile.number_of_branches = Set(text()),
        "client_regulated" => profile.client_regulated = Set(value.as_bool()),
        "name_of_regulator" => profile.name_of_regulator = Set(text()),
        "id_number" => profile.id_number = Set(text()),
        "country_issuing_id" => profile.country_issuing_id = Set(text()),
        "id_type" => profile.id_type = Set(text()),
        "date_of_id_issuance" => profile.date_of_id_issuance = Set(date()?),
        "id_expiry_date" => profile.id_expiry_date = Set(date()?),
        "is_payment_intermediary" => profile.is_payment_intermediary = Set(value.as_bool()),
        "member_type" => profile.member_type = Set(text()),
        "member_association" => profile.member_association = Set(text()),
        "member_role" => profile.member_role = Set(text()),
        "member_legal_name" => profile.member_legal_name = Set(text()),
        "member_first_name" => profile.member_first_name = Set(text()),
        "member_middle_name" => profile.member_middle_name = Set(text()),
        "member_last_name" => profile.member_last_name = Set(text()),
        "ownership_percentage" => profile.ownership_percentage = Set(value.as_f64()),
        "identification_number" => profile.identification_number = Set(text()),
        "issuing_country" => profile.issuing_country = Set(text()),
        "identification_type" => profile.identification_type = Set(text()),
        "address_line_1" => profile.address_line_1 = Set(text()),
        "address_line_2" => profile.address_line_2 = Set(text()),
        "address_country" => profile.address_country = Set(text()),
        "date_of_birth" => profile.date_of_birth = Set(date()?),
        "country_of_citizenship" => profile.country_of_citizenship = Set(text()),
        "city_of_birth" => profile.city_of_birth = Set(text()),
        "country_of_birth" => profile.country_of_birth = Set(text()),
        other => {
            return Err(AppError::InvalidFormat {
                message: format!("unknown profile field: {}", other),
            })
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_claim_cutoff_recovers_abandoned_claims() {
        let now = Utc::now();
        let cutoff = stale_claim_cutoff(now, 600);

        // A claim stamped by a worker that died an hour ago is past the
        // cutoff and re-claimable
        let abandoned = now - Duration::seconds(3600);
        assert!(abandoned < cutoff);

        // A claim from a worker still inside its lease is left alone
        let in_flight = now - Duration::seconds(30);
        assert!(in_flight >= cutoff);
    }

    #[test]
    fn test_stale_claim_cutoff_is_exactly_the_lease() {
        let now = Utc::now();
        assert_eq!(now - stale_claim_cutoff(now, 600), Duration::seconds(600));
    }
}
