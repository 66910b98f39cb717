//! KYC case entity and the case status state machine

use chrono::{DateTime, Duration, FixedOffset, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Case kind enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseKind {
    Onboarding,
    Refresh,
}

impl From<String> for CaseKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "onboarding" => CaseKind::Onboarding,
            _ => CaseKind::Refresh,
        }
    }
}

impl From<CaseKind> for String {
    fn from(kind: CaseKind) -> Self {
        match kind {
            CaseKind::Onboarding => "onboarding".to_string(),
            CaseKind::Refresh => "refresh".to_string(),
        }
    }
}

/// Composite case status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Created,
    Extracted,
    Reconciled,
    Screened,
    AutoUpdated,
    PendingOutreachMismatch,
    PendingOutreachScreening,
    NeedsRecapture,
    ClosedMatched,
    ClosedEscalated,
    ClosedExpired,
    Withdrawn,
}

impl From<String> for CaseState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "created" => CaseState::Created,
            "extracted" => CaseState::Extracted,
            "reconciled" => CaseState::Reconciled,
            "screened" => CaseState::Screened,
            "auto_updated" => CaseState::AutoUpdated,
            "pending_outreach_mismatch" => CaseState::PendingOutreachMismatch,
            "pending_outreach_screening" => CaseState::PendingOutreachScreening,
            "needs_recapture" => CaseState::NeedsRecapture,
            "closed_matched" => CaseState::ClosedMatched,
            "closed_escalated" => CaseState::ClosedEscalated,
            "closed_expired" => CaseState::ClosedExpired,
            "withdrawn" => CaseState::Withdrawn,
            _ => CaseState::Created,
        }
    }
}

impl From<CaseState> for String {
    fn from(state: CaseState) -> Self {
        state.as_str().to_string()
    }
}

impl CaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseState::Created => "created",
            CaseState::Extracted => "extracted",
            CaseState::Reconciled => "reconciled",
            CaseState::Screened => "screened",
            CaseState::AutoUpdated => "auto_updated",
            CaseState::PendingOutreachMismatch => "pending_outreach_mismatch",
            CaseState::PendingOutreachScreening => "pending_outreach_screening",
            CaseState::NeedsRecapture => "needs_recapture",
            CaseState::ClosedMatched => "closed_matched",
            CaseState::ClosedEscalated => "closed_escalated",
            CaseState::ClosedExpired => "closed_expired",
            CaseState::Withdrawn => "withdrawn",
        }
    }

    /// Terminal states admit no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaseState::ClosedMatched
                | CaseState::ClosedEscalated
                | CaseState::ClosedExpired
                | CaseState::Withdrawn
        )
    }

    /// States a pipeline worker may claim and advance
    pub fn is_claimable(&self) -> bool {
        matches!(
            self,
            CaseState::Created
                | CaseState::Extracted
                | CaseState::Reconciled
                | CaseState::Screened
                | CaseState::AutoUpdated
        )
    }

    /// States waiting on an operator disposition through the outreach channel
    pub fn is_pending_outreach(&self) -> bool {
        matches!(
            self,
            CaseState::PendingOutreachMismatch | CaseState::PendingOutreachScreening
        )
    }

    /// Legal transitions of the case state machine
    pub fn can_transition_to(&self, next: CaseState) -> bool {
        use CaseState::*;

        // Withdrawal is honored from any non-terminal state; the in-flight
        // check happens against the claim marker, not here.
        if next == Withdrawn {
            return !self.is_terminal();
        }

        matches!(
            (*self, next),
            (Created, Extracted)
                | (Created, NeedsRecapture)
                | (Extracted, Reconciled)
                | (Extracted, NeedsRecapture)
                | (Reconciled, Screened)
                | (Screened, AutoUpdated)
                | (Screened, PendingOutreachMismatch)
                | (Screened, PendingOutreachScreening)
                | (AutoUpdated, ClosedMatched)
                | (PendingOutreachMismatch, ClosedEscalated)
                | (PendingOutreachMismatch, ClosedExpired)
                | (PendingOutreachScreening, ClosedEscalated)
                | (PendingOutreachScreening, ClosedExpired)
                | (NeedsRecapture, Created)
                | (NeedsRecapture, ClosedExpired)
        )
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "kyc_cases")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Business key of the customer this case belongs to
    #[sea_orm(column_type = "Text")]
    pub client_identifier: String,

    #[sea_orm(column_type = "Text")]
    pub kind: String,

    /// Denormalized legal name for dashboard filtering; stamped from the
    /// stored profile at creation and refreshed after mapping
    #[sea_orm(column_type = "Text", nullable)]
    pub entity_name: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub document_name: String,

    /// Where the worker fetches the source document bytes from
    #[sea_orm(column_type = "Text")]
    pub document_ref: String,

    #[sea_orm(column_type = "Text")]
    pub state: String,

    /// Mapped profile snapshot, immutable once stamped
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub mapped_profile: Option<serde_json::Value>,

    /// Extracted keys that matched no schema field, kept for audit
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub unmapped_fields: Option<serde_json::Value>,

    /// Field diffs produced by reconciliation
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub field_diffs: Option<serde_json::Value>,

    /// Watchlist matches produced by screening
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub screening_matches: Option<serde_json::Value>,

    #[sea_orm(column_type = "Text", nullable)]
    pub research_status: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub analyst_status: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub screening_status: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub outreach_status: Option<String>,

    /// "yes" when any field changed and was absorbed, "no" otherwise
    #[sea_orm(column_type = "Text", nullable)]
    pub refresh_status: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub attempt_count: i32,

    /// Stamped while a worker holds the case; cleared on release
    pub claimed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    pub completed_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Get the case state as an enum
    pub fn case_state(&self) -> CaseState {
        CaseState::from(self.state.clone())
    }

    /// Get the case kind as an enum
    pub fn case_kind(&self) -> CaseKind {
        CaseKind::from(self.kind.clone())
    }

    /// Check if the case is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.case_state().is_terminal()
    }

    /// A case parked mid-pipeline on an integrity fault: still in a
    /// claimable state but carrying a recorded error, so the claim query
    /// skips it until an operator intervenes
    pub fn is_held(&self) -> bool {
        self.case_state().is_claimable() && self.error_message.is_some()
    }

    /// SLA deadline, always recomputed from the creation timestamp
    pub fn sla_deadline(&self, window_days: i64) -> DateTime<FixedOffset> {
        self.created_at + Duration::days(window_days)
    }

    /// SLA flag: non-terminal case whose deadline has passed.
    /// Computed on every read, never persisted, so re-evaluation is free
    /// and idempotent.
    pub fn sla_breached(&self, window_days: i64, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && now.fixed_offset() > self.sla_deadline(window_days)
    }

    /// Display text the dashboard shows for the case status column
    pub fn display_status(&self) -> String {
        match self.case_state() {
            CaseState::ClosedMatched => match self.refresh_status.as_deref() {
                Some("yes") => "KYC status Refreshed".to_string(),
                _ => "Profile updates absorbed".to_string(),
            },
            state => state.as_str().to_string(),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::outreach_ticket::Entity")]
    OutreachTickets,
}

impl Related<super::outreach_ticket::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OutreachTickets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(CaseState::ClosedMatched.is_terminal());
        assert!(CaseState::ClosedEscalated.is_terminal());
        assert!(CaseState::ClosedExpired.is_terminal());
        assert!(CaseState::Withdrawn.is_terminal());
        assert!(!CaseState::NeedsRecapture.is_terminal());
        assert!(!CaseState::PendingOutreachMismatch.is_terminal());
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(CaseState::Created.can_transition_to(CaseState::Extracted));
        assert!(CaseState::Extracted.can_transition_to(CaseState::Reconciled));
        assert!(CaseState::Reconciled.can_transition_to(CaseState::Screened));
        assert!(CaseState::Screened.can_transition_to(CaseState::AutoUpdated));
        assert!(CaseState::AutoUpdated.can_transition_to(CaseState::ClosedMatched));
    }

    #[test]
    fn test_escalation_transitions() {
        assert!(CaseState::Screened.can_transition_to(CaseState::PendingOutreachMismatch));
        assert!(CaseState::Screened.can_transition_to(CaseState::PendingOutreachScreening));
        // Pending states close only via disposition, never back into the pipeline
        assert!(CaseState::PendingOutreachMismatch.can_transition_to(CaseState::ClosedEscalated));
        assert!(!CaseState::PendingOutreachMismatch.can_transition_to(CaseState::Screened));
        assert!(!CaseState::PendingOutreachMismatch.can_transition_to(CaseState::ClosedMatched));
    }

    #[test]
    fn test_recapture_transitions() {
        assert!(CaseState::Created.can_transition_to(CaseState::NeedsRecapture));
        assert!(CaseState::Extracted.can_transition_to(CaseState::NeedsRecapture));
        assert!(CaseState::NeedsRecapture.can_transition_to(CaseState::Created));
        assert!(!CaseState::Reconciled.can_transition_to(CaseState::NeedsRecapture));
    }

    #[test]
    fn test_withdrawal_from_non_terminal_only() {
        assert!(CaseState::Created.can_transition_to(CaseState::Withdrawn));
        assert!(CaseState::NeedsRecapture.can_transition_to(CaseState::Withdrawn));
        assert!(!CaseState::ClosedMatched.can_transition_to(CaseState::Withdrawn));
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        for next in [
            CaseState::Created,
            CaseState::Extracted,
            CaseState::Screened,
            CaseState::ClosedEscalated,
        ] {
            assert!(!CaseState::ClosedMatched.can_transition_to(next));
        }
    }

    fn case(state: CaseState) -> Model {
        let now = Utc::now().fixed_offset();
        Model {
            id: Uuid::new_v4(),
            client_identifier: "C-1001".to_string(),
            kind: "refresh".to_string(),
            entity_name: None,
            document_name: "form.pdf".to_string(),
            document_ref: "/data/form.pdf".to_string(),
            state: String::from(state),
            mapped_profile: None,
            unmapped_fields: None,
            field_diffs: None,
            screening_matches: None,
            research_status: None,
            analyst_status: None,
            screening_status: None,
            outreach_status: None,
            refresh_status: None,
            error_message: None,
            attempt_count: 0,
            claimed_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn test_held_case_requires_error_in_claimable_state() {
        let mut held = case(CaseState::Extracted);
        held.error_message = Some("no stored profile for refresh client C-1001".to_string());
        assert!(held.is_held());

        // No error recorded means the pipeline is still driving the case
        assert!(!case(CaseState::Extracted).is_held());

        // Recapture carries an error but is parked by state, not held
        let mut recapture = case(CaseState::NeedsRecapture);
        recapture.error_message = Some("extraction failed".to_string());
        assert!(!recapture.is_held());
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in [
            CaseState::Created,
            CaseState::PendingOutreachScreening,
            CaseState::NeedsRecapture,
            CaseState::ClosedExpired,
        ] {
            assert_eq!(CaseState::from(String::from(state)), state);
        }
    }
}
