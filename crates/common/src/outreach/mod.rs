//! Outreach gateway contract
//!
//! The human-in-the-loop escalation channel. The pipeline only ever emits
//! a reason plus the evidence backing it; everything after that (operator
//! queues, notifications) lives behind this trait.

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Why a case was escalated to a human operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutreachReason {
    /// A material field changed between stored and incoming profile
    MaterialChange,
    /// Screening produced a HIT or REVIEW classification
    ScreeningMateriality,
}

impl OutreachReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutreachReason::MaterialChange => "material_change",
            OutreachReason::ScreeningMateriality => "screening_materiality",
        }
    }
}

/// Trait for raising outreach requests
///
/// Implementations must be idempotent per unresolved `(case_id, reason)`
/// pair: raising twice before resolution returns the same ticket id.
#[async_trait]
pub trait OutreachGateway: Send + Sync {
    /// Raise an outreach request, returning the ticket id
    async fn raise(
        &self,
        case_id: Uuid,
        reason: OutreachReason,
        details: serde_json::Value,
    ) -> Result<Uuid>;
}

/// Outreach gateway backed by the case store
pub struct StoreOutreachGateway {
    repository: crate::db::Repository,
}

impl StoreOutreachGateway {
    pub fn new(repository: crate::db::Repository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl OutreachGateway for StoreOutreachGateway {
    async fn raise(
        &self,
        case_id: Uuid,
        reason: OutreachReason,
        details: serde_json::Value,
    ) -> Result<Uuid> {
        let ticket = self
            .repository
            .raise_outreach(case_id, reason.as_str(), details)
            .await?;

        tracing::info!(
            case_id = %case_id,
            ticket_id = %ticket.id,
            reason = reason.as_str(),
            "Outreach raised"
        );

        Ok(ticket.id)
    }
}

/// In-memory gateway for tests; idempotent per open `(case_id, reason)`
pub struct MockOutreachGateway {
    tickets: std::sync::Mutex<Vec<(Uuid, OutreachReason, Uuid)>>,
}

impl MockOutreachGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tickets: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Tickets raised so far, in raise order
    pub fn raised(&self) -> Vec<(Uuid, OutreachReason, Uuid)> {
        self.tickets.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutreachGateway for MockOutreachGateway {
    async fn raise(
        &self,
        case_id: Uuid,
        reason: OutreachReason,
        _details: serde_json::Value,
    ) -> Result<Uuid> {
        let mut tickets = self.tickets.lock().unwrap();
        if let Some((_, _, id)) = tickets
            .iter()
            .find(|(cid, r, _)| *cid == case_id && *r == reason)
        {
            return Ok(*id);
        }
        let id = Uuid::new_v4();
        tickets.push((case_id, reason, id));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_gateway_is_idempotent() {
        let gateway = MockOutreachGateway::new();
        let case_id = Uuid::new_v4();

        let first = gateway
            .raise(case_id, OutreachReason::MaterialChange, serde_json::json!({}))
            .await
            .unwrap();
        let second = gateway
            .raise(case_id, OutreachReason::MaterialChange, serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(gateway.raised().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_gateway_distinct_reasons() {
        let gateway = MockOutreachGateway::new();
        let case_id = Uuid::new_v4();

        let first = gateway
            .raise(case_id, OutreachReason::MaterialChange, serde_json::json!({}))
            .await
            .unwrap();
        let second = gateway
            .raise(
                case_id,
                OutreachReason::ScreeningMateriality,
                serde_json::json!({}),
            )
            .await
            .unwrap();

        assert_ne!(first, second);
    }
}
