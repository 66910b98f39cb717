//! KycFlow Common Library
//!
//! Shared code for the KycFlow services including:
//! - Case store entities and repository
//! - Error types and handling
//! - Configuration management
//! - Outreach gateway contract
//! - Metrics and observability

pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod outreach;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::Repository;
pub use errors::{AppError, Result};
pub use outreach::{OutreachGateway, OutreachReason};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default SLA review window for a case, in days
pub const DEFAULT_SLA_WINDOW_DAYS: i64 = 90;

/// Default dashboard page size
pub const DEFAULT_PAGE_SIZE: u64 = 25;
