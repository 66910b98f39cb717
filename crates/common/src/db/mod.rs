//! Case store access for KycFlow services
//!
//! One Postgres schema holds the customer profiles, KYC cases, outreach
//! tickets and the watchlist. Writes always go to the primary; dashboard
//! and pipeline reads go to the replica when one is configured.

pub mod models;
mod repository;

pub use repository::{CaseFilter, CasePage, CaseUpdate, Repository};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Primary plus optional read-replica connections to the case store
#[derive(Clone)]
pub struct DbPool {
    /// Write connection; claims and transitions must land here
    pub primary: DatabaseConnection,

    /// Replica for dashboard and lookup reads
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Connect to the case store, and to the replica when one is configured
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to case store...");
        let primary = connect(&config.url, config, "primary").await?;

        let replica = match config.read_url {
            Some(ref read_url) => {
                info!("Connecting to case store read replica...");
                Some(connect(read_url, config, "replica").await?)
            }
            None => None,
        };

        info!(replica = replica.is_some(), "Case store connected");
        Ok(Self { primary, replica })
    }

    /// Connection for reads; falls back to the primary without a replica
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Connection for writes, always the primary
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Round-trip both connections, for the readiness probe
    pub async fn ping(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;

        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("primary ping failed: {}", e),
            })?;

        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("replica ping failed: {}", e),
                })?;
        }

        Ok(())
    }
}

async fn connect(
    url: &str,
    config: &DatabaseConfig,
    label: &str,
) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(url);
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(true);

    Database::connect(options)
        .await
        .map_err(|e| AppError::DatabaseConnection {
            message: format!("failed to connect to {}: {}", label, e),
        })
}
