use super::config::DatabaseConfig;
use crate::error::{LimitsError, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection as SeaOrmConnection};
use std::time::Duration;

/// Pooled PostgreSQL connection built from [`DatabaseConfig`].
#[derive(Clone)]
pub struct DatabaseConnection(SeaOrmConnection);

impl DatabaseConnection {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut options = ConnectOptions::new(&config.url);
        options
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .idle_timeout(Duration::from_secs(config.idle_timeout))
            .sqlx_logging(false);

        let conn = Database::connect(options).await.map_err(|e| {
            LimitsError::database(format!("Failed to connect to {}: {}", config.redacted_url(), e))
        })?;

        tracing::info!(
            url = %config.redacted_url(),
            max_connections = config.max_connections,
            "Limits database connected"
        );
        Ok(Self(conn))
    }

    /// Connection for migrations and ad hoc statements.
    pub fn inner(&self) -> &SeaOrmConnection {
        &self.0
    }

    /// Hand the pool to a store.
    pub fn into_inner(self) -> SeaOrmConnection {
        self.0
    }
}
