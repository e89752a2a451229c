//! PostgreSQL connection management and schema migrations.

pub mod config;
pub mod connection;
pub mod migration;
pub mod migrations;

pub use config::DatabaseConfig;
pub use connection::DatabaseConnection;
pub use migration::run_migrations;
pub use migrations::Migrator;
pub use sea_orm;
