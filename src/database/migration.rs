use crate::error::{LimitsError, Result};
use sea_orm_migration::MigratorTrait;

/// Run pending migrations
///
/// ```rust,ignore
/// use limits_engine::database::{run_migrations, Migrator};
///
/// run_migrations::<Migrator>(&db).await?;
/// ```
pub async fn run_migrations<M: MigratorTrait>(db: &sea_orm::DatabaseConnection) -> Result<()> {
    M::up(db, None)
        .await
        .map_err(|e| LimitsError::database(format!("Migration failed: {}", e)))?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
