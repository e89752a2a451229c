//! SeaORM-backed limits storage for PostgreSQL.
//!
//! Expects the schema created by [`Migrator`](crate::database::Migrator).
//! Simple reads and writes go through SeaORM entities; the counter
//! arithmetic and the cleanup purges are single SQL statements so they run
//! atomically inside whatever transaction issues them.
//!
//! Row timestamps come from the store's [`Clock`], not from the database,
//! so the cleanup horizons and the stored rows share one time source.
//!
//! ```rust,ignore
//! use limits_engine::storage::SeaOrmLimitsStore;
//!
//! let store = SeaOrmLimitsStore::with_clock(db.clone(), clock.clone());
//! let service = LimitsService::with_clock(store, &config, clock);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, SqlErr, TransactionTrait};
use std::sync::Arc;

use super::{CleanupStore, IsolationLevel, LimitsRepository, LimitsStore, LimitsTransaction};
use crate::domain::{
    Attributes, Context, Counter, ExceededCounter, Limit, LimitsFilter, NewCounter, NewLimit,
    NewOperation, Operation,
};
use crate::clock::{Clock, SystemClock};
use crate::error::{LimitsError, Result};

// =============================================================================
// SeaORM Entities
// =============================================================================

mod entity {
    pub mod limit {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
        #[sea_orm(table_name = "limits")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            pub hash: String,
            pub limit_type: String,
            pub currency: String,
            pub value: Decimal,
            pub meta: Json,
            pub period: Option<String>,
            pub timezone: Option<String>,
            pub created_at: DateTimeUtc,
            pub updated_at: DateTimeUtc,
            pub deleted_at: Option<DateTimeUtc>,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod context {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
        #[sea_orm(table_name = "context")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            pub meta: Json,
            pub created_at: DateTimeUtc,
            pub updated_at: DateTimeUtc,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod operation {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
        #[sea_orm(table_name = "operations")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            pub context_id: i64,
            pub currency: String,
            pub value: Decimal,
            pub status: String,
            pub created_at: DateTimeUtc,
            pub updated_at: DateTimeUtc,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    pub mod counter {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
        #[sea_orm(table_name = "counters")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i64,
            #[sea_orm(unique)]
            pub hash: String,
            pub limit_id: i64,
            pub value: Decimal,
            pub start_time: DateTimeUtc,
            pub end_time: DateTimeUtc,
            pub created_at: DateTimeUtc,
            pub updated_at: DateTimeUtc,
            pub deleted_at: Option<DateTimeUtc>,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    /// Row shape of the increment and rollback statements.
    #[derive(Debug, sea_orm::FromQueryResult)]
    pub struct ExceededRow {
        pub counter_id: i64,
        pub limit_id: i64,
        pub limit_type: String,
        pub period: Option<String>,
        pub entities: sea_orm::prelude::Json,
        pub limit_value: sea_orm::prelude::Decimal,
        pub new_value: sea_orm::prelude::Decimal,
    }
}

use entity::{ExceededRow, context, counter, limit, operation};

// =============================================================================
// Helper Functions
// =============================================================================

fn model_to_limit(model: limit::Model) -> Result<Limit> {
    Ok(Limit {
        id: model.id,
        hash: model.hash,
        limit_type: model.limit_type.parse()?,
        currency: model.currency,
        value: model.value,
        entities: Attributes::from_json(&model.meta)?,
        period: model.period.as_deref().map(str::parse).transpose()?,
        timezone: model.timezone,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn model_to_context(model: context::Model) -> Result<Context> {
    Ok(Context {
        id: model.id,
        meta: Attributes::from_json(&model.meta)?,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn model_to_operation(model: operation::Model) -> Result<Operation> {
    Ok(Operation {
        id: model.id,
        context_id: model.context_id,
        currency: model.currency,
        value: model.value,
        status: model.status.parse()?,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn model_to_counter(model: counter::Model) -> Counter {
    Counter {
        id: model.id,
        hash: model.hash,
        limit_id: model.limit_id,
        value: model.value,
        start_time: model.start_time,
        end_time: model.end_time,
    }
}

fn row_to_exceeded(row: ExceededRow) -> Result<ExceededCounter> {
    Ok(ExceededCounter {
        counter_id: row.counter_id,
        limit_id: row.limit_id,
        limit_type: row.limit_type.parse()?,
        period: row.period.as_deref().map(str::parse).transpose()?,
        entities: Attributes::from_json(&row.entities)?,
        limit_value: row.limit_value,
        new_value: row.new_value,
    })
}

fn duplicate_limit(err: DbErr, hash: &str) -> LimitsError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            LimitsError::invalid_request(format!("limit with hash \"{}\" already exists", hash))
        }
        _ => err.into(),
    }
}

fn batch_limit(batch_size: u64) -> i64 {
    i64::try_from(batch_size).unwrap_or(i64::MAX)
}

// =============================================================================
// Queries
// =============================================================================

/// Statements shared by the store and its transactions.
mod queries {
    use chrono::{DateTime, Utc};
    use sea_orm::sea_query::{Expr, OnConflict};
    use sea_orm::{
        ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, FromQueryResult,
        NotSet, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement,
    };

    use super::*;
    use crate::domain::OperationStatus;

    const INCREMENT_COUNTERS: &str = r#"
WITH candidates AS (
    SELECT c.id AS counter_id,
           l.id AS limit_id,
           l.limit_type,
           l.period,
           l.meta AS entities,
           l.value AS limit_value,
           c.value + CASE WHEN l.limit_type = 'total_count' THEN 1 ELSE o.value END AS new_value
    FROM counters c
    JOIN limits l ON l.id = c.limit_id
    CROSS JOIN operations o
    WHERE o.id = $1
      AND c.id = ANY($2)
      AND c.deleted_at IS NULL
),
updated AS (
    UPDATE counters c
    SET value = candidates.new_value, updated_at = $3
    FROM candidates
    WHERE c.id = candidates.counter_id
      AND candidates.new_value <= candidates.limit_value
    RETURNING c.id
),
promoted AS (
    UPDATE operations SET status = 'pending', updated_at = $3
    WHERE id = $1
    RETURNING id
)
SELECT counter_id, limit_id, limit_type, period, entities, limit_value, new_value
FROM candidates
WHERE new_value > limit_value
ORDER BY counter_id
"#;

    const ROLLBACK_OPERATIONS: &str = r#"
WITH decrements AS (
    SELECT otc.counter_id,
           SUM(CASE WHEN l.limit_type = 'total_count' THEN 1 ELSE o.value END) AS amount
    FROM operation_to_counter otc
    JOIN operations o ON o.id = otc.operation_id
    JOIN counters c ON c.id = otc.counter_id AND c.deleted_at IS NULL
    JOIN limits l ON l.id = c.limit_id
    WHERE otc.operation_id = ANY($1)
    GROUP BY otc.counter_id
),
candidates AS (
    SELECT c.id AS counter_id,
           l.id AS limit_id,
           l.limit_type,
           l.period,
           l.meta AS entities,
           l.value AS limit_value,
           c.value - d.amount AS new_value
    FROM decrements d
    JOIN counters c ON c.id = d.counter_id
    JOIN limits l ON l.id = c.limit_id
),
updated AS (
    UPDATE counters c
    SET value = candidates.new_value, updated_at = $2
    FROM candidates
    WHERE c.id = candidates.counter_id
      AND candidates.new_value >= 0
    RETURNING c.id
),
rolled_back AS (
    UPDATE operations SET status = 'rollback', updated_at = $2
    WHERE id = ANY($1)
    RETURNING id
)
SELECT counter_id, limit_id, limit_type, period, entities, limit_value, new_value
FROM candidates
WHERE new_value < 0
ORDER BY counter_id
"#;

    const LINK_COUNTERS: &str = r#"
INSERT INTO operation_to_counter (operation_id, counter_id)
SELECT $1, unnest($2::bigint[])
ON CONFLICT DO NOTHING
"#;

    const CLEANUP_COUNTERS: &str = r#"
DELETE FROM counters
WHERE id IN (
    SELECT id FROM counters
    WHERE deleted_at IS NOT NULL OR end_time < $1
    LIMIT $2
)
"#;

    const CLEANUP_CONTEXTS: &str = r#"
DELETE FROM context
WHERE id IN (
    SELECT ctx.id FROM context ctx
    WHERE ctx.updated_at < $1
      AND NOT EXISTS (
          SELECT 1
          FROM operations o
          JOIN operation_to_counter otc ON otc.operation_id = o.id
          WHERE o.context_id = ctx.id
      )
    LIMIT $2
)
"#;

    fn statement<I>(sql: &str, values: I) -> Statement
    where
        I: IntoIterator<Item = sea_orm::Value>,
    {
        Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
    }

    // -------------------------------------------------------------------------
    // Limits
    // -------------------------------------------------------------------------

    pub async fn create_limit<C: ConnectionTrait>(
        conn: &C,
        new_limit: &NewLimit,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Limit> {
        let model = limit::ActiveModel {
            id: NotSet,
            hash: Set(hash.to_string()),
            limit_type: Set(new_limit.limit_type.as_str().to_string()),
            currency: Set(new_limit.currency.clone()),
            value: Set(new_limit.value),
            meta: Set(new_limit.entities.to_json()),
            period: Set(new_limit.period.map(|period| period.as_str().to_string())),
            timezone: Set(new_limit.timezone.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
        };

        let created = limit::Entity::insert(model)
            .exec_with_returning(conn)
            .await
            .map_err(|e| duplicate_limit(e, hash))?;
        model_to_limit(created)
    }

    pub async fn get_limit_by_id<C: ConnectionTrait>(conn: &C, id: i64) -> Result<Limit> {
        let model = limit::Entity::find_by_id(id)
            .filter(limit::Column::DeletedAt.is_null())
            .one(conn)
            .await?
            .ok_or_else(|| LimitsError::not_found(format!("limit {} not found", id)))?;
        model_to_limit(model)
    }

    pub async fn update_limit_value<C: ConnectionTrait>(
        conn: &C,
        stored: &Limit,
        now: DateTime<Utc>,
    ) -> Result<Limit> {
        let updated = limit::Entity::update_many()
            .col_expr(limit::Column::Value, Expr::value(stored.value))
            .col_expr(limit::Column::UpdatedAt, Expr::value(now))
            .filter(limit::Column::Id.eq(stored.id))
            .filter(limit::Column::DeletedAt.is_null())
            .exec_with_returning(conn)
            .await?;

        let model = updated
            .into_iter()
            .next()
            .ok_or_else(|| LimitsError::not_found(format!("limit {} not found", stored.id)))?;
        model_to_limit(model)
    }

    pub async fn delete_limits<C: ConnectionTrait>(
        conn: &C,
        ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let deleted = limit::Entity::update_many()
            .col_expr(limit::Column::DeletedAt, Expr::value(now))
            .filter(limit::Column::Id.is_in(ids.to_vec()))
            .filter(limit::Column::DeletedAt.is_null())
            .exec_with_returning(conn)
            .await?;
        Ok(deleted.into_iter().map(|model| model.id).collect())
    }

    pub async fn delete_counters<C: ConnectionTrait>(
        conn: &C,
        limit_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<()> {
        if limit_ids.is_empty() {
            return Ok(());
        }

        let result = counter::Entity::update_many()
            .col_expr(counter::Column::DeletedAt, Expr::value(now))
            .filter(counter::Column::LimitId.is_in(limit_ids.to_vec()))
            .filter(counter::Column::DeletedAt.is_null())
            .exec(conn)
            .await?;
        tracing::debug!(deleted = result.rows_affected, "Counters soft-deleted");
        Ok(())
    }

    pub async fn get_limits<C: ConnectionTrait>(
        conn: &C,
        filter: &LimitsFilter,
    ) -> Result<(Vec<Limit>, u64)> {
        let mut select = limit::Entity::find().filter(limit::Column::DeletedAt.is_null());

        if !filter.limit_types.is_empty() {
            select = select.filter(
                limit::Column::LimitType
                    .is_in(filter.limit_types.iter().map(|limit_type| limit_type.as_str())),
            );
        }
        if let Some(currency) = &filter.currency {
            select = select.filter(limit::Column::Currency.eq(currency.as_str()));
        }
        if !filter.entities.is_empty() {
            select = select.filter(Expr::cust_with_values(
                "meta @> ?::jsonb",
                [filter.entities.to_json()],
            ));
        }
        if let Some(period) = filter.period {
            select = select.filter(limit::Column::Period.eq(period.as_str()));
        }
        if let Some(timezone) = &filter.timezone {
            select = select.filter(limit::Column::Timezone.eq(timezone.as_str()));
        }

        let total = select.clone().count(conn).await?;
        let models = select
            .order_by_asc(limit::Column::Id)
            .offset(filter.offset)
            .limit(filter.limit)
            .all(conn)
            .await?;

        let limits = models
            .into_iter()
            .map(model_to_limit)
            .collect::<Result<Vec<_>>>()?;
        Ok((limits, total))
    }

    pub async fn match_limits<C: ConnectionTrait>(
        conn: &C,
        currency: &str,
        attributes: &Attributes,
    ) -> Result<Vec<Limit>> {
        let models = limit::Entity::find()
            .filter(limit::Column::DeletedAt.is_null())
            .filter(limit::Column::Currency.eq(currency))
            .filter(Expr::cust_with_values(
                "meta <@ ?::jsonb",
                [attributes.to_json()],
            ))
            .order_by_asc(limit::Column::Id)
            .all(conn)
            .await?;

        models.into_iter().map(model_to_limit).collect()
    }

    // -------------------------------------------------------------------------
    // Contexts and operations
    // -------------------------------------------------------------------------

    pub async fn create_context<C: ConnectionTrait>(
        conn: &C,
        meta: &Attributes,
        now: DateTime<Utc>,
    ) -> Result<Context> {
        let model = context::ActiveModel {
            id: NotSet,
            meta: Set(meta.to_json()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let created = context::Entity::insert(model).exec_with_returning(conn).await?;
        model_to_context(created)
    }

    pub async fn get_context_by_id<C: ConnectionTrait>(conn: &C, id: i64) -> Result<Context> {
        let model = context::Entity::find_by_id(id)
            .one(conn)
            .await?
            .ok_or_else(|| LimitsError::not_found(format!("context {} not found", id)))?;
        model_to_context(model)
    }

    async fn update_context_meta<C: ConnectionTrait>(
        conn: &C,
        updated: &Context,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let model = context::ActiveModel {
            id: Set(updated.id),
            meta: Set(updated.meta.to_json()),
            updated_at: Set(now),
            ..Default::default()
        };
        model.update(conn).await?;
        Ok(())
    }

    pub async fn create_operation<C: ConnectionTrait>(
        conn: &C,
        new_operation: &NewOperation,
        now: DateTime<Utc>,
    ) -> Result<Operation> {
        let model = operation::ActiveModel {
            id: NotSet,
            context_id: Set(new_operation.context_id),
            currency: Set(new_operation.currency.clone()),
            value: Set(new_operation.value),
            status: Set(OperationStatus::New.as_str().to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let created = operation::Entity::insert(model).exec_with_returning(conn).await?;
        model_to_operation(created)
    }

    pub async fn get_operations_by_context_id<C: ConnectionTrait>(
        conn: &C,
        context_id: i64,
    ) -> Result<Vec<Operation>> {
        let models = operation::Entity::find()
            .filter(operation::Column::ContextId.eq(context_id))
            .order_by_asc(operation::Column::Id)
            .all(conn)
            .await?;
        models.into_iter().map(model_to_operation).collect()
    }

    pub async fn commit_operations<C: ConnectionTrait>(
        conn: &C,
        operation_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<()> {
        if operation_ids.is_empty() {
            return Ok(());
        }

        operation::Entity::update_many()
            .col_expr(
                operation::Column::Status,
                Expr::value(OperationStatus::Committed.as_str()),
            )
            .col_expr(operation::Column::UpdatedAt, Expr::value(now))
            .filter(operation::Column::Id.is_in(operation_ids.to_vec()))
            .exec(conn)
            .await?;
        Ok(())
    }

    pub async fn rollback_operations<C: ConnectionTrait>(
        conn: &C,
        operation_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<ExceededCounter>> {
        if operation_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = ExceededRow::find_by_statement(statement(
            ROLLBACK_OPERATIONS,
            [operation_ids.to_vec().into(), now.into()],
        ))
        .all(conn)
        .await?;
        rows.into_iter().map(row_to_exceeded).collect()
    }

    // -------------------------------------------------------------------------
    // Counters
    // -------------------------------------------------------------------------

    pub async fn create_counters_if_not_exists<C: ConnectionTrait>(
        conn: &C,
        counters: &[NewCounter],
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        if counters.is_empty() {
            return Ok(Vec::new());
        }

        let models = counters.iter().map(|new_counter| counter::ActiveModel {
            id: NotSet,
            hash: Set(new_counter.hash.clone()),
            limit_id: Set(new_counter.limit_id),
            start_time: Set(new_counter.start_time),
            end_time: Set(new_counter.end_time),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        });
        counter::Entity::insert_many(models)
            .on_conflict(OnConflict::column(counter::Column::Hash).do_nothing().to_owned())
            .do_nothing()
            .exec(conn)
            .await?;

        let hashes: Vec<String> = counters.iter().map(|c| c.hash.clone()).collect();
        let ids = counter::Entity::find()
            .select_only()
            .column(counter::Column::Id)
            .filter(counter::Column::Hash.is_in(hashes))
            .filter(counter::Column::DeletedAt.is_null())
            .order_by_asc(counter::Column::Id)
            .into_tuple::<i64>()
            .all(conn)
            .await?;
        Ok(ids)
    }

    pub async fn link_counters_to_operation<C: ConnectionTrait>(
        conn: &C,
        counter_ids: &[i64],
        operation_id: i64,
    ) -> Result<()> {
        if counter_ids.is_empty() {
            return Ok(());
        }

        conn.execute(statement(
            LINK_COUNTERS,
            [operation_id.into(), counter_ids.to_vec().into()],
        ))
        .await?;
        Ok(())
    }

    pub async fn get_counters_by_limit_id<C: ConnectionTrait>(
        conn: &C,
        limit_id: i64,
    ) -> Result<Vec<Counter>> {
        let models = counter::Entity::find()
            .filter(counter::Column::LimitId.eq(limit_id))
            .filter(counter::Column::DeletedAt.is_null())
            .order_by_asc(counter::Column::StartTime)
            .all(conn)
            .await?;
        Ok(models.into_iter().map(model_to_counter).collect())
    }

    pub async fn increment_counters<C: ConnectionTrait>(
        conn: &C,
        operation_id: i64,
        counter_ids: &[i64],
        updated: Option<&Context>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExceededCounter>> {
        operation::Entity::find_by_id(operation_id)
            .one(conn)
            .await?
            .ok_or_else(|| LimitsError::not_found(format!("operation {} not found", operation_id)))?;

        let rows = ExceededRow::find_by_statement(statement(
            INCREMENT_COUNTERS,
            [operation_id.into(), counter_ids.to_vec().into(), now.into()],
        ))
        .all(conn)
        .await?;

        if let Some(updated) = updated {
            update_context_meta(conn, updated, now).await?;
        }

        rows.into_iter().map(row_to_exceeded).collect()
    }

    // -------------------------------------------------------------------------
    // Cleanup
    // -------------------------------------------------------------------------

    pub async fn cleanup_limits<C: ConnectionTrait>(conn: &C) -> Result<u64> {
        let result = limit::Entity::delete_many()
            .filter(limit::Column::DeletedAt.is_not_null())
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Repeat a `DELETE ... LIMIT` statement until a batch comes back short.
    pub async fn delete_in_batches<C: ConnectionTrait>(
        conn: &C,
        sql: &str,
        outdated_before: DateTime<Utc>,
        batch_size: u64,
    ) -> Result<u64> {
        let mut total = 0;
        loop {
            let result = conn
                .execute(statement(
                    sql,
                    [outdated_before.into(), batch_limit(batch_size).into()],
                ))
                .await?;
            total += result.rows_affected();
            if result.rows_affected() == 0 || result.rows_affected() < batch_size {
                return Ok(total);
            }
        }
    }

    pub async fn cleanup_counters<C: ConnectionTrait>(
        conn: &C,
        outdated_before: DateTime<Utc>,
        batch_size: u64,
    ) -> Result<u64> {
        delete_in_batches(conn, CLEANUP_COUNTERS, outdated_before, batch_size).await
    }

    pub async fn cleanup_contexts<C: ConnectionTrait>(
        conn: &C,
        outdated_before: DateTime<Utc>,
        batch_size: u64,
    ) -> Result<u64> {
        delete_in_batches(conn, CLEANUP_CONTEXTS, outdated_before, batch_size).await
    }
}

// =============================================================================
// SeaOrmLimitsStore
// =============================================================================

/// PostgreSQL limits store. Cloning shares the underlying pool.
#[derive(Clone)]
pub struct SeaOrmLimitsStore {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
}

impl SeaOrmLimitsStore {
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self::with_clock(db, Arc::new(SystemClock::new()))
    }

    #[must_use]
    pub fn with_clock(db: DatabaseConnection, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// A transaction over [`SeaOrmLimitsStore`]. Dropping it uncommitted rolls back.
pub struct SeaOrmTransaction {
    tx: DatabaseTransaction,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl LimitsStore for SeaOrmLimitsStore {
    type Transaction = SeaOrmTransaction;

    async fn begin(&self, isolation: IsolationLevel) -> Result<SeaOrmTransaction> {
        let level = match isolation {
            IsolationLevel::ReadCommitted => sea_orm::IsolationLevel::ReadCommitted,
            IsolationLevel::Serializable => sea_orm::IsolationLevel::Serializable,
        };
        let tx = self.db.begin_with_config(Some(level), None).await?;
        tracing::trace!(?isolation, "Transaction started");
        Ok(SeaOrmTransaction {
            tx,
            clock: Arc::clone(&self.clock),
        })
    }
}

#[async_trait]
impl LimitsTransaction for SeaOrmTransaction {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

macro_rules! impl_limits_repository {
    ($target:ty, $conn:ident) => {
        #[async_trait]
        impl LimitsRepository for $target {
            async fn create_limit(&self, limit: &NewLimit, hash: &str) -> Result<Limit> {
                queries::create_limit(&self.$conn, limit, hash, self.clock.now()).await
            }

            async fn get_limit_by_id(&self, id: i64) -> Result<Limit> {
                queries::get_limit_by_id(&self.$conn, id).await
            }

            async fn update_limit_value(&self, limit: &Limit) -> Result<Limit> {
                queries::update_limit_value(&self.$conn, limit, self.clock.now()).await
            }

            async fn delete_limits(&self, ids: &[i64]) -> Result<Vec<i64>> {
                queries::delete_limits(&self.$conn, ids, self.clock.now()).await
            }

            async fn delete_counters(&self, limit_ids: &[i64]) -> Result<()> {
                queries::delete_counters(&self.$conn, limit_ids, self.clock.now()).await
            }

            async fn get_limits(&self, filter: &LimitsFilter) -> Result<(Vec<Limit>, u64)> {
                queries::get_limits(&self.$conn, filter).await
            }

            async fn match_limits(
                &self,
                currency: &str,
                attributes: &Attributes,
            ) -> Result<Vec<Limit>> {
                queries::match_limits(&self.$conn, currency, attributes).await
            }

            async fn create_context(&self, meta: &Attributes) -> Result<Context> {
                queries::create_context(&self.$conn, meta, self.clock.now()).await
            }

            async fn get_context_by_id(&self, id: i64) -> Result<Context> {
                queries::get_context_by_id(&self.$conn, id).await
            }

            async fn create_operation(&self, operation: &NewOperation) -> Result<Operation> {
                queries::create_operation(&self.$conn, operation, self.clock.now()).await
            }

            async fn get_operations_by_context_id(
                &self,
                context_id: i64,
            ) -> Result<Vec<Operation>> {
                queries::get_operations_by_context_id(&self.$conn, context_id).await
            }

            async fn create_counters_if_not_exists(
                &self,
                counters: &[NewCounter],
            ) -> Result<Vec<i64>> {
                queries::create_counters_if_not_exists(&self.$conn, counters, self.clock.now()).await
            }

            async fn link_counters_to_operation(
                &self,
                counter_ids: &[i64],
                operation_id: i64,
            ) -> Result<()> {
                queries::link_counters_to_operation(&self.$conn, counter_ids, operation_id).await
            }

            async fn get_counters_by_limit_id(&self, limit_id: i64) -> Result<Vec<Counter>> {
                queries::get_counters_by_limit_id(&self.$conn, limit_id).await
            }

            async fn increment_counters(
                &self,
                operation_id: i64,
                counter_ids: &[i64],
                context: Option<&Context>,
            ) -> Result<Vec<ExceededCounter>> {
                let now = self.clock.now();
                queries::increment_counters(&self.$conn, operation_id, counter_ids, context, now)
                    .await
            }

            async fn commit_operations(&self, operation_ids: &[i64]) -> Result<()> {
                queries::commit_operations(&self.$conn, operation_ids, self.clock.now()).await
            }

            async fn rollback_operations(
                &self,
                operation_ids: &[i64],
            ) -> Result<Vec<ExceededCounter>> {
                queries::rollback_operations(&self.$conn, operation_ids, self.clock.now()).await
            }
        }
    };
}

impl_limits_repository!(SeaOrmLimitsStore, db);
impl_limits_repository!(SeaOrmTransaction, tx);

#[async_trait]
impl CleanupStore for SeaOrmLimitsStore {
    async fn cleanup_limits(&self) -> Result<u64> {
        queries::cleanup_limits(&self.db).await
    }

    async fn cleanup_counters(&self, outdated_before: DateTime<Utc>, batch_size: u64) -> Result<u64> {
        queries::cleanup_counters(&self.db, outdated_before, batch_size).await
    }

    async fn cleanup_contexts(&self, outdated_before: DateTime<Utc>, batch_size: u64) -> Result<u64> {
        queries::cleanup_contexts(&self.db, outdated_before, batch_size).await
    }
}
