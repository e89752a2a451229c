//! Creates limits, context, operations, counters and operation_to_counter.
//!
//! Counter and operation rows cascade from their parents so the cleanup
//! purges can delete limits and contexts without orphaning dependants.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

// Partial and GIN indexes have no builder equivalent.
const LIMITS_HASH_ACTIVE_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_limits_hash_active ON limits (hash) WHERE deleted_at IS NULL";
const LIMITS_META_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_limits_meta ON limits USING GIN (meta)";

fn id_column<T: IntoIden>(name: T) -> ColumnDef {
    ColumnDef::new(name)
        .big_integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

fn created_at<T: IntoIden>(name: T) -> ColumnDef {
    timestamp_with_time_zone(name)
        .default(Expr::current_timestamp())
        .to_owned()
}

fn limits_table() -> TableCreateStatement {
    Table::create()
        .table(Limits::Table)
        .if_not_exists()
        .col(id_column(Limits::Id))
        .col(text(Limits::Hash))
        .col(text(Limits::LimitType))
        .col(text(Limits::Currency))
        .col(decimal(Limits::Value))
        .col(json_binary(Limits::Meta))
        .col(text_null(Limits::Period))
        .col(text_null(Limits::Timezone))
        .col(created_at(Limits::CreatedAt))
        .col(created_at(Limits::UpdatedAt))
        .col(timestamp_with_time_zone_null(Limits::DeletedAt))
        .to_owned()
}

fn context_table() -> TableCreateStatement {
    Table::create()
        .table(Context::Table)
        .if_not_exists()
        .col(id_column(Context::Id))
        .col(json_binary(Context::Meta))
        .col(created_at(Context::CreatedAt))
        .col(created_at(Context::UpdatedAt))
        .to_owned()
}

fn operations_table() -> TableCreateStatement {
    Table::create()
        .table(Operations::Table)
        .if_not_exists()
        .col(id_column(Operations::Id))
        .col(big_integer(Operations::ContextId))
        .col(text(Operations::Currency))
        .col(decimal(Operations::Value))
        .col(text(Operations::Status).default("new"))
        .col(created_at(Operations::CreatedAt))
        .col(created_at(Operations::UpdatedAt))
        .foreign_key(
            ForeignKey::create()
                .name("fk_operations_context")
                .from(Operations::Table, Operations::ContextId)
                .to(Context::Table, Context::Id)
                .on_delete(ForeignKeyAction::Cascade),
        )
        .to_owned()
}

fn counters_table() -> TableCreateStatement {
    Table::create()
        .table(Counters::Table)
        .if_not_exists()
        .col(id_column(Counters::Id))
        .col(text(Counters::Hash).unique_key())
        .col(big_integer(Counters::LimitId))
        .col(decimal(Counters::Value).default(0))
        .col(timestamp_with_time_zone(Counters::StartTime))
        .col(timestamp_with_time_zone(Counters::EndTime))
        .col(created_at(Counters::CreatedAt))
        .col(created_at(Counters::UpdatedAt))
        .col(timestamp_with_time_zone_null(Counters::DeletedAt))
        .foreign_key(
            ForeignKey::create()
                .name("fk_counters_limit")
                .from(Counters::Table, Counters::LimitId)
                .to(Limits::Table, Limits::Id)
                .on_delete(ForeignKeyAction::Cascade),
        )
        .to_owned()
}

fn operation_to_counter_table() -> TableCreateStatement {
    Table::create()
        .table(OperationToCounter::Table)
        .if_not_exists()
        .col(big_integer(OperationToCounter::OperationId))
        .col(big_integer(OperationToCounter::CounterId))
        .primary_key(
            Index::create()
                .col(OperationToCounter::OperationId)
                .col(OperationToCounter::CounterId),
        )
        .foreign_key(
            ForeignKey::create()
                .name("fk_operation_to_counter_operation")
                .from(OperationToCounter::Table, OperationToCounter::OperationId)
                .to(Operations::Table, Operations::Id)
                .on_delete(ForeignKeyAction::Cascade),
        )
        .foreign_key(
            ForeignKey::create()
                .name("fk_operation_to_counter_counter")
                .from(OperationToCounter::Table, OperationToCounter::CounterId)
                .to(Counters::Table, Counters::Id)
                .on_delete(ForeignKeyAction::Cascade),
        )
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.create_table(limits_table()).await?;

        let db = manager.get_connection();
        db.execute_unprepared(LIMITS_HASH_ACTIVE_INDEX).await?;
        db.execute_unprepared(LIMITS_META_INDEX).await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_limits_deleted_at")
                    .table(Limits::Table)
                    .col(Limits::DeletedAt)
                    .to_owned(),
            )
            .await?;

        manager.create_table(context_table()).await?;

        // Scanned by the context purge
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_context_updated_at")
                    .table(Context::Table)
                    .col(Context::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        manager.create_table(operations_table()).await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_operations_context_id")
                    .table(Operations::Table)
                    .col(Operations::ContextId)
                    .to_owned(),
            )
            .await?;

        manager.create_table(counters_table()).await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_counters_limit_id")
                    .table(Counters::Table)
                    .col(Counters::LimitId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_counters_end_time")
                    .table(Counters::Table)
                    .col(Counters::EndTime)
                    .to_owned(),
            )
            .await?;

        manager.create_table(operation_to_counter_table()).await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_operation_to_counter_counter_id")
                    .table(OperationToCounter::Table)
                    .col(OperationToCounter::CounterId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(OperationToCounter::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Counters::Table).if_exists().to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Operations::Table).if_exists().to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Context::Table).if_exists().to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Limits::Table).if_exists().to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Limits {
    Table,
    Id,
    Hash,
    LimitType,
    Currency,
    Value,
    Meta,
    Period,
    Timezone,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum Context {
    Table,
    Id,
    Meta,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Operations {
    Table,
    Id,
    ContextId,
    Currency,
    Value,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Counters {
    Table,
    Id,
    Hash,
    LimitId,
    Value,
    StartTime,
    EndTime,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum OperationToCounter {
    Table,
    OperationId,
    CounterId,
}
