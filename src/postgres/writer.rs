// ABOUTME: TableWriter - writes batches into a target PostgreSQL table, one transaction per batch
// ABOUTME: Applies fail/replace/append DDL and chunks multi-row INSERTs under the bind-parameter limit

use async_trait::async_trait;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, GenericClient};

use super::value::sql_type_name;
use crate::batch::{Batch, Cell, Column};
use crate::endpoint::BatchWriter;
use crate::error::{Result, TransferError};
use crate::query::TableRef;
use crate::transfer::WriteBehavior;
use crate::utils::quote_ident;

/// PostgreSQL accepts at most 65535 bind parameters per statement.
const MAX_PARAMS: usize = 65_000; // Leave some margin

/// Writes batches to the target over a single session reused for the whole attempt.
pub struct TableWriter {
    client: Client,
}

impl TableWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BatchWriter for TableWriter {
    async fn write_batch(
        &mut self,
        table: &TableRef,
        batch: &Batch,
        behavior: WriteBehavior,
    ) -> Result<u64> {
        if batch.columns.is_empty() {
            return Err(TransferError::config(format!(
                "Cannot write to {}: the source query returned no columns",
                table
            )));
        }

        let tx = self
            .client
            .transaction()
            .await
            .map_err(|e| TransferError::transport("Failed to start target transaction", e))?;

        prepare_table(&tx, table, &batch.columns, behavior).await?;
        let written = insert_rows(&tx, table, batch).await?;

        tx.commit().await.map_err(|e| {
            TransferError::transport(format!("Failed to commit batch into {}", table), e)
        })?;

        Ok(written)
    }
}

/// Check whether `schema.table` exists.
pub async fn table_exists<C: GenericClient>(client: &C, table: &TableRef) -> Result<bool> {
    let row = client
        .query_one(
            "SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1 AND table_name = $2
            )",
            &[&table.schema, &table.name],
        )
        .await
        .map_err(|e| TransferError::transport(format!("Failed to check if {} exists", table), e))?;

    Ok(row.get(0))
}

/// Get the target table into the state `behavior` asks for, inside the batch transaction.
async fn prepare_table<C: GenericClient>(
    client: &C,
    table: &TableRef,
    columns: &[Column],
    behavior: WriteBehavior,
) -> Result<()> {
    let ddl = match behavior {
        WriteBehavior::Fail => {
            if table_exists(client, table).await? {
                return Err(target_exists(table));
            }
            build_create_table(table, columns, false)
        }
        WriteBehavior::Replace => format!(
            "DROP TABLE IF EXISTS {}; {}",
            table.quoted(),
            build_create_table(table, columns, false)
        ),
        WriteBehavior::Append => build_create_table(table, columns, true),
    };

    client.batch_execute(&ddl).await.map_err(|e| {
        // A concurrent creator can win the race between the check and CREATE
        if behavior == WriteBehavior::Fail && e.code() == Some(&SqlState::DUPLICATE_TABLE) {
            return target_exists(table);
        }
        TransferError::from_postgres(
            e,
            format!("Failed to prepare {} for '{}'", table, behavior),
            &table.schema,
            &table.name,
            0,
        )
    })
}

fn target_exists(table: &TableRef) -> TransferError {
    TransferError::TargetExists {
        schema: table.schema.clone(),
        table: table.name.clone(),
    }
}

async fn insert_rows<C: GenericClient>(client: &C, table: &TableRef, batch: &Batch) -> Result<u64> {
    let column_names = batch.column_names();
    let rows_per_statement = std::cmp::max(1, MAX_PARAMS / column_names.len());

    let mut total = 0u64;
    for chunk in batch.rows.chunks(rows_per_statement) {
        let query = build_insert_query(table, &column_names, chunk.len());
        let statement = client
            .prepare(&query)
            .await
            .map_err(|e| insert_error(e, table, batch))?;
        check_param_types(table, &batch.columns, statement.params())?;

        let params: Vec<&(dyn ToSql + Sync)> = chunk
            .iter()
            .flat_map(|row| row.iter().map(|cell: &Cell| cell as &(dyn ToSql + Sync)))
            .collect();

        total += client
            .execute(&statement, &params)
            .await
            .map_err(|e| insert_error(e, table, batch))?;
    }

    Ok(total)
}

fn insert_error(e: tokio_postgres::Error, table: &TableRef, batch: &Batch) -> TransferError {
    TransferError::from_postgres(
        e,
        format!("Failed to insert rows into {}", table),
        &table.schema,
        &table.name,
        batch.len(),
    )
}

/// Make sure every target column has the type the source values are encoded in.
///
/// Values are sent in the source's binary format and the server types the
/// insert parameters from the target columns, so any difference would be
/// reinterpreted silently. `params` repeat the column layout once per row.
fn check_param_types(table: &TableRef, columns: &[Column], params: &[Type]) -> Result<()> {
    for (column, target_type) in columns.iter().zip(params) {
        let Some(oid) = column.type_oid else {
            continue;
        };
        if oid == target_type.oid() || column.type_name == sql_type_name(target_type) {
            continue;
        }
        return Err(TransferError::config(format!(
            "Column {} of {} has type {} but the source column is {}; \
             values are copied without casting, so the types must match",
            quote_ident(&column.name),
            table,
            sql_type_name(target_type),
            column.type_name
        )));
    }
    Ok(())
}

/// Build `CREATE TABLE` from a batch's column layout.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS "schema"."table" ("id" int8, "name" text)
/// ```
fn build_create_table(table: &TableRef, columns: &[Column], if_not_exists: bool) -> String {
    let definitions: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.type_name))
        .collect();

    format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        table.quoted(),
        definitions.join(", ")
    )
}

/// Build a multi-row insert.
///
/// ```sql
/// INSERT INTO "schema"."table" ("col1", "col2") VALUES ($1, $2), ($3, $4), ...
/// ```
fn build_insert_query(table: &TableRef, columns: &[String], num_rows: usize) -> String {
    let quoted_columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();

    let num_cols = columns.len();
    let value_rows: Vec<String> = (0..num_rows)
        .map(|row_idx| {
            let placeholders: Vec<String> = (0..num_cols)
                .map(|col_idx| format!("${}", row_idx * num_cols + col_idx + 1))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table.quoted(),
        quoted_columns.join(", "),
        value_rows.join(", ")
    )
}
