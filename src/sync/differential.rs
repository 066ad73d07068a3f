use crate::database::{compare_keys, Connection, Row, TableMetadata, Value};
use crate::sync::constraints;
use crate::sync::cursor::RowCursor;
use crate::sync::{SynchronizationContext, SynchronizationError, SynchronizationStrategy};
use futures::{StreamExt, TryStreamExt};
use regex::Regex;
use std::cmp::Ordering;

/// Converges the target table by table: both sides are read in primary key order and merged,
/// and only rows that differ are written.
///
/// ```text
/// source:  1 2   4        target:  1   3 4
///          | |   |                 |   | |
///          = +   ~                 =   - ~
/// ```
///
/// `+` rows only in the source are inserted, `-` rows only in the target are deleted, `~` rows
/// in both are updated if their non-key columns (or just the version column) differ.
///
/// Foreign keys and unique constraints are dropped on the target for the duration: the
/// convergence order can transiently violate either.
pub struct DifferentialStrategy;

impl DifferentialStrategy {
    pub const ID: &'static str = "differential";
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
struct TableChanges {
    inserted: u64,
    updated: u64,
    deleted: u64,
}

impl std::ops::Add for TableChanges {
    type Output = TableChanges;

    fn add(self, other: TableChanges) -> TableChanges {
        TableChanges {
            inserted: self.inserted + other.inserted,
            updated: self.updated + other.updated,
            deleted: self.deleted + other.deleted,
        }
    }
}

#[async_trait::async_trait]
impl SynchronizationStrategy for DifferentialStrategy {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn synchronize(&self, context: &SynchronizationContext) -> Result<(), SynchronizationError> {
        let foreign_keys = constraints::drop_foreign_keys(context).await?;
        let unique_constraints = match constraints::drop_unique_constraints(context).await {
            Ok(dropped) => dropped,
            Err(e) => {
                constraints::restore_foreign_keys(context, &foreign_keys).await?;
                return Err(e);
            }
        };

        let changes = synchronize_tables(context).await;

        let unique_restored = constraints::restore_unique_constraints(context, &unique_constraints).await;
        let fks_restored = constraints::restore_foreign_keys(context, &foreign_keys).await;

        let changes = changes?;
        unique_restored?;
        fks_restored?;
        slog::info!(
            context.logger(),
            "Differential synchronization from {}: {} inserted, {} updated, {} deleted",
            context.source_replica().id(),
            changes.inserted,
            changes.updated,
            changes.deleted
        );
        Ok(())
    }
}

async fn synchronize_tables(context: &SynchronizationContext) -> Result<TableChanges, SynchronizationError> {
    let tables: Vec<_> = context
        .source_metadata()
        .tables
        .iter()
        .map(|table| synchronize_table(context, table))
        .collect();
    let changes: Vec<TableChanges> = futures::stream::iter(tables)
        .buffer_unordered(context.options().concurrency.max(1))
        .try_collect()
        .await?;
    Ok(changes.into_iter().fold(TableChanges::default(), |total, t| total + t))
}

async fn synchronize_table(
    context: &SynchronizationContext,
    table: &TableMetadata,
) -> Result<TableChanges, SynchronizationError> {
    let target_table = context.target_table(table)?;
    let options = context.options();
    let compared = compared_columns(table, options.version_pattern.as_ref());

    let mut source = RowCursor::new(context.source(), table, options.fetch_size);
    let mut target = RowCursor::new(context.target(), target_table, options.fetch_size);
    let mut writer = BatchWriter::new(context.target(), target_table, options.batch_size);

    let mut source_row = source.next().await?;
    let mut target_row = target.next().await?;
    loop {
        let order = match (&source_row, &target_row) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(s), Some(t)) => compare_keys(&table.key_of(s), &target_table.key_of(t)),
        };

        match order {
            Ordering::Less => {
                if let Some(row) = source_row.take() {
                    writer.insert(row).await?;
                }
                source_row = source.next().await?;
            }
            Ordering::Greater => {
                if let Some(row) = target_row.take() {
                    writer.delete(target_table.key_of(&row)).await?;
                }
                target_row = target.next().await?;
            }
            Ordering::Equal => {
                if let (Some(s), Some(t)) = (source_row.take(), target_row.take()) {
                    if compared.iter().any(|&i| s[i] != t[i]) {
                        writer.update(s).await?;
                    }
                }
                source_row = source.next().await?;
                target_row = target.next().await?;
            }
        }
    }

    let changes = writer.finish().await?;
    slog::debug!(
        context.logger(),
        "Synchronized {}: {} inserted, {} updated, {} deleted",
        table.name,
        changes.inserted,
        changes.updated,
        changes.deleted
    );
    Ok(changes)
}

/// Columns compared to decide whether a row changed: the version column if the table has
/// one, otherwise every non-key column.
fn compared_columns(table: &TableMetadata, version_pattern: Option<&Regex>) -> Vec<usize> {
    let non_key = table.non_key_columns();
    if let Some(pattern) = version_pattern {
        if let Some(&version) = non_key.iter().find(|&&i| pattern.is_match(&table.columns[i])) {
            return vec![version];
        }
    }
    non_key
}

/// Buffers DML against one target table and flushes it in batches.
struct BatchWriter<'a> {
    connection: &'a dyn Connection,
    table: &'a TableMetadata,
    batch_size: usize,
    inserts: Vec<Row>,
    updates: Vec<Row>,
    deletes: Vec<Vec<Value>>,
    changes: TableChanges,
}

impl<'a> BatchWriter<'a> {
    fn new(connection: &'a dyn Connection, table: &'a TableMetadata, batch_size: usize) -> Self {
        BatchWriter {
            connection,
            table,
            batch_size: batch_size.max(1),
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
            changes: TableChanges::default(),
        }
    }

    async fn insert(&mut self, row: Row) -> Result<(), SynchronizationError> {
        self.inserts.push(row);
        if self.inserts.len() >= self.batch_size {
            self.flush_inserts().await?;
        }
        Ok(())
    }

    async fn update(&mut self, row: Row) -> Result<(), SynchronizationError> {
        self.updates.push(row);
        if self.updates.len() >= self.batch_size {
            self.flush_updates().await?;
        }
        Ok(())
    }

    async fn delete(&mut self, key: Vec<Value>) -> Result<(), SynchronizationError> {
        self.deletes.push(key);
        if self.deletes.len() >= self.batch_size {
            self.flush_deletes().await?;
        }
        Ok(())
    }

    async fn flush_inserts(&mut self) -> Result<(), SynchronizationError> {
        if !self.inserts.is_empty() {
            self.changes.inserted += self.connection.insert_rows(self.table, &self.inserts).await?;
            self.inserts.clear();
        }
        Ok(())
    }

    async fn flush_updates(&mut self) -> Result<(), SynchronizationError> {
        if !self.updates.is_empty() {
            self.changes.updated += self.connection.update_rows(self.table, &self.updates).await?;
            self.updates.clear();
        }
        Ok(())
    }

    async fn flush_deletes(&mut self) -> Result<(), SynchronizationError> {
        if !self.deletes.is_empty() {
            self.changes.deleted += self.connection.delete_rows(self.table, &self.deletes).await?;
            self.deletes.clear();
        }
        Ok(())
    }

    async fn finish(mut self) -> Result<TableChanges, SynchronizationError> {
        self.flush_deletes().await?;
        self.flush_updates().await?;
        self.flush_inserts().await?;
        Ok(self.changes)
    }
}
