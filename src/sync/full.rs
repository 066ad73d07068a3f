use crate::database::TableMetadata;
use crate::sync::constraints;
use crate::sync::cursor::RowCursor;
use crate::sync::{SynchronizationContext, SynchronizationError, SynchronizationStrategy};
use futures::{StreamExt, TryStreamExt};

/// Empties every target table and copies the source's rows into it.
///
/// Simple and always correct, but it rewrites every row. Prefer `DifferentialStrategy` when
/// the target is mostly in sync already.
pub struct FullStrategy;

impl FullStrategy {
    pub const ID: &'static str = "full";

    async fn copy_tables(&self, context: &SynchronizationContext) -> Result<u64, SynchronizationError> {
        let tables: Vec<_> = context
            .source_metadata()
            .tables
            .iter()
            .map(|table| self.copy_table(context, table))
            .collect();
        let copied: Vec<u64> = futures::stream::iter(tables)
            .buffer_unordered(context.options().concurrency.max(1))
            .try_collect()
            .await?;
        Ok(copied.into_iter().sum())
    }

    async fn copy_table(
        &self,
        context: &SynchronizationContext,
        table: &TableMetadata,
    ) -> Result<u64, SynchronizationError> {
        let target_table = context.target_table(table)?;
        let batch_size = context.options().batch_size.max(1);

        context.target().truncate(target_table).await?;

        let mut source = RowCursor::new(context.source(), table, context.options().fetch_size);
        let mut batch = Vec::with_capacity(batch_size);
        let mut copied = 0;
        while let Some(row) = source.next().await? {
            batch.push(row);
            if batch.len() >= batch_size {
                copied += context.target().insert_rows(target_table, &batch).await?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            copied += context.target().insert_rows(target_table, &batch).await?;
        }

        slog::info!(context.logger(), "Copied {} rows into {}", copied, table.name);
        Ok(copied)
    }
}

#[async_trait::async_trait]
impl SynchronizationStrategy for FullStrategy {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn synchronize(&self, context: &SynchronizationContext) -> Result<(), SynchronizationError> {
        let dropped = constraints::drop_foreign_keys(context).await?;
        let copied = self.copy_tables(context).await;
        let restored = constraints::restore_foreign_keys(context, &dropped).await;

        let copied = copied?;
        restored?;
        slog::info!(
            context.logger(),
            "Full synchronization copied {} rows from {}",
            copied,
            context.source_replica().id()
        );
        Ok(())
    }
}
