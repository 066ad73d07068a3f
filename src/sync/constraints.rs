use crate::database::{ForeignKey, UniqueConstraint};
use crate::sync::{SynchronizationContext, SynchronizationError};

// Constraints are dropped on the target only, and restored from the target's own schema.

pub(super) async fn drop_foreign_keys(
    context: &SynchronizationContext,
) -> Result<Vec<ForeignKey>, SynchronizationError> {
    let mut dropped = Vec::new();
    for fk in context.target_metadata().foreign_keys() {
        context.target().drop_foreign_key(fk).await?;
        dropped.push(fk.clone());
    }
    if !dropped.is_empty() {
        slog::debug!(context.logger(), "Dropped {} foreign keys", dropped.len());
    }
    Ok(dropped)
}

/// Tries every foreign key even after one fails, returning the first failure.
pub(super) async fn restore_foreign_keys(
    context: &SynchronizationContext,
    dropped: &[ForeignKey],
) -> Result<(), SynchronizationError> {
    let mut first_error = None;
    for fk in dropped {
        if let Err(e) = context.target().create_foreign_key(fk).await {
            slog::error!(context.logger(), "Failed to restore foreign key {}: {}", fk.name, e);
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), |e| Err(e.into()))
}

pub(super) async fn drop_unique_constraints(
    context: &SynchronizationContext,
) -> Result<Vec<UniqueConstraint>, SynchronizationError> {
    let mut dropped = Vec::new();
    for constraint in context.target_metadata().unique_constraints() {
        context.target().drop_unique_constraint(constraint).await?;
        dropped.push(constraint.clone());
    }
    if !dropped.is_empty() {
        slog::debug!(context.logger(), "Dropped {} unique constraints", dropped.len());
    }
    Ok(dropped)
}

pub(super) async fn restore_unique_constraints(
    context: &SynchronizationContext,
    dropped: &[UniqueConstraint],
) -> Result<(), SynchronizationError> {
    let mut first_error = None;
    for constraint in dropped {
        if let Err(e) = context.target().create_unique_constraint(constraint).await {
            slog::error!(
                context.logger(),
                "Failed to restore unique constraint {}: {}",
                constraint.name,
                e
            );
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), |e| Err(e.into()))
}
