use crate::sync::{SynchronizationContext, SynchronizationError};

/// Pushes every sequence's high-water mark to the target. The active replicas must agree on
/// each value; if they don't, there's no right value to push.
pub async fn synchronize_sequences(context: &SynchronizationContext) -> Result<(), SynchronizationError> {
    for sequence in &context.source_metadata().sequences {
        let reads = context.active().iter().map(|(replica, connection)| async move {
            connection
                .sequence_value(sequence)
                .await
                .map(|value| (replica.id().clone(), value))
        });
        let values = futures::future::try_join_all(reads).await?;

        let value = match values.first() {
            Some((_, value)) => *value,
            None => context.source().sequence_value(sequence).await?,
        };
        if values.iter().any(|(_, v)| *v != value) {
            return Err(SynchronizationError::SequenceOutOfSync {
                sequence: sequence.name.clone(),
                values,
            });
        }

        if context.target().sequence_value(sequence).await.ok() != Some(value) {
            context.target().set_sequence_value(sequence, value).await?;
            slog::debug!(context.logger(), "Set sequence {} to {}", sequence.name, value);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_support::Pair;

    #[tokio::test]
    async fn copies_agreed_value_to_target() {
        // -- setup --
        let pair = Pair::new();
        pair.source.create_sequence("orders_seq", 41);
        pair.target.create_sequence("orders_seq", 7);
        let context = pair.context().await;

        // -- execute --
        synchronize_sequences(&context).await.unwrap();

        // -- verify --
        assert_eq!(pair.target.sequence("orders_seq"), Some(41));
    }

    #[tokio::test]
    async fn creates_sequence_missing_on_target() {
        let pair = Pair::new();
        pair.source.create_sequence("orders_seq", 3);
        let context = pair.context().await;

        synchronize_sequences(&context).await.unwrap();

        assert_eq!(pair.target.sequence("orders_seq"), Some(3));
    }

    #[tokio::test]
    async fn disagreeing_active_replicas_are_out_of_sync() {
        // -- setup --
        let pair = Pair::with_second_active();
        pair.source.create_sequence("orders_seq", 41);
        pair.second_active().create_sequence("orders_seq", 40);
        let context = pair.context().await;

        // -- execute --
        let result = synchronize_sequences(&context).await;

        // -- verify --
        match result {
            Err(SynchronizationError::SequenceOutOfSync { sequence, values }) => {
                assert_eq!(sequence, "orders_seq");
                assert_eq!(values.len(), 2);
            }
            other => panic!("Unexpected result: {:?}", other),
        }
        assert_eq!(pair.target.sequence("orders_seq"), None);
    }
}
