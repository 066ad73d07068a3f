use crate::database::{Connection, ConnectionError, Row, TableMetadata, Value};
use std::collections::VecDeque;

/// Reads a whole table in primary key order, `fetch_size` rows per round trip.
pub(super) struct RowCursor<'a> {
    connection: &'a dyn Connection,
    table: &'a TableMetadata,
    fetch_size: usize,
    buffer: VecDeque<Row>,
    last_key: Option<Vec<Value>>,
    exhausted: bool,
}

impl<'a> RowCursor<'a> {
    pub fn new(connection: &'a dyn Connection, table: &'a TableMetadata, fetch_size: usize) -> Self {
        RowCursor {
            connection,
            table,
            fetch_size: fetch_size.max(1),
            buffer: VecDeque::new(),
            last_key: None,
            exhausted: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<Row>, ConnectionError> {
        if self.buffer.is_empty() && !self.exhausted {
            let rows = self
                .connection
                .read_rows(self.table, self.last_key.as_deref(), self.fetch_size)
                .await?;
            if rows.len() < self.fetch_size {
                self.exhausted = true;
            }
            if let Some(last) = rows.last() {
                self.last_key = Some(self.table.key_of(last));
            }
            self.buffer.extend(rows);
        }

        Ok(self.buffer.pop_front())
    }
}
