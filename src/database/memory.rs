use crate::database::value::compare_keys;
use crate::database::{
    Connection, ConnectionError, ConnectionFactory, DatabaseMetadata, ForeignKey, Replica, ReplicaId, Row,
    SequenceMetadata, TableMetadata, UniqueConstraint, Value,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

/// MemoryDatabase is an embedded, process-local database. It's what an `Embedded` replica looks
/// like when there is no real database behind it, and it's what the tests replicate across.
///
/// It enforces unique constraints (while they are in place), keeps rows ordered by primary key,
/// and counts the DML statements applied to it so callers can tell "rewrote the row" apart from
/// "left it alone".
pub struct MemoryDatabase {
    state: Mutex<State>,
    valid: AtomicBool,
    // Connections handed out by `MemoryDatabases` and not closed yet.
    sessions: AtomicUsize,
}

#[derive(Default)]
struct State {
    tables: BTreeMap<String, MemoryTable>,
    sequences: BTreeMap<String, i64>,
    dropped_foreign_keys: BTreeSet<String>,
    dropped_unique_constraints: BTreeSet<String>,
    counts: DmlCounts,
}

struct MemoryTable {
    metadata: TableMetadata,
    rows: Vec<Row>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DmlCounts {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub truncated: u64,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        MemoryDatabase {
            state: Mutex::new(State::default()),
            valid: AtomicBool::new(true),
            sessions: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("MemoryDatabase mutex guard poison")
    }

    pub fn create_table(&self, metadata: TableMetadata) {
        self.state().tables.insert(
            metadata.name.clone(),
            MemoryTable {
                metadata,
                rows: Vec::new(),
            },
        );
    }

    /// Seeds rows without counting them as DML.
    pub fn load(&self, table: &str, rows: Vec<Row>) -> Result<(), ConnectionError> {
        let mut state = self.state();
        let table = state.table_mut(table)?;
        for row in rows {
            let key = table.metadata.key_of(&row);
            match table.find(&key) {
                Ok(i) => table.rows[i] = row,
                Err(i) => table.rows.insert(i, row),
            }
        }
        Ok(())
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn create_sequence(&self, name: &str, value: i64) {
        self.state().sequences.insert(name.to_string(), value);
    }

    pub fn sequence(&self, name: &str) -> Option<i64> {
        self.state().sequences.get(name).copied()
    }

    pub fn dml_counts(&self) -> DmlCounts {
        self.state().counts
    }

    pub fn reset_dml_counts(&self) {
        self.state().counts = DmlCounts::default();
    }

    /// Names of constraints currently dropped (foreign keys and unique constraints).
    pub fn dropped_constraints(&self) -> Vec<String> {
        let state = self.state();
        state
            .dropped_foreign_keys
            .iter()
            .chain(state.dropped_unique_constraints.iter())
            .cloned()
            .collect()
    }

    pub fn open_connections(&self) -> usize {
        self.sessions.load(AtomicOrdering::Acquire)
    }

    /// Simulates the database going away (or coming back).
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, AtomicOrdering::Release);
    }

    fn check_valid(&self) -> Result<(), ConnectionError> {
        if self.valid.load(AtomicOrdering::Acquire) {
            Ok(())
        } else {
            Err(ConnectionError::Unreachable {
                location: "memory".into(),
                message: "database is offline".into(),
            })
        }
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTable {
    fn find(&self, key: &[Value]) -> Result<usize, usize> {
        self.rows
            .binary_search_by(|row| compare_keys(&self.metadata.key_of(row), key))
    }
}

impl State {
    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable, ConnectionError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| ConnectionError::UnknownTable(name.to_string()))
    }

    // Checks every enforced unique constraint of `table` against `candidate`, ignoring the row
    // stored under `candidate`'s own key (i.e. the row an update replaces).
    fn check_unique(&self, table: &MemoryTable, candidate: &Row) -> Result<(), ConnectionError> {
        let candidate_key = table.metadata.key_of(candidate);
        for constraint in &table.metadata.unique_constraints {
            if self.dropped_unique_constraints.contains(&constraint.name) {
                continue;
            }
            let positions: Vec<usize> = constraint
                .columns
                .iter()
                .filter_map(|c| table.metadata.column_index(c))
                .collect();
            let clash = table.rows.iter().any(|row| {
                compare_keys(&table.metadata.key_of(row), &candidate_key) != Ordering::Equal
                    && positions.iter().all(|&i| row[i] == candidate[i])
            });
            if clash {
                return Err(ConnectionError::ConstraintViolation(constraint.name.clone()));
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Connection for MemoryDatabase {
    async fn is_valid(&self) -> bool {
        self.valid.load(AtomicOrdering::Acquire)
    }

    async fn metadata(&self) -> Result<DatabaseMetadata, ConnectionError> {
        self.check_valid()?;
        let state = self.state();
        Ok(DatabaseMetadata {
            tables: state.tables.values().map(|t| t.metadata.clone()).collect(),
            sequences: state.sequences.keys().map(SequenceMetadata::new).collect(),
        })
    }

    async fn read_rows(
        &self,
        table: &TableMetadata,
        after_key: Option<&[Value]>,
        limit: usize,
    ) -> Result<Vec<Row>, ConnectionError> {
        self.check_valid()?;
        let mut state = self.state();
        let table = state.table_mut(&table.name)?;
        let start = match after_key {
            None => 0,
            Some(key) => match table.find(key) {
                Ok(i) => i + 1,
                Err(i) => i,
            },
        };
        Ok(table.rows.iter().skip(start).take(limit).cloned().collect())
    }

    async fn truncate(&self, table: &TableMetadata) -> Result<(), ConnectionError> {
        self.check_valid()?;
        let mut state = self.state();
        state.table_mut(&table.name)?.rows.clear();
        state.counts.truncated += 1;
        Ok(())
    }

    async fn insert_rows(&self, table: &TableMetadata, rows: &[Row]) -> Result<u64, ConnectionError> {
        self.check_valid()?;
        let mut state = self.state();
        for row in rows {
            {
                let stored = state
                    .tables
                    .get(&table.name)
                    .ok_or_else(|| ConnectionError::UnknownTable(table.name.clone()))?;
                state.check_unique(stored, row)?;
            }
            let stored = state.table_mut(&table.name)?;
            let key = stored.metadata.key_of(row);
            match stored.find(&key) {
                Ok(_) => return Err(ConnectionError::ConstraintViolation(format!("{} primary key", table.name))),
                Err(i) => stored.rows.insert(i, row.clone()),
            }
            state.counts.inserted += 1;
        }
        Ok(rows.len() as u64)
    }

    async fn update_rows(&self, table: &TableMetadata, rows: &[Row]) -> Result<u64, ConnectionError> {
        self.check_valid()?;
        let mut state = self.state();
        let mut updated = 0;
        for row in rows {
            {
                let stored = state
                    .tables
                    .get(&table.name)
                    .ok_or_else(|| ConnectionError::UnknownTable(table.name.clone()))?;
                state.check_unique(stored, row)?;
            }
            let stored = state.table_mut(&table.name)?;
            let key = stored.metadata.key_of(row);
            if let Ok(i) = stored.find(&key) {
                stored.rows[i] = row.clone();
                updated += 1;
            }
        }
        state.counts.updated += updated;
        Ok(updated)
    }

    async fn delete_rows(&self, table: &TableMetadata, keys: &[Vec<Value>]) -> Result<u64, ConnectionError> {
        self.check_valid()?;
        let mut state = self.state();
        let mut deleted = 0;
        {
            let stored = state.table_mut(&table.name)?;
            for key in keys {
                if let Ok(i) = stored.find(key) {
                    stored.rows.remove(i);
                    deleted += 1;
                }
            }
        }
        state.counts.deleted += deleted;
        Ok(deleted)
    }

    async fn drop_foreign_key(&self, fk: &ForeignKey) -> Result<(), ConnectionError> {
        self.check_valid()?;
        self.state().dropped_foreign_keys.insert(fk.name.clone());
        Ok(())
    }

    async fn create_foreign_key(&self, fk: &ForeignKey) -> Result<(), ConnectionError> {
        self.check_valid()?;
        self.state().dropped_foreign_keys.remove(&fk.name);
        Ok(())
    }

    async fn drop_unique_constraint(&self, constraint: &UniqueConstraint) -> Result<(), ConnectionError> {
        self.check_valid()?;
        self.state().dropped_unique_constraints.insert(constraint.name.clone());
        Ok(())
    }

    async fn create_unique_constraint(&self, constraint: &UniqueConstraint) -> Result<(), ConnectionError> {
        self.check_valid()?;
        let mut state = self.state();
        state.dropped_unique_constraints.remove(&constraint.name);
        // Re-validate existing data, like a real ALTER TABLE would.
        if let Some(table) = state.tables.get(&constraint.table) {
            for row in &table.rows {
                state.check_unique(table, row)?;
            }
        }
        Ok(())
    }

    async fn sequence_value(&self, sequence: &SequenceMetadata) -> Result<i64, ConnectionError> {
        self.check_valid()?;
        self.state()
            .sequences
            .get(&sequence.name)
            .copied()
            .ok_or_else(|| ConnectionError::UnknownSequence(sequence.name.clone()))
    }

    async fn set_sequence_value(&self, sequence: &SequenceMetadata, value: i64) -> Result<(), ConnectionError> {
        self.check_valid()?;
        self.state().sequences.insert(sequence.name.clone(), value);
        Ok(())
    }

    async fn close(&self) {
        // Closing a handle that didn't come from `MemoryDatabases` leaves the count alone.
        let _ = self
            .sessions
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |n| n.checked_sub(1));
    }
}

/// MemoryDatabases maps replicas to their in-memory databases.
#[derive(Default)]
pub struct MemoryDatabases {
    databases: Mutex<HashMap<ReplicaId, Arc<MemoryDatabase>>>,
}

impl MemoryDatabases {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, replica_id: ReplicaId, database: Arc<MemoryDatabase>) {
        self.databases
            .lock()
            .expect("MemoryDatabases mutex guard poison")
            .insert(replica_id, database);
    }

    pub fn get(&self, replica_id: &ReplicaId) -> Option<Arc<MemoryDatabase>> {
        self.databases
            .lock()
            .expect("MemoryDatabases mutex guard poison")
            .get(replica_id)
            .cloned()
    }
}

#[async_trait::async_trait]
impl ConnectionFactory for MemoryDatabases {
    async fn connect(&self, replica: &Replica) -> Result<Arc<dyn Connection>, ConnectionError> {
        let database = self.get(replica.id()).ok_or_else(|| ConnectionError::Unreachable {
            location: replica.descriptor().location.clone(),
            message: "no such in-memory database".into(),
        })?;
        database.check_valid().map_err(|_| ConnectionError::Unreachable {
            location: replica.descriptor().location.clone(),
            message: "database is offline".into(),
        })?;

        database.sessions.fetch_add(1, AtomicOrdering::AcqRel);
        Ok(database)
    }
}
