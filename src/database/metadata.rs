use crate::database::value::Row;
use crate::database::Value;

/// Snapshot of the schema objects synchronization cares about.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DatabaseMetadata {
    pub tables: Vec<TableMetadata>,
    pub sequences: Vec<SequenceMetadata>,
}

impl DatabaseMetadata {
    pub fn table(&self, name: &str) -> Option<&TableMetadata> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ForeignKey> {
        self.tables.iter().flat_map(|t| t.foreign_keys.iter())
    }

    pub fn unique_constraints(&self) -> impl Iterator<Item = &UniqueConstraint> {
        self.tables.iter().flat_map(|t| t.unique_constraints.iter())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableMetadata {
    pub name: String,
    pub columns: Vec<String>,
    /// Positions (into `columns`) of the primary key, in key order. Every synchronized table
    /// needs one.
    pub primary_key: Vec<usize>,
    pub foreign_keys: Vec<ForeignKey>,
    pub unique_constraints: Vec<UniqueConstraint>,
}

impl TableMetadata {
    pub fn new(name: impl Into<String>, columns: &[&str], primary_key: &[&str]) -> Self {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let primary_key = primary_key
            .iter()
            .filter_map(|k| columns.iter().position(|c| c == k))
            .collect();

        TableMetadata {
            name: name.into(),
            columns,
            primary_key,
            foreign_keys: Vec::new(),
            unique_constraints: Vec::new(),
        }
    }

    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn with_unique_constraint(mut self, constraint: UniqueConstraint) -> Self {
        self.unique_constraints.push(constraint);
        self
    }

    pub fn key_of(&self, row: &Row) -> Vec<Value> {
        self.primary_key.iter().map(|&i| row[i].clone()).collect()
    }

    /// Positions of every column that is not part of the primary key.
    pub fn non_key_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|i| !self.primary_key.contains(i))
            .collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignKey {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
}

/// A sequence or an auto-increment counter. Both are just a high-water mark to us.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceMetadata {
    pub name: String,
}

impl SequenceMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        SequenceMetadata { name: name.into() }
    }
}
