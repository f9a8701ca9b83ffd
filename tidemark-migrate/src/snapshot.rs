//! Point-in-time structural capture of a database.
//!
//! A [`SchemaSnapshot`] is the shared data model of the differ, the classifier
//! and the shadow verifier. Snapshots are built either from introspected rows
//! (see [`crate::introspect::SnapshotBuilder`]) or directly in tests.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::normalize_type;

/// Structure of one connection at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Table names, bookkeeping table excluded.
    pub tables: BTreeSet<String>,
    /// Columns per table, in declaration order.
    pub columns: BTreeMap<String, Vec<ColumnSnapshot>>,
    /// Indexes per table.
    pub indexes: BTreeMap<String, Vec<IndexSnapshot>>,
    /// Foreign keys per table.
    pub foreign_keys: BTreeMap<String, Vec<ForeignKeySnapshot>>,
}

impl SchemaSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with its columns.
    pub fn with_table(
        mut self,
        table: impl Into<String>,
        columns: impl IntoIterator<Item = ColumnSnapshot>,
    ) -> Self {
        let table = table.into();
        self.add_table(&table);
        for column in columns {
            self.add_column(&table, column);
        }
        self
    }

    /// Add an index to a table.
    pub fn with_index(mut self, table: impl Into<String>, index: IndexSnapshot) -> Self {
        self.add_index(table, index);
        self
    }

    /// Add a foreign key to a table.
    pub fn with_foreign_key(mut self, table: impl Into<String>, fk: ForeignKeySnapshot) -> Self {
        self.add_foreign_key(table, fk);
        self
    }

    /// Register a table.
    pub fn add_table(&mut self, table: &str) {
        self.tables.insert(table.to_string());
        self.columns.entry(table.to_string()).or_default();
    }

    /// Add a column, replacing any column of the same name.
    pub fn add_column(&mut self, table: &str, column: ColumnSnapshot) {
        self.tables.insert(table.to_string());
        let columns = self.columns.entry(table.to_string()).or_default();
        match columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => columns.push(column),
        }
    }

    /// Add an index.
    pub fn add_index(&mut self, table: impl Into<String>, index: IndexSnapshot) {
        self.indexes.entry(table.into()).or_default().push(index);
    }

    /// Add a foreign key.
    pub fn add_foreign_key(&mut self, table: impl Into<String>, fk: ForeignKeySnapshot) {
        self.foreign_keys.entry(table.into()).or_default().push(fk);
    }

    /// Check if a table exists.
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    /// Check if a column exists on a table.
    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.column(table, column).is_some()
    }

    /// Look up a column.
    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnSnapshot> {
        self.columns_of(table).iter().find(|c| c.name == column)
    }

    /// Columns of a table, empty when the table is unknown.
    pub fn columns_of(&self, table: &str) -> &[ColumnSnapshot] {
        self.columns.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Indexes of a table.
    pub fn indexes_of(&self, table: &str) -> &[IndexSnapshot] {
        self.indexes.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Foreign keys of a table.
    pub fn foreign_keys_of(&self, table: &str) -> &[ForeignKeySnapshot] {
        self.foreign_keys.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Get the number of tables.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

/// A column as seen in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSnapshot {
    /// Column name.
    pub name: String,
    /// SQL type as reported by the database.
    pub raw_type: String,
    /// Normalized type used for comparison.
    pub normalized_type: String,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Raw default expression.
    pub default: Option<String>,
    /// Whether the column is auto-incrementing.
    pub auto_increment: bool,
}

impl ColumnSnapshot {
    /// Create a non-null column; the normalized type is derived from `raw_type`.
    pub fn new(name: impl Into<String>, raw_type: impl Into<String>) -> Self {
        let raw_type = raw_type.into();
        Self {
            name: name.into(),
            normalized_type: normalize_type(&raw_type),
            raw_type,
            nullable: false,
            default: None,
            auto_increment: false,
        }
    }

    /// Mark as nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set the raw default.
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Mark as auto-incrementing.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// Kind of an index, part of its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Primary key.
    Primary,
    /// Unique index.
    Unique,
    /// Regular index.
    #[serde(alias = "index")]
    Plain,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Unique => write!(f, "unique"),
            Self::Plain => write!(f, "index"),
        }
    }
}

/// Structural identity of an index: sorted column set plus kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexIdentity {
    /// Sorted column names.
    pub columns: Vec<String>,
    /// Index kind.
    pub kind: IndexKind,
}

impl IndexIdentity {
    /// Build an identity, sorting the columns.
    pub fn new<I, S>(columns: I, kind: IndexKind) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: sorted(columns),
            kind,
        }
    }
}

/// An index as seen in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Index name.
    pub name: String,
    /// Indexed columns in index order.
    pub columns: Vec<String>,
    /// Whether the index is unique.
    pub unique: bool,
    /// Whether the index is the primary key.
    pub primary: bool,
}

impl IndexSnapshot {
    /// Create a plain index.
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
            primary: false,
        }
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark as primary key. Primary keys are always unique.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.unique = true;
        self
    }

    /// Get the index kind.
    pub fn kind(&self) -> IndexKind {
        if self.primary {
            IndexKind::Primary
        } else if self.unique {
            IndexKind::Unique
        } else {
            IndexKind::Plain
        }
    }

    /// Get the structural identity.
    pub fn identity(&self) -> IndexIdentity {
        IndexIdentity::new(self.columns.iter().cloned(), self.kind())
    }

    /// Check if the index covers exactly this column set, ignoring order and kind.
    pub fn covers<S: AsRef<str>>(&self, columns: &[S]) -> bool {
        let ours = sorted(self.columns.iter().cloned());
        let theirs = sorted(columns.iter().map(|c| c.as_ref().to_string()));
        ours == theirs
    }
}

/// Structural identity of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ForeignKeyIdentity {
    /// Sorted local columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub foreign_table: String,
    /// Sorted referenced columns.
    pub foreign_columns: Vec<String>,
}

/// A foreign key as seen in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySnapshot {
    /// Local columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub foreign_table: String,
    /// Referenced columns.
    pub foreign_columns: Vec<String>,
    /// ON UPDATE action.
    pub on_update: Option<String>,
    /// ON DELETE action.
    pub on_delete: Option<String>,
}

impl ForeignKeySnapshot {
    /// Create a single-column foreign key.
    pub fn new(
        column: impl Into<String>,
        foreign_table: impl Into<String>,
        foreign_column: impl Into<String>,
    ) -> Self {
        Self {
            columns: vec![column.into()],
            foreign_table: foreign_table.into(),
            foreign_columns: vec![foreign_column.into()],
            on_update: None,
            on_delete: None,
        }
    }

    /// Set the ON DELETE action.
    pub fn on_delete(mut self, action: impl Into<String>) -> Self {
        self.on_delete = Some(action.into());
        self
    }

    /// Set the ON UPDATE action.
    pub fn on_update(mut self, action: impl Into<String>) -> Self {
        self.on_update = Some(action.into());
        self
    }

    /// Get the structural identity.
    pub fn identity(&self) -> ForeignKeyIdentity {
        ForeignKeyIdentity {
            columns: sorted(self.columns.iter().cloned()),
            foreign_table: self.foreign_table.clone(),
            foreign_columns: sorted(self.foreign_columns.iter().cloned()),
        }
    }
}

fn sorted<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut items: Vec<String> = items.into_iter().map(Into::into).collect();
    items.sort();
    items
}
