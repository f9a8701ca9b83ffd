//! Structural comparison of two schema snapshots.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::snapshot::{ColumnSnapshot, ForeignKeySnapshot, IndexSnapshot, SchemaSnapshot};
use crate::types::normalize_default;

/// Result of comparing an expected snapshot against an actual one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    /// Tables expected but absent.
    pub missing_tables: BTreeSet<String>,
    /// Tables present but not expected.
    pub extra_tables: BTreeSet<String>,
    /// Column differences per table present on both sides.
    pub column_diffs: BTreeMap<String, ColumnDiff>,
    /// Index differences per table.
    pub index_diffs: BTreeMap<String, IndexDiff>,
    /// Foreign key differences per table.
    pub fk_diffs: BTreeMap<String, ForeignKeyDiff>,
}

impl SchemaDiff {
    /// Check if there are any differences.
    pub fn has_differences(&self) -> bool {
        !self.missing_tables.is_empty()
            || !self.extra_tables.is_empty()
            || self.column_diffs.values().any(|d| !d.is_empty())
            || self.index_diffs.values().any(|d| !d.is_empty())
            || self.fk_diffs.values().any(|d| !d.is_empty())
    }

    /// Check if the diff is empty.
    pub fn is_empty(&self) -> bool {
        !self.has_differences()
    }

    /// Get a human-readable summary of the diff.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.missing_tables.is_empty() {
            parts.push(format!("{} missing tables", self.missing_tables.len()));
        }
        if !self.extra_tables.is_empty() {
            parts.push(format!("{} extra tables", self.extra_tables.len()));
        }

        let missing_columns: usize = self.column_diffs.values().map(|d| d.missing.len()).sum();
        let extra_columns: usize = self.column_diffs.values().map(|d| d.extra.len()).sum();
        let mismatches: usize = self
            .column_diffs
            .values()
            .map(|d| {
                d.type_mismatches.len() + d.nullable_mismatches.len() + d.default_mismatches.len()
            })
            .sum();

        if missing_columns > 0 {
            parts.push(format!("{} missing columns", missing_columns));
        }
        if extra_columns > 0 {
            parts.push(format!("{} extra columns", extra_columns));
        }
        if mismatches > 0 {
            parts.push(format!("{} column mismatches", mismatches));
        }

        let index_changes: usize = self
            .index_diffs
            .values()
            .map(|d| d.missing.len() + d.extra.len())
            .sum();
        if index_changes > 0 {
            parts.push(format!("{} index differences", index_changes));
        }

        let fk_changes: usize = self
            .fk_diffs
            .values()
            .map(|d| d.missing.len() + d.extra.len())
            .sum();
        if fk_changes > 0 {
            parts.push(format!("{} foreign key differences", fk_changes));
        }

        if parts.is_empty() {
            "No differences".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Every table mentioned anywhere in the diff.
    pub fn affected_tables(&self) -> BTreeSet<&str> {
        self.missing_tables
            .iter()
            .chain(&self.extra_tables)
            .chain(self.column_diffs.keys())
            .chain(self.index_diffs.keys())
            .chain(self.fk_diffs.keys())
            .map(String::as_str)
            .collect()
    }
}

/// A value that differs between the actual and expected column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch<T> {
    /// Column name.
    pub column: String,
    /// Value found in the actual schema.
    pub current: T,
    /// Value the expected schema declares.
    pub expected: T,
}

/// Column differences for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDiff {
    /// Columns expected but absent.
    pub missing: Vec<String>,
    /// Columns present but not expected.
    pub extra: Vec<String>,
    /// Normalized type differences.
    pub type_mismatches: Vec<Mismatch<String>>,
    /// Nullability differences.
    pub nullable_mismatches: Vec<Mismatch<bool>>,
    /// Normalized default differences.
    pub default_mismatches: Vec<Mismatch<Option<String>>>,
}

impl ColumnDiff {
    /// Check if every sub-list is empty.
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
            && self.extra.is_empty()
            && self.type_mismatches.is_empty()
            && self.nullable_mismatches.is_empty()
            && self.default_mismatches.is_empty()
    }
}

/// Index differences for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDiff {
    /// Indexes expected but absent.
    pub missing: Vec<IndexSnapshot>,
    /// Indexes present but not expected.
    pub extra: Vec<IndexSnapshot>,
}

impl IndexDiff {
    /// Check if both lists are empty.
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// Foreign key differences for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDiff {
    /// Foreign keys expected but absent.
    pub missing: Vec<ForeignKeySnapshot>,
    /// Foreign keys present but not expected.
    pub extra: Vec<ForeignKeySnapshot>,
}

impl ForeignKeyDiff {
    /// Check if both lists are empty.
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// Schema differ comparing an expected snapshot against the actual one.
#[derive(Debug, Clone)]
pub struct SchemaDiffer {
    expected: SchemaSnapshot,
    actual: SchemaSnapshot,
}

impl SchemaDiffer {
    /// Create a differ for an expected snapshot; the actual side starts empty.
    pub fn new(expected: SchemaSnapshot) -> Self {
        Self {
            expected,
            actual: SchemaSnapshot::default(),
        }
    }

    /// Set the actual snapshot.
    pub fn with_actual(mut self, actual: SchemaSnapshot) -> Self {
        self.actual = actual;
        self
    }

    /// Compute the diff.
    pub fn diff(&self) -> SchemaDiff {
        diff(&self.expected, &self.actual)
    }
}

/// Compare `expected` against `actual`.
pub fn diff(expected: &SchemaSnapshot, actual: &SchemaSnapshot) -> SchemaDiff {
    let mut result = SchemaDiff {
        missing_tables: expected.tables.difference(&actual.tables).cloned().collect(),
        extra_tables: actual.tables.difference(&expected.tables).cloned().collect(),
        ..SchemaDiff::default()
    };

    for table in expected.tables.intersection(&actual.tables) {
        let columns = diff_columns(expected.columns_of(table), actual.columns_of(table));
        if !columns.is_empty() {
            result.column_diffs.insert(table.clone(), columns);
        }

        let indexes = diff_indexes(expected.indexes_of(table), actual.indexes_of(table));
        if !indexes.is_empty() {
            result.index_diffs.insert(table.clone(), indexes);
        }

        let fks = diff_foreign_keys(
            expected.foreign_keys_of(table),
            actual.foreign_keys_of(table),
        );
        if !fks.is_empty() {
            result.fk_diffs.insert(table.clone(), fks);
        }
    }

    result
}

fn diff_columns(expected: &[ColumnSnapshot], actual: &[ColumnSnapshot]) -> ColumnDiff {
    let mut diff = ColumnDiff::default();

    for want in expected {
        let Some(have) = actual.iter().find(|c| c.name == want.name) else {
            diff.missing.push(want.name.clone());
            continue;
        };

        if have.normalized_type != want.normalized_type {
            diff.type_mismatches.push(Mismatch {
                column: want.name.clone(),
                current: have.normalized_type.clone(),
                expected: want.normalized_type.clone(),
            });
        }

        if have.nullable != want.nullable {
            diff.nullable_mismatches.push(Mismatch {
                column: want.name.clone(),
                current: have.nullable,
                expected: want.nullable,
            });
        }

        let current_default = normalize_default(have.default.as_deref());
        let expected_default = normalize_default(want.default.as_deref());
        if current_default != expected_default {
            diff.default_mismatches.push(Mismatch {
                column: want.name.clone(),
                current: current_default,
                expected: expected_default,
            });
        }
    }

    diff.extra = actual
        .iter()
        .filter(|have| !expected.iter().any(|want| want.name == have.name))
        .map(|c| c.name.clone())
        .collect();

    diff
}

fn diff_indexes(expected: &[IndexSnapshot], actual: &[IndexSnapshot]) -> IndexDiff {
    let expected_ids: BTreeSet<_> = expected.iter().map(IndexSnapshot::identity).collect();
    let actual_ids: BTreeSet<_> = actual.iter().map(IndexSnapshot::identity).collect();

    IndexDiff {
        missing: expected
            .iter()
            .filter(|i| !actual_ids.contains(&i.identity()))
            .cloned()
            .collect(),
        extra: actual
            .iter()
            .filter(|i| !expected_ids.contains(&i.identity()))
            .cloned()
            .collect(),
    }
}

fn diff_foreign_keys(
    expected: &[ForeignKeySnapshot],
    actual: &[ForeignKeySnapshot],
) -> ForeignKeyDiff {
    let expected_ids: BTreeSet<_> = expected.iter().map(ForeignKeySnapshot::identity).collect();
    let actual_ids: BTreeSet<_> = actual.iter().map(ForeignKeySnapshot::identity).collect();

    ForeignKeyDiff {
        missing: expected
            .iter()
            .filter(|fk| !actual_ids.contains(&fk.identity()))
            .cloned()
            .collect(),
        extra: actual
            .iter()
            .filter(|fk| !expected_ids.contains(&fk.identity()))
            .cloned()
            .collect(),
    }
}
