//! Live database introspection into a [`SchemaSnapshot`].
//!
//! Drivers implement [`Introspector`] to return raw catalog rows; the pure
//! [`SnapshotBuilder`] turns those rows into a snapshot. The bookkeeping table is
//! always excluded so it never shows up as drift.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MigrateResult;
use crate::snapshot::{ColumnSnapshot, ForeignKeySnapshot, IndexSnapshot, SchemaSnapshot};

/// Configuration for introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionConfig {
    /// Database schema to introspect.
    pub database_schema: String,
    /// Bookkeeping table name, never included.
    pub bookkeeping_table: String,
    /// Tables to include (empty = all).
    pub include_tables: Vec<String>,
    /// Tables to exclude.
    pub exclude_tables: Vec<String>,
}

impl Default for IntrospectionConfig {
    fn default() -> Self {
        Self {
            database_schema: "public".to_string(),
            bookkeeping_table: "migrations".to_string(),
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
        }
    }
}

impl IntrospectionConfig {
    /// Create a new introspection config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database schema to introspect.
    pub fn database_schema(mut self, schema: impl Into<String>) -> Self {
        self.database_schema = schema.into();
        self
    }

    /// Set the bookkeeping table name.
    pub fn bookkeeping_table(mut self, table: impl Into<String>) -> Self {
        self.bookkeeping_table = table.into();
        self
    }

    /// Include only these tables.
    pub fn include_tables(mut self, tables: Vec<String>) -> Self {
        self.include_tables = tables;
        self
    }

    /// Exclude these tables.
    pub fn exclude_tables(mut self, tables: Vec<String>) -> Self {
        self.exclude_tables = tables;
        self
    }

    /// Check if a table should be included.
    pub fn should_include_table(&self, name: &str) -> bool {
        if name == self.bookkeeping_table || self.exclude_tables.iter().any(|t| t == name) {
            return false;
        }
        self.include_tables.is_empty() || self.include_tables.iter().any(|t| t == name)
    }
}

/// Raw table information from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    /// Table name.
    pub name: String,
    /// Table schema.
    pub schema: String,
    /// Table type (`BASE TABLE` or `VIEW`).
    pub table_type: String,
}

impl TableInfo {
    /// Create a base table row.
    pub fn base(name: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            table_type: "BASE TABLE".to_string(),
        }
    }

    /// Check if the row describes a view.
    pub fn is_view(&self) -> bool {
        self.table_type.eq_ignore_ascii_case("VIEW")
    }
}

/// Raw column information from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Full column type (e.g. `varchar(255)`, `bigint unsigned`).
    pub column_type: String,
    /// Whether the column is nullable.
    pub is_nullable: bool,
    /// Default value expression.
    pub column_default: Option<String>,
    /// Whether the column auto-increments.
    pub auto_increment: bool,
    /// Ordinal position, 1-based.
    pub ordinal_position: i32,
}

/// Raw index information from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Table name.
    pub table_name: String,
    /// Columns in the index.
    pub columns: Vec<String>,
    /// Whether the index is unique.
    pub is_unique: bool,
    /// Whether this is a primary key index.
    pub is_primary: bool,
}

/// Raw foreign key information from the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    /// Constraint name.
    pub name: String,
    /// Table name.
    pub table_name: String,
    /// Local columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub referenced_table: String,
    /// Referenced columns.
    pub referenced_columns: Vec<String>,
    /// On delete action.
    pub on_delete: Option<String>,
    /// On update action.
    pub on_update: Option<String>,
}

/// Trait for database introspection.
#[async_trait]
pub trait Introspector: Send + Sync {
    /// Get all tables in the database.
    async fn get_tables(&self, config: &IntrospectionConfig) -> MigrateResult<Vec<TableInfo>>;

    /// Get columns for a table.
    async fn get_columns(&self, table: &str, schema: &str) -> MigrateResult<Vec<ColumnInfo>>;

    /// Get indexes for a table.
    async fn get_indexes(&self, table: &str, schema: &str) -> MigrateResult<Vec<IndexInfo>>;

    /// Get foreign keys for a table.
    async fn get_foreign_keys(
        &self,
        table: &str,
        schema: &str,
    ) -> MigrateResult<Vec<ForeignKeyInfo>>;
}

/// A table left out of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTable {
    /// Table name.
    pub name: String,
    /// Reason it was skipped.
    pub reason: String,
}

/// Result of introspecting a database.
#[derive(Debug, Clone)]
pub struct IntrospectionResult {
    /// The captured snapshot.
    pub snapshot: SchemaSnapshot,
    /// Tables that were skipped.
    pub skipped_tables: Vec<SkippedTable>,
    /// Warnings generated during introspection.
    pub warnings: Vec<String>,
}

/// Builds a snapshot from raw catalog rows.
pub struct SnapshotBuilder {
    config: IntrospectionConfig,
    tables: Vec<TableInfo>,
    columns: BTreeMap<String, Vec<ColumnInfo>>,
    indexes: BTreeMap<String, Vec<IndexInfo>>,
    foreign_keys: BTreeMap<String, Vec<ForeignKeyInfo>>,
}

impl SnapshotBuilder {
    /// Create a new snapshot builder.
    pub fn new(config: IntrospectionConfig) -> Self {
        Self {
            config,
            tables: Vec::new(),
            columns: BTreeMap::new(),
            indexes: BTreeMap::new(),
            foreign_keys: BTreeMap::new(),
        }
    }

    /// Add table information.
    pub fn with_tables(mut self, tables: Vec<TableInfo>) -> Self {
        self.tables = tables;
        self
    }

    /// Add column information for a table.
    pub fn with_columns(mut self, table: &str, columns: Vec<ColumnInfo>) -> Self {
        self.columns.insert(table.to_string(), columns);
        self
    }

    /// Add index information for a table.
    pub fn with_indexes(mut self, table: &str, indexes: Vec<IndexInfo>) -> Self {
        self.indexes.insert(table.to_string(), indexes);
        self
    }

    /// Add foreign key information for a table.
    pub fn with_foreign_keys(mut self, table: &str, foreign_keys: Vec<ForeignKeyInfo>) -> Self {
        self.foreign_keys.insert(table.to_string(), foreign_keys);
        self
    }

    /// Build the snapshot from the collected rows.
    pub fn build(self) -> IntrospectionResult {
        let mut snapshot = SchemaSnapshot::new();
        let mut skipped_tables = Vec::new();
        let mut warnings = Vec::new();

        for table in &self.tables {
            if !self.config.should_include_table(&table.name) {
                skipped_tables.push(SkippedTable {
                    name: table.name.clone(),
                    reason: "Excluded by configuration".to_string(),
                });
                continue;
            }
            if table.is_view() {
                skipped_tables.push(SkippedTable {
                    name: table.name.clone(),
                    reason: "Views are not tracked".to_string(),
                });
                continue;
            }

            snapshot.add_table(&table.name);

            let mut columns = self.columns.get(&table.name).cloned().unwrap_or_default();
            if columns.is_empty() {
                warnings.push(format!("Table '{}' has no columns", table.name));
            }
            columns.sort_by_key(|c| c.ordinal_position);
            for column in &columns {
                snapshot.add_column(&table.name, build_column(column));
            }

            for index in self.indexes.get(&table.name).into_iter().flatten() {
                let mut built = IndexSnapshot::new(&index.name, index.columns.iter().cloned());
                if index.is_primary {
                    built = built.primary();
                } else if index.is_unique {
                    built = built.unique();
                }
                snapshot.add_index(&table.name, built);
            }

            for fk in self.foreign_keys.get(&table.name).into_iter().flatten() {
                snapshot.add_foreign_key(
                    &table.name,
                    ForeignKeySnapshot {
                        columns: fk.columns.clone(),
                        foreign_table: fk.referenced_table.clone(),
                        foreign_columns: fk.referenced_columns.clone(),
                        on_update: fk.on_update.clone(),
                        on_delete: fk.on_delete.clone(),
                    },
                );
            }
        }

        IntrospectionResult {
            snapshot,
            skipped_tables,
            warnings,
        }
    }
}

/// Convert a raw column; sequence defaults mark the column auto-incrementing.
fn build_column(info: &ColumnInfo) -> ColumnSnapshot {
    let sequence = info
        .column_default
        .as_deref()
        .is_some_and(|d| d.to_lowercase().starts_with("nextval("));

    let mut column = ColumnSnapshot::new(&info.name, &info.column_type);
    if info.is_nullable {
        column = column.nullable();
    }
    if info.auto_increment || sequence {
        column = column.auto_increment();
    } else if let Some(default) = &info.column_default {
        column = column.default_value(default);
    }
    column
}

/// Introspect a live database.
pub async fn introspect<I>(
    introspector: &I,
    config: &IntrospectionConfig,
) -> MigrateResult<IntrospectionResult>
where
    I: Introspector + ?Sized,
{
    let tables = introspector.get_tables(config).await?;
    let schema = config.database_schema.as_str();
    let mut builder = SnapshotBuilder::new(config.clone());

    for table in tables.iter().filter(|t| config.should_include_table(&t.name) && !t.is_view()) {
        let columns = introspector.get_columns(&table.name, schema).await?;
        let indexes = introspector.get_indexes(&table.name, schema).await?;
        let foreign_keys = introspector.get_foreign_keys(&table.name, schema).await?;
        builder = builder
            .with_columns(&table.name, columns)
            .with_indexes(&table.name, indexes)
            .with_foreign_keys(&table.name, foreign_keys);
    }

    let result = builder.with_tables(tables).build();
    debug!(
        tables = result.snapshot.table_count(),
        skipped = result.skipped_tables.len(),
        "Introspected schema"
    );
    Ok(result)
}
