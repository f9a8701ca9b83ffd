//! Migration generation seam.
//!
//! The engine describes what an artifact must do as a list of
//! [`GeneratorAction`]s; a [`MigrationGenerator`] turns them into a forward and
//! reverse pair. [`repair_actions`] derives actions from a schema diff.

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dependency::DependencyResolver;
use crate::diff::SchemaDiff;
use crate::error::MigrateResult;
use crate::snapshot::{ColumnSnapshot, ForeignKeySnapshot, IndexSnapshot, SchemaSnapshot};

/// Full description of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name.
    pub name: String,
    /// Columns in order.
    pub columns: Vec<ColumnSnapshot>,
    /// Indexes, primary key included.
    pub indexes: Vec<IndexSnapshot>,
    /// Foreign keys.
    pub foreign_keys: Vec<ForeignKeySnapshot>,
}

impl TableSpec {
    /// Extract a table from a snapshot.
    pub fn from_snapshot(snapshot: &SchemaSnapshot, table: &str) -> Self {
        Self {
            name: table.to_string(),
            columns: snapshot.columns_of(table).to_vec(),
            indexes: snapshot.indexes_of(table).to_vec(),
            foreign_keys: snapshot.foreign_keys_of(table).to_vec(),
        }
    }
}

/// One step of a generated migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GeneratorAction {
    /// Create a table.
    CreateTable(TableSpec),
    /// Drop a table; the spec is used to recreate it on rollback.
    DropTable(TableSpec),
    /// Add a column.
    AddColumn {
        /// Table name.
        table: String,
        /// Column to add.
        column: ColumnSnapshot,
    },
    /// Drop a column.
    DropColumn {
        /// Table name.
        table: String,
        /// Column being dropped.
        column: ColumnSnapshot,
    },
    /// Add an index.
    AddIndex {
        /// Table name.
        table: String,
        /// Index to add.
        index: IndexSnapshot,
    },
    /// Add a foreign key.
    AddForeignKey {
        /// Table name.
        table: String,
        /// Foreign key to add.
        foreign_key: ForeignKeySnapshot,
    },
}

impl GeneratorAction {
    /// Table the action operates on.
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable(spec) | Self::DropTable(spec) => &spec.name,
            Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::AddIndex { table, .. }
            | Self::AddForeignKey { table, .. } => table,
        }
    }

    /// Action name.
    pub fn action(&self) -> &'static str {
        match self {
            Self::CreateTable(_) => "create_table",
            Self::DropTable(_) => "drop_table",
            Self::AddColumn { .. } => "add_column",
            Self::DropColumn { .. } => "drop_column",
            Self::AddIndex { .. } => "add_index",
            Self::AddForeignKey { .. } => "add_foreign_key",
        }
    }
}

/// Actions that bring `actual` to `expected`, given their diff.
///
/// Tables are created in dependency order and dropped in reverse dependency
/// order. Type, nullability and default mismatches have no action and stay
/// visible in the diff only.
pub fn repair_actions(
    diff: &SchemaDiff,
    expected: &SchemaSnapshot,
    actual: &SchemaSnapshot,
) -> Vec<GeneratorAction> {
    let mut actions = Vec::new();

    let creation =
        DependencyResolver::new(diff.missing_tables.iter().cloned(), &expected.foreign_keys);
    for table in creation.creation_order() {
        actions.push(GeneratorAction::CreateTable(TableSpec::from_snapshot(expected, &table)));
    }

    for (table, columns) in &diff.column_diffs {
        for name in &columns.missing {
            if let Some(column) = expected.column(table, name) {
                actions.push(GeneratorAction::AddColumn {
                    table: table.clone(),
                    column: column.clone(),
                });
            }
        }
    }

    for (table, indexes) in &diff.index_diffs {
        for index in &indexes.missing {
            actions.push(GeneratorAction::AddIndex {
                table: table.clone(),
                index: index.clone(),
            });
        }
    }

    for (table, fks) in &diff.fk_diffs {
        for foreign_key in &fks.missing {
            actions.push(GeneratorAction::AddForeignKey {
                table: table.clone(),
                foreign_key: foreign_key.clone(),
            });
        }
    }

    for (table, columns) in &diff.column_diffs {
        for name in &columns.extra {
            if let Some(column) = actual.column(table, name) {
                actions.push(GeneratorAction::DropColumn {
                    table: table.clone(),
                    column: column.clone(),
                });
            }
        }
    }

    let removal = DependencyResolver::new(diff.extra_tables.iter().cloned(), &actual.foreign_keys);
    for table in removal.drop_order() {
        actions.push(GeneratorAction::DropTable(TableSpec::from_snapshot(actual, &table)));
    }

    actions
}

/// A written migration artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    /// Artifact location.
    pub path: PathBuf,
    /// SHA-256 of the forward migration.
    pub checksum: String,
    /// Tables the artifact touches.
    pub tables: BTreeSet<String>,
}

/// Emits migration artifacts.
#[async_trait]
pub trait MigrationGenerator: Send + Sync {
    /// Generate an artifact named `name` performing `actions`.
    async fn generate(
        &self,
        name: &str,
        actions: &[GeneratorAction],
    ) -> MigrateResult<GeneratedArtifact>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use pretty_assertions::assert_eq;

    fn expected() -> SchemaSnapshot {
        SchemaSnapshot::new()
            .with_table(
                "users",
                [
                    ColumnSnapshot::new("id", "bigint").auto_increment(),
                    ColumnSnapshot::new("email", "varchar(255)"),
                ],
            )
            .with_table(
                "posts",
                [
                    ColumnSnapshot::new("id", "bigint").auto_increment(),
                    ColumnSnapshot::new("user_id", "bigint"),
                ],
            )
            .with_foreign_key("posts", ForeignKeySnapshot::new("user_id", "users", "id"))
            .with_table(
                "comments",
                [
                    ColumnSnapshot::new("id", "bigint").auto_increment(),
                    ColumnSnapshot::new("post_id", "bigint"),
                ],
            )
            .with_foreign_key("comments", ForeignKeySnapshot::new("post_id", "posts", "id"))
    }

    #[test]
    fn test_action_names() {
        let action = GeneratorAction::AddColumn {
            table: "users".to_string(),
            column: ColumnSnapshot::new("email", "varchar(255)"),
        };
        assert_eq!(action.table(), "users");
        assert_eq!(action.action(), "add_column");

        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "add_column");
    }

    #[test]
    fn test_repair_creates_in_dependency_order() {
        let expected = expected();
        let actual = SchemaSnapshot::new();

        let actions = repair_actions(&diff(&expected, &actual), &expected, &actual);
        let tables: Vec<_> = actions.iter().map(GeneratorAction::table).collect();
        assert_eq!(tables, vec!["users", "posts", "comments"]);
        assert!(actions.iter().all(|a| a.action() == "create_table"));
    }

    #[test]
    fn test_repair_drops_in_reverse_order() {
        let expected = SchemaSnapshot::new();
        let actual = super::tests::expected();

        let actions = repair_actions(&diff(&expected, &actual), &expected, &actual);
        let tables: Vec<_> = actions.iter().map(GeneratorAction::table).collect();
        assert_eq!(tables, vec!["comments", "posts", "users"]);
        assert!(actions.iter().all(|a| a.action() == "drop_table"));
    }

    #[test]
    fn test_repair_columns_indexes_and_keys() {
        let expected = expected()
            .with_index("users", IndexSnapshot::new("users_email_unique", ["email"]).unique());
        let actual = SchemaSnapshot::new()
            .with_table(
                "users",
                [
                    ColumnSnapshot::new("id", "bigint").auto_increment(),
                    ColumnSnapshot::new("nickname", "varchar(50)"),
                ],
            )
            .with_table(
                "posts",
                [
                    ColumnSnapshot::new("id", "bigint").auto_increment(),
                    ColumnSnapshot::new("user_id", "bigint"),
                ],
            )
            .with_table(
                "comments",
                [
                    ColumnSnapshot::new("id", "bigint").auto_increment(),
                    ColumnSnapshot::new("post_id", "bigint"),
                ],
            )
            .with_foreign_key("comments", ForeignKeySnapshot::new("post_id", "posts", "id"));

        let actions = repair_actions(&diff(&expected, &actual), &expected, &actual);
        let summary: Vec<_> = actions.iter().map(|a| (a.action(), a.table())).collect();
        assert_eq!(
            summary,
            vec![
                ("add_column", "users"),
                ("add_index", "users"),
                ("add_foreign_key", "posts"),
                ("drop_column", "users"),
            ]
        );
    }
}
