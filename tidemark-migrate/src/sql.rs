//! SQL rendering of generator actions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::generator::{GeneratorAction, TableSpec};
use crate::snapshot::{ColumnSnapshot, ForeignKeySnapshot, IndexKind, IndexSnapshot};

/// Target SQL dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL.
    #[default]
    Postgres,
    /// MySQL / MariaDB.
    #[serde(alias = "mariadb")]
    MySql,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::MySql => write!(f, "mysql"),
        }
    }
}

/// Generated SQL for a migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSql {
    /// SQL to apply the migration.
    pub up: String,
    /// SQL to rollback the migration.
    pub down: String,
}

impl MigrationSql {
    /// Check if the migration is empty.
    pub fn is_empty(&self) -> bool {
        self.up.trim().is_empty()
    }
}

/// Renders [`GeneratorAction`]s as SQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlGenerator {
    dialect: Dialect,
}

impl SqlGenerator {
    /// Create a generator for a dialect.
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Get the dialect.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Render actions; the down side undoes them in reverse order.
    pub fn generate(&self, actions: &[GeneratorAction]) -> MigrationSql {
        let up: Vec<String> = actions.iter().flat_map(|a| self.forward(a)).collect();
        let down: Vec<String> = actions.iter().rev().flat_map(|a| self.reverse(a)).collect();

        MigrationSql {
            up: up.join("\n\n"),
            down: down.join("\n\n"),
        }
    }

    fn forward(&self, action: &GeneratorAction) -> Vec<String> {
        match action {
            GeneratorAction::CreateTable(spec) => self.create_table(spec),
            GeneratorAction::DropTable(spec) => vec![self.drop_table(&spec.name)],
            GeneratorAction::AddColumn { table, column } => vec![self.add_column(table, column)],
            GeneratorAction::DropColumn { table, column } => {
                vec![self.drop_column(table, &column.name)]
            }
            GeneratorAction::AddIndex { table, index } => vec![self.create_index(table, index)],
            GeneratorAction::AddForeignKey { table, foreign_key } => {
                vec![self.add_foreign_key(table, foreign_key)]
            }
        }
    }

    fn reverse(&self, action: &GeneratorAction) -> Vec<String> {
        match action {
            GeneratorAction::CreateTable(spec) => vec![self.drop_table(&spec.name)],
            GeneratorAction::DropTable(spec) => self.create_table(spec),
            GeneratorAction::AddColumn { table, column } => {
                vec![self.drop_column(table, &column.name)]
            }
            GeneratorAction::DropColumn { table, column } => vec![self.add_column(table, column)],
            GeneratorAction::AddIndex { table, index } => vec![self.drop_index(table, index)],
            GeneratorAction::AddForeignKey { table, foreign_key } => {
                vec![self.drop_foreign_key(table, foreign_key)]
            }
        }
    }

    fn quote(&self, ident: &str) -> String {
        match self.dialect {
            Dialect::Postgres => format!("\"{}\"", ident),
            Dialect::MySql => format!("`{}`", ident),
        }
    }

    fn quote_list(&self, idents: &[String]) -> String {
        idents
            .iter()
            .map(|i| self.quote(i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Generate CREATE TABLE plus the statements for its secondary indexes.
    fn create_table(&self, spec: &TableSpec) -> Vec<String> {
        let has_primary = spec.indexes.iter().any(|i| i.kind() == IndexKind::Primary);
        let mut lines: Vec<String> = spec
            .columns
            .iter()
            .map(|c| {
                let mut def = self.column_definition(c);
                if c.auto_increment && !has_primary {
                    def.push_str(" PRIMARY KEY");
                }
                def
            })
            .collect();

        for index in spec.indexes.iter().filter(|i| i.kind() == IndexKind::Primary) {
            lines.push(format!("PRIMARY KEY ({})", self.quote_list(&index.columns)));
        }

        for fk in &spec.foreign_keys {
            lines.push(format!(
                "CONSTRAINT {} {}",
                self.quote(&foreign_key_name(&spec.name, fk)),
                self.foreign_key_clause(fk)
            ));
        }

        let suffix = match self.dialect {
            Dialect::Postgres => "",
            Dialect::MySql => " ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        };

        let mut stmts = vec![format!(
            "CREATE TABLE {} (\n    {}\n){};",
            self.quote(&spec.name),
            lines.join(",\n    "),
            suffix
        )];

        for index in spec.indexes.iter().filter(|i| i.kind() != IndexKind::Primary) {
            stmts.push(self.create_index(&spec.name, index));
        }

        stmts
    }

    /// Generate a column definition.
    fn column_definition(&self, column: &ColumnSnapshot) -> String {
        let mut parts = vec![self.quote(&column.name), self.column_type(column)];

        if !column.nullable && !column.auto_increment {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = column.default.as_deref().filter(|_| !column.auto_increment) {
            parts.push(format!("DEFAULT {}", default));
        }

        parts.join(" ")
    }

    fn column_type(&self, column: &ColumnSnapshot) -> String {
        let normalized = column.normalized_type.as_str();
        match self.dialect {
            Dialect::Postgres => {
                if column.auto_increment {
                    return match normalized {
                        "integer" | "smallinteger" | "mediuminteger" => "SERIAL".to_string(),
                        _ => "BIGSERIAL".to_string(),
                    };
                }
                match normalized {
                    "boolean" => "BOOLEAN".to_string(),
                    "tinyinteger" | "smallinteger" => "SMALLINT".to_string(),
                    "integer" | "mediuminteger" => "INTEGER".to_string(),
                    "biginteger" => "BIGINT".to_string(),
                    "datetime" => "TIMESTAMP".to_string(),
                    "tinytext" | "mediumtext" | "longtext" => "TEXT".to_string(),
                    "blob" | "longblob" | "mediumblob" => "BYTEA".to_string(),
                    "double" => "DOUBLE PRECISION".to_string(),
                    "float" => "REAL".to_string(),
                    other => strip_unsigned(other).to_uppercase(),
                }
            }
            Dialect::MySql => {
                let base = match normalized {
                    "boolean" => "TINYINT(1)".to_string(),
                    "timestamptz" => "TIMESTAMP".to_string(),
                    "timetz" => "TIME".to_string(),
                    "jsonb" => "JSON".to_string(),
                    "bytea" => "BLOB".to_string(),
                    "uuid" => "CHAR(36)".to_string(),
                    "tinyinteger" => "TINYINT".to_string(),
                    "smallinteger" => "SMALLINT".to_string(),
                    "mediuminteger" => "MEDIUMINT".to_string(),
                    "integer" => "INT".to_string(),
                    "biginteger" => "BIGINT".to_string(),
                    other => other.to_uppercase(),
                };
                if column.auto_increment {
                    format!("{} UNSIGNED AUTO_INCREMENT", base)
                } else {
                    base
                }
            }
        }
    }

    fn drop_table(&self, name: &str) -> String {
        match self.dialect {
            Dialect::Postgres => format!("DROP TABLE IF EXISTS {} CASCADE;", self.quote(name)),
            Dialect::MySql => format!("DROP TABLE IF EXISTS {};", self.quote(name)),
        }
    }

    fn add_column(&self, table: &str, column: &ColumnSnapshot) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {};",
            self.quote(table),
            self.column_definition(column)
        )
    }

    fn drop_column(&self, table: &str, column: &str) -> String {
        match self.dialect {
            Dialect::Postgres => format!(
                "ALTER TABLE {} DROP COLUMN IF EXISTS {};",
                self.quote(table),
                self.quote(column)
            ),
            Dialect::MySql => format!(
                "ALTER TABLE {} DROP COLUMN {};",
                self.quote(table),
                self.quote(column)
            ),
        }
    }

    fn create_index(&self, table: &str, index: &IndexSnapshot) -> String {
        match index.kind() {
            IndexKind::Primary => format!(
                "ALTER TABLE {} ADD PRIMARY KEY ({});",
                self.quote(table),
                self.quote_list(&index.columns)
            ),
            kind => format!(
                "CREATE {}INDEX {} ON {} ({});",
                if kind == IndexKind::Unique { "UNIQUE " } else { "" },
                self.quote(&index.name),
                self.quote(table),
                self.quote_list(&index.columns)
            ),
        }
    }

    fn drop_index(&self, table: &str, index: &IndexSnapshot) -> String {
        match (self.dialect, index.kind()) {
            (Dialect::Postgres, IndexKind::Primary) => format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
                self.quote(table),
                self.quote(&format!("{}_pkey", table))
            ),
            (Dialect::MySql, IndexKind::Primary) => {
                format!("ALTER TABLE {} DROP PRIMARY KEY;", self.quote(table))
            }
            (Dialect::Postgres, _) => format!("DROP INDEX IF EXISTS {};", self.quote(&index.name)),
            (Dialect::MySql, _) => format!(
                "DROP INDEX {} ON {};",
                self.quote(&index.name),
                self.quote(table)
            ),
        }
    }

    fn foreign_key_clause(&self, fk: &ForeignKeySnapshot) -> String {
        let mut clause = format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote_list(&fk.columns),
            self.quote(&fk.foreign_table),
            self.quote_list(&fk.foreign_columns)
        );
        if let Some(action) = &fk.on_delete {
            clause.push_str(&format!(" ON DELETE {}", action.to_uppercase()));
        }
        if let Some(action) = &fk.on_update {
            clause.push_str(&format!(" ON UPDATE {}", action.to_uppercase()));
        }
        clause
    }

    fn add_foreign_key(&self, table: &str, fk: &ForeignKeySnapshot) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {};",
            self.quote(table),
            self.quote(&foreign_key_name(table, fk)),
            self.foreign_key_clause(fk)
        )
    }

    fn drop_foreign_key(&self, table: &str, fk: &ForeignKeySnapshot) -> String {
        let name = self.quote(&foreign_key_name(table, fk));
        match self.dialect {
            Dialect::Postgres => format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
                self.quote(table),
                name
            ),
            Dialect::MySql => {
                format!("ALTER TABLE {} DROP FOREIGN KEY {};", self.quote(table), name)
            }
        }
    }
}

fn strip_unsigned(normalized: &str) -> &str {
    normalized.strip_suffix(" unsigned").unwrap_or(normalized)
}

/// Conventional foreign key constraint name.
pub fn foreign_key_name(table: &str, fk: &ForeignKeySnapshot) -> String {
    format!("{}_{}_foreign", table, fk.columns.join("_"))
}
