//! Reconciliation configuration.
//!
//! Settings live in `tidemark.toml` at the project root:
//!
//! ```toml
//! bookkeeping_table = "migrations"
//! migrations_dir = "database/migrations"
//! output_dir = "database/migrations"
//! dialect = "postgres"
//! dry_run = false
//!
//! [shadow]
//! enabled = true
//! prefix = "_tidemark_shadow_"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};
use crate::introspect::IntrospectionConfig;
use crate::shadow::ShadowConfig;
use crate::sql::Dialect;

/// Default config file name.
pub const CONFIG_FILE_NAME: &str = "tidemark.toml";

/// Default migrations directory.
pub const MIGRATIONS_DIR: &str = "database/migrations";

/// Configuration for a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Name of the bookkeeping table.
    pub bookkeeping_table: String,
    /// Directory containing migration definitions.
    pub migrations_dir: PathBuf,
    /// Directory consolidated artifacts are written to.
    pub output_dir: PathBuf,
    /// SQL dialect of generated artifacts.
    pub dialect: Dialect,
    /// Report fixes without applying them.
    pub dry_run: bool,
    /// Tables never treated as drift.
    pub exclude_tables: Vec<String>,
    /// Shadow database settings.
    pub shadow: ShadowConfig,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            bookkeeping_table: "migrations".to_string(),
            migrations_dir: PathBuf::from(MIGRATIONS_DIR),
            output_dir: PathBuf::from(MIGRATIONS_DIR),
            dialect: Dialect::default(),
            dry_run: false,
            exclude_tables: Vec::new(),
            shadow: ShadowConfig::default(),
        }
    }
}

impl ReconcileConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bookkeeping table name.
    pub fn bookkeeping_table(mut self, table: impl Into<String>) -> Self {
        self.bookkeeping_table = table.into();
        self
    }

    /// Set the migrations directory.
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Set the output directory.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the SQL dialect.
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Enable or disable dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Exclude a table from drift analysis.
    pub fn exclude_table(mut self, table: impl Into<String>) -> Self {
        self.exclude_tables.push(table.into());
        self
    }

    /// Set shadow database settings.
    pub fn shadow(mut self, shadow: ShadowConfig) -> Self {
        self.shadow = shadow;
        self
    }

    /// Introspection settings derived from this config.
    pub fn introspection(&self) -> IntrospectionConfig {
        IntrospectionConfig::new()
            .bookkeeping_table(self.bookkeeping_table.clone())
            .exclude_tables(self.exclude_tables.clone())
    }

    /// Load configuration from a file; a missing file yields defaults.
    pub async fn load(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            MigrationError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML.
    pub fn parse(content: &str) -> MigrateResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MigrationError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub async fn save(&self, path: impl AsRef<Path>) -> MigrateResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| MigrationError::config(format!("Failed to serialize config: {}", e)))?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> MigrateResult<()> {
        if self.bookkeeping_table.trim().is_empty() {
            return Err(MigrationError::config("bookkeeping_table must not be empty"));
        }
        if self.shadow.enabled && self.shadow.prefix.is_empty() {
            return Err(MigrationError::config(
                "shadow.prefix must not be empty when shadow verification is enabled",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ReconcileConfig::default();
        assert_eq!(config.bookkeeping_table, "migrations");
        assert_eq!(config.dialect, Dialect::Postgres);
        assert!(!config.dry_run);
        assert!(!config.shadow.enabled);
    }

    #[test]
    fn test_parse_partial() {
        let config = ReconcileConfig::parse(
            r#"
            bookkeeping_table = "schema_migrations"
            dialect = "mysql"
            dry_run = true

            [shadow]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.bookkeeping_table, "schema_migrations");
        assert_eq!(config.dialect, Dialect::MySql);
        assert!(config.dry_run);
        assert!(config.shadow.enabled);
        assert_eq!(config.shadow.prefix, "_tidemark_shadow_");
        assert_eq!(config.migrations_dir, PathBuf::from(MIGRATIONS_DIR));
    }

    #[test]
    fn test_parse_errors() {
        let err = ReconcileConfig::parse("dry_run = \"sometimes\"").unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));

        let err = ReconcileConfig::parse("bookkeeping_table = \"\"").unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[test]
    fn test_introspection_excludes_bookkeeping() {
        let config = ReconcileConfig::new()
            .bookkeeping_table("ledger")
            .exclude_table("sessions");
        let introspection = config.introspection();

        assert!(!introspection.should_include_table("ledger"));
        assert!(!introspection.should_include_table("sessions"));
        assert!(introspection.should_include_table("users"));
    }

    #[tokio::test]
    async fn test_load_missing_and_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let loaded = ReconcileConfig::load(&path).await.unwrap();
        assert_eq!(loaded, ReconcileConfig::default());

        let config = ReconcileConfig::new()
            .output_dir("out")
            .dialect(Dialect::MySql)
            .shadow(ShadowConfig::enabled());
        config.save(&path).await.unwrap();

        let loaded = ReconcileConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }
}
