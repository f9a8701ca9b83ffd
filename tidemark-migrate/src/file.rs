//! Filesystem migration generator.
//!
//! Artifacts are written as `<timestamp>_<name>/up.sql` plus `down.sql` under
//! the configured output directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{MigrateResult, MigrationError};
use crate::generator::{GeneratedArtifact, GeneratorAction, MigrationGenerator};
use crate::sql::{Dialect, MigrationSql, SqlGenerator};

/// Compute the SHA-256 checksum of migration content.
pub fn compute_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Writes generated migrations to disk.
#[derive(Debug, Clone)]
pub struct FileMigrationGenerator {
    output_dir: PathBuf,
    sql: SqlGenerator,
}

impl FileMigrationGenerator {
    /// Create a generator writing into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>, dialect: Dialect) -> Self {
        Self {
            output_dir: output_dir.into(),
            sql: SqlGenerator::new(dialect),
        }
    }

    /// Get the output directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write rendered SQL under a timestamped directory.
    pub async fn write(&self, name: &str, sql: &MigrationSql) -> MigrateResult<PathBuf> {
        validate_name(name)?;

        let timestamp = Utc::now().format("%Y%m%d%H%M%S");
        let dir = self.output_dir.join(format!("{}_{}", timestamp, name));
        tokio::fs::create_dir_all(&dir).await?;

        tokio::fs::write(dir.join("up.sql"), &sql.up).await?;
        if !sql.down.is_empty() {
            tokio::fs::write(dir.join("down.sql"), &sql.down).await?;
        }

        Ok(dir)
    }
}

#[async_trait]
impl MigrationGenerator for FileMigrationGenerator {
    async fn generate(
        &self,
        name: &str,
        actions: &[GeneratorAction],
    ) -> MigrateResult<GeneratedArtifact> {
        if actions.is_empty() {
            return Err(MigrationError::generator(format!(
                "migration '{}' has no actions",
                name
            )));
        }

        let sql = self.sql.generate(actions);
        let path = self.write(name, &sql).await?;
        let checksum = compute_checksum(&sql.up);

        info!(
            name,
            path = %path.display(),
            actions = actions.len(),
            dialect = %self.sql.dialect(),
            "Wrote migration artifact"
        );

        Ok(GeneratedArtifact {
            path,
            checksum,
            tables: actions
                .iter()
                .map(|a| a.table().to_string())
                .collect::<BTreeSet<_>>(),
        })
    }
}

fn validate_name(name: &str) -> MigrateResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(MigrationError::generator(format!(
            "invalid migration name '{}'",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ColumnSnapshot;

    #[test]
    fn test_compute_checksum() {
        let checksum1 = compute_checksum("CREATE TABLE users();");
        let checksum2 = compute_checksum("CREATE TABLE users();");
        let checksum3 = compute_checksum("DROP TABLE users;");

        assert_eq!(checksum1, checksum2);
        assert_ne!(checksum1, checksum3);
        assert_eq!(checksum1.len(), 64);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("consolidate_users_table").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../escape").is_err());
    }

    #[tokio::test]
    async fn test_generate_writes_up_and_down() {
        let dir = tempfile::tempdir().unwrap();
        let generator = FileMigrationGenerator::new(dir.path(), Dialect::Postgres);
        let actions = vec![GeneratorAction::AddColumn {
            table: "users".to_string(),
            column: ColumnSnapshot::new("email", "varchar(255)"),
        }];

        let artifact = generator.generate("add_email", &actions).await.unwrap();

        assert!(artifact.path.starts_with(dir.path()));
        let dir_name = artifact.path.file_name().unwrap().to_str().unwrap();
        assert!(dir_name.ends_with("_add_email"));

        let up = tokio::fs::read_to_string(artifact.path.join("up.sql")).await.unwrap();
        let down = tokio::fs::read_to_string(artifact.path.join("down.sql")).await.unwrap();
        assert!(up.contains("ADD COLUMN \"email\""));
        assert!(down.contains("DROP COLUMN IF EXISTS \"email\""));
        assert_eq!(artifact.checksum, compute_checksum(&up));
        assert!(artifact.tables.contains("users"));
    }

    #[tokio::test]
    async fn test_generate_rejects_empty_actions() {
        let dir = tempfile::tempdir().unwrap();
        let generator = FileMigrationGenerator::new(dir.path(), Dialect::MySql);
        let err = generator.generate("nothing", &[]).await.unwrap_err();
        assert!(matches!(err, MigrationError::Generator(_)));
    }
}
