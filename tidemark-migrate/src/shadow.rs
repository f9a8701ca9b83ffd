//! Shadow database verification of consolidated artifacts.
//!
//! A shadow database is a disposable database used to check that a
//! consolidated artifact reproduces the schema of the migrations it replaces:
//!
//! 1. Provision a shadow database with a unique name
//! 2. Run the original migrations and capture a snapshot
//! 3. Provision a second shadow and run only the consolidated artifact
//! 4. Diff the two snapshots
//!
//! Platforms that cannot provision a shadow database degrade to
//! [`VerificationOutcome::Unavailable`] rather than failing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::diff::{SchemaDiff, diff};
use crate::error::{MigrateResult, MigrationError};
use crate::snapshot::SchemaSnapshot;

/// Configuration for shadow database verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Whether verification runs at all.
    pub enabled: bool,
    /// Prefix for shadow database names.
    pub prefix: String,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prefix: "_tidemark_shadow_".to_string(),
        }
    }
}

impl ShadowConfig {
    /// Create an enabled config.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    /// Set a custom prefix for shadow database names.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Generate a unique shadow database name.
    pub fn generate_name(&self) -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let mut hasher = DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        SystemTime::now().hash(&mut hasher);
        format!("{}{:x}_{:x}", self.prefix, timestamp, hasher.finish() as u32)
    }

    /// Check if a database name looks like a shadow database.
    pub fn is_shadow_database(&self, name: &str) -> bool {
        name.starts_with(&self.prefix)
    }
}

/// What to run against a shadow database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShadowMigration {
    /// An existing migration, by name.
    Named(String),
    /// A generated artifact.
    Artifact(PathBuf),
}

/// A provisioner of disposable databases.
#[async_trait]
pub trait ShadowDatabase: Send + Sync {
    /// Create `database`, run `migrations` in order and snapshot the result.
    ///
    /// Returns [`MigrationError::ShadowUnavailable`] when no database can be
    /// provisioned.
    async fn snapshot_after(
        &self,
        database: &str,
        migrations: &[ShadowMigration],
    ) -> MigrateResult<SchemaSnapshot>;

    /// Drop `database`.
    async fn drop_database(&self, _database: &str) -> MigrateResult<()> {
        Ok(())
    }
}

/// A shadow provider for platforms without disposable databases.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoShadowDatabase;

#[async_trait]
impl ShadowDatabase for NoShadowDatabase {
    async fn snapshot_after(
        &self,
        _database: &str,
        _migrations: &[ShadowMigration],
    ) -> MigrateResult<SchemaSnapshot> {
        Err(MigrationError::shadow_unavailable(
            "this platform cannot provision shadow databases",
        ))
    }
}

/// Result of verifying a consolidated artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// The artifact reproduces the original schema.
    Equivalent,
    /// The schemas differ; expected is the original, actual the artifact's.
    Diverged(SchemaDiff),
    /// Verification could not run.
    Unavailable(String),
}

impl VerificationOutcome {
    /// Check if the artifact was verified equivalent.
    pub fn is_equivalent(&self) -> bool {
        matches!(self, Self::Equivalent)
    }

    /// Warning to surface to the operator, if any.
    pub fn warning(&self) -> Option<String> {
        match self {
            Self::Equivalent => None,
            Self::Diverged(diff) => Some(format!(
                "consolidated artifact diverges from the original migrations: {}",
                diff.summary()
            )),
            Self::Unavailable(reason) => Some(format!("shadow verification skipped: {}", reason)),
        }
    }
}

/// Compare the schema of `originals` against that of the artifact at `artifact`.
pub async fn verify_consolidation<S>(
    shadow: &S,
    config: &ShadowConfig,
    originals: &[String],
    artifact: &Path,
) -> MigrateResult<VerificationOutcome>
where
    S: ShadowDatabase + ?Sized,
{
    if !config.enabled {
        return Ok(VerificationOutcome::Unavailable(
            "shadow verification is disabled".to_string(),
        ));
    }

    let originals: Vec<_> = originals.iter().cloned().map(ShadowMigration::Named).collect();
    let expected = match capture(shadow, config, &originals).await {
        Ok(snapshot) => snapshot,
        Err(MigrationError::ShadowUnavailable(reason)) => {
            warn!(%reason, "Shadow database unavailable");
            return Ok(VerificationOutcome::Unavailable(reason));
        }
        Err(e) => return Err(e),
    };

    let consolidated = [ShadowMigration::Artifact(artifact.to_path_buf())];
    let actual = match capture(shadow, config, &consolidated).await {
        Ok(snapshot) => snapshot,
        Err(MigrationError::ShadowUnavailable(reason)) => {
            warn!(%reason, "Shadow database unavailable");
            return Ok(VerificationOutcome::Unavailable(reason));
        }
        Err(e) => return Err(e),
    };

    let result = diff(&expected, &actual);
    debug!(summary = %result.summary(), "Shadow verification finished");
    if result.has_differences() {
        Ok(VerificationOutcome::Diverged(result))
    } else {
        Ok(VerificationOutcome::Equivalent)
    }
}

async fn capture<S>(
    shadow: &S,
    config: &ShadowConfig,
    migrations: &[ShadowMigration],
) -> MigrateResult<SchemaSnapshot>
where
    S: ShadowDatabase + ?Sized,
{
    let database = config.generate_name();
    let snapshot = shadow.snapshot_after(&database, migrations).await;
    if let Err(e) = shadow.drop_database(&database).await {
        warn!(database = %database, error = %e, "Failed to drop shadow database");
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ColumnSnapshot;
    use parking_lot::Mutex;

    fn artifact() -> PathBuf {
        PathBuf::from("out/20240101000000_consolidate_users_table")
    }

    /// Returns `original` for named migrations and `consolidated` for artifacts.
    struct FakeShadow {
        original: SchemaSnapshot,
        consolidated: SchemaSnapshot,
        dropped: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ShadowDatabase for FakeShadow {
        async fn snapshot_after(
            &self,
            _database: &str,
            migrations: &[ShadowMigration],
        ) -> MigrateResult<SchemaSnapshot> {
            match migrations.first() {
                Some(ShadowMigration::Artifact(_)) => Ok(self.consolidated.clone()),
                _ => Ok(self.original.clone()),
            }
        }

        async fn drop_database(&self, database: &str) -> MigrateResult<()> {
            self.dropped.lock().push(database.to_string());
            Ok(())
        }
    }

    fn users(columns: &[&str]) -> SchemaSnapshot {
        SchemaSnapshot::new().with_table(
            "users",
            columns.iter().map(|c| ColumnSnapshot::new(*c, "varchar(255)")),
        )
    }

    #[test]
    fn test_generate_name() {
        let config = ShadowConfig::default().with_prefix("_shadow_");
        let name = config.generate_name();
        assert!(config.is_shadow_database(&name));
        assert!(!config.is_shadow_database("production"));
    }

    #[tokio::test]
    async fn test_disabled_is_unavailable() {
        let config = ShadowConfig::default();
        let outcome = verify_consolidation(&NoShadowDatabase, &config, &[], &artifact())
            .await
            .unwrap();
        assert!(matches!(outcome, VerificationOutcome::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_unprovisionable_shadow_degrades() {
        let config = ShadowConfig::enabled();
        let originals = vec!["1_a".to_string()];
        let outcome = verify_consolidation(&NoShadowDatabase, &config, &originals, &artifact())
            .await
            .unwrap();
        let warning = outcome.warning().unwrap();
        assert!(warning.contains("cannot provision"));
    }

    #[tokio::test]
    async fn test_equivalent_and_diverged() {
        let shadow = FakeShadow {
            original: users(&["id", "email"]),
            consolidated: users(&["id", "email"]),
            dropped: Mutex::new(Vec::new()),
        };
        let config = ShadowConfig::enabled();
        let originals = vec!["1_create_users_table".to_string()];

        let outcome = verify_consolidation(&shadow, &config, &originals, &artifact())
            .await
            .unwrap();
        assert!(outcome.is_equivalent());
        assert_eq!(shadow.dropped.lock().len(), 2);

        let shadow = FakeShadow {
            consolidated: users(&["id"]),
            ..shadow
        };
        let outcome = verify_consolidation(&shadow, &config, &originals, &artifact())
            .await
            .unwrap();
        match outcome {
            VerificationOutcome::Diverged(diff) => {
                assert_eq!(diff.column_diffs["users"].missing, vec!["email"]);
            }
            other => panic!("expected divergence, got {:?}", other),
        }
    }
}
