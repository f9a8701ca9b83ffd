//! # tidemark-migrate
//!
//! Drift reconciliation for migration-managed databases.
//!
//! This crate keeps a database's migration bookkeeping and its actual schema
//! consistent with an ordered set of declarative migration definitions:
//! - Classification of every migration into one of six consistency states
//! - Structural diffing of two schema snapshots with normalized types
//! - Replay of redundant per-table migrations into one consolidated artifact
//! - Bookkeeping fixes applied inside a single transaction
//! - Optional shadow database verification of consolidated artifacts
//!
//! ## Architecture
//!
//! Three evidence sources feed the classifier. Its states drive bookkeeping
//! fixes; definitions drive consolidation.
//!
//! ```text
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │ Definitions  │  │ Bookkeeping  │  │ Live Schema  │
//! └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!        │                 │                 │
//!        └────────────┬────┴─────────────────┘
//!                     ▼
//!             ┌────────────────┐      ┌─────────────┐
//!             │  Classifier    │─────▶│  Fix Plan   │
//!             └────────────────┘      └─────────────┘
//!                     │
//!                     ▼
//!             ┌────────────────┐      ┌─────────────┐
//!             │ Replay Engine  │─────▶│  Generator  │
//!             └────────────────┘      └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidemark_migrate::{DriftAnalyzer, ReconcileConfig};
//!
//! async fn reconcile() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ReconcileConfig::load("tidemark.toml").await?;
//!
//!     // Store and introspector are provided by your database driver
//!     let analyzer = DriftAnalyzer::new(config, store, introspector);
//!
//!     let report = analyzer.analyze().await?;
//!     println!("{}", report.summary());
//!
//!     let fixes = analyzer.apply_fixes(&report).await?;
//!     println!("Inserted {} records", fixes.inserted.len());
//!
//!     let plans = analyzer.plan_consolidations().await?;
//!     for result in analyzer.consolidate(&plans).await? {
//!         println!("{} -> {}", result.table, result.generated_artifact_path);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Migration States
//!
//! | State | Meaning | Fix |
//! |---|---|---|
//! | `OK` | Record, file and schema agree | none |
//! | `BOGUS_RECORD` | Recorded but the schema shows it never ran | delete record |
//! | `MISSING_FILE` | Recorded, table exists, file gone | report only |
//! | `ORPHAN_RECORD` | Recorded, file and table gone | delete record |
//! | `LOST_RECORD` | Applied to the schema but not recorded | insert record |
//! | `NEW_MIGRATION` | Not yet applied | none |

pub mod classify;
pub mod config;
pub mod consolidate;
pub mod definition;
pub mod dependency;
pub mod diff;
pub mod engine;
pub mod error;
pub mod file;
pub mod generator;
pub mod history;
pub mod introspect;
pub mod logging;
pub mod shadow;
pub mod snapshot;
pub mod sql;
pub mod types;

// Re-exports
pub use classify::{
    FixAction, MigrationClassifier, MigrationState, MigrationStatus, Presence, RegexMatcher,
    SchemaEvidence, TableNameInferrer, TableNameMatcher, is_applied_to_schema,
};
pub use config::ReconcileConfig;
pub use consolidate::{
    CandidateGroup, ConsolidationPlan, ConsolidationResult, ReplayOutcome, ReplayState, SkipReason,
    consolidate, consolidate_table, find_candidates, is_consolidatable, replay,
};
pub use definition::{
    DefinitionExtractor, DownOperation, JsonDefinitionExtractor, MigrationDefinition, OperationType,
};
pub use dependency::{DependencyResolver, PivotCandidate};
pub use diff::{ColumnDiff, ForeignKeyDiff, IndexDiff, SchemaDiff, SchemaDiffer, diff};
pub use engine::{DriftAnalyzer, DriftReport, Evidence};
pub use error::{MigrateResult, MigrationError};
pub use file::FileMigrationGenerator;
pub use generator::{
    GeneratedArtifact, GeneratorAction, MigrationGenerator, TableSpec, repair_actions,
};
pub use history::{
    BookkeepingRecord, BookkeepingStore, FixPlan, FixReport, InMemoryBookkeepingStore,
};
pub use introspect::{
    ColumnInfo, ForeignKeyInfo, IndexInfo, IntrospectionConfig, IntrospectionResult, Introspector,
    SnapshotBuilder, TableInfo,
};
pub use shadow::{ShadowConfig, ShadowDatabase, VerificationOutcome, verify_consolidation};
pub use snapshot::{ColumnSnapshot, ForeignKeySnapshot, IndexKind, IndexSnapshot, SchemaSnapshot};
pub use sql::{Dialect, MigrationSql, SqlGenerator};
pub use types::{normalize_default, normalize_type};
