//! # Tidemark
//!
//! Migration drift reconciliation for Rust.
//!
//! Tidemark cross-references migration definitions, the bookkeeping table and
//! the live schema to find drift, and provides:
//! - Six-state classification of every migration with a fix plan
//! - Normalized structural schema diffs
//! - Consolidation of redundant per-table migrations by replay
//! - SQL artifact generation for PostgreSQL and MySQL
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tidemark::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), MigrationError> {
//!     tidemark::migrate::logging::init();
//!
//!     let config = ReconcileConfig::load("tidemark.toml").await?;
//!     let analyzer = DriftAnalyzer::new(config, store, introspector);
//!
//!     let report = analyzer.analyze().await?;
//!     for state in report.states.iter().filter(|s| s.status.is_drift()) {
//!         println!("{}: {}", state.name, state.status);
//!     }
//!
//!     analyzer.apply_fixes(&report).await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Drift classification, schema diffing and consolidation.
pub mod migrate {
    pub use tidemark_migrate::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        BookkeepingStore, DriftAnalyzer, DriftReport, Introspector, MigrateResult,
        MigrationClassifier, MigrationDefinition, MigrationError, MigrationGenerator,
        MigrationStatus, ReconcileConfig, SchemaSnapshot, diff,
    };
}

// Re-export key types at the crate root
pub use migrate::{MigrateResult, MigrationError};
