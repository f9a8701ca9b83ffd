//! Bookkeeping table access and fixes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::{FixAction, MigrationState};
use crate::error::MigrateResult;

/// A row of the bookkeeping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookkeepingRecord {
    /// Migration name.
    pub name: String,
    /// Batch the migration was recorded in.
    pub batch: i64,
    /// When the record was written, if the store tracks it.
    pub recorded_at: Option<DateTime<Utc>>,
}

impl BookkeepingRecord {
    /// Create a record.
    pub fn new(name: impl Into<String>, batch: i64) -> Self {
        Self {
            name: name.into(),
            batch,
            recorded_at: None,
        }
    }
}

/// Persistent ledger of executed migrations.
///
/// Mutations made by [`apply_fix_plan`] are bracketed by `begin`/`commit`, with
/// `rollback` on failure. Stores without transactions keep the no-op defaults.
#[async_trait]
pub trait BookkeepingStore: Send + Sync {
    /// Get all records.
    async fn records(&self) -> MigrateResult<Vec<BookkeepingRecord>>;

    /// Insert a record.
    async fn insert(&self, name: &str, batch: i64) -> MigrateResult<()>;

    /// Delete a record; returns whether it existed.
    async fn delete(&self, name: &str) -> MigrateResult<bool>;

    /// Next unused batch number.
    async fn next_batch(&self) -> MigrateResult<i64>;

    /// Start a transaction.
    async fn begin(&self) -> MigrateResult<()> {
        Ok(())
    }

    /// Commit the transaction.
    async fn commit(&self) -> MigrateResult<()> {
        Ok(())
    }

    /// Roll back the transaction.
    async fn rollback(&self) -> MigrateResult<()> {
        Ok(())
    }
}

/// In-memory bookkeeping store.
#[derive(Debug, Default)]
pub struct InMemoryBookkeepingStore {
    records: RwLock<BTreeMap<String, BookkeepingRecord>>,
}

impl InMemoryBookkeepingStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with records.
    pub fn with_records(records: impl IntoIterator<Item = BookkeepingRecord>) -> Self {
        let store = Self::new();
        {
            let mut guard = store.records.write();
            for record in records {
                guard.insert(record.name.clone(), record);
            }
        }
        store
    }

    /// Check whether a record exists.
    pub fn contains(&self, name: &str) -> bool {
        self.records.read().contains_key(name)
    }
}

#[async_trait]
impl BookkeepingStore for InMemoryBookkeepingStore {
    async fn records(&self) -> MigrateResult<Vec<BookkeepingRecord>> {
        Ok(self.records.read().values().cloned().collect())
    }

    async fn insert(&self, name: &str, batch: i64) -> MigrateResult<()> {
        let record = BookkeepingRecord {
            name: name.to_string(),
            batch,
            recorded_at: Some(Utc::now()),
        };
        self.records.write().insert(name.to_string(), record);
        Ok(())
    }

    async fn delete(&self, name: &str) -> MigrateResult<bool> {
        Ok(self.records.write().remove(name).is_some())
    }

    async fn next_batch(&self) -> MigrateResult<i64> {
        let max = self.records.read().values().map(|r| r.batch).max().unwrap_or(0);
        Ok(max + 1)
    }
}

/// Bookkeeping changes derived from classified states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixPlan {
    /// Records to delete (bogus and orphaned).
    pub deletes: Vec<String>,
    /// Records to insert (lost).
    pub inserts: Vec<String>,
    /// Names reported but never changed (missing files).
    pub report_only: Vec<String>,
}

impl FixPlan {
    /// Build a plan from states.
    pub fn from_states(states: &[MigrationState]) -> Self {
        let mut plan = Self::default();
        for state in states {
            match state.fix_action() {
                FixAction::DeleteRecord => plan.deletes.push(state.name.clone()),
                FixAction::InsertRecord => plan.inserts.push(state.name.clone()),
                FixAction::ReportOnly => plan.report_only.push(state.name.clone()),
                FixAction::None => {}
            }
        }
        plan
    }

    /// Check whether the plan changes anything.
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.inserts.is_empty()
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        if self.is_empty() && self.report_only.is_empty() {
            return "Nothing to fix".to_string();
        }
        format!(
            "{} records to delete, {} to insert, {} report-only",
            self.deletes.len(),
            self.inserts.len(),
            self.report_only.len()
        )
    }
}

/// Outcome of applying a fix plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixReport {
    /// Records deleted.
    pub deleted: Vec<String>,
    /// Records inserted.
    pub inserted: Vec<String>,
    /// Batch the inserted records were written in.
    pub batch: Option<i64>,
    /// Names only reported.
    pub reported: Vec<String>,
    /// Whether the plan was only simulated.
    pub dry_run: bool,
}

/// Apply a fix plan; all inserted records share one new batch.
pub async fn apply_fix_plan<S>(store: &S, plan: &FixPlan) -> MigrateResult<FixReport>
where
    S: BookkeepingStore + ?Sized,
{
    store.begin().await?;
    match apply_in_transaction(store, plan).await {
        Ok(report) => {
            store.commit().await?;
            info!(
                deleted = report.deleted.len(),
                inserted = report.inserted.len(),
                batch = ?report.batch,
                "Applied bookkeeping fixes"
            );
            Ok(report)
        }
        Err(e) => {
            warn!(error = %e, "Bookkeeping fix failed, rolling back");
            store.rollback().await?;
            Err(e)
        }
    }
}

async fn apply_in_transaction<S>(store: &S, plan: &FixPlan) -> MigrateResult<FixReport>
where
    S: BookkeepingStore + ?Sized,
{
    let mut report = FixReport {
        reported: plan.report_only.clone(),
        ..FixReport::default()
    };

    for name in &plan.deletes {
        if store.delete(name).await? {
            report.deleted.push(name.clone());
        } else {
            warn!(migration = %name, "Record to delete was already gone");
        }
    }

    if !plan.inserts.is_empty() {
        let batch = store.next_batch().await?;
        for name in &plan.inserts {
            store.insert(name, batch).await?;
            report.inserted.push(name.clone());
        }
        report.batch = Some(batch);
    }

    Ok(report)
}

/// Describe what a plan would do without touching the store.
pub fn simulate_fix_plan(plan: &FixPlan) -> FixReport {
    FixReport {
        deleted: plan.deletes.clone(),
        inserted: plan.inserts.clone(),
        batch: None,
        reported: plan.report_only.clone(),
        dry_run: true,
    }
}
