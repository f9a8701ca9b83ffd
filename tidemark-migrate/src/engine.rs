//! Drift analysis engine.
//!
//! [`DriftAnalyzer`] gathers the three evidence sources (definitions on disk,
//! bookkeeping records, the live schema), classifies every migration and turns
//! the result into fixes, consolidations and repair artifacts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::{MigrationClassifier, MigrationState, MigrationStatus};
use crate::config::ReconcileConfig;
use crate::consolidate::{ConsolidationPlan, ConsolidationResult, consolidate, find_candidates};
use crate::definition::{
    DefinitionExtractor, JsonDefinitionExtractor, MigrationDefinition, extract_all, read_sources,
};
use crate::diff::{SchemaDiff, diff};
use crate::error::MigrateResult;
use crate::file::FileMigrationGenerator;
use crate::generator::{GeneratedArtifact, MigrationGenerator, repair_actions};
use crate::history::{BookkeepingStore, FixPlan, FixReport, apply_fix_plan, simulate_fix_plan};
use crate::introspect::{Introspector, introspect};
use crate::shadow::{NoShadowDatabase, ShadowDatabase, verify_consolidation};
use crate::snapshot::SchemaSnapshot;

/// Result of one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    /// Classified migrations, sorted by name.
    pub states: Vec<MigrationState>,
    /// Number of migrations per status.
    pub counts: BTreeMap<MigrationStatus, usize>,
    /// Bookkeeping changes that reconcile the drift.
    pub fix_plan: FixPlan,
    /// Warnings gathered while collecting evidence.
    pub warnings: Vec<String>,
    /// Duration of the run in milliseconds.
    pub duration_ms: i64,
}

impl DriftReport {
    fn new(states: Vec<MigrationState>, warnings: Vec<String>, duration_ms: i64) -> Self {
        let mut counts = BTreeMap::new();
        for state in &states {
            *counts.entry(state.status).or_insert(0) += 1;
        }
        let fix_plan = FixPlan::from_states(&states);
        Self {
            states,
            counts,
            fix_plan,
            warnings,
            duration_ms,
        }
    }

    /// Number of migrations in `status`.
    pub fn count(&self, status: MigrationStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Check if any migration drifted.
    pub fn has_drift(&self) -> bool {
        self.states.iter().any(|s| s.status.is_drift())
    }

    /// States in `status`.
    pub fn with_status(&self, status: MigrationStatus) -> impl Iterator<Item = &MigrationState> {
        self.states.iter().filter(move |s| s.status == status)
    }

    /// Get a summary of the report.
    pub fn summary(&self) -> String {
        if self.states.is_empty() {
            return "No migrations found".to_string();
        }

        let parts: Vec<String> = MigrationStatus::ALL
            .iter()
            .filter_map(|status| match self.count(*status) {
                0 => None,
                n => Some(format!("{} {}", n, status)),
            })
            .collect();

        format!("{} migrations: {}", self.states.len(), parts.join(", "))
    }
}

/// Evidence gathered for one run.
#[derive(Debug, Clone)]
pub struct Evidence {
    /// Migration names found on disk.
    pub files: BTreeSet<String>,
    /// Migration names in the bookkeeping table.
    pub records: BTreeSet<String>,
    /// Extracted definitions; `None` where extraction failed.
    pub definitions: BTreeMap<String, Option<MigrationDefinition>>,
    /// Live schema.
    pub schema: SchemaSnapshot,
    /// Warnings raised while gathering.
    pub warnings: Vec<String>,
}

/// The drift reconciliation engine.
pub struct DriftAnalyzer<S: BookkeepingStore, I: Introspector> {
    config: ReconcileConfig,
    store: S,
    introspector: I,
    classifier: MigrationClassifier,
    extractor: Box<dyn DefinitionExtractor>,
    source_extension: String,
    generator: Box<dyn MigrationGenerator>,
    shadow: Box<dyn ShadowDatabase>,
}

impl<S: BookkeepingStore, I: Introspector> DriftAnalyzer<S, I> {
    /// Create an engine reading JSON definitions and writing SQL artifacts.
    pub fn new(config: ReconcileConfig, store: S, introspector: I) -> Self {
        let generator = FileMigrationGenerator::new(&config.output_dir, config.dialect);
        Self {
            config,
            store,
            introspector,
            classifier: MigrationClassifier::new(),
            extractor: Box::new(JsonDefinitionExtractor),
            source_extension: "json".to_string(),
            generator: Box::new(generator),
            shadow: Box::new(NoShadowDatabase),
        }
    }

    /// Use a custom classifier.
    pub fn with_classifier(mut self, classifier: MigrationClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Use a custom extractor for files with `extension`.
    pub fn with_extractor(
        mut self,
        extractor: impl DefinitionExtractor + 'static,
        extension: impl Into<String>,
    ) -> Self {
        self.extractor = Box::new(extractor);
        self.source_extension = extension.into();
        self
    }

    /// Use a custom artifact generator.
    pub fn with_generator(mut self, generator: impl MigrationGenerator + 'static) -> Self {
        self.generator = Box::new(generator);
        self
    }

    /// Use a shadow database provider for verification.
    pub fn with_shadow(mut self, shadow: impl ShadowDatabase + 'static) -> Self {
        self.shadow = Box::new(shadow);
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Get the bookkeeping store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Gather definitions, records and the live schema.
    pub async fn gather(&self) -> MigrateResult<Evidence> {
        let sources = read_sources(&self.config.migrations_dir, &self.source_extension).await?;
        let definitions = extract_all(
            self.extractor.as_ref(),
            sources.iter().map(|(name, source)| (name.as_str(), source.as_str())),
        );
        let files: BTreeSet<String> = definitions.keys().cloned().collect();

        let records: BTreeSet<String> = self
            .store
            .records()
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();

        let introspection = introspect(&self.introspector, &self.config.introspection()).await?;

        let mut warnings = introspection.warnings;
        warnings.extend(
            definitions
                .iter()
                .filter(|(_, d)| d.is_none())
                .map(|(name, _)| format!("Could not extract a definition for '{}'", name)),
        );

        debug!(
            files = files.len(),
            records = records.len(),
            tables = introspection.snapshot.table_count(),
            "Gathered evidence"
        );

        Ok(Evidence {
            files,
            records,
            definitions,
            schema: introspection.snapshot,
            warnings,
        })
    }

    /// Classify every migration against the live database.
    pub async fn analyze(&self) -> MigrateResult<DriftReport> {
        let start = Instant::now();
        let evidence = self.gather().await?;
        let states = self.classify(&evidence);
        let duration_ms = start.elapsed().as_millis() as i64;
        let report = DriftReport::new(states, evidence.warnings, duration_ms);

        info!(
            migrations = report.states.len(),
            drift = report.has_drift(),
            duration_ms = report.duration_ms,
            "{}",
            report.summary()
        );
        Ok(report)
    }

    /// Classify gathered evidence.
    pub fn classify(&self, evidence: &Evidence) -> Vec<MigrationState> {
        self.classifier.classify_all(
            &evidence.files,
            &evidence.records,
            &evidence.definitions,
            &evidence.schema,
        )
    }

    /// Apply the report's fix plan, or simulate it in dry-run mode.
    pub async fn apply_fixes(&self, report: &DriftReport) -> MigrateResult<FixReport> {
        for name in &report.fix_plan.report_only {
            warn!(migration = %name, "Record has no migration file; left in place");
        }

        if self.config.dry_run {
            info!(summary = %report.fix_plan.summary(), "Dry run, bookkeeping untouched");
            return Ok(simulate_fix_plan(&report.fix_plan));
        }

        apply_fix_plan(&self.store, &report.fix_plan).await
    }

    /// Find and plan every consolidatable table.
    pub async fn plan_consolidations(&self) -> MigrateResult<Vec<ConsolidationPlan>> {
        let sources = read_sources(&self.config.migrations_dir, &self.source_extension).await?;
        let definitions = extract_all(
            self.extractor.as_ref(),
            sources.iter().map(|(name, source)| (name.as_str(), source.as_str())),
        );

        let candidates = find_candidates(definitions.values().flatten());
        let plans = candidates
            .values()
            .map(ConsolidationPlan::from_group)
            .collect::<MigrateResult<Vec<_>>>()?;

        debug!(tables = plans.len(), "Planned consolidations");
        Ok(plans)
    }

    /// Emit one artifact per plan and verify it against a shadow database.
    ///
    /// In dry-run mode nothing is written and the artifact path is empty.
    pub async fn consolidate(
        &self,
        plans: &[ConsolidationPlan],
    ) -> MigrateResult<Vec<ConsolidationResult>> {
        let mut results = Vec::with_capacity(plans.len());

        for plan in plans {
            if self.config.dry_run {
                let mut warnings = plan.warnings.clone();
                warnings.push("dry run, artifact not written".to_string());
                results.push(ConsolidationResult {
                    table: plan.table.clone(),
                    generated_artifact_path: String::new(),
                    consolidated_names: plan.consolidated.clone(),
                    skipped_names: plan.skipped.iter().map(|s| s.name.clone()).collect(),
                    warnings,
                });
                continue;
            }

            let mut result = consolidate(plan, self.generator.as_ref()).await?;
            let outcome = verify_consolidation(
                self.shadow.as_ref(),
                &self.config.shadow,
                &plan.consolidated,
                Path::new(&result.generated_artifact_path),
            )
            .await?;
            if let Some(warning) = outcome.warning() {
                result.warnings.push(warning);
            }
            results.push(result);
        }

        Ok(results)
    }

    /// Diff the live schema against `expected`.
    pub async fn schema_diff(
        &self,
        expected: &SchemaSnapshot,
    ) -> MigrateResult<(SchemaDiff, SchemaSnapshot)> {
        let actual = introspect(&self.introspector, &self.config.introspection())
            .await?
            .snapshot;
        Ok((diff(expected, &actual), actual))
    }

    /// Generate an artifact bringing the live schema to `expected`.
    ///
    /// Returns `None` when there is nothing to repair.
    pub async fn generate_repair(
        &self,
        expected: &SchemaSnapshot,
    ) -> MigrateResult<Option<GeneratedArtifact>> {
        let (diff, actual) = self.schema_diff(expected).await?;
        if !diff.has_differences() {
            return Ok(None);
        }

        let actions = repair_actions(&diff, expected, &actual);
        if actions.is_empty() {
            info!(summary = %diff.summary(), "Differences have no repair action");
            return Ok(None);
        }
        if self.config.dry_run {
            info!(actions = actions.len(), "Dry run, repair artifact not written");
            return Ok(None);
        }

        self.generator.generate("repair_schema", &actions).await.map(Some)
    }
}
