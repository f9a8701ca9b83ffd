//! Consolidation of redundant per-table migrations.
//!
//! Definitions for one table are replayed in file order into a single net set of
//! columns, indexes and foreign keys. Anything added by one migration and removed
//! by a later one cancels out. The net set is handed to a
//! [`MigrationGenerator`](crate::generator::MigrationGenerator) which emits one
//! artifact replacing the originals.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::definition::{DownVerb, MigrationDefinition, OperationType};
use crate::error::{MigrateResult, MigrationError};
use crate::generator::{GeneratorAction, MigrationGenerator, TableSpec};
use crate::snapshot::{ColumnSnapshot, ForeignKeySnapshot, IndexIdentity, IndexKind, IndexSnapshot};
use crate::types::{FALLBACK_RAW_TYPE, resolve_declaration};

/// Why a definition cannot take part in consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Branches on runtime state.
    ConditionalLogic,
    /// Alters more than one table.
    MultiTable,
    /// Reads or writes rows.
    DataManipulation,
    /// Operation type unknown.
    UnknownOperation,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::ConditionalLogic => "contains conditional logic",
            Self::MultiTable => "touches multiple tables",
            Self::DataManipulation => "manipulates data",
            Self::UnknownOperation => "operation type is unknown",
        };
        f.write_str(reason)
    }
}

/// Get the reason a definition must be skipped, if any.
pub fn skip_reason(definition: &MigrationDefinition) -> Option<SkipReason> {
    if definition.has_conditional_logic {
        Some(SkipReason::ConditionalLogic)
    } else if definition.is_multi_table {
        Some(SkipReason::MultiTable)
    } else if definition.has_data_manipulation {
        Some(SkipReason::DataManipulation)
    } else if definition.operation_type == OperationType::Unknown {
        Some(SkipReason::UnknownOperation)
    } else {
        None
    }
}

/// Check whether a definition can be replayed.
pub fn is_consolidatable(definition: &MigrationDefinition) -> bool {
    skip_reason(definition).is_none()
}

/// A definition left out of consolidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDefinition {
    /// Migration name.
    pub name: String,
    /// Why it was skipped.
    pub reason: SkipReason,
}

/// Definitions of one table, partitioned for consolidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateGroup {
    /// Table name.
    pub table: String,
    /// Replayable definitions, in name order.
    pub consolidatable: Vec<MigrationDefinition>,
    /// Definitions that must stay as they are.
    pub skipped: Vec<SkippedDefinition>,
}

impl CandidateGroup {
    /// Total number of definitions for the table.
    pub fn total(&self) -> usize {
        self.consolidatable.len() + self.skipped.len()
    }
}

/// Group definitions by primary table and keep tables worth consolidating.
///
/// A table qualifies with at least two definitions of which at least two are
/// consolidatable. Definitions without a primary table are ignored.
pub fn find_candidates<'a, I>(definitions: I) -> BTreeMap<String, CandidateGroup>
where
    I: IntoIterator<Item = &'a MigrationDefinition>,
{
    let mut groups: BTreeMap<String, CandidateGroup> = BTreeMap::new();

    for definition in definitions {
        let Some(table) = definition.primary_table.as_deref() else {
            continue;
        };
        let group = groups
            .entry(table.to_string())
            .or_insert_with(|| CandidateGroup {
                table: table.to_string(),
                consolidatable: Vec::new(),
                skipped: Vec::new(),
            });
        match skip_reason(definition) {
            None => group.consolidatable.push(definition.clone()),
            Some(reason) => group.skipped.push(SkippedDefinition {
                name: definition.name.clone(),
                reason,
            }),
        }
    }

    groups.retain(|_, group| group.total() >= 2 && group.consolidatable.len() >= 2);
    for group in groups.values_mut() {
        group.consolidatable.sort_by(|a, b| a.name.cmp(&b.name));
        group.skipped.sort_by(|a, b| a.name.cmp(&b.name));
    }

    debug!(tables = groups.len(), "Found consolidation candidates");
    groups
}

/// A column in the replayed net set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayedColumn {
    /// Column name.
    pub name: String,
    /// Declaration tag it was added with.
    pub tag: String,
    /// Resolved SQL type.
    pub raw_type: String,
    /// Normalized type.
    pub normalized_type: String,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether the type is the generic fallback.
    pub approximated: bool,
}

impl ReplayedColumn {
    fn resolve(name: &str, tag: Option<&str>) -> Self {
        let resolved = resolve_declaration(tag.unwrap_or_default());
        Self {
            name: name.to_string(),
            tag: tag.unwrap_or_default().to_string(),
            raw_type: resolved.raw_type,
            normalized_type: resolved.normalized_type,
            nullable: false,
            approximated: resolved.approximated,
        }
    }

    /// Convert to a snapshot column.
    pub fn to_snapshot(&self) -> ColumnSnapshot {
        let column = ColumnSnapshot::new(&self.name, &self.raw_type);
        let column = if matches!(self.tag.as_str(), "id" | "increments" | "bigIncrements") {
            column.auto_increment()
        } else {
            column
        };
        if self.nullable { column.nullable() } else { column }
    }
}

/// An index in the replayed net set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayedIndex {
    /// Index kind.
    pub kind: IndexKind,
    /// Indexed columns, in declaration order.
    pub columns: Vec<String>,
}

impl ReplayedIndex {
    fn identity(&self) -> IndexIdentity {
        IndexIdentity::new(self.columns.iter().cloned(), self.kind)
    }

    /// Conventional index name for a table.
    pub fn name_for(&self, table: &str) -> String {
        match self.kind {
            IndexKind::Primary => format!("{}_pkey", table),
            IndexKind::Unique => format!("{}_{}_unique", table, self.columns.join("_")),
            IndexKind::Plain => format!("{}_{}_index", table, self.columns.join("_")),
        }
    }

    /// Convert to a snapshot index.
    pub fn to_snapshot(&self, table: &str) -> IndexSnapshot {
        let index = IndexSnapshot::new(self.name_for(table), self.columns.iter().cloned());
        match self.kind {
            IndexKind::Primary => index.primary(),
            IndexKind::Unique => index.unique(),
            IndexKind::Plain => index,
        }
    }
}

/// A foreign key in the replayed net set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayedForeignKey {
    /// Local column.
    pub column: String,
    /// Referenced table.
    pub references_table: Option<String>,
    /// Referenced column.
    pub references_column: Option<String>,
}

impl ReplayedForeignKey {
    /// Convert to a snapshot foreign key; `None` when the target table is unknown.
    pub fn to_snapshot(&self) -> Option<ForeignKeySnapshot> {
        let table = self.references_table.as_ref()?;
        let column = self.references_column.as_deref().unwrap_or("id");
        Some(ForeignKeySnapshot::new(&self.column, table, column))
    }
}

/// Fold state threaded through a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayState {
    columns: IndexMap<String, ReplayedColumn>,
    indexes: IndexMap<IndexIdentity, ReplayedIndex>,
    foreign_keys: IndexMap<String, ReplayedForeignKey>,
    creates_table: bool,
    approximated: bool,
}

impl ReplayState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one definition and return the next state.
    pub fn apply(mut self, definition: &MigrationDefinition) -> Self {
        if definition.operation_type == OperationType::Drop {
            self.columns.clear();
            self.indexes.clear();
            self.foreign_keys.clear();
            self.creates_table = false;
            return self;
        }

        if definition.operation_type == OperationType::Create {
            self.creates_table = true;
        }

        for name in &definition.added_columns {
            let tag = definition.added_column_decl_kind.get(name).map(String::as_str);
            let column = ReplayedColumn::resolve(name, tag);
            self.approximated |= column.approximated;
            self.columns.insert(name.clone(), column);
        }

        for added in &definition.added_indexes {
            let index = ReplayedIndex {
                kind: added.kind,
                columns: added.columns.clone(),
            };
            self.indexes.insert(index.identity(), index);
        }

        for added in &definition.added_foreign_keys {
            self.foreign_keys.insert(
                added.column.clone(),
                ReplayedForeignKey {
                    column: added.column.clone(),
                    references_table: added.references_table.clone(),
                    references_column: added.references_column.clone(),
                },
            );
        }

        for op in &definition.down_operations {
            match op.kind() {
                DownVerb::AddColumn => {
                    if let Some(column) = op.first_arg() {
                        self.remove_column(column);
                    }
                }
                DownVerb::AddIndex => self.remove_index(&op.verb, &op.args),
                DownVerb::AddForeign => {
                    if let Some(column) = op.first_arg() {
                        self.foreign_keys.shift_remove(column);
                    }
                }
                DownVerb::Drop | DownVerb::Other => {}
            }
        }

        for column in &definition.dropped_columns {
            self.remove_column(column);
        }

        self
    }

    fn remove_column(&mut self, column: &str) {
        self.columns.shift_remove(column);
        self.foreign_keys.shift_remove(column);
        self.indexes
            .retain(|_, index| !index.columns.iter().any(|c| c == column));
    }

    fn remove_index(&mut self, verb: &str, columns: &[String]) {
        let kind = match verb {
            "unique" => Some(IndexKind::Unique),
            "primary" => Some(IndexKind::Primary),
            _ => None,
        };
        let target = IndexIdentity::new(columns.iter().cloned(), IndexKind::Plain).columns;
        self.indexes.retain(|identity, _| {
            identity.columns != target || kind.is_some_and(|k| k != identity.kind)
        });
    }

    /// Check whether any column type had to be approximated.
    pub fn has_approximated_types(&self) -> bool {
        self.approximated
    }

    /// Finish the replay.
    pub fn finish(self) -> ReplayOutcome {
        ReplayOutcome {
            columns: self.columns.into_values().collect(),
            indexes: self.indexes.into_values().collect(),
            foreign_keys: self.foreign_keys.into_values().collect(),
            creates_table: self.creates_table,
            has_approximated_types: self.approximated,
        }
    }
}

/// Net result of a replay, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    /// Net columns.
    pub columns: Vec<ReplayedColumn>,
    /// Net indexes.
    pub indexes: Vec<ReplayedIndex>,
    /// Net foreign keys.
    pub foreign_keys: Vec<ReplayedForeignKey>,
    /// Whether the replayed migrations create the table.
    pub creates_table: bool,
    /// Whether any column type was approximated.
    pub has_approximated_types: bool,
}

impl ReplayOutcome {
    /// Check if the net set is empty.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.indexes.is_empty() && self.foreign_keys.is_empty()
    }

    /// Names of net columns.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Names of columns whose type was approximated.
    pub fn approximated_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.approximated)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Replay definitions in the given order.
pub fn replay<'a, I>(definitions: I) -> ReplayOutcome
where
    I: IntoIterator<Item = &'a MigrationDefinition>,
{
    definitions
        .into_iter()
        .fold(ReplayState::new(), ReplayState::apply)
        .finish()
}

/// Pure consolidation plan for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationPlan {
    /// Table name.
    pub table: String,
    /// Name of the artifact to generate.
    pub artifact_name: String,
    /// Names of replayed definitions, in replay order.
    pub consolidated: Vec<String>,
    /// Definitions left out.
    pub skipped: Vec<SkippedDefinition>,
    /// Net replay result.
    pub outcome: ReplayOutcome,
    /// Warnings for the operator.
    pub warnings: Vec<String>,
}

impl ConsolidationPlan {
    /// Plan the consolidation of `definitions` for `table`.
    ///
    /// Fails when a definition belongs to another table or fewer than two
    /// definitions are consolidatable.
    pub fn plan(table: &str, definitions: &[MigrationDefinition]) -> MigrateResult<Self> {
        if let Some(stray) = definitions
            .iter()
            .find(|d| d.primary_table.as_deref() != Some(table))
        {
            return Err(MigrationError::consolidation(format!(
                "'{}' does not belong to table '{}'",
                stray.name, table
            )));
        }

        let mut ordered: Vec<&MigrationDefinition> = definitions.iter().collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name));

        let (consolidatable, skipped): (Vec<_>, Vec<_>) =
            ordered.into_iter().partition(|d| is_consolidatable(d));

        if consolidatable.len() < 2 {
            return Err(MigrationError::consolidation(format!(
                "table '{}' has {} consolidatable migrations, at least 2 are required",
                table,
                consolidatable.len()
            )));
        }

        let outcome = replay(consolidatable.iter().copied());

        let mut warnings = Vec::new();
        if outcome.has_approximated_types {
            warnings.push(format!(
                "column types approximated as {}: {}",
                FALLBACK_RAW_TYPE,
                outcome.approximated_columns().join(", ")
            ));
        }
        for definition in consolidatable.iter().filter(|d| !d.is_reversible()) {
            warnings.push(format!(
                "'{}' has no usable down procedure; \
                 the consolidated reverse is derived from the net schema",
                definition.name
            ));
        }
        for fk in outcome.foreign_keys.iter().filter(|fk| fk.references_table.is_none()) {
            warnings.push(format!(
                "foreign key on '{}' has no known target and is omitted",
                fk.column
            ));
        }

        let skipped = skipped
            .into_iter()
            .filter_map(|d| {
                skip_reason(d).map(|reason| SkippedDefinition {
                    name: d.name.clone(),
                    reason,
                })
            })
            .collect();

        Ok(Self {
            table: table.to_string(),
            artifact_name: format!("consolidate_{}_table", table),
            consolidated: consolidatable.iter().map(|d| d.name.clone()).collect(),
            skipped,
            outcome,
            warnings,
        })
    }

    /// Plan from a candidate group.
    pub fn from_group(group: &CandidateGroup) -> MigrateResult<Self> {
        let mut plan = Self::plan(&group.table, &group.consolidatable)?;
        plan.skipped = group.skipped.clone();
        Ok(plan)
    }

    /// The net table as a generator spec.
    pub fn table_spec(&self) -> TableSpec {
        TableSpec {
            name: self.table.clone(),
            columns: self.outcome.columns.iter().map(ReplayedColumn::to_snapshot).collect(),
            indexes: self
                .outcome
                .indexes
                .iter()
                .map(|i| i.to_snapshot(&self.table))
                .collect(),
            foreign_keys: self
                .outcome
                .foreign_keys
                .iter()
                .filter_map(ReplayedForeignKey::to_snapshot)
                .collect(),
        }
    }

    /// Generator actions reproducing the net set.
    ///
    /// A replay that creates the table yields one `CreateTable`; otherwise the
    /// net additions become individual actions.
    pub fn to_actions(&self) -> Vec<GeneratorAction> {
        let spec = self.table_spec();
        if self.outcome.creates_table {
            return vec![GeneratorAction::CreateTable(spec)];
        }

        let table = spec.name;
        let columns = spec.columns.into_iter().map(|column| GeneratorAction::AddColumn {
            table: table.clone(),
            column,
        });
        let indexes = spec.indexes.into_iter().map(|index| GeneratorAction::AddIndex {
            table: table.clone(),
            index,
        });
        let fks = spec
            .foreign_keys
            .into_iter()
            .map(|foreign_key| GeneratorAction::AddForeignKey {
                table: table.clone(),
                foreign_key,
            });

        columns.chain(indexes).chain(fks).collect()
    }
}

/// Output of one table's consolidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationResult {
    /// Table name.
    pub table: String,
    /// Path of the generated artifact.
    pub generated_artifact_path: String,
    /// Migrations replaced by the artifact.
    pub consolidated_names: Vec<String>,
    /// Migrations left in place.
    pub skipped_names: Vec<String>,
    /// Warnings for the operator.
    pub warnings: Vec<String>,
}

/// Emit the artifact for a plan.
pub async fn consolidate<G>(
    plan: &ConsolidationPlan,
    generator: &G,
) -> MigrateResult<ConsolidationResult>
where
    G: MigrationGenerator + ?Sized,
{
    let artifact = generator
        .generate(&plan.artifact_name, &plan.to_actions())
        .await?;

    info!(
        table = %plan.table,
        consolidated = plan.consolidated.len(),
        skipped = plan.skipped.len(),
        path = %artifact.path.display(),
        "Consolidated migrations"
    );

    Ok(ConsolidationResult {
        table: plan.table.clone(),
        generated_artifact_path: artifact.path.display().to_string(),
        consolidated_names: plan.consolidated.clone(),
        skipped_names: plan.skipped.iter().map(|s| s.name.clone()).collect(),
        warnings: plan.warnings.clone(),
    })
}

/// Plan and emit the consolidation of one table.
pub async fn consolidate_table<G>(
    definitions: &[MigrationDefinition],
    table: &str,
    generator: &G,
) -> MigrateResult<ConsolidationResult>
where
    G: MigrationGenerator + ?Sized,
{
    let plan = ConsolidationPlan::plan(table, definitions)?;
    consolidate(&plan, generator).await
}
