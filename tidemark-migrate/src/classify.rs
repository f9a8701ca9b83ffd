//! Migration state classification.
//!
//! Every migration name found on disk or in the bookkeeping table is assigned
//! one of six states by cross-referencing three evidence sources:
//!
//! | Record | File | Schema evidence          | State            |
//! |--------|------|--------------------------|------------------|
//! | yes    | yes  | extraction failed        | `OK` (warn)      |
//! | yes    | yes  | applied or indeterminate | `OK`             |
//! | yes    | yes  | not applied              | `BOGUS_RECORD`   |
//! | yes    | no   | table exists             | `MISSING_FILE`   |
//! | yes    | no   | table absent             | `ORPHAN_RECORD`  |
//! | no     | yes  | extraction failed        | `NEW_MIGRATION`  |
//! | no     | yes  | applied                  | `LOST_RECORD`    |
//! | no     | yes  | not applied or unknown   | `NEW_MIGRATION`  |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::definition::{MigrationDefinition, OperationType};
use crate::error::{MigrateResult, MigrationError};
use crate::snapshot::SchemaSnapshot;

/// Consistency state of one migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    /// Record, file and schema agree.
    Ok,
    /// Record exists but the schema shows the migration was never applied.
    BogusRecord,
    /// Record exists, the file is gone, the table still exists.
    MissingFile,
    /// Record exists, the file is gone, the table is gone too.
    OrphanRecord,
    /// The schema shows the migration applied but no record exists.
    LostRecord,
    /// Not yet applied.
    NewMigration,
}

impl MigrationStatus {
    /// All states in report order.
    pub const ALL: [MigrationStatus; 6] = [
        Self::Ok,
        Self::BogusRecord,
        Self::MissingFile,
        Self::OrphanRecord,
        Self::LostRecord,
        Self::NewMigration,
    ];

    /// Get the status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BogusRecord => "BOGUS_RECORD",
            Self::MissingFile => "MISSING_FILE",
            Self::OrphanRecord => "ORPHAN_RECORD",
            Self::LostRecord => "LOST_RECORD",
            Self::NewMigration => "NEW_MIGRATION",
        }
    }

    /// What a fix run does for this state.
    pub fn fix_action(&self) -> FixAction {
        match self {
            Self::BogusRecord | Self::OrphanRecord => FixAction::DeleteRecord,
            Self::LostRecord => FixAction::InsertRecord,
            Self::MissingFile => FixAction::ReportOnly,
            Self::Ok | Self::NewMigration => FixAction::None,
        }
    }

    /// Check if the state indicates drift.
    pub fn is_drift(&self) -> bool {
        !matches!(self, Self::Ok | Self::NewMigration)
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping fix for a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixAction {
    /// Leave untouched.
    None,
    /// Delete the bookkeeping record.
    DeleteRecord,
    /// Insert a bookkeeping record.
    InsertRecord,
    /// Report, never change.
    ReportOnly,
}

/// Tri-state answer to "is this migration reflected in the schema?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "applied", content = "reason", rename_all = "snake_case")]
pub enum SchemaEvidence {
    /// The schema confirms the migration.
    Applied(String),
    /// The schema contradicts the migration.
    NotApplied(String),
    /// Not enough evidence either way.
    Indeterminate(String),
}

impl SchemaEvidence {
    fn applied(reason: impl Into<String>) -> Self {
        Self::Applied(reason.into())
    }

    fn not_applied(reason: impl Into<String>) -> Self {
        Self::NotApplied(reason.into())
    }

    fn indeterminate(reason: impl Into<String>) -> Self {
        Self::Indeterminate(reason.into())
    }

    /// Get the reason.
    pub fn reason(&self) -> &str {
        match self {
            Self::Applied(r) | Self::NotApplied(r) | Self::Indeterminate(r) => r,
        }
    }

    /// `Some(true)`, `Some(false)` or `None` when indeterminate.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Applied(_) => Some(true),
            Self::NotApplied(_) => Some(false),
            Self::Indeterminate(_) => None,
        }
    }
}

/// Decide whether a definition's effects are present in the schema.
pub fn is_applied_to_schema(
    definition: &MigrationDefinition,
    schema: &SchemaSnapshot,
) -> SchemaEvidence {
    let Some(table) = definition.primary_table.as_deref() else {
        return SchemaEvidence::indeterminate("no primary table");
    };

    match definition.operation_type {
        OperationType::Create => {
            if schema.has_table(table) {
                SchemaEvidence::applied(format!("table '{}' exists", table))
            } else {
                SchemaEvidence::not_applied(format!("table '{}' does not exist", table))
            }
        }
        OperationType::Alter => alter_evidence(definition, table, schema),
        OperationType::Drop => drop_evidence(definition, table, schema),
        OperationType::Unknown => SchemaEvidence::indeterminate("unknown operation type"),
    }
}

fn alter_evidence(
    definition: &MigrationDefinition,
    table: &str,
    schema: &SchemaSnapshot,
) -> SchemaEvidence {
    if !schema.has_table(table) {
        return SchemaEvidence::not_applied(format!("table '{}' does not exist", table));
    }
    if !definition.adds_anything() {
        return SchemaEvidence::indeterminate("alter adds no columns, indexes or foreign keys");
    }

    if let Some(column) = definition
        .added_columns
        .iter()
        .find(|c| !schema.has_column(table, c))
    {
        return SchemaEvidence::not_applied(format!("column '{}.{}' is missing", table, column));
    }

    let indexes = schema.indexes_of(table);
    if let Some(index) = definition
        .added_indexes
        .iter()
        .find(|added| !indexes.iter().any(|i| i.covers(&added.columns)))
    {
        return SchemaEvidence::not_applied(format!(
            "no index on '{}' covers ({})",
            table,
            index.columns.join(", ")
        ));
    }

    let fks = schema.foreign_keys_of(table);
    if let Some(fk) = definition.added_foreign_keys.iter().find(|added| {
        !fks.iter().any(|existing| {
            existing.columns.contains(&added.column)
                && added
                    .references_table
                    .as_ref()
                    .is_none_or(|t| *t == existing.foreign_table)
                && added
                    .references_column
                    .as_ref()
                    .is_none_or(|c| existing.foreign_columns.contains(c))
        })
    }) {
        return SchemaEvidence::not_applied(format!(
            "foreign key on '{}.{}' is missing",
            table, fk.column
        ));
    }

    SchemaEvidence::applied("all added columns, indexes and foreign keys are present")
}

fn drop_evidence(
    definition: &MigrationDefinition,
    table: &str,
    schema: &SchemaSnapshot,
) -> SchemaEvidence {
    let removed = definition.removed_columns();
    let table_exists = schema.has_table(table);

    if removed.is_empty() {
        return if table_exists {
            SchemaEvidence::not_applied(format!("table '{}' still exists", table))
        } else {
            SchemaEvidence::applied(format!("table '{}' is gone", table))
        };
    }

    if !table_exists {
        return SchemaEvidence::applied(format!("table '{}' is gone", table));
    }

    match removed.iter().find(|c| schema.has_column(table, c)) {
        Some(column) => {
            SchemaEvidence::not_applied(format!("column '{}.{}' still exists", table, column))
        }
        None => SchemaEvidence::applied("all dropped columns are gone"),
    }
}

/// Infers a table name from the description part of a migration name.
pub trait TableNameMatcher: Send + Sync {
    /// Return the table name if this matcher recognizes the description.
    fn infer(&self, description: &str) -> Option<String>;
}

/// Matcher whose first capture group is the table name.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    pattern: Regex,
}

impl RegexMatcher {
    /// Compile a matcher.
    pub fn new(pattern: &str) -> MigrateResult<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| MigrationError::other(format!("invalid matcher pattern: {}", e)))?;
        Ok(Self { pattern })
    }
}

impl TableNameMatcher for RegexMatcher {
    fn infer(&self, description: &str) -> Option<String> {
        self.pattern
            .captures(description)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

const DEFAULT_PATTERNS: [&str; 4] = [
    r"^create_(\w+)_table$",
    r"_(?:to|from)_(\w+?)_table",
    r"^drop_(\w+)_table$",
    r"^(?:modify|update|alter)_(\w+)_table$",
];

/// Strip a leading timestamp or sequence prefix (`2024_01_01_000000_`).
pub fn strip_name_prefix(name: &str) -> &str {
    let mut rest = name;
    loop {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 || rest.as_bytes().get(digits) != Some(&b'_') {
            return rest;
        }
        rest = &rest[digits + 1..];
    }
}

/// Ordered list of table name matchers; the first match wins.
pub struct TableNameInferrer {
    matchers: Vec<Box<dyn TableNameMatcher>>,
}

impl TableNameInferrer {
    /// Create an inferrer with no matchers.
    pub fn empty() -> Self {
        Self {
            matchers: Vec::new(),
        }
    }

    /// Append a matcher after the existing ones.
    pub fn with_matcher(mut self, matcher: impl TableNameMatcher + 'static) -> Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    /// Infer the table a migration operates on from its name.
    pub fn infer(&self, name: &str) -> Option<String> {
        let description = strip_name_prefix(name);
        self.matchers.iter().find_map(|m| m.infer(description))
    }
}

impl Default for TableNameInferrer {
    fn default() -> Self {
        DEFAULT_PATTERNS
            .iter()
            .filter_map(|p| RegexMatcher::new(p).ok())
            .fold(Self::empty(), Self::with_matcher)
    }
}

impl fmt::Debug for TableNameInferrer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableNameInferrer")
            .field("matchers", &self.matchers.len())
            .finish()
    }
}

/// Which evidence sources know about a migration name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Bookkeeping record and file.
    RecordAndFile,
    /// Bookkeeping record only.
    RecordOnly,
    /// File only.
    FileOnly,
}

/// Derived state of one migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationState {
    /// Migration name.
    pub name: String,
    /// Assigned state.
    pub status: MigrationStatus,
    /// Extracted definition, if any.
    pub definition: Option<MigrationDefinition>,
    /// Table the migration operates on.
    pub table: Option<String>,
    /// Schema evidence consulted, if any.
    pub evidence: Option<SchemaEvidence>,
    /// Whether parts of the migration could not be analysed.
    pub partial_analysis: bool,
    /// Warnings raised during classification.
    pub warnings: Vec<String>,
}

impl MigrationState {
    fn new(name: &str, status: MigrationStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            definition: None,
            table: None,
            evidence: None,
            partial_analysis: false,
            warnings: Vec::new(),
        }
    }

    /// What a fix run does for this migration.
    pub fn fix_action(&self) -> FixAction {
        self.status.fix_action()
    }
}

/// Assigns states to migrations.
#[derive(Debug, Default)]
pub struct MigrationClassifier {
    inferrer: TableNameInferrer,
}

impl MigrationClassifier {
    /// Create a classifier with the default name matchers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom table name inferrer.
    pub fn with_inferrer(mut self, inferrer: TableNameInferrer) -> Self {
        self.inferrer = inferrer;
        self
    }

    /// Infer a table name from a migration name.
    pub fn infer_table_name(&self, name: &str) -> Option<String> {
        self.inferrer.infer(name)
    }

    /// Classify one migration.
    pub fn classify(
        &self,
        name: &str,
        presence: Presence,
        definition: Option<&MigrationDefinition>,
        schema: &SchemaSnapshot,
    ) -> MigrationState {
        let table = definition
            .and_then(|d| d.primary_table.clone())
            .or_else(|| self.inferrer.infer(name));

        let mut state = match presence {
            Presence::RecordAndFile => match definition {
                None => {
                    let mut state = MigrationState::new(name, MigrationStatus::Ok);
                    state.warnings.push(
                        "definition could not be extracted; trusting the bookkeeping record"
                            .to_string(),
                    );
                    state
                }
                Some(d) => {
                    let evidence = is_applied_to_schema(d, schema);
                    let status = match evidence {
                        SchemaEvidence::NotApplied(_) => MigrationStatus::BogusRecord,
                        _ => MigrationStatus::Ok,
                    };
                    let mut state = MigrationState::new(name, status);
                    state.evidence = Some(evidence);
                    state
                }
            },
            Presence::RecordOnly => match table.as_deref() {
                Some(t) if schema.has_table(t) => {
                    MigrationState::new(name, MigrationStatus::MissingFile)
                }
                Some(_) => MigrationState::new(name, MigrationStatus::OrphanRecord),
                None => {
                    let mut state = MigrationState::new(name, MigrationStatus::MissingFile);
                    state
                        .warnings
                        .push("table could not be inferred from the migration name".to_string());
                    state
                }
            },
            Presence::FileOnly => match definition {
                None => {
                    let mut state = MigrationState::new(name, MigrationStatus::NewMigration);
                    state
                        .warnings
                        .push("definition could not be extracted; treating as new".to_string());
                    state
                }
                Some(d) => {
                    let evidence = is_applied_to_schema(d, schema);
                    let status = match evidence {
                        SchemaEvidence::Applied(_) => MigrationStatus::LostRecord,
                        _ => MigrationStatus::NewMigration,
                    };
                    let mut state = MigrationState::new(name, status);
                    state.evidence = Some(evidence);
                    state
                }
            },
        };

        if let Some(d) = definition {
            if d.has_data_manipulation {
                state.partial_analysis = true;
                state.warnings.push(
                    "contains data manipulation; only schema effects were analysed".to_string(),
                );
            }
            if d.has_conditional_logic {
                state.partial_analysis = true;
                state
                    .warnings
                    .push("contains conditional logic; branches were not evaluated".to_string());
            }
        }

        state.table = table;
        state.definition = definition.cloned();
        state
    }

    /// Classify every name present in either the files or the records.
    ///
    /// `definitions` maps file names to their extracted definition, `None` when
    /// extraction failed. Results are sorted by name.
    pub fn classify_all(
        &self,
        files: &BTreeSet<String>,
        records: &BTreeSet<String>,
        definitions: &BTreeMap<String, Option<MigrationDefinition>>,
        schema: &SchemaSnapshot,
    ) -> Vec<MigrationState> {
        let states: Vec<MigrationState> = files
            .union(records)
            .map(|name| {
                let presence = match (records.contains(name), files.contains(name)) {
                    (true, true) => Presence::RecordAndFile,
                    (true, false) => Presence::RecordOnly,
                    _ => Presence::FileOnly,
                };
                let definition = definitions.get(name).and_then(Option::as_ref);
                self.classify(name, presence, definition, schema)
            })
            .collect();

        debug!(
            files = files.len(),
            records = records.len(),
            drift = states.iter().filter(|s| s.status.is_drift()).count(),
            "Classified migrations"
        );

        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{ColumnSnapshot, ForeignKeySnapshot, IndexKind, IndexSnapshot};
    use pretty_assertions::assert_eq;

    fn schema() -> SchemaSnapshot {
        SchemaSnapshot::new()
            .with_table(
                "users",
                [
                    ColumnSnapshot::new("id", "bigint").auto_increment(),
                    ColumnSnapshot::new("email", "varchar(255)"),
                ],
            )
            .with_index("users", IndexSnapshot::new("users_email_unique", ["email"]).unique())
            .with_table(
                "posts",
                [
                    ColumnSnapshot::new("id", "bigint").auto_increment(),
                    ColumnSnapshot::new("user_id", "bigint"),
                ],
            )
            .with_foreign_key("posts", ForeignKeySnapshot::new("user_id", "users", "id"))
    }

    #[test]
    fn test_status_names_and_fixes() {
        assert_eq!(MigrationStatus::BogusRecord.as_str(), "BOGUS_RECORD");
        assert_eq!(MigrationStatus::OrphanRecord.fix_action(), FixAction::DeleteRecord);
        assert_eq!(MigrationStatus::LostRecord.fix_action(), FixAction::InsertRecord);
        assert_eq!(MigrationStatus::MissingFile.fix_action(), FixAction::ReportOnly);
        assert_eq!(MigrationStatus::NewMigration.fix_action(), FixAction::None);
        assert_eq!(
            serde_json::to_string(&MigrationStatus::LostRecord).unwrap(),
            "\"LOST_RECORD\""
        );
    }

    #[test]
    fn test_infer_table_name() {
        let inferrer = TableNameInferrer::default();
        assert_eq!(
            inferrer.infer("2024_01_01_000000_create_users_table").as_deref(),
            Some("users")
        );
        assert_eq!(
            inferrer.infer("2024_01_02_000000_add_email_to_users_table").as_deref(),
            Some("users")
        );
        assert_eq!(
            inferrer.infer("0003_remove_flags_from_user_settings_table").as_deref(),
            Some("user_settings")
        );
        assert_eq!(inferrer.infer("drop_sessions_table").as_deref(), Some("sessions"));
        assert_eq!(inferrer.infer("2024_05_01_alter_posts_table").as_deref(), Some("posts"));
        assert_eq!(inferrer.infer("2024_01_01_000000_backfill_slugs"), None);
        assert_eq!(TableNameInferrer::empty().infer("create_users_table"), None);
    }

    #[test]
    fn test_custom_matcher_appended() {
        struct Rename;
        impl TableNameMatcher for Rename {
            fn infer(&self, description: &str) -> Option<String> {
                description.strip_prefix("rename_").map(str::to_string)
            }
        }

        let inferrer = TableNameInferrer::default().with_matcher(Rename);
        assert_eq!(inferrer.infer("2024_rename_accounts").as_deref(), Some("accounts"));
    }

    #[test]
    fn test_strip_name_prefix() {
        assert_eq!(strip_name_prefix("2024_01_01_000000_create_users_table"), "create_users_table");
        assert_eq!(strip_name_prefix("create_users_table"), "create_users_table");
        assert_eq!(strip_name_prefix("2024"), "2024");
    }

    #[test]
    fn test_create_evidence() {
        let present = MigrationDefinition::new("c", OperationType::Create).with_table("users");
        let absent = MigrationDefinition::new("c", OperationType::Create).with_table("teams");
        assert_eq!(is_applied_to_schema(&present, &schema()).as_bool(), Some(true));
        assert_eq!(is_applied_to_schema(&absent, &schema()).as_bool(), Some(false));
    }

    #[test]
    fn test_alter_evidence() {
        let schema = schema();

        let empty = MigrationDefinition::new("a", OperationType::Alter).with_table("users");
        assert_eq!(is_applied_to_schema(&empty, &schema).as_bool(), None);

        let applied = MigrationDefinition::new("a", OperationType::Alter)
            .with_table("users")
            .add_column("email", "string")
            .add_index(IndexKind::Unique, ["email"]);
        assert_eq!(is_applied_to_schema(&applied, &schema).as_bool(), Some(true));

        let missing_column = MigrationDefinition::new("a", OperationType::Alter)
            .with_table("users")
            .add_column("phone", "string");
        let evidence = is_applied_to_schema(&missing_column, &schema);
        assert_eq!(evidence.as_bool(), Some(false));
        assert!(evidence.reason().contains("phone"));

        let wrong_fk_target = MigrationDefinition::new("a", OperationType::Alter)
            .with_table("posts")
            .add_foreign_key("user_id", "accounts", "id");
        assert_eq!(is_applied_to_schema(&wrong_fk_target, &schema).as_bool(), Some(false));

        let mut unknown_target =
            MigrationDefinition::new("a", OperationType::Alter).with_table("posts");
        unknown_target.added_foreign_keys.push(crate::definition::AddedForeignKey {
            column: "user_id".to_string(),
            references_column: None,
            references_table: None,
        });
        assert_eq!(is_applied_to_schema(&unknown_target, &schema).as_bool(), Some(true));
    }

    #[test]
    fn test_drop_evidence() {
        let schema = schema();

        let drop_table = MigrationDefinition::new("d", OperationType::Drop).with_table("sessions");
        assert_eq!(is_applied_to_schema(&drop_table, &schema).as_bool(), Some(true));

        let drop_existing = MigrationDefinition::new("d", OperationType::Drop).with_table("users");
        assert_eq!(is_applied_to_schema(&drop_existing, &schema).as_bool(), Some(false));

        let drop_columns = MigrationDefinition::new("d", OperationType::Drop)
            .with_table("users")
            .drop_column("nickname");
        assert_eq!(is_applied_to_schema(&drop_columns, &schema).as_bool(), Some(true));

        let still_there = MigrationDefinition::new("d", OperationType::Drop)
            .with_table("users")
            .with_down(["addColumn(email)"]);
        assert_eq!(is_applied_to_schema(&still_there, &schema).as_bool(), Some(false));
    }

    #[test]
    fn test_missing_primary_table_is_indeterminate() {
        let definition = MigrationDefinition::new("x", OperationType::Create);
        assert_eq!(is_applied_to_schema(&definition, &schema()).as_bool(), None);
    }

    #[test]
    fn test_record_and_file_states() {
        let classifier = MigrationClassifier::new();
        let schema = schema();

        let bogus = MigrationDefinition::new("add_phone_to_users_table", OperationType::Alter)
            .with_table("users")
            .add_column("phone", "string");
        let state = classifier.classify(
            bogus.name.as_str(),
            Presence::RecordAndFile,
            Some(&bogus),
            &schema,
        );
        assert_eq!(state.status, MigrationStatus::BogusRecord);
        assert_eq!(state.table.as_deref(), Some("users"));

        let state = classifier.classify("whatever", Presence::RecordAndFile, None, &schema);
        assert_eq!(state.status, MigrationStatus::Ok);
        assert_eq!(state.warnings.len(), 1);

        let unknown = MigrationDefinition::new("u", OperationType::Unknown).with_table("users");
        let state = classifier.classify("u", Presence::RecordAndFile, Some(&unknown), &schema);
        assert_eq!(state.status, MigrationStatus::Ok);
    }

    #[test]
    fn test_record_only_states() {
        let classifier = MigrationClassifier::new();
        let schema = schema();

        let state =
            classifier.classify("2024_create_users_table", Presence::RecordOnly, None, &schema);
        assert_eq!(state.status, MigrationStatus::MissingFile);

        let state =
            classifier.classify("2024_create_teams_table", Presence::RecordOnly, None, &schema);
        assert_eq!(state.status, MigrationStatus::OrphanRecord);
        assert_eq!(state.table.as_deref(), Some("teams"));

        let state = classifier.classify("2024_backfill_slugs", Presence::RecordOnly, None, &schema);
        assert_eq!(state.status, MigrationStatus::MissingFile);
        assert!(state.warnings[0].contains("inferred"));
    }

    #[test]
    fn test_file_only_states() {
        let classifier = MigrationClassifier::new();
        let schema = schema();

        let applied = MigrationDefinition::new("create_users_table", OperationType::Create)
            .with_table("users");
        let state =
            classifier.classify("create_users_table", Presence::FileOnly, Some(&applied), &schema);
        assert_eq!(state.status, MigrationStatus::LostRecord);

        let pending = MigrationDefinition::new("create_teams_table", OperationType::Create)
            .with_table("teams");
        let state =
            classifier.classify("create_teams_table", Presence::FileOnly, Some(&pending), &schema);
        assert_eq!(state.status, MigrationStatus::NewMigration);

        let state = classifier.classify("broken", Presence::FileOnly, None, &schema);
        assert_eq!(state.status, MigrationStatus::NewMigration);
        assert!(!state.warnings.is_empty());
    }

    #[test]
    fn test_definition_table_wins_over_inferred_name() {
        let classifier = MigrationClassifier::new();
        let definition = MigrationDefinition::new("create_users_table", OperationType::Create)
            .with_table("members");
        let state = classifier.classify(
            "create_users_table",
            Presence::FileOnly,
            Some(&definition),
            &schema(),
        );
        assert_eq!(state.table.as_deref(), Some("members"));
        assert_eq!(state.status, MigrationStatus::NewMigration);
    }

    #[test]
    fn test_partial_analysis_never_changes_state() {
        let classifier = MigrationClassifier::new();
        let definition = MigrationDefinition::new("create_users_table", OperationType::Create)
            .with_table("users")
            .with_data_manipulation()
            .with_conditional_logic();

        let state = classifier.classify(
            "create_users_table",
            Presence::RecordAndFile,
            Some(&definition),
            &schema(),
        );
        assert_eq!(state.status, MigrationStatus::Ok);
        assert!(state.partial_analysis);
        assert_eq!(state.warnings.len(), 2);
    }

    #[test]
    fn test_classify_all_covers_union() {
        let classifier = MigrationClassifier::new();
        let files: BTreeSet<String> = ["0001_create_users_table", "0002_create_teams_table"]
            .into_iter()
            .map(String::from)
            .collect();
        let records: BTreeSet<String> = [
            "0001_create_users_table",
            "0003_create_gone_table",
            "0004_backfill_legacy_data",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        let definitions = BTreeMap::from([
            (
                "0001_create_users_table".to_string(),
                Some(
                    MigrationDefinition::new("0001_create_users_table", OperationType::Create)
                        .with_table("users"),
                ),
            ),
            ("0002_create_teams_table".to_string(), None),
        ]);

        let states = classifier.classify_all(&files, &records, &definitions, &schema());
        let statuses: Vec<_> = states
            .iter()
            .map(|s| (s.name.as_str(), s.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("0001_create_users_table", MigrationStatus::Ok),
                ("0002_create_teams_table", MigrationStatus::NewMigration),
                ("0003_create_gone_table", MigrationStatus::OrphanRecord),
                ("0004_backfill_legacy_data", MigrationStatus::MissingFile),
            ]
        );

        let uninferable = &states[3];
        assert_eq!(uninferable.table, None);
        assert_eq!(uninferable.warnings.len(), 1);
    }
}
