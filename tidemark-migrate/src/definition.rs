//! Structured fact records of migration files.
//!
//! A [`MigrationDefinition`] is produced once per migration by an external
//! extractor and is read-only afterwards. The engine never looks at migration
//! source text; it only consumes these records, usually loaded from the
//! extractor's JSON output.

use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::snapshot::IndexKind;

/// What a migration does to its primary table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Creates the table.
    Create,
    /// Alters an existing table.
    Alter,
    /// Drops the table or some of its columns.
    Drop,
    /// The extractor could not tell.
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Alter => write!(f, "alter"),
            Self::Drop => write!(f, "drop"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// An index declared by a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedIndex {
    /// Index kind.
    #[serde(rename = "type")]
    pub kind: IndexKind,
    /// Indexed columns.
    pub columns: Vec<String>,
}

/// A foreign key declared by a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedForeignKey {
    /// Local column.
    pub column: String,
    /// Referenced column, when the extractor could see it.
    #[serde(default)]
    pub references_column: Option<String>,
    /// Referenced table, when the extractor could see it.
    #[serde(default)]
    pub references_table: Option<String>,
}

/// Classified verb of a down operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownVerb {
    /// `addColumn(x)`: the up side added `x`.
    AddColumn,
    /// `addIndex(...)`, `index(...)`, `unique(...)` or `primary(...)`.
    AddIndex,
    /// `addForeign(x)`: the up side added a foreign key on `x`.
    AddForeign,
    /// Any `drop*` descriptor.
    Drop,
    /// Anything else.
    Other,
}

/// One operation of a down procedure, such as `dropColumn(email)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct DownOperation {
    /// Operation verb.
    pub verb: String,
    /// Unquoted arguments.
    pub args: Vec<String>,
}

impl DownOperation {
    /// Create an operation from a verb and its arguments.
    pub fn new<I, S>(verb: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            verb: verb.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Classify the verb.
    pub fn kind(&self) -> DownVerb {
        match self.verb.as_str() {
            "addColumn" => DownVerb::AddColumn,
            "addIndex" | "index" | "unique" | "primary" => DownVerb::AddIndex,
            "addForeign" => DownVerb::AddForeign,
            verb if verb.starts_with("drop") => DownVerb::Drop,
            _ => DownVerb::Other,
        }
    }

    /// First argument, if any.
    pub fn first_arg(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

impl FromStr for DownOperation {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some(open) = s.find('(') else {
            return Ok(Self::new(s, Vec::<String>::new()));
        };

        let verb = s[..open].trim();
        let close = s.rfind(')').filter(|c| *c > open).unwrap_or(s.len());
        let inner = s[open + 1..close]
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']');

        let args = inner
            .split(',')
            .map(|arg| arg.trim().trim_matches(|c| c == '\'' || c == '"'))
            .filter(|arg| !arg.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        Ok(Self::new(verb, args))
    }
}

impl From<String> for DownOperation {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(op) => op,
            Err(never) => match never {},
        }
    }
}

impl From<DownOperation> for String {
    fn from(op: DownOperation) -> Self {
        op.to_string()
    }
}

impl fmt::Display for DownOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.verb, self.args.join(", "))
    }
}

/// Fact record for one migration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationDefinition {
    /// Migration name, usually the file stem.
    pub name: String,
    /// Main table the migration operates on.
    pub primary_table: Option<String>,
    /// Every table the migration mentions.
    pub touched_tables: BTreeSet<String>,
    /// Kind of operation.
    pub operation_type: OperationType,
    /// Columns added, in declaration order.
    pub added_columns: Vec<String>,
    /// Declaration tag of each added column.
    pub added_column_decl_kind: BTreeMap<String, String>,
    /// Indexes added.
    pub added_indexes: Vec<AddedIndex>,
    /// Foreign keys added.
    pub added_foreign_keys: Vec<AddedForeignKey>,
    /// Columns the up side removes.
    pub dropped_columns: Vec<String>,
    /// Whether a down procedure exists.
    pub has_down_procedure: bool,
    /// Whether the down procedure has no statements.
    pub down_procedure_is_empty: bool,
    /// Operations of the down procedure.
    pub down_operations: Vec<DownOperation>,
    /// Whether the migration branches on runtime state.
    pub has_conditional_logic: bool,
    /// Whether the migration reads or writes rows.
    pub has_data_manipulation: bool,
    /// Whether the migration alters more than one table.
    pub is_multi_table: bool,
}

impl MigrationDefinition {
    /// Create a definition for a named migration.
    pub fn new(name: impl Into<String>, operation_type: OperationType) -> Self {
        Self {
            name: name.into(),
            operation_type,
            ..Self::default()
        }
    }

    /// Parse one definition from extractor JSON.
    pub fn from_json(json: &str) -> MigrateResult<Self> {
        let definition: Self = serde_json::from_str(json)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Parse a JSON array of definitions.
    pub fn from_json_list(json: &str) -> MigrateResult<Vec<Self>> {
        let definitions: Vec<Self> = serde_json::from_str(json)?;
        for definition in &definitions {
            definition.validate()?;
        }
        Ok(definitions)
    }

    /// Check structural invariants of the record.
    pub fn validate(&self) -> MigrateResult<()> {
        if self.name.trim().is_empty() {
            return Err(MigrationError::invalid_definition("definition has no name"));
        }
        if let Some(unknown) = self
            .added_column_decl_kind
            .keys()
            .find(|c| !self.added_columns.contains(*c))
        {
            return Err(MigrationError::invalid_definition(format!(
                "'{}' declares a kind for column '{}' it never adds",
                self.name, unknown
            )));
        }
        Ok(())
    }

    /// Set the primary table; it is also recorded as touched.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        let table = table.into();
        self.touched_tables.insert(table.clone());
        self.primary_table = Some(table);
        self
    }

    /// Record an additional touched table.
    pub fn touching(mut self, table: impl Into<String>) -> Self {
        self.touched_tables.insert(table.into());
        self
    }

    /// Add a column with its declaration tag.
    pub fn add_column(mut self, column: impl Into<String>, tag: impl Into<String>) -> Self {
        let column = column.into();
        if !self.added_columns.contains(&column) {
            self.added_columns.push(column.clone());
        }
        self.added_column_decl_kind.insert(column, tag.into());
        self
    }

    /// Add an index.
    pub fn add_index<I, S>(mut self, kind: IndexKind, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.added_indexes.push(AddedIndex {
            kind,
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Add a foreign key.
    pub fn add_foreign_key(
        mut self,
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
    ) -> Self {
        self.added_foreign_keys.push(AddedForeignKey {
            column: column.into(),
            references_column: Some(references_column.into()),
            references_table: Some(references_table.into()),
        });
        self
    }

    /// Record a column removed by the up side.
    pub fn drop_column(mut self, column: impl Into<String>) -> Self {
        self.dropped_columns.push(column.into());
        self
    }

    /// Set the down procedure; an empty list marks it as empty.
    pub fn with_down<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.has_down_procedure = true;
        self.down_operations = operations
            .into_iter()
            .map(|op| DownOperation::from(op.as_ref().to_string()))
            .collect();
        self.down_procedure_is_empty = self.down_operations.is_empty();
        self
    }

    /// Mark as containing conditional logic.
    pub fn with_conditional_logic(mut self) -> Self {
        self.has_conditional_logic = true;
        self
    }

    /// Mark as manipulating data.
    pub fn with_data_manipulation(mut self) -> Self {
        self.has_data_manipulation = true;
        self
    }

    /// Mark as touching several tables.
    pub fn multi_table(mut self) -> Self {
        self.is_multi_table = true;
        self
    }

    /// Columns this migration removes: dropped columns, then `addColumn(x)` reversals.
    pub fn removed_columns(&self) -> Vec<String> {
        let mut removed: Vec<String> = Vec::new();
        let reversed = self
            .down_operations
            .iter()
            .filter(|op| op.kind() == DownVerb::AddColumn)
            .filter_map(DownOperation::first_arg);

        for column in self.dropped_columns.iter().map(String::as_str).chain(reversed) {
            if !removed.iter().any(|c| c == column) {
                removed.push(column.to_string());
            }
        }
        removed
    }

    /// Check whether the down procedure can undo this migration.
    pub fn is_reversible(&self) -> bool {
        self.has_down_procedure && !self.down_procedure_is_empty
    }

    /// Check whether the migration adds anything to its table.
    pub fn adds_anything(&self) -> bool {
        !self.added_columns.is_empty()
            || !self.added_indexes.is_empty()
            || !self.added_foreign_keys.is_empty()
    }
}

/// Turns migration source into a fact record.
pub trait DefinitionExtractor: Send + Sync {
    /// Extract the definition of one migration.
    fn extract(&self, name: &str, source: &str) -> MigrateResult<MigrationDefinition>;
}

/// Extractor for sources that already are JSON fact records.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDefinitionExtractor;

impl DefinitionExtractor for JsonDefinitionExtractor {
    fn extract(&self, name: &str, source: &str) -> MigrateResult<MigrationDefinition> {
        let mut definition: MigrationDefinition = serde_json::from_str(source)
            .map_err(|e| MigrationError::extraction(name, e.to_string()))?;
        if definition.name.is_empty() {
            definition.name = name.to_string();
        }
        definition
            .validate()
            .map_err(|e| MigrationError::extraction(name, e.to_string()))?;
        Ok(definition)
    }
}

/// Extract every source; failures become `None` entries and a warning.
pub fn extract_all<'a, E, I>(
    extractor: &E,
    sources: I,
) -> BTreeMap<String, Option<MigrationDefinition>>
where
    E: DefinitionExtractor + ?Sized,
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    sources
        .into_iter()
        .map(|(name, source)| {
            let definition = match extractor.extract(name, source) {
                Ok(definition) => Some(definition),
                Err(e) => {
                    warn!(migration = name, error = %e, "Definition extraction failed");
                    None
                }
            };
            (name.to_string(), definition)
        })
        .collect()
}

/// Read every file with the given extension from a directory, keyed by file stem.
///
/// Entries are returned sorted by name. A missing directory yields no entries.
pub async fn read_sources(dir: &Path, extension: &str) -> MigrateResult<Vec<(String, String)>> {
    if !dir.exists() {
        debug!(path = %dir.display(), "Migrations directory does not exist");
        return Ok(Vec::new());
    }

    let mut sources = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let contents = tokio::fs::read_to_string(&path).await?;
        sources.push((stem.to_string(), contents));
    }

    sources.sort_by(|a, b| a.0.cmp(&b.0));
    debug!(path = %dir.display(), count = sources.len(), "Read migration sources");
    Ok(sources)
}
