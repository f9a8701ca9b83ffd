//! Integration tests for drift reconciliation.
//!
//! These tests drive the public API end to end: classification against a live
//! snapshot, replay-based consolidation written to disk, and bookkeeping fixes.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use tidemark::migrate::{
    BookkeepingRecord, BookkeepingStore, ColumnInfo, ColumnSnapshot, DependencyResolver,
    DriftAnalyzer, ForeignKeyInfo, ForeignKeySnapshot, InMemoryBookkeepingStore, IndexInfo,
    IndexKind, IntrospectionConfig, Introspector, MigrateResult, MigrationClassifier,
    MigrationDefinition, MigrationStatus, OperationType, Presence, ReconcileConfig,
    SchemaSnapshot, TableInfo, diff, find_candidates, is_applied_to_schema, normalize_type,
    replay,
};

/// Introspector serving fixed tables of `id` plus extra varchar columns.
struct FixedIntrospector {
    tables: BTreeMap<String, Vec<String>>,
}

impl FixedIntrospector {
    fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
        }
    }

    fn table(mut self, name: &str, columns: &[&str]) -> Self {
        self.tables
            .insert(name.to_string(), columns.iter().map(|c| c.to_string()).collect());
        self
    }
}

#[async_trait]
impl Introspector for FixedIntrospector {
    async fn get_tables(&self, _config: &IntrospectionConfig) -> MigrateResult<Vec<TableInfo>> {
        Ok(self.tables.keys().map(|t| TableInfo::base(t.as_str(), "public")).collect())
    }

    async fn get_columns(&self, table: &str, _schema: &str) -> MigrateResult<Vec<ColumnInfo>> {
        let mut columns = vec![ColumnInfo {
            name: "id".to_string(),
            column_type: "bigint".to_string(),
            is_nullable: false,
            column_default: None,
            auto_increment: true,
            ordinal_position: 1,
        }];
        for (i, name) in self.tables.get(table).into_iter().flatten().enumerate() {
            columns.push(ColumnInfo {
                name: name.clone(),
                column_type: "varchar(255)".to_string(),
                is_nullable: false,
                column_default: None,
                auto_increment: false,
                ordinal_position: i as i32 + 2,
            });
        }
        Ok(columns)
    }

    async fn get_indexes(&self, _table: &str, _schema: &str) -> MigrateResult<Vec<IndexInfo>> {
        Ok(Vec::new())
    }

    async fn get_foreign_keys(
        &self,
        _table: &str,
        _schema: &str,
    ) -> MigrateResult<Vec<ForeignKeyInfo>> {
        Ok(Vec::new())
    }
}

async fn write_definitions(dir: &Path, definitions: &[MigrationDefinition]) {
    for definition in definitions {
        let path = dir.join(format!("{}.json", definition.name));
        tokio::fs::write(path, serde_json::to_string_pretty(definition).unwrap())
            .await
            .unwrap();
    }
}

fn users_schema() -> SchemaSnapshot {
    SchemaSnapshot::new().with_table(
        "users",
        [
            ColumnSnapshot::new("id", "bigint unsigned").auto_increment(),
            ColumnSnapshot::new("email", "varchar(255)"),
        ],
    )
}

/// Test that a snapshot never differs from itself
#[test]
fn test_diff_of_identical_snapshots_is_empty() {
    let schema = users_schema()
        .with_table("posts", [ColumnSnapshot::new("user_id", "bigint")])
        .with_foreign_key("posts", ForeignKeySnapshot::new("user_id", "users", "id"));

    let result = diff(&schema, &schema.clone());
    assert!(!result.has_differences());
    assert_eq!(result.summary(), "No differences");
}

/// Test type normalization equivalences
#[test]
fn test_normalize_type_equivalences() {
    assert_eq!(normalize_type("INT(11)"), "integer");
    assert_eq!(normalize_type("integer"), "integer");
    assert_eq!(normalize_type("tinyint(1)"), "boolean");
}

/// Test schema evidence for create and drop definitions
#[test]
fn test_applied_evidence_for_create_and_drop() {
    let empty = SchemaSnapshot::new();
    let create =
        MigrationDefinition::new("1_create_users_table", OperationType::Create).with_table("users");
    assert_eq!(is_applied_to_schema(&create, &empty).as_bool(), Some(false));
    assert_eq!(is_applied_to_schema(&create, &users_schema()).as_bool(), Some(true));

    let drop =
        MigrationDefinition::new("2_drop_users_table", OperationType::Drop).with_table("users");
    assert_eq!(is_applied_to_schema(&drop, &empty).as_bool(), Some(true));
    assert_eq!(is_applied_to_schema(&drop, &users_schema()).as_bool(), Some(false));
}

/// Test record and file states with alter definitions
#[test]
fn test_alter_with_missing_column_is_bogus() {
    let classifier = MigrationClassifier::new();
    let schema = users_schema();
    let alter = MigrationDefinition::new("2_add_phone_to_users_table", OperationType::Alter)
        .with_table("users")
        .add_column("phone", "string");

    let recorded = classifier.classify(&alter.name, Presence::RecordAndFile, Some(&alter), &schema);
    assert_eq!(recorded.status, MigrationStatus::BogusRecord);

    let unrecorded = classifier.classify(&alter.name, Presence::FileOnly, Some(&alter), &schema);
    assert_eq!(unrecorded.status, MigrationStatus::NewMigration);

    let applied = MigrationDefinition::new("3_add_email_to_users_table", OperationType::Alter)
        .with_table("users")
        .add_column("email", "string");
    let lost = classifier.classify(&applied.name, Presence::FileOnly, Some(&applied), &schema);
    assert_eq!(lost.status, MigrationStatus::LostRecord);
}

/// Test replay net-zero cancellation through a drop column
#[test]
fn test_replay_added_then_dropped_column() {
    let definitions = vec![
        MigrationDefinition::new("1_create_t_table", OperationType::Create)
            .with_table("t")
            .add_column("a", "string"),
        MigrationDefinition::new("2_add_b_to_t_table", OperationType::Alter)
            .with_table("t")
            .add_column("b", "integer"),
        MigrationDefinition::new("3_drop_a_from_t_table", OperationType::Alter)
            .with_table("t")
            .drop_column("a"),
    ];

    let outcome = replay(&definitions);
    assert_eq!(outcome.column_names(), vec!["b"]);
    assert!(!outcome.has_approximated_types);
}

/// Test that a table drop clears the replay
#[test]
fn test_replay_create_then_drop_is_empty() {
    let definitions = vec![
        MigrationDefinition::new("1_create_t_table", OperationType::Create)
            .with_table("t")
            .add_column("a", "string")
            .add_column("b", "string")
            .add_index(IndexKind::Unique, ["a"]),
        MigrationDefinition::new("2_drop_t_table", OperationType::Drop).with_table("t"),
    ];

    let outcome = replay(&definitions);
    assert!(outcome.is_empty());
}

/// Test that candidates always carry two consolidatable definitions
#[test]
fn test_find_candidates_requires_two_consolidatable() {
    let definitions = vec![
        MigrationDefinition::new("1_create_users_table", OperationType::Create).with_table("users"),
        MigrationDefinition::new("2_backfill_users", OperationType::Alter)
            .with_table("users")
            .with_data_manipulation(),
        MigrationDefinition::new("3_create_posts_table", OperationType::Create).with_table("posts"),
        MigrationDefinition::new("4_add_title_to_posts_table", OperationType::Alter)
            .with_table("posts")
            .add_column("title", "string"),
    ];

    let candidates = find_candidates(&definitions);
    assert_eq!(candidates.keys().collect::<Vec<_>>(), vec!["posts"]);
    assert!(candidates.values().all(|g| g.consolidatable.len() >= 2));
}

/// Test dependency ordering of foreign-key related tables
#[test]
fn test_creation_and_drop_order() {
    let mut foreign_keys = BTreeMap::new();
    foreign_keys.insert(
        "posts".to_string(),
        vec![ForeignKeySnapshot::new("user_id", "users", "id")],
    );

    let resolver = DependencyResolver::new(["posts", "users"], &foreign_keys);
    let creation = resolver.creation_order();
    let mut drop = resolver.drop_order();
    assert_eq!(creation, vec!["users", "posts"]);

    drop.reverse();
    assert_eq!(drop, creation);
}

/// Test a full analysis run followed by bookkeeping fixes
#[tokio::test]
async fn test_analyze_and_fix() {
    let dir = tempfile::tempdir().unwrap();
    write_definitions(
        dir.path(),
        &[
            MigrationDefinition::new("2024_01_01_000001_create_users_table", OperationType::Create)
                .with_table("users")
                .add_column("id", "id")
                .add_column("email", "string"),
            MigrationDefinition::new(
                "2024_01_01_000002_add_phone_to_users_table",
                OperationType::Alter,
            )
            .with_table("users")
            .add_column("phone", "string"),
            MigrationDefinition::new("2024_01_01_000003_create_posts_table", OperationType::Create)
                .with_table("posts"),
            MigrationDefinition::new("2024_01_01_000004_create_tags_table", OperationType::Create)
                .with_table("tags"),
        ],
    )
    .await;
    tokio::fs::write(dir.path().join("2024_01_01_000005_broken.json"), "{ not json")
        .await
        .unwrap();

    let store = InMemoryBookkeepingStore::with_records([
        BookkeepingRecord::new("2023_12_30_000000_create_audits_table", 1),
        BookkeepingRecord::new("2023_12_31_000000_create_legacy_table", 1),
        BookkeepingRecord::new("2024_01_01_000001_create_users_table", 1),
        BookkeepingRecord::new("2024_01_01_000002_add_phone_to_users_table", 1),
    ]);
    let introspector = FixedIntrospector::new()
        .table("users", &["email"])
        .table("posts", &[])
        .table("legacy", &[])
        .table("migrations", &[]);
    let config = ReconcileConfig::new()
        .migrations_dir(dir.path())
        .output_dir(dir.path().join("out"));
    let analyzer = DriftAnalyzer::new(config, store, introspector);

    let report = analyzer.analyze().await.unwrap();
    let statuses: Vec<_> = report.states.iter().map(|s| (s.name.as_str(), s.status)).collect();
    assert_eq!(
        statuses,
        vec![
            ("2023_12_30_000000_create_audits_table", MigrationStatus::OrphanRecord),
            ("2023_12_31_000000_create_legacy_table", MigrationStatus::MissingFile),
            ("2024_01_01_000001_create_users_table", MigrationStatus::Ok),
            ("2024_01_01_000002_add_phone_to_users_table", MigrationStatus::BogusRecord),
            ("2024_01_01_000003_create_posts_table", MigrationStatus::LostRecord),
            ("2024_01_01_000004_create_tags_table", MigrationStatus::NewMigration),
            ("2024_01_01_000005_broken", MigrationStatus::NewMigration),
        ]
    );
    assert!(report.warnings.iter().any(|w| w.contains("2024_01_01_000005_broken")));

    let fixes = analyzer.apply_fixes(&report).await.unwrap();
    assert!(!fixes.dry_run);
    assert_eq!(fixes.deleted.len(), 2);
    assert_eq!(fixes.inserted, vec!["2024_01_01_000003_create_posts_table"]);
    assert_eq!(fixes.batch, Some(2));
    assert_eq!(fixes.reported, vec!["2023_12_31_000000_create_legacy_table"]);

    let names: Vec<_> = analyzer
        .store()
        .records()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(
        names,
        vec![
            "2023_12_31_000000_create_legacy_table",
            "2024_01_01_000001_create_users_table",
            "2024_01_01_000003_create_posts_table",
        ]
    );

    let after = analyzer.analyze().await.unwrap();
    assert_eq!(after.count(MigrationStatus::BogusRecord), 0);
    assert_eq!(after.count(MigrationStatus::LostRecord), 0);
    assert_eq!(after.count(MigrationStatus::MissingFile), 1);
}

/// Test consolidation of a table's migrations into one artifact
#[tokio::test]
async fn test_consolidate_writes_single_artifact() {
    let dir = tempfile::tempdir().unwrap();
    write_definitions(
        dir.path(),
        &[
            MigrationDefinition::new("2024_01_01_000001_create_users_table", OperationType::Create)
                .with_table("users")
                .add_column("id", "id")
                .add_column("email", "string")
                .with_down(["dropIfExists(users)"]),
            MigrationDefinition::new(
                "2024_01_01_000002_add_nickname_to_users_table",
                OperationType::Alter,
            )
            .with_table("users")
            .add_column("nickname", "string")
            .with_down(["dropColumn(nickname)"]),
            MigrationDefinition::new(
                "2024_01_01_000003_drop_email_from_users_table",
                OperationType::Alter,
            )
            .with_table("users")
            .drop_column("email")
            .with_down(["addColumn(email)"]),
        ],
    )
    .await;

    let out = dir.path().join("out");
    let config = ReconcileConfig::new().migrations_dir(dir.path()).output_dir(&out);
    let analyzer = DriftAnalyzer::new(
        config,
        InMemoryBookkeepingStore::new(),
        FixedIntrospector::new(),
    );

    let plans = analyzer.plan_consolidations().await.unwrap();
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].artifact_name, "consolidate_users_table");
    assert_eq!(plans[0].consolidated.len(), 3);

    let results = analyzer.consolidate(&plans).await.unwrap();
    let result = &results[0];
    assert_eq!(result.table, "users");
    assert!(result.skipped_names.is_empty());
    assert!(result.warnings.iter().any(|w| w.starts_with("shadow verification skipped")));

    let artifact = Path::new(&result.generated_artifact_path);
    assert!(artifact.starts_with(&out));
    let up = tokio::fs::read_to_string(artifact.join("up.sql")).await.unwrap();
    assert!(up.starts_with("CREATE TABLE \"users\""));
    assert!(up.contains("\"nickname\""));
    assert!(!up.contains("\"email\""));
}

/// Test that dry-run consolidation writes nothing
#[tokio::test]
async fn test_dry_run_consolidation() {
    let dir = tempfile::tempdir().unwrap();
    write_definitions(
        dir.path(),
        &[
            MigrationDefinition::new("1_create_posts_table", OperationType::Create)
                .with_table("posts")
                .add_column("title", "string"),
            MigrationDefinition::new("2_add_body_to_posts_table", OperationType::Alter)
                .with_table("posts")
                .add_column("body", "text"),
        ],
    )
    .await;

    let out = dir.path().join("out");
    let config = ReconcileConfig::new()
        .migrations_dir(dir.path())
        .output_dir(&out)
        .dry_run(true);
    let analyzer = DriftAnalyzer::new(
        config,
        InMemoryBookkeepingStore::new(),
        FixedIntrospector::new(),
    );

    let plans = analyzer.plan_consolidations().await.unwrap();
    let results = analyzer.consolidate(&plans).await.unwrap();
    assert_eq!(results[0].generated_artifact_path, "");
    assert!(!out.exists());
}

/// Test repair artifact generation from a schema diff
#[tokio::test]
async fn test_generate_repair() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let config = ReconcileConfig::new().migrations_dir(dir.path()).output_dir(&out);
    let analyzer = DriftAnalyzer::new(
        config,
        InMemoryBookkeepingStore::new(),
        FixedIntrospector::new().table("users", &[]),
    );

    let expected = SchemaSnapshot::new().with_table(
        "users",
        [
            ColumnSnapshot::new("id", "bigint").auto_increment(),
            ColumnSnapshot::new("email", "varchar(255)"),
        ],
    );

    let artifact = analyzer.generate_repair(&expected).await.unwrap().unwrap();
    assert!(artifact.tables.contains("users"));
    let up = tokio::fs::read_to_string(artifact.path.join("up.sql")).await.unwrap();
    assert!(up.contains("ADD COLUMN \"email\""));

    let introspected = SchemaSnapshot::new()
        .with_table("users", [ColumnSnapshot::new("id", "bigint").auto_increment()]);
    let analyzer = DriftAnalyzer::new(
        ReconcileConfig::new().migrations_dir(dir.path()).output_dir(&out),
        InMemoryBookkeepingStore::new(),
        FixedIntrospector::new().table("users", &[]),
    );
    assert!(analyzer.generate_repair(&introspected).await.unwrap().is_none());
}
