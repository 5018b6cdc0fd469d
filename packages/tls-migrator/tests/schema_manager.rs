use std::sync::Arc;

use migrator_test_support::FakeConnector;
use tls_migrator::manager::SchemaMigrationManager;
use tls_migrator::{
    parse_dsn, ManagerConfig, ManagerError, Migration, MigrationCatalog, MigrationManager,
};
use tokio_util::sync::CancellationToken;

fn catalog() -> MigrationCatalog {
    MigrationCatalog::new(
        vec![Migration::new(1, "baseline")
            .up("CREATE TABLE {{DATABASE}}.logs{{ON_CLUSTER}} (ts DateTime) ENGINE = {{REPLICATED}}MergeTree ORDER BY ts")],
        vec![
            Migration::new(2, "add_body")
                .up("ALTER TABLE {{DATABASE}}.logs{{ON_CLUSTER}} ADD COLUMN body String")
                .down("ALTER TABLE {{DATABASE}}.logs{{ON_CLUSTER}} DROP COLUMN body"),
            Migration::new(3, "add_level")
                .up("ALTER TABLE {{DATABASE}}.logs ADD COLUMN level String")
                .down("ALTER TABLE {{DATABASE}}.logs DROP COLUMN level"),
        ],
    )
    .expect("catalog should be valid")
}

fn manager(connector: &FakeConnector, replication: bool) -> SchemaMigrationManager {
    let opts = parse_dsn("clickhouse://localhost:9000/signoz_logs").unwrap();
    let config = ManagerConfig::new("prod", replication, false, opts).unwrap();
    SchemaMigrationManager::new(Box::new(connector.connection()), config, Arc::new(catalog()))
        .unwrap()
}

#[tokio::test]
async fn bootstrap_creates_database_and_table_on_cluster() {
    let connector = FakeConnector::new();

    manager(&connector, true).bootstrap().await.unwrap();

    let sql = connector.executed_sql();
    assert_eq!(sql.len(), 2);
    assert_eq!(sql[0], "CREATE DATABASE IF NOT EXISTS signoz_logs ON CLUSTER prod");
    assert!(sql[1]
        .starts_with("CREATE TABLE IF NOT EXISTS signoz_logs.schema_migrations ON CLUSTER prod"));
    assert!(sql[1].contains("ENGINE = ReplicatedReplacingMergeTree(created_at)"));
}

#[tokio::test]
async fn bootstrap_without_replication_has_no_cluster_clause() {
    let connector = FakeConnector::new();

    manager(&connector, false).bootstrap().await.unwrap();

    let sql = connector.executed_sql();
    assert_eq!(sql[0], "CREATE DATABASE IF NOT EXISTS signoz_logs");
    assert!(sql[1].contains("ENGINE = ReplacingMergeTree(created_at)"));
    assert!(!sql[1].contains("ON CLUSTER"));
}

#[tokio::test]
async fn squashed_migrations_run_once() {
    let cancel = CancellationToken::new();

    let fresh = FakeConnector::new();
    manager(&fresh, false)
        .run_squashed_migrations(&cancel)
        .await
        .unwrap();
    let sql = fresh.executed_sql();
    assert_eq!(
        sql[0],
        "CREATE TABLE signoz_logs.logs (ts DateTime) ENGINE = MergeTree ORDER BY ts"
    );
    assert_eq!(
        sql[1],
        "INSERT INTO signoz_logs.schema_migrations (migration_id, status) VALUES (1, 'finished')"
    );

    let applied = FakeConnector::new().with_rows(&["1"]);
    manager(&applied, false)
        .run_squashed_migrations(&cancel)
        .await
        .unwrap();
    assert!(applied.executed().is_empty());
}

#[tokio::test]
async fn up_with_empty_list_applies_pending_in_order() {
    let connector = FakeConnector::new().with_rows(&["1", "2"]);

    manager(&connector, false)
        .migrate_up_sync(&CancellationToken::new(), &[])
        .await
        .unwrap();

    assert_eq!(
        connector.executed_sql(),
        vec![
            "ALTER TABLE signoz_logs.logs ADD COLUMN level String".to_string(),
            "INSERT INTO signoz_logs.schema_migrations (migration_id, status) VALUES (3, 'finished')"
                .to_string(),
        ]
    );
    assert!(connector.queries()[0].contains("FINAL"));
}

#[tokio::test]
async fn async_mode_does_not_wait_for_mutations() {
    let connector = FakeConnector::new();

    manager(&connector, false)
        .migrate_up_async(&CancellationToken::new(), &[2])
        .await
        .unwrap();

    let executed = connector.executed();
    assert_eq!(
        executed[0].settings,
        vec![
            ("alter_sync".to_string(), "0".to_string()),
            ("mutations_sync".to_string(), "0".to_string()),
        ]
    );
    // Bookkeeping rows are written synchronously.
    assert!(executed[1].settings.is_empty());
}

#[tokio::test]
async fn unknown_version_fails_before_running_anything() {
    let connector = FakeConnector::new();

    let err = manager(&connector, false)
        .migrate_up_sync(&CancellationToken::new(), &[2, 42])
        .await
        .unwrap_err();

    assert!(matches!(err, ManagerError::UnknownVersion { version: 42 }));
    assert!(connector.executed().is_empty());
}

#[tokio::test]
async fn down_reverts_only_applied_versions() {
    let connector = FakeConnector::new().with_rows(&["2"]);

    manager(&connector, true)
        .migrate_down_sync(&CancellationToken::new(), &[3, 2])
        .await
        .unwrap();

    assert_eq!(
        connector.executed_sql(),
        vec![
            "ALTER TABLE signoz_logs.logs ON CLUSTER prod DROP COLUMN body".to_string(),
            "INSERT INTO signoz_logs.schema_migrations (migration_id, status) VALUES (2, 'reverted')"
                .to_string(),
        ]
    );
}

#[tokio::test]
async fn repeated_versions_run_once() {
    let connector = FakeConnector::new();

    manager(&connector, false)
        .migrate_up_sync(&CancellationToken::new(), &[3, 2, 3, 2])
        .await
        .unwrap();

    let sql = connector.executed_sql();
    assert_eq!(sql.len(), 4);
    assert_eq!(sql[0], "ALTER TABLE signoz_logs.logs ADD COLUMN level String");
    assert_eq!(sql[2], "ALTER TABLE signoz_logs.logs ADD COLUMN body String");

    let applied = FakeConnector::new().with_rows(&["2"]);
    manager(&applied, false)
        .migrate_down_sync(&CancellationToken::new(), &[2, 2])
        .await
        .unwrap();
    assert_eq!(
        applied
            .executed_sql()
            .iter()
            .filter(|sql| sql.contains("DROP COLUMN body"))
            .count(),
        1
    );
}

#[tokio::test]
async fn down_with_empty_list_is_a_no_op() {
    let connector = FakeConnector::new().with_rows(&["2", "3"]);

    manager(&connector, false)
        .migrate_down_sync(&CancellationToken::new(), &[])
        .await
        .unwrap();

    assert!(connector.executed().is_empty());
    assert!(connector.queries().is_empty());
}

#[tokio::test]
async fn failing_statement_is_attributed_to_its_version() {
    let connector = FakeConnector::new().failing_exec_on("level");

    let err = manager(&connector, false)
        .migrate_up_sync(&CancellationToken::new(), &[])
        .await
        .unwrap_err();

    assert!(matches!(err, ManagerError::Statement { version: 3, .. }));
    // Version 2 was recorded before 3 failed.
    assert!(connector
        .executed_sql()
        .iter()
        .any(|sql| sql.ends_with("VALUES (2, 'finished')")));
}

#[tokio::test]
async fn cancelled_token_stops_before_the_next_migration() {
    let connector = FakeConnector::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = manager(&connector, false)
        .migrate_up_sync(&cancel, &[])
        .await
        .unwrap_err();

    assert!(matches!(err, ManagerError::Cancelled { version: 2 }));
    assert!(connector.executed().is_empty());
}
