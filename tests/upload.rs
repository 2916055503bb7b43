//! Upload scenarios against an in-memory remote.

mod common;

use carto_sync::config::UploadConfig;
use carto_sync::frame::{DType, Value};
use carto_sync::geometry::Coord;
use carto_sync::schema::FieldDescription;
use carto_sync::{
    DataFrame, Error, Geometry, IfExists, RetryPolicy, Series, SyncPhase, SyncProgress,
    TableSyncManager,
};
use common::MockRemote;
use std::sync::{Arc, Mutex};

fn cities() -> DataFrame {
    DataFrame::new(vec![
        Series::from_i64("id", [Some(1), Some(2)]),
        Series::from_text("name", [Some("Madrid"), Some("Lisboa")]),
    ])
    .unwrap()
}

fn recorder() -> (Arc<Mutex<Vec<SyncProgress>>>, impl Fn(SyncProgress) + Send + Sync + 'static) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    (events, move |p| sink.lock().unwrap().push(p))
}

#[tokio::test]
async fn test_upload_creates_new_table() {
    let remote = MockRemote::new();
    let manager = TableSyncManager::new(remote.clone());

    let table = manager
        .upload(&cities(), "My Cities", IfExists::Fail)
        .await
        .unwrap();
    assert_eq!(table, "my_cities");

    let ddl = remote.long_running();
    assert_eq!(ddl.len(), 1);
    assert!(ddl[0].contains("CREATE TABLE \"public\".\"my_cities\" (\"id\" bigint, \"name\" text)"));

    let copies = remote.copies();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].rows, vec!["1|Madrid\n", "2|Lisboa\n"]);
    assert!(copies[0].sql.starts_with("COPY \"public\".\"my_cities\"(\"id\",\"name\") FROM stdin"));

    let statements = remote.statements();
    assert!(
        statements
            .iter()
            .any(|s| s == "SELECT CDB_CartodbfyTable('public', 'my_cities')")
    );

    let snapshot = manager.metrics().snapshot();
    assert_eq!(snapshot.uploads, 1);
    assert_eq!(snapshot.rows_uploaded, 2);
    assert_eq!(snapshot.chunks, 1);
}

#[tokio::test]
async fn test_upload_point_geometry_table() {
    let remote = MockRemote::new();
    let manager = TableSyncManager::new(remote.clone());
    let frame = DataFrame::new(vec![
        Series::from_i64("A", [Some(1), Some(2)]),
        Series::from_geometry(
            "B",
            [
                Some(Geometry::Point(Coord::new(1.0, 1.0))),
                Some(Geometry::Point(Coord::new(2.0, 3.0))),
            ],
        ),
    ])
    .unwrap();

    let table = manager.upload(&frame, "Points", IfExists::Fail).await.unwrap();
    assert_eq!(table, "points");

    let ddl = remote.long_running();
    assert_eq!(ddl.iter().filter(|s| s.contains("CREATE TABLE")).count(), 1);
    assert!(ddl[0].contains("(\"a\" bigint, \"the_geom\" geometry(Point, 4326))"));

    let copies = remote.copies();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].rows.len(), 2);
    assert_eq!(copies[0].rows[0], "1|SRID=4326;POINT (1 1)\n");
    assert!(copies[0].sql.contains("(\"a\",\"the_geom\")"));
}

#[tokio::test]
async fn test_upload_fails_when_table_exists() {
    let remote = MockRemote::new().with_table("public", "cities");
    let manager = TableSyncManager::new(remote.clone());

    let err = manager
        .upload(&cities(), "cities", IfExists::Fail)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TableExists { ref table, .. } if table == "cities"));
    assert!(remote.copies().is_empty());
    assert!(remote.long_running().is_empty());
    assert_eq!(manager.metrics().snapshot().transfers_failed, 1);
}

#[tokio::test]
async fn test_upload_replace_truncates_matching_table() {
    let remote = MockRemote::new()
        .with_table("public", "cities")
        .with_fields(vec![
            FieldDescription::new("id", "int8"),
            FieldDescription::new("name", "text"),
        ]);
    let manager = TableSyncManager::new(remote.clone());

    manager
        .upload(&cities(), "cities", IfExists::Replace)
        .await
        .unwrap();

    let ddl = remote.long_running();
    assert_eq!(ddl.len(), 1);
    assert!(ddl[0].contains("TRUNCATE TABLE \"public\".\"cities\""));
    assert!(!ddl[0].contains("ALTER TABLE"));
    assert_eq!(remote.copies().len(), 1);
}

#[tokio::test]
async fn test_upload_replace_alters_differing_columns() {
    let remote = MockRemote::new()
        .with_table("public", "cities")
        .with_fields(vec![
            FieldDescription::new("id", "int8"),
            FieldDescription::new("population", "int8"),
        ]);
    let manager = TableSyncManager::new(remote.clone());

    manager
        .upload(&cities(), "cities", IfExists::Replace)
        .await
        .unwrap();

    assert_eq!(
        remote.long_running(),
        vec![
            "BEGIN; TRUNCATE TABLE \"public\".\"cities\"; ALTER TABLE \"public\".\"cities\" \
             DROP COLUMN \"population\", ADD COLUMN \"name\" text; COMMIT;"
        ]
    );

    let journal = remote.journal();
    let alter = journal.iter().position(|s| s.contains("ALTER TABLE")).unwrap();
    let copy = journal.iter().position(|s| s.starts_with("COPY")).unwrap();
    let register = journal
        .iter()
        .position(|s| s.contains("CDB_CartodbfyTable"))
        .unwrap();
    assert!(alter < copy && copy < register);
    assert_eq!(remote.copies()[0].rows, vec!["1|Madrid\n", "2|Lisboa\n"]);
}

#[tokio::test]
async fn test_upload_large_ddl_runs_through_function() {
    let remote = MockRemote::new();
    let manager = TableSyncManager::new(remote.clone()).with_upload_config(UploadConfig {
        payload_threshold: 10,
        ..Default::default()
    });

    manager.upload(&cities(), "cities", IfExists::Fail).await.unwrap();

    let journal = remote.journal();
    let create = journal
        .iter()
        .position(|s| s.starts_with("CREATE OR REPLACE FUNCTION \"public\".\"_tmp_sync_"))
        .unwrap();
    assert!(journal[create].contains("CREATE TABLE \"public\".\"cities\""));
    let invoke = journal
        .iter()
        .position(|s| s.starts_with("SELECT \"public\".\"_tmp_sync_"))
        .unwrap();
    let drop = journal
        .iter()
        .position(|s| s.starts_with("DROP FUNCTION IF EXISTS \"public\".\"_tmp_sync_"))
        .unwrap();
    let copy = journal.iter().position(|s| s.starts_with("COPY")).unwrap();
    assert!(create < invoke && invoke < drop && drop < copy);
    assert!(!journal.iter().any(|s| s.starts_with("BEGIN;")));
}

#[tokio::test]
async fn test_upload_function_failure_still_drops_function() {
    let remote = MockRemote::new().with_failing_statement("SELECT \"public\".\"_tmp_sync_");
    let manager = TableSyncManager::new(remote.clone()).with_upload_config(UploadConfig {
        payload_threshold: 10,
        ..Default::default()
    });

    let err = manager
        .upload(&cities(), "cities", IfExists::Fail)
        .await
        .unwrap_err();
    match &err {
        Error::Remote { message, query } => {
            assert_eq!(message, "column \"b\" cannot be cast");
            assert!(query.as_deref().is_some_and(|q| q.starts_with("SELECT \"public\".\"_tmp_sync_")));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let journal = remote.journal();
    let invoke = journal
        .iter()
        .position(|s| s.starts_with("SELECT \"public\".\"_tmp_sync_"))
        .unwrap();
    let drop = journal
        .iter()
        .position(|s| s.starts_with("DROP FUNCTION IF EXISTS"))
        .unwrap();
    assert!(invoke < drop);
    assert!(remote.copies().is_empty());
    assert_eq!(manager.metrics().snapshot().transfers_failed, 1);
}

#[tokio::test]
async fn test_upload_keeps_duplicate_column_values() {
    let remote = MockRemote::new();
    let manager = TableSyncManager::new(remote.clone());
    let frame = DataFrame::new(vec![
        Series::from_i64("a", [Some(1), Some(3)]),
        Series::from_i64("a", [Some(2), Some(4)]),
    ])
    .unwrap();

    manager.upload(&frame, "pairs", IfExists::Fail).await.unwrap();

    assert!(remote.long_running()[0].contains("(\"a\" bigint, \"a_1\" bigint)"));
    let copies = remote.copies();
    assert!(copies[0].sql.contains("(\"a\",\"a_1\")"));
    assert_eq!(copies[0].rows, vec!["1|2\n", "3|4\n"]);
}

#[tokio::test]
async fn test_upload_append_skips_ddl_and_registration() {
    let remote = MockRemote::new().with_table("public", "cities");
    let manager = TableSyncManager::new(remote.clone());

    manager
        .upload(&cities(), "cities", IfExists::Append)
        .await
        .unwrap();

    assert!(remote.long_running().is_empty());
    assert_eq!(remote.copies().len(), 1);
    assert!(
        !remote
            .statements()
            .iter()
            .any(|s| s.contains("CDB_CartodbfyTable"))
    );
}

#[tokio::test]
async fn test_upload_in_chunks() {
    let remote = MockRemote::new();
    let (events, callback) = recorder();
    let manager = TableSyncManager::new(remote.clone())
        .with_upload_config(UploadConfig {
            max_upload_size: Some(40),
            ..Default::default()
        })
        .with_progress(callback);

    // 100 rows of "NNN\n": 400 bytes in 10 chunks of 40
    let frame = DataFrame::new(vec![Series::from_i64("n", (100..200).map(Some))]).unwrap();
    manager.upload(&frame, "numbers", IfExists::Fail).await.unwrap();

    let copies = remote.copies();
    assert_eq!(copies.len(), 10);
    assert!(copies.iter().all(|c| c.rows.len() == 10));
    assert_eq!(copies[0].rows[0], "100\n");
    assert_eq!(copies[9].rows[9], "199\n");
    assert_eq!(remote.long_running().len(), 1);

    let events = events.lock().unwrap();
    let modes: Vec<IfExists> = events
        .iter()
        .filter(|p| p.phase == SyncPhase::Uploading)
        .map(|p| p.if_exists)
        .collect();
    assert_eq!(modes.len(), 10);
    assert_eq!(modes[0], IfExists::Fail);
    assert!(modes[1..].iter().all(|m| *m == IfExists::Append));
    assert_eq!(events.first().map(|p| p.phase), Some(SyncPhase::Preparing));
    assert_eq!(events.last().map(|p| p.phase), Some(SyncPhase::Completed));
    assert!(events.iter().all(|p| p.total_chunks == 10));
}

#[tokio::test]
async fn test_upload_rejects_when_quota_exceeded() {
    let remote = MockRemote::new().with_quota(1);
    let manager = TableSyncManager::new(remote.clone());

    let err = manager
        .upload(&cities(), "cities", IfExists::Fail)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Quota { remaining: 1, .. }));
    assert!(remote.long_running().is_empty());
    assert!(remote.copies().is_empty());
}

#[tokio::test]
async fn test_upload_skips_quota_check() {
    let remote = MockRemote::new().with_quota(1);
    let manager = TableSyncManager::new(remote.clone()).with_upload_config(UploadConfig {
        skip_quota_check: true,
        ..Default::default()
    });

    manager.upload(&cities(), "cities", IfExists::Fail).await.unwrap();
    assert_eq!(remote.copies().len(), 1);
}

#[tokio::test]
async fn test_upload_reports_encoding_errors() {
    let remote = MockRemote::new();
    let manager = TableSyncManager::new(remote.clone());
    let frame = DataFrame::new(vec![
        Series::new(
            "geom",
            DType::Geometry,
            vec![
                Value::Text("POINT (1 2)".into()),
                Value::Text("not a geometry".into()),
            ],
        )
        .unwrap(),
    ])
    .unwrap();

    let err = manager.upload(&frame, "places", IfExists::Fail).await.unwrap_err();
    assert!(matches!(err, Error::Encode { ref column, .. } if column == "geom"));
    assert!(remote.copies().is_empty());
}

#[tokio::test]
async fn test_upload_retries_rate_limited_copy() {
    let remote = MockRemote::new().with_rate_limits(2);
    let manager = TableSyncManager::new(remote.clone());

    manager.upload(&cities(), "cities", IfExists::Fail).await.unwrap();
    assert_eq!(remote.copies().len(), 1);
    assert_eq!(manager.metrics().snapshot().rate_limit_retries, 2);
}

#[tokio::test]
async fn test_upload_retry_exhaustion_names_table() {
    let remote = MockRemote::new().with_rate_limits(10);
    let manager = TableSyncManager::new(remote.clone()).with_retry_policy(RetryPolicy::new(1));

    let err = manager.upload(&cities(), "cities", IfExists::Fail).await.unwrap_err();
    assert!(matches!(err, Error::RetryExhausted { attempts: 1, .. }));
    assert!(err.to_string().contains("\"public.cities\""), "{}", err);
}

#[tokio::test]
async fn test_upload_rejects_empty_table_name() {
    let remote = MockRemote::new();
    let manager = TableSyncManager::new(remote.clone());

    let err = manager.upload(&cities(), "  ", IfExists::Fail).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(remote.statements().is_empty());
}
