//! Table management, datasets and locks against an in-memory remote.

mod common;

use carto_sync::geometry::GeometryFamily;
use carto_sync::schema::FieldDescription;
use carto_sync::{Dataset, Error, IfExists, TableSyncManager, with_lock};
use common::MockRemote;

#[tokio::test]
async fn test_has_table() {
    let remote = MockRemote::new().with_table("public", "cities");
    let manager = TableSyncManager::new(remote.clone());

    assert!(manager.has_table("cities", None).await.unwrap());
    assert!(!manager.has_table("towns", None).await.unwrap());
    assert!(manager.has_table("cities", Some("public")).await.unwrap());
    assert!(!manager.has_table("cities", Some("other")).await.unwrap());
}

#[tokio::test]
async fn test_delete_table_reports_existence() {
    let remote = MockRemote::new().with_table("public", "cities");
    let manager = TableSyncManager::new(remote.clone());

    assert!(manager.delete_table("cities", None).await.unwrap());
    assert!(!manager.delete_table("towns", None).await.unwrap());
    let drops: Vec<String> = remote
        .statements()
        .into_iter()
        .filter(|s| s.starts_with("DROP TABLE"))
        .collect();
    assert_eq!(
        drops,
        vec![
            "DROP TABLE IF EXISTS \"public\".\"cities\"",
            "DROP TABLE IF EXISTS \"public\".\"towns\""
        ]
    );
}

#[tokio::test]
async fn test_rename_table() {
    let remote = MockRemote::new().with_table("public", "cities");
    let manager = TableSyncManager::new(remote.clone());

    let renamed = manager
        .rename_table("cities", "Big Cities", IfExists::Fail)
        .await
        .unwrap();
    assert_eq!(renamed, "big_cities");
    assert!(
        remote
            .statements()
            .iter()
            .any(|s| s == "ALTER TABLE \"public\".\"cities\" RENAME TO \"big_cities\"")
    );
}

#[tokio::test]
async fn test_rename_table_validation() {
    let remote = MockRemote::new()
        .with_table("public", "cities")
        .with_table("public", "towns");
    let manager = TableSyncManager::new(remote.clone());

    let err = manager
        .rename_table("cities", "cities", IfExists::Fail)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = manager
        .rename_table("cities", "towns", IfExists::Append)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = manager
        .rename_table("villages", "hamlets", IfExists::Fail)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    let err = manager
        .rename_table("cities", "towns", IfExists::Fail)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TableExists { ref table, .. } if table == "towns"));
    assert!(!remote.statements().iter().any(|s| s.starts_with("ALTER TABLE")));
}

#[tokio::test]
async fn test_rename_table_replace_drops_destination() {
    let remote = MockRemote::new()
        .with_table("public", "cities")
        .with_table("public", "towns");
    let manager = TableSyncManager::new(remote.clone());

    manager
        .rename_table("cities", "towns", IfExists::Replace)
        .await
        .unwrap();
    let statements = remote.statements();
    let drop = statements
        .iter()
        .position(|s| s == "DROP TABLE IF EXISTS \"public\".\"towns\"")
        .unwrap();
    let alter = statements
        .iter()
        .position(|s| s.starts_with("ALTER TABLE"))
        .unwrap();
    assert!(drop < alter);
}

#[tokio::test]
async fn test_create_table_from_query() {
    let remote = MockRemote::new();
    let manager = TableSyncManager::new(remote.clone());

    let table = manager
        .create_table_from_query("SELECT * FROM cities WHERE pop > 1000", "Large", IfExists::Fail, true)
        .await
        .unwrap();
    assert_eq!(table, "large");

    let ddl = remote.long_running();
    assert_eq!(ddl.len(), 1);
    assert_eq!(
        ddl[0],
        "BEGIN; DROP TABLE IF EXISTS \"public\".\"large\"; \
         CREATE TABLE \"public\".\"large\" AS (SELECT * FROM cities WHERE pop > 1000); \
         SELECT CDB_CartodbfyTable('public', 'large'); COMMIT;"
    );
}

#[tokio::test]
async fn test_create_table_from_query_existing() {
    let remote = MockRemote::new().with_table("public", "large");
    let manager = TableSyncManager::new(remote.clone());

    let err = manager
        .create_table_from_query("SELECT 1 AS a", "large", IfExists::Fail, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TableExists { .. }));

    manager
        .create_table_from_query("SELECT 1 AS a", "large", IfExists::Append, false)
        .await
        .unwrap();
    assert_eq!(
        remote.long_running(),
        vec!["INSERT INTO \"public\".\"large\" SELECT 1 AS a"]
    );
}

#[tokio::test]
async fn test_describe_table() {
    let remote = MockRemote::new().with_table("public", "countries");
    let manager = TableSyncManager::new(remote.clone());

    let description = manager.describe_table("countries", None).await.unwrap();
    assert_eq!(description.schema, "public");
    assert_eq!(description.num_rows, 42);
    assert_eq!(description.geom_type, Some(GeometryFamily::Polygon));

    let err = manager.describe_table("missing", None).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn test_get_bounds() {
    let remote = MockRemote::new().with_extent([-9.1, 38.7, -3.7, 40.4]);
    let manager = TableSyncManager::new(remote.clone());

    let bounds = manager
        .get_bounds("SELECT * FROM cities")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bounds.corners(), [[-9.1, 38.7], [-3.7, 40.4]]);
    assert!(
        remote
            .statements()
            .iter()
            .any(|s| s.contains("SELECT ST_Extent(the_geom) geom_env FROM (SELECT * FROM cities) q"))
    );
}

#[tokio::test]
async fn test_get_bounds_without_geometries() {
    let manager = TableSyncManager::new(MockRemote::new());
    assert_eq!(manager.get_bounds("SELECT 1").await.unwrap(), None);
}

#[tokio::test]
async fn test_get_table_names_strips_schema() {
    let remote = MockRemote::new().with_query_tables(&["public.cities", "countries"]);
    let manager = TableSyncManager::new(remote.clone());

    let tables = manager
        .get_table_names("SELECT * FROM cities JOIN countries USING (iso) WHERE name <> 'x'")
        .await
        .unwrap();
    assert_eq!(tables, vec!["cities", "countries"]);
    let expected = "SELECT array_to_json(CDB_QueryTablesText('SELECT * FROM cities JOIN \
                    countries USING (iso) WHERE name <> ''x''')) AS tables";
    assert!(remote.statements().iter().any(|s| s == expected));
}

#[tokio::test]
async fn test_get_column_names_excludes() {
    let remote = MockRemote::new().with_fields(vec![
        FieldDescription::new("cartodb_id", "int8"),
        FieldDescription::new("the_geom", "geometry"),
        FieldDescription::new("Pop Max", "int4"),
    ]);
    let manager = TableSyncManager::new(remote.clone());

    let names = manager
        .get_column_names("cities", None, &["cartodb_id"])
        .await
        .unwrap();
    assert_eq!(names, vec!["the_geom", "Pop Max"]);
}

#[tokio::test]
async fn test_dataset_operations() {
    let remote = MockRemote::new().with_table("public", "cities");
    let manager = TableSyncManager::new(remote.clone());

    let table = Dataset::from_source("cities");
    assert!(table.exists(&manager).await.unwrap());
    assert_eq!(
        table.get_query(&manager).await.unwrap().as_deref(),
        Some("SELECT * FROM \"public\".\"cities\"")
    );

    let query = Dataset::from_source("SELECT * FROM cities");
    assert!(matches!(query.delete(&manager).await, Err(Error::Validation(_))));

    query.upload(&manager, "copy", IfExists::Fail).await.unwrap();
    assert!(
        remote.long_running()[0].contains("CREATE TABLE \"public\".\"copy\" AS (SELECT * FROM cities)")
    );
}

#[tokio::test]
async fn test_with_lock_runs_operation() {
    let remote = MockRemote::new();
    let value = with_lock(remote.clone(), "uploads", || async { Ok(7) })
        .await
        .unwrap();
    assert_eq!(value, 7);

    let statements = remote.statements();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].starts_with("SELECT pg_try_advisory_lock("));
    assert!(statements[1].starts_with("SELECT pg_advisory_unlock("));
}
