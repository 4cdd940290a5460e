//! Integration tests for Phase 1 (boundary import) and hierarchy repair

mod helpers;

use geoseed_etl::checkpoint::{Ledger, TaskKey, TaskStatus};
use geoseed_etl::db::jurisdictions::{self, JurisdictionRow, EARTH_SLUG};
use geoseed_etl::selection::Selection;
use geoseed_etl::services::{BoundaryImporter, HierarchyRepair};
use helpers::{
    rect_feature, write_boundary_file, write_meta_csv, write_nzl_boundaries, RecordingBackend,
    TestEnv,
};

async fn import(env: &TestEnv, ledger: &mut Ledger, selection: &Selection) -> geoseed_etl::services::ImportStats {
    BoundaryImporter::new(&env.pool, &env.config)
        .run(ledger, selection)
        .await
        .unwrap()
}

/// Every row of the NZL fixture plus the root, ordered by slug
async fn all_rows(env: &TestEnv) -> Vec<JurisdictionRow> {
    let mut rows = Vec::new();
    for level in 1..=3 {
        rows.extend(
            jurisdictions::fetch_rows_page(&env.pool, "NZL", level, 100, 0)
                .await
                .unwrap(),
        );
    }
    rows.extend(jurisdictions::find_by_slug(&env.pool, EARTH_SLUG).await.unwrap());
    rows.sort_by(|a, b| a.slug.cmp(&b.slug));
    rows
}

#[tokio::test]
async fn test_import_builds_single_rooted_tree() {
    let env = TestEnv::new().await;
    write_nzl_boundaries(&env.boundaries_dir());
    let mut ledger = env.ledger();

    let stats = import(&env, &mut ledger, &Selection::default()).await;

    assert_eq!(stats.files_done, 3);
    assert_eq!(stats.inserted, 7);
    assert_eq!(stats.orphans, 0);
    assert_eq!(jurisdictions::count_rows(&env.pool).await.unwrap(), 8);

    // Exactly one parentless row, the level-0 root
    assert_eq!(jurisdictions::root_levels(&env.pool).await.unwrap(), vec![(0, 1)]);
    assert_eq!(jurisdictions::count_level_gaps(&env.pool).await.unwrap(), 0);

    let earth = jurisdictions::find_by_slug(&env.pool, EARTH_SLUG).await.unwrap().unwrap();
    let national = jurisdictions::find_by_slug(&env.pool, "nzl-1-new-zealand")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(national.parent_id.as_deref(), Some(earth.id.as_str()));
    assert_eq!(national.official_languages, vec!["en".to_string(), "mi".to_string()]);

    let west = jurisdictions::find_by_slug(&env.pool, "nzl-2-west").await.unwrap().unwrap();
    assert_eq!(west.parent_id.as_deref(), Some(national.id.as_str()));

    let district = jurisdictions::find_by_slug(&env.pool, "nzl-3-east-south")
        .await
        .unwrap()
        .unwrap();
    let east = jurisdictions::find_by_slug(&env.pool, "nzl-2-east").await.unwrap().unwrap();
    assert_eq!(district.parent_id.as_deref(), Some(east.id.as_str()));
    assert_eq!(district.boundary_id.as_deref(), Some("shape-east-south"));

    // Boundaries only: population untouched
    for row in all_rows(&env).await {
        assert_eq!(row.population, 0, "{}", row.slug);
        assert_eq!(row.population_year, None);
    }
    let missing_geometry: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM jurisdictions WHERE geometry IS NULL OR geometry = ''")
            .fetch_one(&env.pool)
            .await
            .unwrap();
    assert_eq!(missing_geometry, 0);

    assert!(ledger.is_done(&TaskKey::boundary("NZL", 0)));
    assert!(ledger.is_done(&TaskKey::boundary("NZL", 2)));
    assert!(ledger.earth_id().is_some());
}

#[tokio::test]
async fn test_reimport_is_idempotent_with_and_without_ledger() {
    let env = TestEnv::new().await;
    write_nzl_boundaries(&env.boundaries_dir());

    let mut ledger = env.ledger();
    import(&env, &mut ledger, &Selection::default()).await;
    let first = all_rows(&env).await;

    // Second run: everything already done
    let stats = import(&env, &mut ledger, &Selection::default()).await;
    assert_eq!(stats.files_already_done, 3);
    assert_eq!(stats.inserted, 0);
    assert_eq!(all_rows(&env).await, first);

    // Ledger deleted: files are parsed again but nothing new is written
    std::fs::remove_file(env.config.paths.ledger()).unwrap();
    let mut ledger = env.ledger();
    let stats = import(&env, &mut ledger, &Selection::default()).await;
    assert_eq!(stats.files_done, 3);
    assert_eq!(stats.inserted, 0);
    assert_eq!(stats.existing, 7);
    assert_eq!(all_rows(&env).await, first);
    assert_eq!(jurisdictions::count_rows(&env.pool).await.unwrap(), 8);
}

#[tokio::test]
async fn test_missing_file_is_skipped() {
    let env = TestEnv::new().await;
    write_nzl_boundaries(&env.boundaries_dir());
    let mut ledger = env.ledger();

    let selection = Selection::new(&["nzl".to_string()], &[0, 3]);
    let stats = import(&env, &mut ledger, &selection).await;

    assert_eq!(stats.files_done, 1);
    assert_eq!(stats.files_skipped, 1);
    let record = ledger.get(&TaskKey::boundary("NZL", 3)).unwrap();
    assert_eq!(record.status, TaskStatus::Skipped);
    assert_eq!(record.reason.as_deref(), Some("file_not_found"));
}

#[tokio::test]
async fn test_malformed_file_fails_and_run_continues() {
    let env = TestEnv::new().await;
    write_nzl_boundaries(&env.boundaries_dir());
    let broken = write_boundary_file(&env.boundaries_dir(), "FJI", 0, &[]);
    std::fs::write(&broken, "{ not geojson").unwrap();
    let mut ledger = env.ledger();

    let stats = import(&env, &mut ledger, &Selection::default()).await;

    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.files_done, 3);
    let record = ledger.get(&TaskKey::boundary("FJI", 0)).unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert!(record.error.is_some());

    // Failed files are retried on the next run
    write_boundary_file(
        &env.boundaries_dir(),
        "FJI",
        0,
        &[rect_feature("Fiji", 177.0, -19.0, 179.0, -16.0)],
    );
    let stats = import(&env, &mut ledger, &Selection::default()).await;
    assert_eq!(stats.files_done, 1);
    assert!(ledger.is_done(&TaskKey::boundary("FJI", 0)));
}

#[tokio::test]
async fn test_duplicate_names_get_numbered_slugs() {
    let env = TestEnv::new().await;
    write_boundary_file(
        &env.boundaries_dir(),
        "NZL",
        0,
        &[rect_feature("New Zealand", 170.0, -38.0, 174.0, -34.0)],
    );
    write_boundary_file(
        &env.boundaries_dir(),
        "NZL",
        1,
        &[
            rect_feature("Bay", 170.0, -38.0, 172.0, -34.0),
            rect_feature("Bay", 172.0, -38.0, 174.0, -34.0),
        ],
    );
    let mut ledger = env.ledger();
    import(&env, &mut ledger, &Selection::default()).await;

    assert!(jurisdictions::find_by_slug(&env.pool, "nzl-2-bay").await.unwrap().is_some());
    assert!(jurisdictions::find_by_slug(&env.pool, "nzl-2-bay-2").await.unwrap().is_some());
}

#[tokio::test]
async fn test_meta_csv_supplies_boundary_id_and_region() {
    let env = TestEnv::new().await;
    // Feature without shapeID; the table's boundaryID is used instead
    let path = write_boundary_file(
        &env.boundaries_dir(),
        "XYZ",
        0,
        &[rect_feature("Nowhere", 10.0, 10.0, 11.0, 11.0)],
    );
    let mut collection: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    collection["features"][0]["properties"]
        .as_object_mut()
        .unwrap()
        .remove("shapeID");
    std::fs::write(&path, collection.to_string()).unwrap();
    write_meta_csv(
        &env.config.paths.meta_csv(),
        &[("XYZ", 0, "XYZ-ADM0-123", "Western Europe")],
    );

    let mut ledger = env.ledger();
    import(&env, &mut ledger, &Selection::default()).await;

    let row = jurisdictions::find_by_slug(&env.pool, "xyz-1-nowhere")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.boundary_id.as_deref(), Some("XYZ-ADM0-123"));
    assert_eq!(row.official_languages, vec!["fr".to_string()]);
}

#[tokio::test]
async fn test_orphan_attached_by_nearest_centroid() {
    let env = TestEnv::new().await;
    write_nzl_boundaries(&env.boundaries_dir());
    // District lying outside both regions
    write_boundary_file(
        &env.boundaries_dir(),
        "NZL",
        2,
        &[
            rect_feature("West North", 170.0, -36.0, 172.0, -34.0),
            rect_feature("Offshore", 175.0, -37.0, 176.0, -36.0),
        ],
    );
    let mut ledger = env.ledger();
    let stats = import(&env, &mut ledger, &Selection::default()).await;
    assert_eq!(stats.orphans, 1);

    let orphan = jurisdictions::find_by_slug(&env.pool, "nzl-3-offshore")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(orphan.parent_id, None);

    let earth_id = ledger.earth_id().unwrap().to_string();
    let report = HierarchyRepair::new(&env.pool, 10, 2000)
        .run(&earth_id, &Selection::default())
        .await
        .unwrap();
    assert_eq!(report.attached(), 1);
    assert_eq!(report.unresolved(), 0);
    assert_eq!(report.groups[0].centroid, 1);

    let east = jurisdictions::find_by_slug(&env.pool, "nzl-2-east").await.unwrap().unwrap();
    let orphan = jurisdictions::find_by_slug(&env.pool, "nzl-3-offshore")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(orphan.parent_id.as_deref(), Some(east.id.as_str()));
    assert_eq!(jurisdictions::root_levels(&env.pool).await.unwrap(), vec![(0, 1)]);
}

#[tokio::test]
async fn test_repair_reports_group_without_parent_level() {
    let env = TestEnv::new().await;
    // ADM2 present, ADM1 absent: nothing one level up
    write_boundary_file(
        &env.boundaries_dir(),
        "NZL",
        0,
        &[rect_feature("New Zealand", 170.0, -38.0, 174.0, -34.0)],
    );
    write_boundary_file(
        &env.boundaries_dir(),
        "NZL",
        2,
        &[rect_feature("West North", 170.0, -36.0, 172.0, -34.0)],
    );
    let mut ledger = env.ledger();
    import(&env, &mut ledger, &Selection::default()).await;

    let earth_id = ledger.earth_id().unwrap().to_string();
    let report = HierarchyRepair::new(&env.pool, 10, 2000)
        .run(&earth_id, &Selection::default())
        .await
        .unwrap();
    assert_eq!(report.attached(), 0);
    assert_eq!(report.unresolved(), 1);
    assert_eq!(report.groups[0].reason.as_deref(), Some("no level 2 rows"));
}

#[tokio::test]
async fn test_files_are_in_progress_while_imported() {
    let env = TestEnv::new().await;
    write_nzl_boundaries(&env.boundaries_dir());
    let broken = write_boundary_file(&env.boundaries_dir(), "FJI", 0, &[]);
    std::fs::write(&broken, "{ not geojson").unwrap();
    let backend = RecordingBackend::new();
    let mut ledger = Ledger::open(backend.clone()).unwrap();

    import(&env, &mut ledger, &Selection::default()).await;

    assert_eq!(
        backend.statuses(&TaskKey::boundary("NZL", 1)),
        vec![TaskStatus::InProgress, TaskStatus::Done]
    );
    assert_eq!(
        backend.statuses(&TaskKey::boundary("FJI", 0)),
        vec![TaskStatus::InProgress, TaskStatus::Failed]
    );
}
