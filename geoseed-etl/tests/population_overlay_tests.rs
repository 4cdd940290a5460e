//! Integration tests for Phase 2 (population overlay) and ledger rebuild

mod helpers;

use geoseed_etl::checkpoint::{Ledger, TaskKey, TaskStatus};
use geoseed_etl::db::jurisdictions;
use geoseed_etl::selection::Selection;
use geoseed_etl::services::{BoundaryImporter, OverlayOptions, OverlayStats, PopulationOverlay};
use helpers::{
    raster_path, rect_feature, write_boundary_file, write_nzl_boundaries, write_nzl_raster,
    write_square_country, RecordingBackend, TestEnv,
};

async fn import_all(env: &TestEnv, ledger: &mut Ledger) {
    BoundaryImporter::new(&env.pool, &env.config)
        .run(ledger, &Selection::default())
        .await
        .unwrap();
}

async fn overlay(
    env: &TestEnv,
    ledger: &mut Ledger,
    selection: &Selection,
    max_chunks: Option<usize>,
) -> OverlayStats {
    PopulationOverlay::new(&env.pool, &env.config)
        .run(ledger, selection, &OverlayOptions { max_chunks })
        .await
        .unwrap()
}

/// Boundaries and raster of the NZL fixture, Phase 1 done
async fn nzl_env(adjust: impl FnOnce(&mut geoseed_common::PipelineConfig)) -> (TestEnv, Ledger) {
    let env = TestEnv::with_config(adjust).await;
    write_nzl_boundaries(&env.boundaries_dir());
    write_nzl_raster(&env.population_dir(), "NZL", env.year());
    let mut ledger = env.ledger();
    import_all(&env, &mut ledger).await;
    (env, ledger)
}

#[tokio::test]
async fn test_overlay_populates_every_level() {
    let (env, mut ledger) = nzl_env(|_| {}).await;

    let stats = overlay(&env, &mut ledger, &Selection::default(), None).await;

    assert_eq!(stats.countries_done, 1);
    assert_eq!(stats.levels_done, 3);
    assert_eq!(stats.rows_updated, 7);
    assert_eq!(stats.validation_warnings, 0);
    assert!(!stats.interrupted);

    assert_eq!(env.population_of("nzl-1-new-zealand").await, 512);
    assert_eq!(env.population_of("nzl-2-west").await, 256);
    assert_eq!(env.population_of("nzl-2-east").await, 256);
    assert_eq!(env.population_of("nzl-3-east-south").await, 128);

    let national = jurisdictions::find_by_slug(&env.pool, "nzl-1-new-zealand")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(national.population_year, Some(i64::from(env.year())));
    assert_eq!(national.population_note, None);

    // National total equals the sum of its children
    let (national, children_sum, children) =
        jurisdictions::national_and_children_population(&env.pool, "NZL")
            .await
            .unwrap()
            .unwrap();
    assert_eq!((national, children_sum, children), (512, 512, 2));

    assert!(ledger.is_done(&TaskKey::population_country("NZL")));
    for level in 1..=3 {
        assert!(ledger.is_done(&TaskKey::population_level("NZL", level)));
    }

    // Done countries are not revisited
    let stats = overlay(&env, &mut ledger, &Selection::default(), None).await;
    assert_eq!(stats.countries_already_done, 1);
    assert_eq!(stats.rows_updated, 0);
}

#[tokio::test]
async fn test_polygon_outside_raster_gets_zero() {
    let env = TestEnv::new().await;
    write_nzl_boundaries(&env.boundaries_dir());
    write_boundary_file(
        &env.boundaries_dir(),
        "NZL",
        2,
        &[
            rect_feature("West North", 170.0, -36.0, 172.0, -34.0),
            rect_feature("Offshore", 178.0, -37.0, 179.0, -36.0),
            // Smaller than one cell and away from any cell centre
            rect_feature("Rock", 172.01, -35.99, 172.02, -35.98),
        ],
    );
    write_nzl_raster(&env.population_dir(), "NZL", env.year());
    let mut ledger = env.ledger();
    import_all(&env, &mut ledger).await;

    let stats = overlay(&env, &mut ledger, &Selection::default(), None).await;

    assert_eq!(stats.countries_failed, 0);
    assert_eq!(stats.countries_done, 1);
    assert_eq!(env.population_of("nzl-3-offshore").await, 0);
    assert_eq!(env.population_of("nzl-3-rock").await, 0);
    assert_eq!(env.population_of("nzl-3-west-north").await, 128);

    let offshore = jurisdictions::find_by_slug(&env.pool, "nzl-3-offshore")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(offshore.population_year, Some(i64::from(env.year())));
}

#[tokio::test]
async fn test_resume_after_chunk_limit_matches_clean_run() {
    let small_chunks = |c: &mut geoseed_common::PipelineConfig| c.population.fetch_chunk_size = 1;

    let (clean, mut clean_ledger) = nzl_env(small_chunks).await;
    overlay(&clean, &mut clean_ledger, &Selection::default(), None).await;

    let (env, mut ledger) = nzl_env(small_chunks).await;
    // Levels hold 1, 2 and 4 chunks; three chunks finish levels 1 and 2
    let stats = overlay(&env, &mut ledger, &Selection::default(), Some(3)).await;
    assert!(stats.interrupted);
    assert_eq!(stats.chunks_done, 3);
    assert!(!ledger.is_done(&TaskKey::population_country("NZL")));
    assert!(ledger.is_done(&TaskKey::population_level("NZL", 2)));
    assert!(!ledger.is_done(&TaskKey::population_level("NZL", 3)));
    assert_eq!(env.population_of("nzl-3-west-north").await, 0);

    // Next invocation starts from the ledger file, as a new worker would
    drop(ledger);
    let mut ledger = env.ledger();
    let stats = overlay(&env, &mut ledger, &Selection::default(), None).await;
    assert!(!stats.interrupted);
    assert_eq!(stats.chunks_done, 4);
    assert_eq!(stats.countries_done, 1);

    assert_eq!(env.population_snapshot().await, clean.population_snapshot().await);
    let country = ledger.get(&TaskKey::population_country("NZL")).unwrap();
    assert_eq!(country.updated, Some(7));
}

#[tokio::test]
async fn test_tiled_path_matches_direct_path() {
    let (direct, mut direct_ledger) = nzl_env(|_| {}).await;
    let stats = overlay(&direct, &mut direct_ledger, &Selection::default(), None).await;
    assert_eq!(stats.tiled_polygons, 0);

    // Every fixture polygon spans at least 64 cells
    let (tiled, mut tiled_ledger) = nzl_env(|c| {
        c.population.max_bbox_pixels = 10;
        c.population.tile_pixels = 3;
    })
    .await;
    let stats = overlay(&tiled, &mut tiled_ledger, &Selection::default(), None).await;
    assert_eq!(stats.tiled_polygons, 7);

    assert_eq!(tiled.population_snapshot().await, direct.population_snapshot().await);
}

#[tokio::test]
async fn test_missing_raster_is_a_data_gap() {
    let env = TestEnv::new().await;
    write_nzl_boundaries(&env.boundaries_dir());
    let mut ledger = env.ledger();
    import_all(&env, &mut ledger).await;

    let stats = overlay(&env, &mut ledger, &Selection::default(), None).await;

    assert_eq!(stats.countries_failed, 0);
    assert_eq!(stats.countries_data_gap, 1);
    let national = jurisdictions::find_by_slug(&env.pool, "nzl-1-new-zealand")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(national.population, 0);
    assert_eq!(national.population_year, Some(i64::from(env.year())));
    assert!(national
        .population_note
        .as_deref()
        .unwrap()
        .contains("No population raster found for NZL"));

    let record = ledger.get(&TaskKey::population_country("NZL")).unwrap();
    assert_eq!(record.status, TaskStatus::Done);
    assert!(record.note.is_some());
}

#[tokio::test]
async fn test_no_coverage_country_is_zeroed_with_note() {
    let env = TestEnv::with_config(|c| {
        c.population.no_coverage.insert("NZL".to_string());
    })
    .await;
    write_nzl_boundaries(&env.boundaries_dir());
    // Present but ignored
    write_nzl_raster(&env.population_dir(), "NZL", env.year());
    let mut ledger = env.ledger();
    import_all(&env, &mut ledger).await;

    let stats = overlay(&env, &mut ledger, &Selection::default(), None).await;

    assert_eq!(stats.countries_data_gap, 1);
    for (_, population, note) in env.population_snapshot().await.into_iter().skip(1) {
        assert_eq!(population, 0);
        assert!(note.unwrap().starts_with("No population coverage for NZL"));
    }
    assert!(ledger.is_done(&TaskKey::population_country("NZL")));
}

#[tokio::test]
async fn test_fallback_raster_is_used() {
    let env = TestEnv::new().await;
    // VAT borrows ITA's raster by default
    write_square_country(&env.boundaries_dir(), "VAT", "Holy See");
    write_nzl_raster(&env.population_dir(), "ITA", env.year());
    let mut ledger = env.ledger();
    import_all(&env, &mut ledger).await;

    let stats = overlay(&env, &mut ledger, &Selection::default(), None).await;

    assert_eq!(stats.countries_done, 1);
    assert_eq!(stats.countries_data_gap, 0);
    assert_eq!(env.population_of("vat-1-holy-see").await, 512);
    let record = ledger.get(&TaskKey::population_country("VAT")).unwrap();
    assert_eq!(record.note.as_deref(), Some("raster of ITA"));
}

#[tokio::test]
async fn test_unreadable_raster_fails_country() {
    let env = TestEnv::new().await;
    write_nzl_boundaries(&env.boundaries_dir());
    let path = raster_path(&env.population_dir(), "NZL", env.year());
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"not a tiff").unwrap();
    let mut ledger = env.ledger();
    import_all(&env, &mut ledger).await;

    let stats = overlay(&env, &mut ledger, &Selection::default(), None).await;

    assert_eq!(stats.countries_failed, 1);
    let record = ledger.get(&TaskKey::population_country("NZL")).unwrap();
    assert_eq!(record.status, TaskStatus::Failed);
    assert!(record.error.is_some());
    assert_eq!(env.population_of("nzl-1-new-zealand").await, 0);
}

#[tokio::test]
async fn test_validation_flags_children_mismatch() {
    let env = TestEnv::new().await;
    write_boundary_file(
        &env.boundaries_dir(),
        "NZL",
        0,
        &[rect_feature("New Zealand", 170.0, -38.0, 174.0, -34.0)],
    );
    // Only the western half has a region
    write_boundary_file(
        &env.boundaries_dir(),
        "NZL",
        1,
        &[rect_feature("West", 170.0, -38.0, 172.0, -34.0)],
    );
    write_nzl_raster(&env.population_dir(), "NZL", env.year());
    let mut ledger = env.ledger();
    import_all(&env, &mut ledger).await;

    let stats = overlay(&env, &mut ledger, &Selection::default(), None).await;

    assert_eq!(stats.validation_warnings, 1);
    // A warning, not a failure
    assert!(ledger.is_done(&TaskKey::population_country("NZL")));
}

#[tokio::test]
async fn test_level_filter_leaves_country_open() {
    let (env, mut ledger) = nzl_env(|_| {}).await;

    let stats = overlay(&env, &mut ledger, &Selection::new(&[], &[1]), None).await;

    assert_eq!(stats.levels_done, 1);
    assert_eq!(stats.countries_done, 0);
    assert_eq!(env.population_of("nzl-2-west").await, 256);
    assert_eq!(env.population_of("nzl-1-new-zealand").await, 0);
    assert!(!ledger.is_done(&TaskKey::population_country("NZL")));
}

#[tokio::test]
async fn test_ledger_rebuild_marks_exactly_populated_pairs() {
    let (env, mut ledger) = nzl_env(|_| {}).await;
    // Populate stored levels 1 and 2 only
    overlay(&env, &mut ledger, &Selection::new(&[], &[0, 1]), None).await;

    let pairs = jurisdictions::populated_pairs(&env.pool).await.unwrap();
    let found: Vec<(String, i64)> = pairs.iter().map(|p| (p.country.clone(), p.level)).collect();
    assert_eq!(found, vec![("NZL".to_string(), 1), ("NZL".to_string(), 2)]);

    // Lose the ledger, then rebuild it from the store
    std::fs::remove_file(env.config.paths.ledger()).unwrap();
    let mut ledger = env.ledger();
    assert_eq!(ledger.rebuild_from_store(&pairs).unwrap(), 2);

    assert!(ledger.is_done(&TaskKey::population_level("NZL", 1)));
    assert!(ledger.is_done(&TaskKey::population_level("NZL", 2)));
    assert!(!ledger.is_done(&TaskKey::population_level("NZL", 3)));
    assert!(!ledger.is_done(&TaskKey::population_country("NZL")));

    // Only the missing level is processed afterwards
    let stats = overlay(&env, &mut ledger, &Selection::default(), None).await;
    assert_eq!(stats.levels_done, 1);
    assert_eq!(stats.rows_updated, 4);
    assert_eq!(stats.countries_done, 1);
    assert_eq!(env.population_of("nzl-3-west-south").await, 128);
}

#[tokio::test]
async fn test_tiling_threshold_is_inclusive() {
    /// Write the fixture with districts exactly at and just over 64 cells
    fn write_threshold_districts(env: &TestEnv) {
        write_nzl_boundaries(&env.boundaries_dir());
        write_boundary_file(
            &env.boundaries_dir(),
            "NZL",
            2,
            &[
                // 8 x 8 cells
                rect_feature("At Limit", 170.0, -36.0, 172.0, -34.0),
                // 13 x 5 cells
                rect_feature("Over Limit", 170.0, -38.0, 173.25, -36.75),
            ],
        );
        write_nzl_raster(&env.population_dir(), "NZL", env.year());
    }

    let direct = TestEnv::new().await;
    write_threshold_districts(&direct);
    let mut direct_ledger = direct.ledger();
    import_all(&direct, &mut direct_ledger).await;
    let stats = overlay(&direct, &mut direct_ledger, &Selection::default(), None).await;
    assert_eq!(stats.tiled_polygons, 0);

    let tiled = TestEnv::with_config(|c| {
        c.population.max_bbox_pixels = 64;
        c.population.tile_pixels = 3;
    })
    .await;
    write_threshold_districts(&tiled);
    let mut tiled_ledger = tiled.ledger();
    import_all(&tiled, &mut tiled_ledger).await;
    let stats = overlay(&tiled, &mut tiled_ledger, &Selection::default(), None).await;

    // National (256 cells), both regions (128) and "Over Limit" (65) are
    // tiled; "At Limit" (64) is read directly
    assert_eq!(stats.tiled_polygons, 4);
    assert_eq!(tiled.population_of("nzl-3-at-limit").await, 128);
    assert_eq!(tiled.population_of("nzl-3-over-limit").await, 130);
    assert_eq!(tiled.population_snapshot().await, direct.population_snapshot().await);
}

#[tokio::test]
async fn test_chunks_are_in_progress_while_aggregated() {
    let (env, _) = nzl_env(|_| {}).await;
    let backend = RecordingBackend::new();
    let mut ledger = Ledger::open(backend.clone()).unwrap();

    overlay(&env, &mut ledger, &Selection::default(), None).await;

    assert_eq!(
        backend.statuses(&TaskKey::population_chunk("NZL", 3, 0)),
        vec![TaskStatus::InProgress, TaskStatus::Done]
    );
    assert_eq!(
        backend.statuses(&TaskKey::population_country("NZL")),
        vec![TaskStatus::Done]
    );
}
