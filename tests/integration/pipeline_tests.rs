//! Extraction pipeline tests against scripted slides.

use std::fs;
use std::path::PathBuf;

use wsi_tilepack::error::ExtractError;
use wsi_tilepack::pipeline::{
    staging_path, CancelFlag, ExtractJob, ExtractOptions, ExtractionOutcome, Extractor,
    SkipReason,
};
use wsi_tilepack::{ArchiveCompression, TileArchive};

use super::test_utils::{
    assert_color_near, center, coord_color, grid_coords, read_all_tiles, touch_slide,
    write_manifest, CorrectionMode, MockOpener, WHITE,
};

struct Fixture {
    _dir: tempfile::TempDir,
    manifests: PathBuf,
    slides: PathBuf,
    output: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let manifests = dir.path().join("coords");
        let slides = dir.path().join("slides");
        let output = dir.path().join("tiles");
        for d in [&manifests, &slides, &output] {
            fs::create_dir_all(d).unwrap();
        }
        Self {
            _dir: dir,
            manifests,
            slides,
            output,
        }
    }

    /// Manifest plus slide for `stem`, returning the job.
    fn job(&self, stem: &str, coords: &[(i64, i64)], patch_size: u32) -> ExtractJob {
        let manifest = write_manifest(&self.manifests, stem, coords, 0, patch_size);
        let slide = touch_slide(&self.slides, &format!("{stem}.svs"));
        ExtractJob::new(
            manifest,
            self.output.join(format!("{stem}.tilepack")),
            Some(slide),
        )
    }
}

fn extract(opener: MockOpener, job: &ExtractJob) -> ExtractionOutcome {
    Extractor::new(opener, ExtractOptions::default()).extract(job, &CancelFlag::new())
}

fn assert_nothing_published(job: &ExtractJob) {
    assert!(!job.output_path.exists(), "output must not exist");
    assert!(
        !staging_path(&job.output_path).exists(),
        "staging file must be removed"
    );
}

// =============================================================================
// End-to-end
// =============================================================================

#[test]
fn test_three_coordinates_with_one_failure() {
    let fixture = Fixture::new();
    let coords = [(0, 0), (256, 0), (0, 256)];
    let job = fixture.job("slide-1", &coords, 256);
    let opener = MockOpener::new().failing_at([(256, 0)]);
    // floor(0.5 * 3) = 1 tolerated failure
    let options = ExtractOptions {
        drop_threshold: 0.5,
        ..ExtractOptions::default()
    };

    let outcome = Extractor::new(opener, options).extract(&job, &CancelFlag::new());

    let report = match outcome {
        ExtractionOutcome::Completed(report) => report,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(report.tiles, 3);
    assert_eq!(report.corrupted, 1);
    assert_eq!(report.allowed, 1);

    assert!(job.output_path.exists());
    assert!(!staging_path(&job.output_path).exists());

    let tiles = read_all_tiles(&job.output_path);
    assert_eq!(tiles.len(), 3);
    for tile in &tiles {
        assert_eq!(tile.dimensions(), (256, 256));
    }
    assert_color_near(center(&tiles[0]), coord_color(0, 0));
    assert_color_near(center(&tiles[1]), WHITE);
    assert_color_near(center(&tiles[2]), coord_color(0, 256));
}

#[test]
fn test_three_coordinates_with_one_failure_at_default_threshold() {
    let fixture = Fixture::new();
    let coords = [(0, 0), (256, 0), (0, 256)];
    let job = fixture.job("slide-1", &coords, 256);
    // floor(0.1 * 3) = 0, so a single failure drops the manifest
    let outcome = extract(MockOpener::new().failing_at([(256, 0)]), &job);

    assert!(
        matches!(
            outcome,
            ExtractionOutcome::Failed(ExtractError::TooManyCorruptedTiles {
                corrupted: 1,
                allowed: 0,
                total: 3
            })
        ),
        "{:?}",
        outcome
    );
    assert_nothing_published(&job);
}

#[test]
fn test_slot_order_matches_manifest_order() {
    let fixture = Fixture::new();
    // Deliberately not sorted
    let mut coords = grid_coords(20);
    coords.reverse();
    coords.swap(3, 11);
    let job = fixture.job("ordered", &coords, 64);

    assert!(extract(MockOpener::new(), &job).is_completed());

    let tiles = read_all_tiles(&job.output_path);
    assert_eq!(tiles.len(), coords.len());
    for (tile, &(x, y)) in tiles.iter().zip(&coords) {
        assert_color_near(center(tile), coord_color(x, y));
    }
}

#[test]
fn test_placeholder_is_white_square_in_its_slot() {
    let fixture = Fixture::new();
    let coords = grid_coords(10);
    let job = fixture.job("holes", &coords, 128);
    let opener = MockOpener::new().failing_at([coords[4]]);

    assert!(extract(opener, &job).is_completed());

    let tiles = read_all_tiles(&job.output_path);
    let placeholder = &tiles[4];
    assert_eq!(placeholder.dimensions(), (128, 128));
    for pixel in [
        *placeholder.get_pixel(0, 0),
        *placeholder.get_pixel(127, 127),
        center(placeholder),
    ] {
        assert_color_near(pixel, WHITE);
    }
    assert_color_near(center(&tiles[3]), coord_color(coords[3].0, coords[3].1));
    assert_color_near(center(&tiles[5]), coord_color(coords[5].0, coords[5].1));
}

#[test]
fn test_wrong_size_region_counts_as_corrupted() {
    let fixture = Fixture::new();
    let coords = grid_coords(10);
    let job = fixture.job("short", &coords, 64);
    let opener = MockOpener::new().wrong_size_at([coords[0]]);

    let ExtractionOutcome::Completed(report) = extract(opener, &job) else {
        panic!("expected completion");
    };
    assert_eq!(report.corrupted, 1);

    let tiles = read_all_tiles(&job.output_path);
    assert_eq!(tiles[0].dimensions(), (64, 64));
    assert_color_near(center(&tiles[0]), WHITE);
}

#[test]
fn test_empty_manifest_publishes_empty_archive() {
    let fixture = Fixture::new();
    let job = fixture.job("empty", &[], 256);

    assert!(extract(MockOpener::new(), &job).is_completed());
    assert!(TileArchive::open(&job.output_path).unwrap().is_empty());
}

#[test]
fn test_uncompressed_archive_option() {
    let fixture = Fixture::new();
    let coords = grid_coords(3);
    let job = fixture.job("raw", &coords, 64);
    let options = ExtractOptions {
        compression: ArchiveCompression::None,
        ..ExtractOptions::default()
    };

    let outcome = Extractor::new(MockOpener::new(), options).extract(&job, &CancelFlag::new());
    assert!(outcome.is_completed());

    let archive = TileArchive::open(&job.output_path).unwrap();
    assert_eq!(archive.compression(), ArchiveCompression::None);
    assert_eq!(archive.len(), 3);
}

// =============================================================================
// Corruption budget
// =============================================================================

fn run_with_failures(
    failures: usize,
    fail_last: bool,
) -> (Fixture, ExtractJob, ExtractionOutcome) {
    let fixture = Fixture::new();
    let coords = grid_coords(100);
    let job = fixture.job("budget", &coords, 32);

    let failing: Vec<(i64, i64)> = if fail_last {
        coords[coords.len() - failures..].to_vec()
    } else {
        coords[..failures].to_vec()
    };
    let outcome = extract(MockOpener::new().failing_at(failing), &job);
    (fixture, job, outcome)
}

#[test]
fn test_budget_allows_exactly_ten_of_hundred() {
    let (_fixture, job, outcome) = run_with_failures(10, false);

    let report = match outcome {
        ExtractionOutcome::Completed(report) => report,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(report.tiles, 100);
    assert_eq!(report.corrupted, 10);
    assert_eq!(report.allowed, 10);
    assert_eq!(TileArchive::open(&job.output_path).unwrap().len(), 100);
}

#[test]
fn test_budget_rejects_eleven_of_hundred() {
    let (_fixture, job, outcome) = run_with_failures(11, false);

    assert!(matches!(
        outcome,
        ExtractionOutcome::Failed(ExtractError::TooManyCorruptedTiles {
            corrupted: 11,
            allowed: 10,
            total: 100
        })
    ));
    assert_nothing_published(&job);
}

#[test]
fn test_budget_counts_failure_on_last_coordinate() {
    let (_fixture, job, outcome) = run_with_failures(11, true);

    assert!(matches!(
        outcome,
        ExtractionOutcome::Failed(ExtractError::TooManyCorruptedTiles { corrupted: 11, .. })
    ));
    assert_nothing_published(&job);
}

#[test]
fn test_budget_stops_reading_once_exceeded() {
    let fixture = Fixture::new();
    let coords = grid_coords(100);
    let job = fixture.job("early", &coords, 32);
    let opener = MockOpener::new().failing_at(coords[..11].to_vec());
    let stats = opener.stats();

    assert!(extract(opener, &job).is_failed());
    // The 12th coordinate is never read
    assert_eq!(stats.reads(), 11);
}

// =============================================================================
// Short-circuits and failures
// =============================================================================

#[test]
fn test_idempotent_rerun_leaves_output_untouched() {
    let fixture = Fixture::new();
    let job = fixture.job("again", &grid_coords(5), 64);

    assert!(extract(MockOpener::new(), &job).is_completed());
    let first = fs::read(&job.output_path).unwrap();
    let modified = fs::metadata(&job.output_path).unwrap().modified().unwrap();

    let opener = MockOpener::new();
    let stats = opener.stats();
    let outcome = extract(opener, &job);

    assert!(matches!(
        outcome,
        ExtractionOutcome::Skipped(SkipReason::AlreadyDone)
    ));
    assert_eq!(stats.opens(), 0);
    assert_eq!(fs::read(&job.output_path).unwrap(), first);
    assert_eq!(
        fs::metadata(&job.output_path).unwrap().modified().unwrap(),
        modified
    );
}

#[test]
fn test_unresolved_slide_is_skipped() {
    let fixture = Fixture::new();
    let manifest = write_manifest(&fixture.manifests, "orphan", &grid_coords(2), 0, 64);

    for slide_path in [None, Some(PathBuf::new())] {
        let job = ExtractJob::new(
            manifest.clone(),
            fixture.output.join("orphan.tilepack"),
            slide_path,
        );
        let outcome = extract(MockOpener::new(), &job);
        assert!(matches!(
            outcome,
            ExtractionOutcome::Skipped(SkipReason::NoSlideMatch)
        ));
        assert_nothing_published(&job);
    }
}

#[test]
fn test_unresolved_slide_wins_over_existing_output() {
    let fixture = Fixture::new();
    let output = fixture.output.join("x.tilepack");
    fs::write(&output, b"existing").unwrap();
    let job = ExtractJob::new(fixture.manifests.join("x.json"), output, None);

    assert!(matches!(
        extract(MockOpener::new(), &job),
        ExtractionOutcome::Skipped(SkipReason::NoSlideMatch)
    ));
}

#[test]
fn test_malformed_manifest_fails_without_output() {
    let fixture = Fixture::new();
    let manifest = fixture.manifests.join("broken.json");
    fs::write(&manifest, b"{\"coords\": {\"data\": [[0, 0]]}}").unwrap();
    let slide = touch_slide(&fixture.slides, "broken.svs");
    let job = ExtractJob::new(manifest, fixture.output.join("broken.tilepack"), Some(slide));

    let opener = MockOpener::new();
    let stats = opener.stats();
    let outcome = extract(opener, &job);

    assert!(matches!(
        outcome,
        ExtractionOutcome::Failed(ExtractError::ManifestUnreadable(_))
    ));
    assert_eq!(stats.opens(), 0);
    assert_nothing_published(&job);
}

#[test]
fn test_missing_manifest_fails() {
    let fixture = Fixture::new();
    let slide = touch_slide(&fixture.slides, "ghost.svs");
    let job = ExtractJob::new(
        fixture.manifests.join("ghost.json"),
        fixture.output.join("ghost.tilepack"),
        Some(slide),
    );

    assert!(matches!(
        extract(MockOpener::new(), &job),
        ExtractionOutcome::Failed(ExtractError::ManifestUnreadable(_))
    ));
    assert_nothing_published(&job);
}

#[test]
fn test_missing_slide_fails_to_open() {
    let fixture = Fixture::new();
    let manifest = write_manifest(&fixture.manifests, "gone", &grid_coords(2), 0, 64);
    let job = ExtractJob::new(
        manifest,
        fixture.output.join("gone.tilepack"),
        Some(fixture.slides.join("gone.svs")),
    );

    assert!(matches!(
        extract(MockOpener::new(), &job),
        ExtractionOutcome::Failed(ExtractError::SlideOpen(_))
    ));
    assert_nothing_published(&job);
}

#[test]
fn test_slide_handle_closed_after_each_outcome() {
    let fixture = Fixture::new();
    let coords = grid_coords(20);
    let shifted: Vec<(i64, i64)> = coords.iter().map(|&(x, y)| (x, y + 10_000)).collect();
    let bad = fixture.job("bad", &coords, 32);
    let ok = fixture.job("ok", &shifted, 32);

    let opener = MockOpener::new().failing_at(coords[..3].to_vec());
    let stats = opener.stats();
    let extractor = Extractor::new(opener, ExtractOptions::default());

    // 3 of 20 exceeds floor(0.1 * 20) = 2
    assert!(extractor.extract(&bad, &CancelFlag::new()).is_failed());
    assert_eq!(stats.active(), 0);

    assert!(extractor.extract(&ok, &CancelFlag::new()).is_completed());
    assert_eq!(stats.active(), 0);
    assert_eq!(stats.opens(), 2);
}

#[test]
fn test_stale_staging_file_is_replaced() {
    let fixture = Fixture::new();
    let job = fixture.job("stale", &grid_coords(4), 64);
    fs::write(staging_path(&job.output_path), b"left over from a crash").unwrap();

    assert!(extract(MockOpener::new(), &job).is_completed());
    assert_eq!(TileArchive::open(&job.output_path).unwrap().len(), 4);
    assert!(!staging_path(&job.output_path).exists());
}

#[test]
fn test_cancelled_before_start() {
    let fixture = Fixture::new();
    let job = fixture.job("cancelled", &grid_coords(4), 64);
    let cancel = CancelFlag::new();
    cancel.cancel();

    let outcome = Extractor::new(MockOpener::new(), ExtractOptions::default()).extract(&job, &cancel);

    assert!(matches!(
        outcome,
        ExtractionOutcome::Failed(ExtractError::Cancelled)
    ));
    assert_nothing_published(&job);
}

// =============================================================================
// Color correction
// =============================================================================

fn extract_with_correction(mode: CorrectionMode, enabled: bool) -> (ExtractionOutcome, usize) {
    let fixture = Fixture::new();
    let job = fixture.job("color", &grid_coords(2), 32);
    let opener = MockOpener::new().with_correction(mode);
    let stats = opener.stats();
    let options = ExtractOptions {
        color_correction: enabled,
        ..ExtractOptions::default()
    };

    let outcome = Extractor::new(opener, options).extract(&job, &CancelFlag::new());
    (outcome, stats.corrections())
}

#[test]
fn test_color_correction_applied_when_enabled() {
    let (outcome, applied) = extract_with_correction(CorrectionMode::Succeeds, true);
    assert!(outcome.is_completed());
    assert_eq!(applied, 1);
}

#[test]
fn test_color_correction_not_applied_when_disabled() {
    let (outcome, applied) = extract_with_correction(CorrectionMode::Succeeds, false);
    assert!(outcome.is_completed());
    assert_eq!(applied, 0);
}

#[test]
fn test_color_correction_failure_is_not_fatal() {
    let (outcome, applied) = extract_with_correction(CorrectionMode::Fails, true);
    assert!(outcome.is_completed());
    assert_eq!(applied, 0);
}

#[test]
fn test_color_correction_unsupported_is_not_fatal() {
    let (outcome, _) = extract_with_correction(CorrectionMode::Unsupported, true);
    assert!(outcome.is_completed());
}

