//! Region reads from tiled JPEG TIFF files.

use image::Rgb;

use wsi_tilepack::error::{RegionError, SlideError};
use wsi_tilepack::pipeline::{CancelFlag, ExtractJob, ExtractOptions, ExtractionOutcome, Extractor};
use wsi_tilepack::slide::{RegionReader, SlideOpener, TiffSlide, TiffSlideOpener};

use super::test_utils::{
    assert_color_near, center, read_all_tiles, write_manifest, MemoryReader, TiffBuilder,
    TiffLevel, WHITE,
};

const RED: Rgb<u8> = Rgb([220, 20, 20]);
const GREEN: Rgb<u8> = Rgb([20, 200, 20]);
const BLUE: Rgb<u8> = Rgb([20, 20, 220]);
const YELLOW: Rgb<u8> = Rgb([230, 220, 30]);
const GRAY: Rgb<u8> = Rgb([128, 128, 128]);

fn quadrant_color(col: u32, row: u32) -> Rgb<u8> {
    match (col, row) {
        (0, 0) => RED,
        (1, 0) => GREEN,
        (0, 1) => BLUE,
        _ => YELLOW,
    }
}

/// 384x384 level 0 (2x2 tiles of 256, right and bottom edges padded) and a
/// 192x192 gray level 1.
fn two_level_tiff() -> Vec<u8> {
    TiffBuilder::new()
        .add_level(TiffLevel::solid(384, 384, 256, 256, quadrant_color))
        .add_level(TiffLevel::solid(192, 192, 256, 256, |_, _| GRAY))
        .build()
}

fn open_slide(data: Vec<u8>) -> TiffSlide<MemoryReader> {
    TiffSlide::open(MemoryReader::new(data, "memory://test.svs"), 16).unwrap()
}

#[test]
fn test_levels_and_dimensions() {
    let slide = open_slide(two_level_tiff());

    assert_eq!(slide.level_count(), 2);
    assert_eq!(slide.dimensions(), Some((384, 384)));
    assert_eq!(slide.level_dimensions(1), Some((192, 192)));
    assert_eq!(slide.level_dimensions(2), None);
    assert_eq!(slide.level_downsample(1), Some(2.0));
    assert_eq!(slide.tile_size(0), Some((256, 256)));
    assert_eq!(slide.identifier(), "memory://test.svs");
}

#[test]
fn test_levels_sorted_largest_first() {
    let data = TiffBuilder::new()
        .add_level(TiffLevel::solid(192, 192, 256, 256, |_, _| GRAY))
        .add_level(TiffLevel::solid(384, 384, 256, 256, quadrant_color))
        .build();
    let slide = open_slide(data);

    assert_eq!(slide.dimensions(), Some((384, 384)));
    assert_eq!(slide.level_downsample(1), Some(2.0));
}

#[test]
fn test_region_across_tile_boundaries() {
    let mut slide = open_slide(two_level_tiff());

    let region = slide.read_region((128, 128), 0, (256, 256)).unwrap();

    assert_eq!(region.dimensions(), (256, 256));
    assert_color_near(*region.get_pixel(10, 10), RED);
    assert_color_near(*region.get_pixel(200, 10), GREEN);
    assert_color_near(*region.get_pixel(10, 200), BLUE);
    assert_color_near(*region.get_pixel(200, 200), YELLOW);
}

#[test]
fn test_region_past_level_edge_is_white() {
    let mut slide = open_slide(two_level_tiff());

    // Columns 256..384 exist, 384..512 do not
    let region = slide.read_region((256, 0), 0, (256, 256)).unwrap();
    assert_color_near(*region.get_pixel(64, 64), GREEN);
    assert_color_near(*region.get_pixel(192, 64), WHITE);

    // Negative coordinates
    let region = slide.read_region((-128, -128), 0, (256, 256)).unwrap();
    assert_color_near(*region.get_pixel(64, 64), WHITE);
    assert_color_near(*region.get_pixel(192, 192), RED);
}

#[test]
fn test_region_at_lower_level_uses_downsample() {
    let mut slide = open_slide(two_level_tiff());

    // Level-0 (256, 256) is level-1 (128, 128); 64 gray pixels then white
    let region = slide.read_region((256, 256), 1, (128, 128)).unwrap();
    assert_color_near(*region.get_pixel(10, 10), GRAY);
    assert_color_near(*region.get_pixel(100, 100), WHITE);
}

#[test]
fn test_region_errors() {
    let mut slide = open_slide(two_level_tiff());

    assert!(matches!(
        slide.read_region((5000, 0), 0, (256, 256)),
        Err(RegionError::OutOfBounds { x: 5000, .. })
    ));
    assert!(matches!(
        slide.read_region((-256, 0), 0, (256, 256)),
        Err(RegionError::OutOfBounds { .. })
    ));
    // Coordinates at the ends of the i64 range
    for (location, level) in [
        ((i64::MAX, 0), 0),
        ((0, i64::MAX), 0),
        ((i64::MAX - 100, i64::MAX - 100), 0),
        ((i64::MAX, i64::MAX), 1),
        ((i64::MIN, 0), 0),
    ] {
        assert!(
            matches!(
                slide.read_region(location, level, (256, 256)),
                Err(RegionError::OutOfBounds { .. })
            ),
            "{location:?} at level {level}"
        );
    }
    assert!(matches!(
        slide.read_region((0, 0), 7, (256, 256)),
        Err(RegionError::InvalidLevel {
            level: 7,
            level_count: 2
        })
    ));
}

#[test]
fn test_sparse_tile_is_an_error() {
    let data = TiffBuilder::new()
        .add_level(TiffLevel::solid(512, 512, 256, 256, quadrant_color).with_empty_tile(3))
        .build();
    let mut slide = open_slide(data);

    assert!(slide.read_region((0, 0), 0, (256, 256)).is_ok());
    assert!(matches!(
        slide.read_region((256, 256), 0, (256, 256)),
        Err(RegionError::EmptyTile {
            level: 0,
            tile_x: 1,
            tile_y: 1
        })
    ));
}

#[test]
fn test_corrupt_tile_bytes_are_a_decode_error() {
    let mut data = two_level_tiff();
    // First tile's JPEG data starts right after the 8-byte header
    for byte in &mut data[8..200] {
        *byte = 0x5A;
    }
    let mut slide = open_slide(data);

    assert!(matches!(
        slide.read_region((0, 0), 0, (64, 64)),
        Err(RegionError::Decode { .. })
    ));
}

#[test]
fn test_tiff_without_tiled_jpeg_levels_is_unsupported() {
    // Header plus an IFD with only image dimensions
    let mut data = Vec::new();
    data.extend_from_slice(b"II");
    data.extend_from_slice(&42u16.to_le_bytes());
    data.extend_from_slice(&8u32.to_le_bytes());
    data.extend_from_slice(&2u16.to_le_bytes());
    for (tag, value) in [(256u16, 64u32), (257, 64)] {
        data.extend_from_slice(&tag.to_le_bytes());
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&value.to_le_bytes());
    }
    data.extend_from_slice(&0u32.to_le_bytes());

    let result = TiffSlide::open(MemoryReader::new(data, "strip.tif"), 4);
    assert!(matches!(result, Err(SlideError::Unsupported { .. })));
}

#[test]
fn test_extract_from_tiff_file() {
    let dir = tempfile::tempdir().unwrap();
    let slide_path = dir.path().join("quad.svs");
    std::fs::write(&slide_path, two_level_tiff()).unwrap();

    // The last coordinate lies outside the slide
    let coords = [(0, 0), (256, 0), (0, 256), (9000, 9000)];
    let manifest = write_manifest(dir.path(), "quad", &coords, 0, 128);
    let job = ExtractJob::new(manifest, dir.path().join("quad.tilepack"), Some(slide_path));

    let options = ExtractOptions {
        drop_threshold: 0.25,
        ..ExtractOptions::default()
    };
    let extractor = Extractor::new(TiffSlideOpener::with_tile_cache(4), options);
    let outcome = extractor.extract(&job, &CancelFlag::new());

    let report = match outcome {
        ExtractionOutcome::Completed(report) => report,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(report.corrupted, 1);

    let tiles = read_all_tiles(&job.output_path);
    assert_eq!(tiles.len(), 4);
    assert_color_near(center(&tiles[0]), RED);
    assert_color_near(center(&tiles[1]), GREEN);
    assert_color_near(center(&tiles[2]), BLUE);
    assert_color_near(center(&tiles[3]), WHITE);
}

#[test]
fn test_opener_reads_local_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.svs");
    std::fs::write(&path, two_level_tiff()).unwrap();

    let slide = TiffSlideOpener::new().open(&path).unwrap();
    assert_eq!(slide.level_count(), 2);
    assert!(slide.identifier().ends_with("local.svs"));
}
