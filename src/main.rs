//! WSI Tilepack - pack Whole Slide Image regions into JPEG tile archives.
//!
//! `extract` processes every manifest under a root directory; `inspect`
//! verifies a single archive.

use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_tilepack::{
    config::{Cli, Command, ExtractConfig, InspectConfig},
    plan_jobs, ArchiveCompression, Extractor, JpegTileEncoder, Scheduler, SlideIndex, TileArchive,
    TiffSlideOpener,
};

/// How long abandoned workers get to clean up after the run.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Extract(config) => run_extract(config),
        Command::Inspect(config) => run_inspect(config),
    }
}

// =============================================================================
// Extract Command
// =============================================================================

fn run_extract(config: ExtractConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let formats = config.formats();
    let options = config.options();

    info!("Configuration:");
    info!("  Manifests: {}", config.manifest_root.display());
    info!("  Slides: {} ({})", config.slide_root.display(), formats.join(", "));
    info!("  Output: {}", config.output_root.display());
    info!(
        "  Workers: {}, timeout: {}",
        config.workers,
        config
            .timeout_secs
            .map_or_else(|| "none".to_string(), |s| format!("{}s", s))
    );
    info!(
        "  Drop threshold: {}, color correction: {}",
        options.drop_threshold,
        if options.color_correction { "on" } else { "off" }
    );
    info!(
        "  JPEG quality: {}, compression: {}",
        options.jpeg_quality,
        describe_compression(options.compression)
    );

    if let Err(e) = std::fs::create_dir_all(&config.output_root) {
        error!(
            "Failed to create output root {}: {}",
            config.output_root.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    let slide_index = SlideIndex::build(&config.slide_root);
    let jobs = match plan_jobs(
        &config.manifest_root,
        &slide_index,
        &config.output_root,
        &formats,
    ) {
        Ok(jobs) => jobs,
        Err(e) => {
            error!(
                "Failed to list manifests in {}: {}",
                config.manifest_root.display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };

    let unresolved = jobs.iter().filter(|job| job.slide_path.is_none()).count();
    info!(
        "Found {} manifest(s), {} without a matching slide",
        jobs.len(),
        unresolved
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.workers)
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let opener = TiffSlideOpener::with_tile_cache(config.tile_cache);
    let mut scheduler = Scheduler::new(Extractor::new(opener, options), config.workers);
    if let Some(timeout) = config.timeout() {
        scheduler = scheduler.with_timeout(timeout);
    }

    runtime.block_on(scheduler.run(jobs));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    ExitCode::SUCCESS
}

fn describe_compression(compression: ArchiveCompression) -> String {
    match compression {
        ArchiveCompression::None => "none".to_string(),
        ArchiveCompression::Zlib { level } => format!("zlib level {}", level),
    }
}

// =============================================================================
// Inspect Command
// =============================================================================

fn run_inspect(config: InspectConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    let mut archive = match TileArchive::open(&config.archive) {
        Ok(archive) => archive,
        Err(e) => {
            println!("✗ {}: {}", config.archive.display(), e);
            return ExitCode::FAILURE;
        }
    };

    println!("Archive: {}", config.archive.display());
    println!("Slots: {}", archive.len());
    println!("Compression: {}", describe_compression(archive.compression()));
    println!();

    let decoder = JpegTileEncoder::default();
    let mut bad = 0usize;

    for index in 0..archive.len() {
        let checked = archive
            .read(index)
            .map_err(|e| e.to_string())
            .and_then(|blob| {
                decoder
                    .dimensions(&blob)
                    .map(|dims| (dims, blob.len()))
                    .map_err(|e| e.to_string())
            });

        match checked {
            Ok(((width, height), len)) => {
                if config.list {
                    println!("  ✓ {:>6}  {}x{}  {} bytes", index, width, height, len);
                }
            }
            Err(e) => {
                bad += 1;
                println!("  ✗ {:>6}  {}", index, e);
            }
        }
    }

    if bad > 0 {
        println!();
        println!("✗ {} of {} slot(s) unreadable", bad, archive.len());
        return ExitCode::FAILURE;
    }

    println!("✓ All {} slot(s) are valid JPEG tiles", archive.len());
    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_tilepack=debug"
    } else {
        "wsi_tilepack=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
