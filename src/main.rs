//! WSI Pyramid - upload, convert and serve Whole Slide Images.
//!
//! This binary starts the HTTP server, or runs a one-shot conversion or
//! inspection from the command line.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_pyramid::{
    config::{Cli, Command, ConvertConfig, InspectConfig, ServeConfig},
    convert::JobStatus,
    format::{extension_of, inspect, is_directly_streamable},
    io::write_atomic,
    server::{create_router, RouterConfig},
    service::{ServiceOptions, SlideService},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Convert(config) => run_convert(config).await,
        Command::Inspect(config) => run_inspect(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("WSI Pyramid v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Uploads: {}", config.upload_dir.display());
    info!("  Pyramid cache: {}", config.cache_dir.display());
    info!(
        "  Tiles: {}px, overlap {}, {} (quality {})",
        config.pyramid.tile_size,
        config.pyramid.overlap,
        config.pyramid.tile_format,
        config.pyramid.jpeg_quality
    );
    info!(
        "  Workers: {}, tile cache {}MB, max upload {}MB",
        config.workers,
        config.cache_tiles / (1024 * 1024),
        config.max_upload_mb
    );
    if config.cors_origins.is_none() {
        warn!("  CORS: any origin");
    }

    let options = ServiceOptions {
        convert: config.pyramid.to_options(),
        workers: config.workers,
        tile_cache_bytes: config.cache_tiles,
    };
    let service = match SlideService::open(&config.upload_dir, &config.cache_dir, options).await {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to open storage: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match service.scan().await {
        Ok(count) => info!("  Found {} slide(s)", count),
        Err(e) => {
            error!("Failed to scan {}: {}", config.upload_dir.display(), e);
            return ExitCode::FAILURE;
        }
    }

    let router = create_router(Arc::new(service), build_router_config(&config));
    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/slides", addr);
    info!("    curl -F file=@slide.svs http://{}/upload", addr);
    info!("    curl -X POST http://{}/convert/<slide_id>", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_pyramid=debug,tower_http=debug"
    } else {
        "wsi_pyramid=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_max_upload_bytes(config.max_upload_bytes())
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}

// =============================================================================
// Convert Command
// =============================================================================

async fn run_convert(config: ConvertConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let Some(filename) = config.input.file_name().and_then(|n| n.to_str()) else {
        error!("Input path is not valid UTF-8: {}", config.input.display());
        return ExitCode::FAILURE;
    };
    let source_dir = config
        .input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let options = ServiceOptions {
        convert: config.pyramid.to_options(),
        workers: 1,
        ..ServiceOptions::default()
    };
    let service = match SlideService::open(source_dir, &config.output, options).await {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to open storage: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let record = match service.register(filename).await {
        Ok(record) => record,
        Err(e) => {
            error!("Cannot convert {}: {}", config.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = service.convert(&record.name).await {
        error!("Failed to start conversion: {}", e);
        return ExitCode::FAILURE;
    }

    let snapshot = match service.wait_for(&record.name, Duration::from_millis(250)).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("Lost track of conversion: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if snapshot.status != JobStatus::Complete {
        error!(
            "Conversion failed: {}",
            snapshot.error.as_deref().unwrap_or("unknown error")
        );
        return ExitCode::FAILURE;
    }

    // Standalone viewers expect `{name}.dzi` next to `{name}_files/`
    let descriptor = match service.descriptor(&record.name).await {
        Ok(descriptor) => descriptor,
        Err(e) => {
            error!("Pyramid descriptor missing: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let dzi_path = config.output.join(format!("{}.dzi", record.name));
    if let Err(e) = write_atomic(&dzi_path, descriptor.to_dzi_xml().as_bytes()).await {
        error!("Failed to write {}: {}", dzi_path.display(), e);
        return ExitCode::FAILURE;
    }

    let tiles = service.tiles().count_tiles(&record.name).await.unwrap_or(0);
    info!(
        "Converted {} ({}x{}): {} levels, {} tiles",
        filename, descriptor.width, descriptor.height, descriptor.level_count, tiles
    );
    info!("  Descriptor: {}", dzi_path.display());
    info!("  Tiles: {}", service.tiles().slide_dir(&record.name).display());

    ExitCode::SUCCESS
}

// =============================================================================
// Inspect Command
// =============================================================================

async fn run_inspect(config: InspectConfig) -> ExitCode {
    let metadata = match inspect(&config.path).await {
        Ok(metadata) => metadata,
        Err(e) => {
            eprintln!("✗ {}: {}", config.path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if config.json {
        match serde_json::to_string_pretty(&metadata) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    let streamable = config
        .path
        .to_str()
        .and_then(extension_of)
        .map(|ext| is_directly_streamable(&ext))
        .unwrap_or(false);

    println!("{}", config.path.display());
    println!("═════════════════════════════════");
    println!("  Format:      {}", metadata.format);
    println!("  Dimensions:  {} x {}", metadata.width, metadata.height);
    println!("  Levels:      {}", metadata.level_count);
    if let Some(ref vendor) = metadata.vendor {
        println!("  Vendor:      {}", vendor);
    }
    if let Some(power) = metadata.objective_power {
        println!("  Objective:   {}x", power);
    }
    if let Some(mpp) = metadata.mpp {
        println!("  MPP:         {}", mpp);
    }
    println!(
        "  Size:        {:.2} MB",
        metadata.file_size as f64 / (1024.0 * 1024.0)
    );
    println!(
        "  Streaming:   {}",
        if streamable { "direct" } else { "requires conversion" }
    );

    ExitCode::SUCCESS
}
