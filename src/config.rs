//! Configuration management for the pyramid server.
//!
//! This module provides a configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `WSI_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Subcommands
//!
//! - `serve`: run the HTTP server
//! - `convert`: build a pyramid for one file and exit
//! - `inspect`: print a file's metadata and exit
//!
//! # Environment Variables
//!
//! - `WSI_HOST` - Server bind address (default: 0.0.0.0)
//! - `WSI_PORT` - Server port (default: 3000)
//! - `WSI_UPLOAD_DIR` - Directory holding original uploads (default: uploads)
//! - `WSI_CACHE_DIR` - Directory holding generated pyramids (default: cache)
//! - `WSI_TILE_SIZE` - Tile edge length in pixels (default: 254)
//! - `WSI_OVERLAP` - Tile overlap in pixels (default: 1)
//! - `WSI_TILE_FORMAT` - `jpeg` or `png` (default: jpeg)
//! - `WSI_JPEG_QUALITY` - JPEG quality (default: 75)
//! - `WSI_WORKERS` - Concurrent conversions (default: 2)
//! - `WSI_CACHE_TILES` - In-memory tile cache size in bytes (default: 64MB)
//! - `WSI_MAX_UPLOAD_MB` - Maximum upload size in megabytes (default: 20480)
//! - `WSI_CACHE_MAX_AGE` - HTTP cache max-age seconds for tiles (default: 3600)
//! - `WSI_CORS_ORIGINS` - Comma-separated allowed origins (default: any)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::convert::{ConvertOptions, DEFAULT_OVERLAP, DEFAULT_TILE_SIZE, DEFAULT_WORKERS};
use crate::tile::{TileFormat, DEFAULT_JPEG_QUALITY, DEFAULT_TILE_CACHE_CAPACITY};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default upload directory.
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";

/// Default pyramid cache directory.
pub const DEFAULT_CACHE_DIR: &str = "cache";

/// Default maximum upload size in megabytes (20GB).
pub const DEFAULT_MAX_UPLOAD_MB: u64 = 20 * 1024;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Largest accepted tile edge length.
pub const MAX_TILE_SIZE: u32 = 8192;

// =============================================================================
// CLI
// =============================================================================

/// WSI Pyramid - upload, convert and serve Whole Slide Images as Deep Zoom pyramids.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-pyramid")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server.
    Serve(ServeConfig),

    /// Convert one file into a Deep Zoom pyramid and exit.
    Convert(ConvertConfig),

    /// Print the metadata of one file and exit.
    Inspect(InspectConfig),
}

/// Pyramid geometry and encoding, shared by `serve` and `convert`.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct PyramidArgs {
    /// Tile edge length in pixels, excluding overlap.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "WSI_TILE_SIZE")]
    pub tile_size: u32,

    /// Pixels shared between adjacent tiles.
    #[arg(long, default_value_t = DEFAULT_OVERLAP, env = "WSI_OVERLAP")]
    pub overlap: u32,

    /// Tile encoding (jpeg or png).
    #[arg(long, default_value_t = TileFormat::Jpeg, env = "WSI_TILE_FORMAT")]
    pub tile_format: TileFormat,

    /// JPEG quality for tile encoding (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "WSI_JPEG_QUALITY")]
    pub jpeg_quality: u8,
}

impl Default for PyramidArgs {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            overlap: DEFAULT_OVERLAP,
            tile_format: TileFormat::Jpeg,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl PyramidArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(format!("tile_size must be between 1 and {}", MAX_TILE_SIZE));
        }
        if self.overlap >= self.tile_size {
            return Err("overlap must be smaller than tile_size".to_string());
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        Ok(())
    }

    pub fn to_options(&self) -> ConvertOptions {
        ConvertOptions {
            tile_size: self.tile_size,
            overlap: self.overlap,
            format: self.tile_format,
            quality: self.jpeg_quality,
        }
    }
}

// =============================================================================
// Serve
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "WSI_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "WSI_PORT")]
    pub port: u16,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    /// Directory holding original uploads.
    #[arg(long, default_value = DEFAULT_UPLOAD_DIR, env = "WSI_UPLOAD_DIR")]
    pub upload_dir: PathBuf,

    /// Directory holding generated pyramids.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "WSI_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Maximum upload size in megabytes.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_MB, env = "WSI_MAX_UPLOAD_MB")]
    pub max_upload_mb: u64,

    // =========================================================================
    // Conversion Configuration
    // =========================================================================
    #[command(flatten)]
    pub pyramid: PyramidArgs,

    /// Number of slides converted concurrently.
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "WSI_WORKERS")]
    pub workers: usize,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// In-memory tile cache size in bytes.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "WSI_CACHE_TILES")]
    pub cache_tiles: usize,

    /// HTTP Cache-Control max-age in seconds for tiles.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "WSI_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "WSI_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.pyramid.validate()?;

        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.cache_tiles == 0 {
            return Err("cache_tiles must be greater than 0".to_string());
        }
        if self.max_upload_mb == 0 {
            return Err("max_upload_mb must be greater than 0".to_string());
        }
        if self.upload_dir == self.cache_dir {
            return Err("upload_dir and cache_dir must differ".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Upload size limit in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

// =============================================================================
// Convert / Inspect
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ConvertConfig {
    /// Source image to convert.
    pub input: PathBuf,

    /// Directory that receives `{name}_files/`.
    #[arg(short, long, default_value = DEFAULT_CACHE_DIR, env = "WSI_CACHE_DIR")]
    pub output: PathBuf,

    #[command(flatten)]
    pub pyramid: PyramidArgs,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ConvertConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.pyramid.validate()?;
        if self.input.file_name().is_none() {
            return Err("input must name a file".to_string());
        }
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    /// File to inspect.
    pub path: PathBuf,

    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

// =============================================================================
// Tests
// =============================================================================
