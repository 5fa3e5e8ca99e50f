//! CLI argument definitions for the Aperture binary.
//!
//! Uses `clap` with derive macros. Priority resolution:
//! CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Aperture, a three-stage image feature pipeline (capture, extraction,
/// persistence) over point-to-point TCP links.
#[derive(Parser, Debug)]
#[command(name = "aperture", version, about)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the capture stage: read source images, push frames downstream.
    Capture,
    /// Run the extraction stage: detect features, forward enriched frames.
    Extract,
    /// Run the persistence stage: write image files and database rows.
    Store,
    /// Run all three stages in one process over the configured links.
    Run,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > APERTURE_CONFIG env var >
    /// ~/.aperture/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("APERTURE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".aperture").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".aperture").join("config.toml");
    }
    PathBuf::from("config.toml")
}
