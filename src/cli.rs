//! Command-line interface for polycaption
//!
//! Provides argument parsing using clap derive macros.

use crate::defaults;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Multilingual captions from local media
#[derive(Parser, Debug)]
#[command(
    name = "polycaption",
    version,
    about = "Multilingual captions from local media"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress everything but captions and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: stage trace, -vv: full diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a duration string into a `Duration`.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`90s`, `3m`), fractional seconds (`2.5`) and compound (`1m30s`).
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    let duration = match s.parse::<f64>() {
        Ok(secs) => Duration::try_from_secs_f64(secs).map_err(|e| format!("{}: {}", s, e))?,
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if duration.is_zero() {
        return Err("timeout must be positive".to_string());
    }
    if duration.as_secs_f64() > defaults::MAX_RECOGNITION_TIMEOUT_SECS {
        return Err(format!(
            "timeout must be at most {}s, got {}",
            defaults::MAX_RECOGNITION_TIMEOUT_SECS,
            s
        ));
    }
    Ok(duration)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe a media file in one or more locales
    Transcribe {
        /// Audio or video file to caption
        media: PathBuf,

        /// Locale to recognize (repeat for multilingual media, e.g. -l zh-Hant -l en-US)
        #[arg(short, long = "locale", value_name = "LOCALE", required = true)]
        locales: Vec<String>,

        /// Refuse locales that would need a network recognizer
        #[arg(long)]
        no_cloud: bool,

        /// Per-attempt recognition timeout (e.g. 90s, 3m)
        #[arg(long, value_name = "DURATION", value_parser = parse_timeout)]
        timeout: Option<Duration>,

        /// Print captions as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show duration, level and leading silence of a media file
    Analyze {
        /// Audio or video file to analyze
        media: PathBuf,
    },

    /// Show how a media file would be split into chunks
    Plan {
        /// Audio or video file to plan
        media: PathBuf,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the configuration file location
    Path,
    /// Print the effective configuration as TOML
    Show,
}
