use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use polycaption::audio::{AudioAnalyzer, ContainerNormalizer, PcmNormalizer, TempArena};
use polycaption::cli::{Cli, Commands, ConfigAction};
use polycaption::config::Config;
use polycaption::output;
use polycaption::pipeline::TranscriptionPipeline;
use polycaption::segmentation::SegmentationEngine;
use polycaption::stt::CommandRecognizer;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);
    tracing::debug!(version = %polycaption::version_string(), "polycaption starting");

    match cli.command {
        Commands::Transcribe {
            media,
            locales,
            no_cloud,
            timeout,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run_transcribe(config, media, locales, no_cloud, timeout, json, cli.quiet, cli.verbose)
                .await?;
        }
        Commands::Analyze { media } => {
            let config = load_config(cli.config.as_deref())?;
            run_analyze(&config, &media).await?;
        }
        Commands::Plan { media } => {
            let config = load_config(cli.config.as_deref())?;
            run_plan(&config, &media).await?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "polycaption",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Log filter: `RUST_LOG` wins, otherwise derived from `-q` / `-v`.
fn init_tracing(quiet: bool, verbose: u8) {
    let fallback = if quiet {
        "error"
    } else {
        match verbose {
            0 => "polycaption=info,warn",
            1 => "polycaption=debug,info",
            _ => "polycaption=trace,debug",
        }
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/polycaption/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides apply on top of all three.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };
    Ok(config.with_env_overrides())
}

#[allow(clippy::too_many_arguments)]
async fn run_transcribe(
    mut config: Config,
    media: PathBuf,
    locales: Vec<String>,
    no_cloud: bool,
    timeout: Option<Duration>,
    json: bool,
    quiet: bool,
    verbose: u8,
) -> Result<()> {
    if let Some(timeout) = timeout {
        config.recognition.timeout_secs = timeout.as_secs_f64();
    }
    if no_cloud {
        config.recognition.allow_cloud = false;
    }

    let recognizer = CommandRecognizer::from_config(&config.recognizer)?;
    let pipeline = Arc::new(TranscriptionPipeline::new(
        &config,
        Arc::new(recognizer),
        Arc::new(PcmNormalizer::new()),
    )?);

    let color = std::io::stdout().is_terminal();
    let mut task = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.transcribe_detailed(&media, &locales).await })
    };

    let report = tokio::select! {
        result = &mut task => result.context("transcription task failed")??,
        _ = tokio::signal::ctrl_c() => {
            pipeline.cancel();
            // Wait for the invocation to drop its temp files
            if let Ok(Err(e)) = task.await {
                tracing::debug!(error = %e, "invocation stopped");
            }
            if !quiet {
                eprintln!("{}", "Cancelled".yellow());
            }
            std::process::exit(130);
        }
    };

    if verbose > 0 {
        eprint!("{}", output::render_stage_trace(&report.runs, color));
    }
    if !quiet {
        eprint!("{}", output::render_problems(&report, color));
    }

    if json {
        println!("{}", output::render_report_json(&report)?);
    } else if report.captions.is_empty() {
        if !quiet {
            eprintln!("{}", "No speech recognized".yellow());
        }
    } else {
        println!("{}", output::render_captions(&report.captions, color));
    }

    if verbose > 0 {
        eprintln!(
            "{} caption(s), {} temp file(s) cleaned up",
            report.captions.len().green(),
            report.cleanup.files_allocated
        );
    }
    Ok(())
}

async fn run_analyze(config: &Config, media: &Path) -> Result<()> {
    let analyzer = AudioAnalyzer::new(config.analysis.clone());
    let normalizer = PcmNormalizer::new();
    let arena = TempArena::new("analyze")?;

    let stats = analyzer.analyze(media).await?;
    let normalized = normalizer.to_normalized_container(media, &arena).await?;
    let analysis = stats.with_normalized_path(normalized);

    print!("{}", output::render_analysis(&analysis));
    arena.close()?;
    Ok(())
}

async fn run_plan(config: &Config, media: &Path) -> Result<()> {
    let analyzer = AudioAnalyzer::new(config.analysis.clone());
    let segmentation = SegmentationEngine::new(config.segmentation.clone())?;

    let stats = analyzer.analyze(media).await?;
    println!(
        "{} ({:.1}s, {:.0}s chunks, {:.0}s overlap)",
        media.display().bold(),
        stats.duration,
        segmentation.chunk_seconds(),
        segmentation.overlap_seconds()
    );
    println!("{}", output::render_plan(&segmentation.plan(stats.duration)));
    Ok(())
}

/// Handle config subcommands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    let path = custom_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Path => {
            let marker = if path.exists() {
                "exists".green().to_string()
            } else {
                "not created".dimmed().to_string()
            };
            println!("{} ({})", path.display(), marker);
        }
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml()?);
        }
    }
    Ok(())
}
