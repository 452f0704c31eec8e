//! dubline - segment-level dubbing workflow
//!
//! Entry point for the `dubline` binary: translates a timestamped Chinese
//! transcript, synthesizes speech per segment, re-aligns it against the video
//! timeline, and writes subtitles, a dubbed audio track, and optionally a muxed video.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dubline::align::{AlignmentEngine, segments_from_durations};
use dubline::cli::{Args, Commands, ConfigAction};
use dubline::config::Config;
use dubline::error::DublineError;
use dubline::media::{MediaProcessorFactory, MuxRequest};
use dubline::pipeline::{JobProgress, JobReport, JobRequest, JobState, Pipeline, progress_channel};
use dubline::transcript;

const DEFAULT_CONFIG_FILE: &str = "dubline.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;
    info!("Starting dubline");

    // `config init` must work without a readable config
    if let Commands::Config { action } = &args.command {
        return run_config_command(action);
    }

    let mut config = load_config(args.config.as_deref())?;

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    match args.command {
        Commands::Process {
            input,
            video,
            target_lang,
            output_dir,
            options,
        } => {
            options.apply(&mut config);
            config.validate()?;

            let output_dir = resolve_output_dir(output_dir, &input)?;
            let pipeline = Pipeline::new(config)?;
            if !options.skip_checks {
                pipeline.check_services(video.is_some()).await?;
            }

            let request = JobRequest {
                transcript_path: input,
                video_path: video,
                output_dir,
                language: target_lang,
            };
            let (sender, receiver) = progress_channel();
            let progress_task = tokio::spawn(render_progress(receiver));
            let outcome = pipeline.run(&request, &cancel, Arc::new(sender)).await;
            if let Err(e) = progress_task.await {
                warn!("Progress display stopped: {}", e);
            }

            print_report(&outcome?);
        }
        Commands::Batch {
            input_dir,
            target_lang,
            output_dir,
            options,
        } => {
            options.apply(&mut config);
            config.validate()?;

            let output_dir = output_dir.unwrap_or_else(|| input_dir.clone());
            let pipeline = Pipeline::new(config)?;
            if !options.skip_checks {
                pipeline.check_services(true).await?;
            }

            let reports = pipeline
                .run_batch(&input_dir, &output_dir, target_lang, &cancel)
                .await?;
            for report in &reports {
                print_report(report);
            }
            info!("Batch finished: {} jobs ready", reports.len());
        }
        Commands::Align {
            input,
            durations,
            output,
            policy,
        } => {
            policy.apply(&mut config);
            config.validate()?;

            let entries = transcript::load_file(&input).await?;
            let durations: Vec<Option<u64>> = serde_json::from_str(&tokio::fs::read_to_string(&durations).await?)?;
            let segments = segments_from_durations(entries, &durations)?;
            let timeline = AlignmentEngine::new(config.alignment.clone()).align(&segments, false)?;

            let json = serde_json::to_string_pretty(&timeline)?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json).await?;
                    info!("Timeline written to {}", path.display());
                }
                None => println!("{}", json),
            }
        }
        Commands::Mux {
            video,
            audio,
            subtitles,
            output,
            target_lang,
        } => {
            info!("Muxing dubbed track into video: {}", video.display());
            let media = MediaProcessorFactory::create_processor(config.media.clone());
            media.check_availability().await?;
            media
                .mux_dubbed_video(MuxRequest {
                    video_path: &video,
                    audio_path: &audio,
                    subtitle_path: subtitles.as_deref(),
                    output_path: &output,
                    language: target_lang,
                })
                .await?;
        }
        Commands::Config { action } => run_config_command(&action)?,
    }

    info!("dubline completed successfully");
    Ok(())
}

/// `--config`, else `./dubline.toml` when present, else defaults
fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };
    Ok(config)
}

fn run_config_command(action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                return Err(DublineError::Config(format!(
                    "{} already exists, pass --force to overwrite",
                    path.display()
                ))
                .into());
            }
            Config::default().save_to_file(path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

fn resolve_output_dir(output_dir: Option<PathBuf>, input: &Path) -> Result<PathBuf> {
    match output_dir {
        Some(dir) => Ok(dir),
        None => Ok(input
            .parent()
            .map(|dir| if dir.as_os_str().is_empty() { PathBuf::from(".") } else { dir.to_path_buf() })
            .ok_or_else(|| DublineError::Config("Cannot determine output directory".to_string()))?),
    }
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling job");
            cancel.cancel();
        }
    });
}

/// Mirror job progress on a terminal progress bar until the job ends
async fn render_progress(mut receiver: watch::Receiver<JobProgress>) {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template("{spinner} {msg:<13} [{bar:40}] {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);

    while receiver.changed().await.is_ok() {
        let progress = *receiver.borrow_and_update();
        bar.set_message(progress.state.to_string());
        bar.set_length(progress.total as u64);
        bar.set_position(progress.completed as u64);
        if matches!(progress.state, JobState::Ready | JobState::Failed) {
            break;
        }
    }
    bar.finish_and_clear();
}

fn print_report(report: &JobReport) {
    println!("\nJob {} ({}): {}", report.job_id, report.language.name(), report.state);
    println!(
        "Segments: {} aligned, {} failed of {}",
        report.counts.aligned,
        report.counts.failed,
        report.counts.total()
    );
    if let Some(timeline) = &report.timeline {
        println!(
            "Timeline: {} truncated, {} resyncs, ends at {}ms",
            timeline.truncated_count(),
            timeline.resync_count(),
            timeline.end_ms()
        );
    }
    let outputs = &report.outputs;
    let paths = [
        ("Subtitles", outputs.subtitle_path.as_ref()),
        ("Audio", outputs.track.as_ref().map(|t| &t.path)),
        ("Video", outputs.video_path.as_ref()),
        ("Report", outputs.report_path.as_ref()),
    ];
    for (label, path) in paths {
        if let Some(path) = path {
            println!("{:<10} {}", label, path.display());
        }
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = std::env::current_dir()?.join(".dubline").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "dubline.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("dubline.log").display()
    );

    Ok(())
}
