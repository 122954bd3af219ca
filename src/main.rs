//! HAR Pipeline CLI
//!
//! Batch segmentation and feature extraction for accelerometer recordings.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use har_pipeline::{
    config::Config,
    core::{matching::MatchPolicy, time::Zone},
    export, Pipeline, Recording, RunLog, VERSION,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "har-pipeline")]
#[command(version = VERSION)]
#[command(about = "Segment accelerometer recordings into labeled feature windows", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge raw chunk files into continuous stream files
    Merge {
        /// Directory of raw chunks, or of one subdirectory per device
        #[arg(long, short)]
        input: PathBuf,

        /// Directory for stream files
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Cut stream files into fixed-length window files
    Split {
        /// Output of `merge` (one folder per device) or a single device's stream folder
        #[arg(long, short)]
        input: PathBuf,

        /// Directory for window files
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Match activity groups to stream files and write one folder per group
    Match {
        /// Output of `merge` (one folder per device) or a single device's stream folder
        #[arg(long, short)]
        input: PathBuf,

        /// Activity log CSV
        #[arg(long, short)]
        activities: PathBuf,

        /// Directory for matched groups
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Run the whole pipeline and write train/test feature tables
    Run {
        /// Directory of raw chunks (one subdirectory per device)
        #[arg(long, conflicts_with = "streams", required_unless_present = "streams")]
        raw: Option<PathBuf>,

        /// Output of `merge` (one folder per device) or a single device's stream folder
        #[arg(long)]
        streams: Option<PathBuf>,

        /// Activity log CSV
        #[arg(long, short)]
        activities: PathBuf,

        /// Output directory (overrides the config)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Label map JSON (overrides the config)
        #[arg(long)]
        labels: Option<PathBuf>,

        /// Slice labeling policy: proportional or interval_overlap
        #[arg(long)]
        policy: Option<MatchPolicy>,

        /// Zone of the activity log's local times, e.g. +0900 or Asia/Tokyo
        #[arg(long)]
        log_zone: Option<Zone>,

        /// Apply the low-pass filter before feature extraction
        #[arg(long)]
        denoise: bool,
    },

    /// Show configuration
    Config {
        /// Write the default configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Merge { input, output } => cmd_merge(config, &input, &output),
        Commands::Split { input, output } => cmd_split(config, &input, &output),
        Commands::Match {
            input,
            activities,
            output,
        } => cmd_match(config, &input, &activities, &output),
        Commands::Run {
            raw,
            streams,
            activities,
            output,
            labels,
            policy,
            log_zone,
            denoise,
        } => {
            let mut config = config;
            if let Some(output) = output {
                config.output_path = output;
            }
            if labels.is_some() {
                config.label_map_path = labels;
            }
            if let Some(policy) = policy {
                config.matching.policy = policy;
            }
            if let Some(zone) = log_zone {
                config.activity_log_zone = zone;
            }
            config.denoise.enabled |= denoise;

            let recording = match (raw, streams) {
                (Some(raw), _) => Recording::Raw(raw),
                (None, Some(streams)) => Recording::Streams(streams),
                (None, None) => bail!("either --raw or --streams is required"),
            };
            cmd_run(config, &recording, &activities)
        }
        Commands::Config { init } => cmd_config(&config, init),
    }
}

/// Install the fmt subscriber. `RUST_LOG` wins over `--log-level`.
fn init_tracing(log_level: &str) {
    let level = log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load().context("loading config")?,
    };
    Ok(config)
}

fn cmd_merge(config: Config, input: &Path, output: &Path) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(config)?;
    let mut log = RunLog::new();

    let written = pipeline
        .merge_to_dir(input, output, &mut log)
        .with_context(|| format!("merging chunks under {}", input.display()))?;

    println!("Wrote {written} stream file(s) to {}", output.display());
    println!();
    println!("{}", log.summary());
    Ok(())
}

fn cmd_split(config: Config, input: &Path, output: &Path) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(config)?;
    let mut log = RunLog::new();

    let streams = pipeline.load_streams(&Recording::Streams(input.to_path_buf()), &mut log)?;
    let written = pipeline.split_streams(&streams, output)?;

    println!(
        "Wrote {written} window file(s) for {} stream(s) to {}",
        streams.len(),
        output.display()
    );
    Ok(())
}

fn cmd_match(config: Config, input: &Path, activities: &Path, output: &Path) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(config)?;
    let mut log = RunLog::new();

    let streams = pipeline.load_streams(&Recording::Streams(input.to_path_buf()), &mut log)?;
    let (_, sources) = pipeline
        .match_activities(&streams, activities, &mut log)
        .with_context(|| format!("matching {}", activities.display()))?;

    for source in &sources {
        let folder = export::write_matched_source(output, source)?;
        info!("wrote {}", folder.display());
    }

    println!(
        "Matched {} of {} activity group(s); output in {}",
        sources.len(),
        log.stats().groups_built,
        output.display()
    );
    Ok(())
}

fn cmd_run(config: Config, recording: &Recording, activities: &Path) -> anyhow::Result<()> {
    println!("HAR Pipeline v{VERSION}");
    println!();

    config
        .ensure_directories()
        .context("creating output directory")?;
    let pipeline = Pipeline::new(config)?;
    let mut log = RunLog::new();

    let output = pipeline
        .run(recording, activities, &mut log)
        .context("pipeline run failed")?;

    println!("Rows: {} ({} train / {} test)", output.rows, output.train_rows, output.test_rows);
    println!("  Train table: {}", output.train_table.display());
    println!("  Test table:  {}", output.test_table.display());
    println!("  Run summary: {}", output.summary.display());
    println!();
    println!("{}", log.summary());
    Ok(())
}

fn cmd_config(config: &Config, init: bool) -> anyhow::Result<()> {
    if init {
        config.save().context("saving config")?;
        println!("Wrote configuration to {:?}", Config::config_path());
        return Ok(());
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
