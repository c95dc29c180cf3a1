//! Training CLI
//!
//! Checks the dataset layout, then runs the two-phase transfer-learning
//! schedule and writes the model, its history and the charts.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use civic_core::{load_toml_config, init_logging, DataSplit, LogConfig, TrainingConfig};
use civic_dataset::{check_splits, IntegrityReport, SplitIssue};
use civic_training::{backend_name, default_device, run_training, TrainingBackend};
use tracing::info;

/// Civic issue classifier training tool
#[derive(Parser, Debug)]
#[command(name = "civic-train", version)]
#[command(about = "Train the civic issue image classifier")]
struct Args {
    /// Training configuration file (TOML); built-in defaults when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override dataset base directory (holds train/, valid/, test/)
    #[arg(short, long, value_name = "DIR")]
    dataset: Option<PathBuf>,

    /// Override output directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Override number of head-only epochs
    #[arg(long, value_name = "N")]
    epochs_initial: Option<usize>,

    /// Override number of fine-tuning epochs
    #[arg(long, value_name = "N")]
    epochs_fine_tune: Option<usize>,

    /// Override batch size
    #[arg(short, long, value_name = "SIZE")]
    batch_size: Option<usize>,

    /// Number of trailing backbone layers to unfreeze in phase two
    #[arg(long, value_name = "N")]
    fine_tune_at: Option<usize>,

    /// Pretrained backbone record
    #[arg(long, value_name = "FILE")]
    pretrained: Option<PathBuf>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Only check the dataset layout
    #[arg(long)]
    check_only: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&LogConfig::from_flags(args.verbose, args.quiet))?;

    let mut config = match &args.config {
        Some(path) => load_toml_config::<TrainingConfig>(path)
            .with_context(|| format!("Failed to load configuration file {}", path.display()))?,
        None => TrainingConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    println!("{}", "Civic Issue Classifier - Training".green().bold());
    println!("  Backend: {}", backend_name());
    println!("  Dataset: {}", config.data.base_dir.display());

    let dirs: Vec<PathBuf> = DataSplit::ALL.iter().map(|s| config.data.split_dir(*s)).collect();
    let report = check_splits(&dirs);
    print_report(&report);
    if report.has_issues() {
        eprintln!("{}", "Dataset integrity issues detected".red().bold());
        std::process::exit(1);
    }
    println!("{}", "Dataset OK".green());

    if args.check_only {
        return Ok(());
    }

    print_config_summary(&config);
    std::fs::create_dir_all(&config.output.model_dir)
        .with_context(|| format!("Failed to create {}", config.output.model_dir.display()))?;
    let config_path = config.output.model_dir.join("config.toml");
    std::fs::write(&config_path, toml::to_string_pretty(&config)?)
        .context("Failed to save configuration")?;
    info!("Configuration saved to: {}", config_path.display());

    let device = default_device();
    let outcome = run_training::<TrainingBackend>(&config, &device, !args.quiet)
        .context("Training failed")?;

    println!();
    println!("{}", "Training complete".green().bold());
    println!("  Test Accuracy: {}", format!("{:.4}", outcome.test.accuracy).cyan());
    println!("  Test Loss:     {}", format!("{:.4}", outcome.test.loss).cyan());
    println!("  Class indices: {}", outcome.class_indices);
    println!("  Model:         {}", outcome.model_stem.with_extension("mpk").display());
    println!("  History:       {}", outcome.history_path.display());
    for chart in &outcome.charts {
        println!("  Chart:         {}", chart.display());
    }

    Ok(())
}

fn apply_overrides(config: &mut TrainingConfig, args: &Args) {
    if let Some(ref dataset) = args.dataset {
        config.data.base_dir = dataset.clone();
    }
    if let Some(ref output) = args.output {
        config.output.model_dir = output.clone();
    }
    if let Some(epochs) = args.epochs_initial {
        config.schedule.epochs_initial = epochs;
    }
    if let Some(epochs) = args.epochs_fine_tune {
        config.schedule.epochs_fine_tune = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.schedule.batch_size = batch_size;
    }
    if let Some(fine_tune_at) = args.fine_tune_at {
        config.schedule.fine_tune_at = fine_tune_at;
    }
    if let Some(ref pretrained) = args.pretrained {
        config.model.pretrained_backbone = Some(pretrained.clone());
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
}

fn print_report(report: &IntegrityReport) {
    for split in &report.splits {
        let status = if split.has_issues() { "FAIL".red() } else { "ok".green() };
        println!(
            "  [{}] {} ({} classes, {} images)",
            status,
            split.base_dir.display(),
            split.class_counts.len(),
            split.total_images()
        );
        match &split.issue {
            Some(SplitIssue::MissingDirectory) => println!("      {}", "directory does not exist".red()),
            Some(SplitIssue::Unreadable(msg)) => println!("      {} {}", "unreadable:".red(), msg),
            Some(SplitIssue::NoClasses) => println!("      {}", "no class directories".red()),
            Some(SplitIssue::EmptyClasses(classes)) => {
                for class in classes {
                    println!("      {} {}", "no images in".red(), class.yellow());
                }
            }
            None => {}
        }
    }
    for dir in &report.class_set_mismatches {
        println!("  {} {}", "class set differs:".red(), dir.display());
    }
}

fn print_config_summary(config: &TrainingConfig) {
    info!("");
    info!("Configuration Summary:");
    info!("  Image size: {}", config.data.image_size);
    info!("  Batch size: {}", config.schedule.batch_size);
    info!(
        "  Epochs: {} initial, {} fine-tune (last {} layers)",
        config.schedule.epochs_initial, config.schedule.epochs_fine_tune, config.schedule.fine_tune_at
    );
    info!(
        "  Learning rate: {} initial, {} fine-tune",
        config.schedule.learning_rate_initial, config.schedule.learning_rate_fine_tune
    );
    info!("  Width multiplier: {}", config.model.width_multiplier);
    match &config.model.pretrained_backbone {
        Some(path) => info!("  Pretrained: {}", path.display()),
        None => info!("  Pretrained: none (random init)"),
    }
    info!("  Output: {}", config.model_stem().display());
    info!("  Seed: {}", config.seed);
    info!("");
}
