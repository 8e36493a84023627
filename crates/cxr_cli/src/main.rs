//! cxr CLI for explaining chest X-rays and managing classifier checkpoints.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burn::tensor::backend::AutodiffBackend;
use cxr::models::checkpoint::{metadata_path, weights_path};
use cxr::models::CheckpointMetadata;
use cxr::prelude::*;

/// Backend type for explanations.
type ExplainBackend = CpuBackend;
type InnerBackend = <ExplainBackend as AutodiffBackend>::InnerBackend;

#[derive(Parser)]
#[command(name = "cxr")]
#[command(author, version)]
#[command(about = "Chest X-ray classification with Grad-CAM explanations")]
#[command(long_about = "cxr-rs: classify chest radiographs and visualize what drove the prediction.

EXAMPLES:
  # Create a randomly initialised checkpoint for smoke testing
  cxr init --output ./model --tiny

  # Explain one or more images
  cxr explain --weights ./model chest1.png chest2.jpg

  # Write overlays elsewhere and print JSON summaries
  cxr explain --weights ./model --out-dir ./overlays --json scans/*.png

  # Use a full pipeline configuration
  cxr explain --config pipeline.json chest.png

  # Show checkpoint metadata
  cxr inspect ./model

FINDINGS:
  Atelectasis, Effusion, Pneumonia, Cardiomegaly, Nodule")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify images and write Grad-CAM overlays
    Explain {
        /// Checkpoint path (without extension); overrides the config's weights
        #[arg(long, value_name = "PATH")]
        weights: Option<PathBuf>,

        /// Pipeline configuration (JSON)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Directory for overlays (defaults to each image's directory)
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,

        /// Overlay encoding
        #[arg(long, value_enum, value_name = "FORMAT")]
        format: Option<FormatArg>,

        /// Print JSON summaries instead of a table
        #[arg(long, default_value = "false")]
        json: bool,

        /// Images to explain
        #[arg(required = true, value_name = "IMAGE")]
        images: Vec<PathBuf>,
    },
    /// Write a randomly initialised checkpoint
    Init {
        /// Output checkpoint path (without extension)
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Use a tiny DenseNet instead of DenseNet-121
        #[arg(long, default_value = "false")]
        tiny: bool,

        /// Comma-separated label names
        #[arg(long, value_delimiter = ',', value_name = "LABELS")]
        labels: Option<Vec<String>>,

        /// Also write a pipeline config next to the checkpoint
        #[arg(long, value_name = "FILE")]
        config_out: Option<PathBuf>,
    },
    /// Show checkpoint metadata
    Inspect {
        /// Checkpoint path (without extension)
        checkpoint: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Jpeg,
    Png,
}

impl From<FormatArg> for OverlayFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Jpeg => OverlayFormat::Jpeg,
            FormatArg::Png => OverlayFormat::Png,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    match cli.command {
        Commands::Explain {
            weights,
            config,
            out_dir,
            format,
            json,
            images,
        } => handle_explain(weights, config, out_dir, format, json, images),
        Commands::Init {
            output,
            tiny,
            labels,
            config_out,
        } => handle_init(output, tiny, labels, config_out),
        Commands::Inspect { checkpoint } => handle_inspect(checkpoint),
    }
}

/// Build a pipeline config from `--config`, or from the checkpoint's sidecar.
fn resolve_config(weights: Option<PathBuf>, config: Option<PathBuf>) -> Result<PipelineConfig> {
    let mut resolved = match (&config, &weights) {
        (Some(path), _) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        (None, Some(weights)) => {
            let sidecar = metadata_path(weights);
            if sidecar.is_file() {
                let metadata = CheckpointMetadata::load(&sidecar)
                    .with_context(|| format!("Failed to read {}", sidecar.display()))?;
                let labels = LabelSet::new(metadata.labels.clone())?;
                let arch = metadata.config().context("Checkpoint has no usable architecture")?;
                PipelineConfig::new(weights).with_classifier(ClassifierConfig::new(arch, labels))
            } else {
                tracing::warn!(
                    "No metadata at {}; assuming DenseNet-121 with the default labels",
                    sidecar.display()
                );
                PipelineConfig::new(weights)
            }
        }
        (None, None) => bail!("Either --weights or --config is required"),
    };

    if let (Some(weights), Some(_)) = (weights, config) {
        resolved.weights = weights;
    }
    Ok(resolved)
}

#[derive(Serialize)]
struct Report {
    image: PathBuf,
    overlay: PathBuf,
    #[serde(flatten)]
    summary: ExplanationSummary,
}

fn overlay_path(image: &Path, out_dir: Option<&Path>, format: OverlayFormat) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let dir = out_dir
        .map(Path::to_path_buf)
        .or_else(|| image.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    dir.join(format!("{stem}.gradcam.{}", format.extension()))
}

fn explain_one(
    pipeline: &Pipeline<ExplainBackend>,
    image: &Path,
    out_dir: Option<&Path>,
) -> Result<Report> {
    let bytes = std::fs::read(image).with_context(|| format!("Failed to read {}", image.display()))?;
    let explanation = pipeline
        .explain_image(&bytes)
        .with_context(|| format!("Failed to explain {}", image.display()))?;

    let overlay = overlay_path(image, out_dir, explanation.overlay_format);
    std::fs::write(&overlay, &explanation.overlay_image)
        .with_context(|| format!("Failed to write {}", overlay.display()))?;

    Ok(Report {
        image: image.to_path_buf(),
        overlay,
        summary: explanation.summary(),
    })
}

fn handle_explain(
    weights: Option<PathBuf>,
    config: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    format: Option<FormatArg>,
    json: bool,
    images: Vec<PathBuf>,
) -> Result<()> {
    let mut config = resolve_config(weights, config)?;
    if let Some(format) = format {
        config.overlay.format = format.into();
    }
    if let Some(dir) = &out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let device = <InnerBackend as burn::tensor::backend::Backend>::Device::default();
    let pipeline = Pipeline::<ExplainBackend>::from_config(config, &device)
        .context("Failed to build pipeline")?;

    let start = Instant::now();
    let results: Vec<(PathBuf, Result<Report>)> = images
        .par_iter()
        .map(|image| (image.clone(), explain_one(&pipeline, image, out_dir.as_deref())))
        .collect();
    tracing::info!("Explained {} images in {:?}", images.len(), start.elapsed());

    let mut reports = Vec::with_capacity(results.len());
    let mut failures = 0usize;
    for (image, result) in results {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                failures += 1;
                eprintln!("error: {}: {:#}", image.display(), e);
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_table(pipeline.labels(), &reports);
        let stats = pipeline.stats();
        println!(
            "\n{} explained, {} from cache, {} failed",
            stats.explanations_computed, stats.cache_hits, failures
        );
    }

    if failures > 0 {
        bail!("{} of {} images failed", failures, images.len());
    }
    Ok(())
}

fn print_table(labels: &LabelSet, reports: &[Report]) {
    let header: Vec<String> = labels.iter().map(|l| format!("{:>13}", l)).collect();
    println!("{:<28} {:<14}{}", "Image", "Prediction", header.join(""));
    println!("{}", "─".repeat(42 + 13 * labels.len()));

    for report in reports {
        let name = report
            .image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let scores: Vec<String> = report
            .summary
            .probabilities
            .iter()
            .map(|s| format!("{:>13.3}", s.probability))
            .collect();
        println!(
            "{:<28} {:<14}{}",
            name, report.summary.predicted_label, scores.join("")
        );
        println!("  -> {}", report.overlay.display());
    }
}

fn handle_init(
    output: PathBuf,
    tiny: bool,
    labels: Option<Vec<String>>,
    config_out: Option<PathBuf>,
) -> Result<()> {
    let labels = match labels {
        Some(names) => LabelSet::new(names)?,
        None => LabelSet::chest_xray(),
    };
    let arch = if tiny {
        DenseNetConfig::tiny(labels.len())
    } else {
        DenseNetConfig::densenet121(labels.len())
    };

    println!("Initialising {} with {} labels", arch.arch_name(), labels.len());
    let device = <InnerBackend as burn::tensor::backend::Backend>::Device::default();
    save_classifier(arch.init::<InnerBackend>(&device), &arch, &labels, &output)
        .with_context(|| format!("Failed to save checkpoint {}", output.display()))?;

    println!("  Weights:  {}", weights_path(&output).display());
    println!("  Metadata: {}", metadata_path(&output).display());

    if let Some(path) = config_out {
        PipelineConfig::new(&output)
            .with_classifier(ClassifierConfig::new(arch, labels))
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("  Config:   {}", path.display());
    }

    println!("\nNote: weights are random; predictions are not meaningful.");
    Ok(())
}

fn handle_inspect(checkpoint: PathBuf) -> Result<()> {
    let sidecar = metadata_path(&checkpoint);
    let metadata = CheckpointMetadata::load(&sidecar)
        .with_context(|| format!("Failed to read {}", sidecar.display()))?;

    let weights = weights_path(&checkpoint);
    println!("Checkpoint: {}", checkpoint.display());
    println!("─────────────────────────────────────────");
    println!("  Architecture: {}", metadata.arch);
    match metadata.config() {
        Ok(config) => {
            println!("  Growth rate:  {}", config.growth_rate);
            println!("  Blocks:       {:?}", config.block_config);
            println!("  Features:     {}", config.feature_channels());
        }
        Err(e) => println!("  Config:       unreadable ({e})"),
    }
    println!("  Labels:       {}", metadata.labels.join(", "));
    match std::fs::metadata(&weights) {
        Ok(meta) => println!("  Weights:      {} ({} bytes)", weights.display(), meta.len()),
        Err(_) => println!("  Weights:      {} (missing)", weights.display()),
    }

    let mut extra: Vec<_> = metadata.extra.iter().collect();
    extra.sort();
    for (key, value) in extra {
        println!("  {key}: {value}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_path() {
        let path = overlay_path(Path::new("scans/chest.png"), None, OverlayFormat::Jpeg);
        assert_eq!(path, PathBuf::from("scans/chest.gradcam.jpg"));

        let path = overlay_path(Path::new("chest.jpeg"), Some(Path::new("out")), OverlayFormat::Png);
        assert_eq!(path, PathBuf::from("out/chest.gradcam.png"));
    }

    #[test]
    fn test_cli_parses_explain() {
        let cli = Cli::try_parse_from(["cxr", "-vv", "explain", "--weights", "m", "--json", "a.png", "b.png"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Explain { weights, json, images, .. } => {
                assert_eq!(weights, Some(PathBuf::from("m")));
                assert!(json);
                assert_eq!(images.len(), 2);
            }
            _ => panic!("expected explain"),
        }
    }

    #[test]
    fn test_resolve_config_requires_source() {
        assert!(resolve_config(None, None).is_err());
    }
}
