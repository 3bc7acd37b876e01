//! Command-line front end.
//!
//! ```bash
//! # train with the defaults (features/0_segmented_{x,y}_89.npy → results/model.json)
//! ferrite-eeg train
//!
//! # train from a config file, overriding a few values
//! ferrite-eeg train --config run.json --epochs 20 --precision full
//!
//! # smoke run on synthetic trials
//! ferrite-eeg train --synthetic 64 --epochs 5
//!
//! # write the default config, then inspect a trained model
//! ferrite-eeg init-config run.json
//! ferrite-eeg inspect results/model.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use ferrite_eeg::layers::Module;
use ferrite_eeg::{DeviceKind, EegNet, EpochStats, Precision, RunConfig};

#[derive(Parser, Debug)]
#[command(name = "ferrite-eeg", version, about = "CNN + LSTM trainer for segmented EEG band features")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split the data, train, and write the model file.
    Train {
        /// JSON run config; missing fields take their defaults.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Feature file (may contain `{subject}`).
        #[arg(long)]
        features: Option<PathBuf>,

        /// Label file (may contain `{subject}`).
        #[arg(long)]
        labels: Option<PathBuf>,

        /// Where the trained model is written.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum training epochs.
        #[arg(long)]
        epochs: Option<usize>,

        /// Mini-batch size.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Seed for initialization, split and shuffling.
        #[arg(long)]
        seed: Option<u64>,

        /// full, half or bf16.
        #[arg(long)]
        precision: Option<Precision>,

        /// Device preference, e.g. `parallel,cpu`.
        #[arg(long, value_delimiter = ',')]
        devices: Option<Vec<DeviceKind>>,

        /// Worker threads for the parallel device.
        #[arg(long)]
        threads: Option<usize>,

        /// Optimizer learning rate.
        #[arg(long)]
        lr: Option<f32>,

        /// Train on this many synthetic trials instead of the files.
        #[arg(long)]
        synthetic: Option<usize>,
    },

    /// Write the default run config as JSON.
    InitConfig {
        #[arg(default_value = "run.json")]
        path: PathBuf,
    },

    /// Print a saved model's architecture, size and metadata.
    Inspect { model: PathBuf },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Train {
            config,
            features,
            labels,
            output,
            epochs,
            batch_size,
            seed,
            precision,
            devices,
            threads,
            lr,
            synthetic,
        } => {
            let mut run = match &config {
                Some(path) => RunConfig::load_json(path)
                    .with_context(|| format!("reading config {}", path.display()))?,
                None => RunConfig::default(),
            };
            if let Some(v) = features {
                run.data.features_path = v;
            }
            if let Some(v) = labels {
                run.data.labels_path = v;
            }
            if let Some(v) = output {
                run.output.model_path = v;
            }
            if let Some(v) = epochs {
                run.train.max_epochs = v;
            }
            if let Some(v) = batch_size {
                run.train.batch_size = v;
            }
            if let Some(v) = seed {
                run.train.seed = v;
            }
            if let Some(v) = precision {
                run.train.precision = v;
            }
            if let Some(v) = devices {
                run.train.devices = v;
            }
            if let Some(v) = threads {
                run.train.threads = Some(v);
            }
            if let Some(v) = lr {
                run.train.optimizer = run.train.optimizer.with_learning_rate(v);
            }
            if let Some(v) = synthetic {
                run.data.synthetic_trials = Some(v);
            }
            train(&run)
        }
        Command::InitConfig { path } => {
            RunConfig::default()
                .save_json(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("wrote default config to {}", path.display());
            Ok(())
        }
        Command::Inspect { model } => inspect(&model),
    }
}

fn train(run: &RunConfig) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel::<EpochStats>();
    let printer = thread::spawn(move || {
        for stats in rx {
            println!("{stats}");
        }
    });

    let result = ferrite_eeg::run(run, Some(tx));
    // The sender was dropped with the training config, so the printer drains and exits.
    if printer.join().is_err() {
        anyhow::bail!("progress printer panicked");
    }
    let outcome = result.context("training failed")?;

    info!(
        train = outcome.train_trials,
        test = outcome.test_trials,
        epochs = outcome.report.epochs_run,
        reason = %outcome.report.stop_reason,
        model = %run.output.model_path.display(),
        "done"
    );
    Ok(())
}

fn inspect(path: &Path) -> anyhow::Result<()> {
    let model = EegNet::load_json(path).with_context(|| format!("loading {}", path.display()))?;
    println!("model:      {}", path.display());
    println!("parameters: {}", model.num_params());
    println!("flattened:  {}", model.encoder.flat_features);
    println!("architecture:\n{}", serde_json::to_string_pretty(&model.spec)?);
    println!("metadata:\n{}", serde_json::to_string_pretty(&model.metadata)?);
    Ok(())
}
