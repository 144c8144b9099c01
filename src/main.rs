use anyhow::{anyhow, Result};
use burn::{backend::Autodiff, optim::AdamConfig};
use clap::Parser;
use device::{CpuBackend, DeviceKind, GpuBackend, ResolvedDevice};
use tracing::{debug, info};
use training::{run, RunSummary, TrainingConfig};

pub mod checkpoint;
pub mod data;
pub mod device;
pub mod error;
pub mod labels;
pub mod logging;
pub mod metric;
pub mod model;
pub mod module;
pub mod plot;
pub mod random;
pub mod split;
pub mod stats;
pub mod training;
pub mod transform;

#[cfg(test)]
mod test_utils;

/// Train a convolutional dog-breed classifier and keep the checkpoint with the
/// lowest validation loss.
#[derive(Parser, Debug)]
#[command(name = "dog-breed-cnn", version, rename_all = "snake_case")]
struct Cli {
    /// Directory for the checkpoint, configs, statistics and plot
    #[arg(long)]
    model_path: String,

    /// Checkpoint file name, without extension
    #[arg(long)]
    model_name: String,

    /// Data root with labels.csv, sample_submission.csv, train/ and test/
    #[arg(long, default_value = "images/")]
    image_dir: String,

    /// Channels of the first convolution block; each further block doubles it
    #[arg(long, default_value_t = 256)]
    embed_size: usize,

    /// Width of the hidden classifier layer
    #[arg(long, default_value_t = 512)]
    hidden_size: usize,

    /// Number of convolution blocks
    #[arg(long, default_value_t = 2)]
    num_layers: usize,

    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    /// Accepted for compatibility; has no effect
    #[arg(long, default_value_t = 512)]
    seq_length: usize,

    /// Side of the square network input
    #[arg(long, default_value_t = 224)]
    crop_size: usize,

    #[arg(long, default_value_t = 20)]
    num_epochs: usize,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    /// Image decoding threads; 0 decodes on the training thread
    #[arg(long, default_value_t = 4)]
    num_workers: usize,

    /// Log a batch line every N training batches (debug level)
    #[arg(long, default_value_t = 10)]
    log_step: usize,

    /// Accepted for compatibility; only the best checkpoint is written
    #[arg(long, default_value_t = 5)]
    save_step: usize,

    #[arg(long, default_value_t = 1234)]
    seed: u64,

    /// Share of the labelled images held out for validation
    #[arg(long, default_value_t = 0.1)]
    valid_fraction: f64,

    #[arg(long, default_value = "jpg")]
    image_ext: String,

    #[arg(long, value_enum, default_value_t = DeviceKind::Auto)]
    device: DeviceKind,

    #[arg(long, default_value_t = 0.5)]
    dropout: f64,

    /// Write an SVG of the loss and accuracy curves next to the checkpoint
    #[arg(long)]
    plot: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn training_config(&self) -> TrainingConfig {
        TrainingConfig::new(
            self.image_dir.clone(),
            self.model_path.clone(),
            self.model_name.clone(),
            AdamConfig::new(),
            self.image_ext.clone(),
        )
        .with_num_epochs(self.num_epochs)
        .with_batch_size(self.batch_size)
        .with_num_workers(self.num_workers)
        .with_learning_rate(self.learning_rate)
        .with_seed(self.seed)
        .with_valid_fraction(self.valid_fraction)
        .with_crop_size(self.crop_size)
        .with_num_layers(self.num_layers)
        .with_base_channels(self.embed_size)
        .with_hidden_size(self.hidden_size)
        .with_dropout(self.dropout)
        .with_log_step(self.log_step)
        .with_plot(self.plot)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose).map_err(|e| anyhow!(e))?;

    info!("{cli:?}");
    debug!(
        seq_length = cli.seq_length,
        save_step = cli.save_step,
        "ignored options"
    );

    let config = cli.training_config();
    let device = ResolvedDevice::resolve(cli.device);
    info!("device: {}", device.name());

    let summary = match device {
        ResolvedDevice::Gpu(device) => run::<Autodiff<GpuBackend>>(&config, device)?,
        ResolvedDevice::Cpu(device) => run::<Autodiff<CpuBackend>>(&config, device)?,
    };
    report(&summary);

    Ok(())
}

fn report(summary: &RunSummary) {
    match summary.best_epoch {
        Some(epoch) => info!(
            "best validation loss {:.4} at epoch {}, checkpoint {}",
            summary.best_valid_loss,
            epoch + 1,
            summary.checkpoint.display()
        ),
        None => info!("no epoch produced a finite validation loss, no checkpoint written"),
    }
    info!(
        "after {} epochs: test loss {:.4}, test accuracy {:.2}% over {} classes",
        summary.stats.epochs(),
        summary.test.loss,
        summary.test.accuracy * 100.0,
        summary.num_classes
    );
}
