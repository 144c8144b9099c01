use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use burn::{
    config::Config,
    module::AutodiffModule,
    nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig},
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use tracing::{debug, info};

use crate::{
    checkpoint::BestCheckpoint,
    data::{worker_pool, BatchSource, DogBatcher, DogDataset},
    error::{self, Error},
    labels::{check_image_count, read_labels, LabelEncoder},
    metric::{accuracy, correct_count, count_parameters, elapsed_time, EpochMetrics, MetricAccumulator},
    model::{ConvNet, ConvNetConfig},
    plot::write_training_plot,
    random::RandomState,
    split::{stratified_split, Partition},
    stats::EpochStats,
    transform::Transform,
};

#[derive(Config)]
pub struct TrainingConfig {
    /// Data root holding `labels.csv`, `sample_submission.csv`, `train/` and `test/`.
    pub data_dir: String,

    /// Directory receiving the checkpoint, configs, statistics and plot.
    pub model_path: String,

    /// Checkpoint file stem.
    pub model_name: String,

    pub optimizer: AdamConfig,

    #[config(default = 20)]
    pub num_epochs: usize,

    #[config(default = 32)]
    pub batch_size: usize,

    #[config(default = 4)]
    pub num_workers: usize,

    #[config(default = 1.0e-3)]
    pub learning_rate: f64,

    #[config(default = 1234)]
    pub seed: u64,

    #[config(default = 0.1)]
    pub valid_fraction: f64,

    #[config(default = 224)]
    pub crop_size: usize,

    #[config(default = 2)]
    pub num_layers: usize,

    #[config(default = 256)]
    pub base_channels: usize,

    #[config(default = 512)]
    pub hidden_size: usize,

    #[config(default = 0.5)]
    pub dropout: f64,

    #[config(default = 10)]
    pub log_step: usize,

    #[config(default = false)]
    pub plot: bool,

    pub image_ext: String,
}

impl TrainingConfig {
    pub fn model_config(&self, classes: usize) -> ConvNetConfig {
        ConvNetConfig::new(classes)
            .with_layers(self.num_layers)
            .with_base_channels(self.base_channels)
            .with_hidden(self.hidden_size)
            .with_dropout(self.dropout)
    }

    fn output_file(&self, suffix: &str) -> PathBuf {
        Path::new(&self.model_path).join(format!("{}{suffix}", self.model_name))
    }
}

/// One pass over `source` with parameter updates.
///
/// The model runs on the autodiff backend, so dropout and batch-norm statistics
/// are in training mode. Gradients are taken fresh from each batch loss, and the
/// updated model is returned alongside the sample-weighted metrics.
pub fn train_epoch<B, O>(
    mut model: ConvNet<B>,
    source: &BatchSource<B>,
    optimizer: &mut O,
    loss_fn: &CrossEntropyLoss<B>,
    learning_rate: f64,
    rng: &mut RandomState,
    log_step: usize,
) -> error::Result<(ConvNet<B>, EpochMetrics)>
where
    B: AutodiffBackend,
    O: Optimizer<ConvNet<B>, B>,
{
    let num_batches = source.num_batches();
    let mut metrics = MetricAccumulator::default();

    for (index, batch) in source.shuffled(rng).enumerate() {
        let batch = batch?;
        let batch_len = batch.targets.dims()[0];

        let logits = model.forward(batch.images);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
        let loss_value: f64 = loss.clone().into_scalar().elem();

        if log_step > 0 && (index + 1) % log_step == 0 {
            debug!(
                "batch {:>4}/{num_batches}: loss = {loss_value:.4}, acc = {:.2}%",
                index + 1,
                100.0 * accuracy(logits.clone(), batch.targets.clone())
            );
        }
        let correct = correct_count(logits, batch.targets);

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optimizer.step(learning_rate, model, grads);

        metrics.update(loss_value, correct, batch_len);
    }

    Ok((model, metrics.finish()))
}

/// One pass over `source` without gradients or updates.
///
/// Pass the inference copy from [`AutodiffModule::valid`]: on a non-autodiff
/// backend no gradient can be recorded, and the shared borrow rules out any
/// parameter change.
pub fn evaluate<B: Backend>(
    model: &ConvNet<B>,
    source: &BatchSource<B>,
    loss_fn: &CrossEntropyLoss<B>,
) -> error::Result<EpochMetrics> {
    let mut metrics = MetricAccumulator::default();

    for batch in source.sequential() {
        let batch = batch?;
        let batch_len = batch.targets.dims()[0];

        let logits = model.forward(batch.images);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
        let loss_value: f64 = loss.into_scalar().elem();

        metrics.update(loss_value, correct_count(logits, batch.targets), batch_len);
    }

    Ok(metrics.finish())
}

/// What a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stats: EpochStats,
    pub test: EpochMetrics,
    pub best_epoch: Option<usize>,
    pub best_valid_loss: f64,
    pub checkpoint: PathBuf,
    pub num_classes: usize,
}

struct Partitions {
    train: Partition,
    valid: Partition,
    test: Partition,
    encoder: LabelEncoder,
}

fn load_partitions(
    config: &TrainingConfig,
    rng: &mut RandomState,
) -> error::Result<Partitions> {
    let data_dir = Path::new(&config.data_dir);

    let train_records = read_labels(&data_dir.join("labels.csv"))?;
    check_image_count(&data_dir.join("train"), train_records.len())?;
    let test_records = read_labels(&data_dir.join("sample_submission.csv"))?;

    let encoder = LabelEncoder::fit(
        train_records
            .iter()
            .chain(&test_records)
            .map(|record| record.breed.as_str()),
    );
    let train_labels = encoder.encode_all(&train_records)?;
    let test_labels = encoder.encode_all(&test_records)?;

    for (record, &label) in train_records.iter().zip(&train_labels).take(5) {
        debug!(id = %record.id, breed = %record.breed, label, "label");
    }

    let train_ids: Vec<String> = train_records.into_iter().map(|record| record.id).collect();
    let (train, valid) = stratified_split(&train_ids, &train_labels, config.valid_fraction, rng)?;
    if train.is_empty() || valid.is_empty() {
        return Err(Error::Input(
            "train and validation partitions must both be non-empty".to_string(),
        ));
    }

    let test = Partition {
        identifiers: test_records.into_iter().map(|record| record.id).collect(),
        labels: test_labels,
    };

    Ok(Partitions {
        train,
        valid,
        test,
        encoder,
    })
}

/// Loads the data, trains for `num_epochs`, keeps the best checkpoint by
/// validation loss and finishes with one pass over the test partition.
pub fn run<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: B::Device,
) -> error::Result<RunSummary> {
    let model_path = Path::new(&config.model_path);
    fs::create_dir_all(model_path)?;
    config.save(model_path.join("config.json"))?;

    B::seed(config.seed);
    let mut rng = RandomState::new(config.seed);

    let partitions = load_partitions(config, &mut rng)?;
    let num_classes = partitions.encoder.num_classes();
    info!(
        classes = num_classes,
        train = partitions.train.len(),
        valid = partitions.valid.len(),
        test = partitions.test.len(),
        "partitions ready"
    );
    if let (Some(first), Some(last)) = (
        partitions.encoder.decode(0),
        partitions.encoder.decode(num_classes.saturating_sub(1)),
    ) {
        debug!("classes: {first} .. {last}");
    }

    let data_dir = Path::new(&config.data_dir);
    let train_transform = Transform::train(config.crop_size as u32);
    let eval_transform = Transform::eval(config.crop_size as u32);
    let side = eval_transform.crop_size() as usize;
    let pool = worker_pool(config.num_workers)?;

    let train_source = BatchSource::new(
        DogDataset::from_partition(
            data_dir.join("train"),
            partitions.train,
            train_transform,
            &config.image_ext,
        )?,
        DogBatcher::<B>::new(device.clone(), train_transform.crop_size() as usize),
        config.batch_size,
        pool.clone(),
    );
    let valid_source = BatchSource::new(
        DogDataset::from_partition(
            data_dir.join("train"),
            partitions.valid,
            eval_transform,
            &config.image_ext,
        )?,
        DogBatcher::<B::InnerBackend>::new(device.clone(), side),
        config.batch_size,
        pool.clone(),
    );
    let test_source = BatchSource::new(
        DogDataset::from_partition(
            data_dir.join("test"),
            partitions.test,
            eval_transform,
            &config.image_ext,
        )?,
        DogBatcher::<B::InnerBackend>::new(device.clone(), side),
        config.batch_size,
        pool,
    );

    let model_config = config.model_config(num_classes);
    model_config.save(model_path.join("model.json"))?;
    let mut model = model_config.init::<B>(&device);
    info!("model has {} trainable parameters", count_parameters(&model));

    let mut optimizer = config.optimizer.init::<B, ConvNet<B>>();
    let train_loss: CrossEntropyLoss<B> = CrossEntropyLossConfig::new().init(&device);
    let eval_loss: CrossEntropyLoss<B::InnerBackend> = CrossEntropyLossConfig::new().init(&device);

    let mut checkpoint = BestCheckpoint::new(config.output_file(""));
    let mut stats = EpochStats::default();

    for epoch in 0..config.num_epochs {
        let start = Instant::now();

        let (trained, train) = train_epoch(
            model,
            &train_source,
            &mut optimizer,
            &train_loss,
            config.learning_rate,
            &mut rng,
            config.log_step,
        )?;
        model = trained;

        let valid = evaluate(&model.valid(), &valid_source, &eval_loss)?;
        stats.push(&train, &valid);

        let improved = checkpoint.observe(epoch, valid.loss, &model)?;
        let (mins, secs) = elapsed_time(0.0, start.elapsed().as_secs_f64());

        info!(
            "Epoch: {:02} | Time: {mins}m {secs}s | Train Loss: {:.3} | Train Acc: {:.2}% | Val. Loss: {:.3} | Val. Acc: {:.2}%{}",
            epoch + 1,
            train.loss,
            train.accuracy * 100.0,
            valid.loss,
            valid.accuracy * 100.0,
            if improved { " | best" } else { "" }
        );
    }

    let test = evaluate(&model.valid(), &test_source, &eval_loss)?;
    info!(
        "Test Accuracy of the model on the {} test images: {:.2} %",
        test.samples,
        test.accuracy * 100.0
    );

    stats.save(&config.output_file("_stats.json"))?;
    if config.plot {
        let plot_path = config.output_file("_stats.svg");
        write_training_plot(&stats, &config.model_name, &plot_path)?;
        info!("training plot written to {}", plot_path.display());
    }

    Ok(RunSummary {
        stats,
        test,
        best_epoch: checkpoint.best_epoch(),
        best_valid_loss: checkpoint.best_valid_loss(),
        checkpoint: checkpoint.path().to_path_buf(),
        num_classes,
    })
}
