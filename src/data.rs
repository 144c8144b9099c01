use std::{path::PathBuf, sync::Arc};

use burn::{
    data::{
        dataloader::batcher::Batcher,
        dataset::{Dataset, InMemDataset},
    },
    prelude::*,
};
use rayon::{
    iter::{IntoParallelRefIterator, ParallelIterator},
    ThreadPool, ThreadPoolBuilder,
};

use crate::{
    error::{Error, Result},
    random::RandomState,
    split::Partition,
    transform::{Transform, CHANNEL_COUNT},
};

/// Identifier and encoded label of one image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub identifier: String,
    pub label: usize,
}

/// A decoded and transformed image, CHW `f32`.
#[derive(Debug, Clone)]
pub struct DogItem {
    pub image: Vec<f32>,
    pub label: usize,
}

/// Resolves `<base_path>/<identifier>.<extension>` for every sample and runs
/// the partition's transform over it.
pub struct DogDataset {
    base_path: PathBuf,
    extension: String,
    samples: InMemDataset<Sample>,
    transform: Transform,
}

impl Dataset<Sample> for DogDataset {
    fn get(&self, index: usize) -> Option<Sample> {
        self.samples.get(index)
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

impl DogDataset {
    pub fn new(
        base_path: impl Into<PathBuf>,
        identifiers: Vec<String>,
        labels: Vec<usize>,
        transform: Transform,
        extension: &str,
    ) -> Result<Self> {
        if identifiers.len() != labels.len() {
            return Err(Error::Input(format!(
                "{} identifiers but {} labels",
                identifiers.len(),
                labels.len()
            )));
        }

        let samples = identifiers
            .into_iter()
            .zip(labels)
            .map(|(identifier, label)| Sample { identifier, label })
            .collect();

        Ok(Self {
            base_path: base_path.into(),
            extension: extension.trim_start_matches('.').to_owned(),
            samples: InMemDataset::new(samples),
            transform,
        })
    }

    pub fn from_partition(
        base_path: impl Into<PathBuf>,
        partition: Partition,
        transform: Transform,
        extension: &str,
    ) -> Result<Self> {
        Self::new(
            base_path,
            partition.identifiers,
            partition.labels,
            transform,
            extension,
        )
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn image_path(&self, identifier: &str) -> PathBuf {
        self.base_path
            .join(format!("{identifier}.{}", self.extension))
    }

    /// Decodes and transforms sample `index`. `seed` only matters for random
    /// transforms.
    pub fn load(&self, index: usize, seed: u64) -> Result<DogItem> {
        let sample = self.get(index).ok_or_else(|| {
            Error::Input(format!("index {index} out of range for {} samples", self.len()))
        })?;

        let path = self.image_path(&sample.identifier);
        if !path.is_file() {
            return Err(Error::MissingImage {
                identifier: sample.identifier,
                path,
            });
        }

        let image = image::open(&path).map_err(|source| Error::Image {
            path: path.clone(),
            source,
        })?;

        Ok(DogItem {
            image: self.transform.apply(&image, seed),
            label: sample.label,
        })
    }
}

#[derive(Clone, Debug)]
pub struct DogBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks items into device tensors.
#[derive(Clone, Debug)]
pub struct DogBatcher<B: Backend> {
    device: B::Device,
    crop_size: usize,
}

impl<B: Backend> DogBatcher<B> {
    pub fn new(device: B::Device, crop_size: usize) -> Self {
        Self { device, crop_size }
    }
}

impl<B: Backend> Batcher<DogItem, DogBatch<B>> for DogBatcher<B> {
    fn batch(&self, items: Vec<DogItem>) -> DogBatch<B> {
        let batch_size = items.len();

        let targets = items.iter().map(|item| item.label as i64).collect::<Vec<_>>();
        let images = items.into_iter().flat_map(|item| item.image).collect::<Vec<_>>();

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(
                images,
                [batch_size, CHANNEL_COUNT, self.crop_size, self.crop_size],
            ),
            &self.device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(targets, [batch_size]).convert::<B::IntElem>(),
            &self.device,
        );

        DogBatch { images, targets }
    }
}

/// Builds the decoding pool shared by every batch source. Zero workers decode
/// on the caller's thread.
pub fn worker_pool(num_workers: usize) -> Result<Option<Arc<ThreadPool>>> {
    if num_workers == 0 {
        return Ok(None);
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(num_workers)
        .thread_name(|index| format!("loader-{index}"))
        .build()?;

    Ok(Some(Arc::new(pool)))
}

/// Groups a dataset into batches of `batch_size`; the last one may be smaller.
///
/// Images inside a batch may be decoded in parallel, but batches and the items
/// within them always come out in plan order.
pub struct BatchSource<B: Backend> {
    dataset: DogDataset,
    batcher: DogBatcher<B>,
    batch_size: usize,
    pool: Option<Arc<ThreadPool>>,
}

impl<B: Backend> BatchSource<B> {
    pub fn new(
        dataset: DogDataset,
        batcher: DogBatcher<B>,
        batch_size: usize,
        pool: Option<Arc<ThreadPool>>,
    ) -> Self {
        Self {
            dataset,
            batcher,
            batch_size: batch_size.max(1),
            pool,
        }
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Stable index order. Random transforms are seeded by index so repeated
    /// passes see identical inputs.
    pub fn sequential(&self) -> Batches<'_, B> {
        let plan = (0..self.dataset.len())
            .map(|index| (index, index as u64))
            .collect();

        Batches::new(self, plan)
    }

    /// A fresh permutation drawn from `rng`, plus one augmentation seed per item
    /// when the transform is random.
    pub fn shuffled(&self, rng: &mut RandomState) -> Batches<'_, B> {
        let random = self.dataset.transform().is_random();

        let plan = rng
            .permutation(self.dataset.len())
            .into_iter()
            .map(|index| {
                let seed = if random { rng.next_seed() } else { index as u64 };
                (index, seed)
            })
            .collect();

        Batches::new(self, plan)
    }

    fn load_chunk(&self, chunk: &[(usize, u64)]) -> Result<Vec<DogItem>> {
        let load = |&(index, seed): &(usize, u64)| self.dataset.load(index, seed);

        match &self.pool {
            Some(pool) => pool.install(|| chunk.par_iter().map(load).collect()),
            None => chunk.iter().map(load).collect(),
        }
    }
}

/// One pass over a [`BatchSource`].
pub struct Batches<'a, B: Backend> {
    source: &'a BatchSource<B>,
    plan: Vec<(usize, u64)>,
    cursor: usize,
}

impl<'a, B: Backend> Batches<'a, B> {
    fn new(source: &'a BatchSource<B>, plan: Vec<(usize, u64)>) -> Self {
        Self {
            source,
            plan,
            cursor: 0,
        }
    }

    /// Dataset indices in the order this pass visits them.
    #[cfg(test)]
    pub fn order(&self) -> impl Iterator<Item = usize> + '_ {
        self.plan.iter().map(|&(index, _)| index)
    }
}

impl<B: Backend> Iterator for Batches<'_, B> {
    type Item = Result<DogBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.plan.len() {
            return None;
        }

        let end = (self.cursor + self.source.batch_size).min(self.plan.len());
        let chunk = &self.plan[self.cursor..end];
        self.cursor = end;

        Some(
            self.source
                .load_chunk(chunk)
                .map(|items| self.source.batcher.batch(items)),
        )
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use std::path::Path;

    use super::*;
    use crate::test_utils::write_images;

    type TestBackend = NdArray<f32>;

    fn source(
        dir: &Path,
        count: usize,
        transform: Transform,
        batch_size: usize,
        workers: usize,
    ) -> BatchSource<TestBackend> {
        // Label = index so targets reveal the visiting order.
        let identifiers = write_images(dir, count, 12, 10);
        let labels = (0..count).collect();
        let dataset = DogDataset::new(dir, identifiers, labels, transform, "png").unwrap();
        let batcher = DogBatcher::new(Default::default(), transform.crop_size() as usize);

        BatchSource::new(dataset, batcher, batch_size, worker_pool(workers).unwrap())
    }

    fn targets(batch: &DogBatch<TestBackend>) -> Vec<i64> {
        batch.targets.to_data().convert::<i64>().to_vec().unwrap()
    }

    #[test]
    fn load_returns_transformed_item() {
        let dir = tempfile::tempdir().unwrap();
        let ids = write_images(dir.path(), 2, 20, 16);
        let dataset =
            DogDataset::new(dir.path(), ids, vec![4, 7], Transform::eval(8), "png").unwrap();

        let item = dataset.load(1, 0).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(item.label, 7);
        assert_eq!(item.image.len(), CHANNEL_COUNT * 8 * 8);
    }

    #[test]
    fn missing_image_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = DogDataset::new(
            dir.path(),
            vec!["ghost".to_string()],
            vec![0],
            Transform::eval(8),
            "jpg",
        )
        .unwrap();

        match dataset.load(0, 0) {
            Err(Error::MissingImage { identifier, path }) => {
                assert_eq!(identifier, "ghost");
                assert_eq!(path, dir.path().join("ghost.jpg"));
            }
            other => panic!("expected a missing image error, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let result = DogDataset::new(
            "unused",
            vec!["a".to_string()],
            vec![0, 1],
            Transform::eval(8),
            "jpg",
        );

        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[test]
    fn last_batch_may_be_smaller() {
        let dir = tempfile::tempdir().unwrap();
        let source = source(dir.path(), 10, Transform::eval(8), 4, 0);

        let sizes: Vec<usize> = source
            .sequential()
            .map(|batch| batch.unwrap().images.dims()[0])
            .collect();

        assert_eq!(source.num_batches(), 3);
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn sequential_order_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let source = source(dir.path(), 9, Transform::eval(8), 4, 2);

        let first: Vec<i64> = source.sequential().flat_map(|b| targets(&b.unwrap())).collect();
        let second: Vec<i64> = source.sequential().flat_map(|b| targets(&b.unwrap())).collect();

        assert_eq!(first, (0..9).collect::<Vec<i64>>());
        assert_eq!(first, second);
    }

    #[test]
    fn shuffled_passes_are_new_permutations() {
        let dir = tempfile::tempdir().unwrap();
        let source = source(dir.path(), 16, Transform::train(8), 4, 0);
        let mut rng = RandomState::new(1234);

        let first: Vec<usize> = source.shuffled(&mut rng).order().collect();
        let second: Vec<usize> = source.shuffled(&mut rng).order().collect();

        assert_ne!(first, second);
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn worker_pool_preserves_batch_order() {
        let dir = tempfile::tempdir().unwrap();
        let serial = source(dir.path(), 12, Transform::train(8), 5, 0);
        let parallel = source(dir.path(), 12, Transform::train(8), 5, 3);

        let serial: Vec<_> = serial
            .shuffled(&mut RandomState::new(8))
            .map(|b| b.unwrap())
            .collect();
        let parallel: Vec<_> = parallel
            .shuffled(&mut RandomState::new(8))
            .map(|b| b.unwrap())
            .collect();

        assert_eq!(serial.len(), parallel.len());
        for (a, b) in serial.iter().zip(&parallel) {
            assert_eq!(targets(a), targets(b));
            a.images
                .to_data()
                .assert_approx_eq(&b.images.to_data(), 5);
        }
    }

    #[test]
    fn missing_image_surfaces_from_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut identifiers = write_images(dir.path(), 3, 12, 12);
        identifiers.push("absent".to_string());
        let dataset =
            DogDataset::new(dir.path(), identifiers, vec![0; 4], Transform::eval(8), "png")
                .unwrap();
        let source = BatchSource::<TestBackend>::new(
            dataset,
            DogBatcher::new(Default::default(), 8),
            2,
            None,
        );

        let results: Vec<_> = source.sequential().collect();

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::MissingImage { .. })));
    }
}
