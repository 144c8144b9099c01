use burn::{module::Module, prelude::*, tensor::ElementConversion};

/// Number of rows whose arg-max logit equals the target.
pub fn correct_count<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let predictions = logits.argmax(1).reshape([batch_size]);

    let correct: i64 = predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();

    correct as usize
}

/// Top-1 accuracy in `[0, 1]`; an empty batch scores 0.
pub fn accuracy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> f64 {
    let [batch_size, _] = logits.dims();
    if batch_size == 0 {
        return 0.0;
    }

    correct_count(logits, targets) as f64 / batch_size as f64
}

/// Whole minutes and leftover whole seconds between two timestamps in seconds.
pub fn elapsed_time(start_secs: f64, end_secs: f64) -> (u64, u64) {
    let elapsed = (end_secs - start_secs).max(0.0);
    let minutes = (elapsed / 60.0).floor();
    let seconds = (elapsed - minutes * 60.0).floor();

    (minutes as u64, seconds as u64)
}

/// Element count over all trainable parameter tensors.
pub fn count_parameters<B: Backend, M: Module<B>>(model: &M) -> usize {
    model.num_params()
}

/// Loss and accuracy of one pass, weighted by sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub batches: usize,
    pub samples: usize,
}

/// Running sums for [`EpochMetrics`]. Loss is accumulated as
/// `batch_loss * batch_len` so a short final batch weighs what it holds.
#[derive(Debug, Default)]
pub struct MetricAccumulator {
    loss_sum: f64,
    correct: usize,
    samples: usize,
    batches: usize,
}

impl MetricAccumulator {
    pub fn update(&mut self, batch_loss: f64, correct: usize, batch_len: usize) {
        self.loss_sum += batch_loss * batch_len as f64;
        self.correct += correct;
        self.samples += batch_len;
        self.batches += 1;
    }

    pub fn finish(self) -> EpochMetrics {
        let samples = self.samples.max(1) as f64;

        EpochMetrics {
            loss: self.loss_sum / samples,
            accuracy: self.correct as f64 / samples,
            batches: self.batches,
            samples: self.samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;

    type TestBackend = NdArray<f32>;

    fn logits(rows: [[f32; 3]; 4]) -> Tensor<TestBackend, 2> {
        Tensor::from_floats(rows, &Default::default())
    }

    fn targets(values: [i64; 4]) -> Tensor<TestBackend, 1, Int> {
        Tensor::from_ints(values, &Default::default())
    }

    const ROWS: [[f32; 3]; 4] = [
        [0.9, 0.1, 0.0],
        [0.1, 2.0, 0.3],
        [0.0, 0.2, 0.7],
        [1.5, 0.4, 0.2],
    ];

    #[test]
    fn accuracy_is_one_when_every_argmax_matches() {
        assert_eq!(accuracy(logits(ROWS), targets([0, 1, 2, 0])), 1.0);
    }

    #[test]
    fn accuracy_counts_partial_matches() {
        let acc = accuracy(logits(ROWS), targets([0, 2, 2, 1]));

        assert_eq!(acc, 0.5);
        assert!((0.0..=1.0).contains(&acc));
    }

    #[test]
    fn accuracy_is_zero_when_nothing_matches() {
        assert_eq!(accuracy(logits(ROWS), targets([1, 0, 0, 2])), 0.0);
    }

    #[test]
    fn elapsed_time_splits_minutes_and_seconds() {
        assert_eq!(elapsed_time(0.0, 125.0), (2, 5));
        assert_eq!(elapsed_time(10.0, 10.0), (0, 0));
        assert_eq!(elapsed_time(3.0, 62.9), (0, 59));
        assert_eq!(elapsed_time(0.0, 3600.5), (60, 0));
    }

    #[test]
    fn accumulator_weights_by_sample() {
        let mut acc = MetricAccumulator::default();
        acc.update(1.0, 4, 4);
        acc.update(4.0, 0, 2);

        let metrics = acc.finish();

        assert_eq!(metrics.batches, 2);
        assert_eq!(metrics.samples, 6);
        assert!((metrics.loss - 2.0).abs() < 1e-12);
        assert!((metrics.accuracy - 4.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn single_batch_metrics_equal_the_batch() {
        let mut acc = MetricAccumulator::default();
        acc.update(0.75, 3, 4);

        let metrics = acc.finish();

        assert_eq!(metrics.loss, 0.75);
        assert_eq!(metrics.accuracy, 0.75);
    }
}
