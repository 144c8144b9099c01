use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{error::Result, metric::EpochMetrics};

/// Per-epoch history. Append-only; accuracies are fractions in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub train_loss: Vec<f64>,
    pub train_accuracy: Vec<f64>,
    pub valid_loss: Vec<f64>,
    pub valid_accuracy: Vec<f64>,
}

impl EpochStats {
    pub fn push(&mut self, train: &EpochMetrics, valid: &EpochMetrics) {
        self.train_loss.push(train.loss);
        self.train_accuracy.push(train.accuracy);
        self.valid_loss.push(valid.loss);
        self.valid_accuracy.push(valid.accuracy);
    }

    pub fn epochs(&self) -> usize {
        self.train_loss.len()
    }

    /// Epoch with the lowest validation loss; the earliest wins a tie.
    #[cfg(test)]
    pub fn best_epoch(&self) -> Option<usize> {
        self.valid_loss
            .iter()
            .enumerate()
            .filter(|(_, loss)| !loss.is_nan())
            .fold(None, |best: Option<(usize, f64)>, (epoch, &loss)| match best {
                Some((_, best_loss)) if loss >= best_loss => best,
                _ => Some((epoch, loss)),
            })
            .map(|(epoch, _)| epoch)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
