use std::path::{Path, PathBuf};

use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use tracing::info;

use crate::error::{Error, Result};

/// Extension `CompactRecorder` writes.
const EXTENSION: &str = "mpk";

/// Keeps exactly one checkpoint: the model with the lowest validation loss
/// seen so far. Ties keep the earlier epoch.
#[derive(Debug)]
pub struct BestCheckpoint {
    path: PathBuf,
    best_valid_loss: f64,
    best_epoch: Option<usize>,
}

impl BestCheckpoint {
    /// `stem` is the file path without extension. The extension is appended, so
    /// dots inside the stem are kept.
    pub fn new(stem: impl AsRef<Path>) -> Self {
        let path = PathBuf::from(format!("{}.{EXTENSION}", stem.as_ref().display()));

        Self {
            path,
            best_valid_loss: f64::INFINITY,
            best_epoch: None,
        }
    }

    pub fn is_improvement(&self, valid_loss: f64) -> bool {
        valid_loss < self.best_valid_loss
    }

    /// Saves `model` over the previous checkpoint when `valid_loss` improves.
    pub fn observe<B: Backend, M: Module<B>>(
        &mut self,
        epoch: usize,
        valid_loss: f64,
        model: &M,
    ) -> Result<bool> {
        if !self.is_improvement(valid_loss) {
            return Ok(false);
        }

        model
            .clone()
            .save_file(&self.path, &CompactRecorder::new())
            .map_err(|e| Error::Checkpoint {
                path: self.path.clone(),
                message: format!("{e:?}"),
            })?;

        info!(
            epoch = epoch + 1,
            valid_loss,
            "saved checkpoint to {}",
            self.path.display()
        );

        self.best_valid_loss = valid_loss;
        self.best_epoch = Some(epoch);
        Ok(true)
    }

    pub fn best_valid_loss(&self) -> f64 {
        self.best_valid_loss
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Full path of the file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
