use std::{collections::BTreeSet, fs, path::Path};

use serde::Deserialize;

use crate::error::{Error, Result};

/// One row of `labels.csv` or `sample_submission.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LabelRecord {
    pub id: String,
    pub breed: String,
}

pub fn read_labels(path: &Path) -> Result<Vec<LabelRecord>> {
    let csv_error = |source| Error::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;
    let records = reader
        .deserialize()
        .collect::<std::result::Result<Vec<LabelRecord>, _>>()
        .map_err(csv_error)?;

    if records.is_empty() {
        return Err(Error::Input(format!(
            "'{}' contains no labelled rows",
            path.display()
        )));
    }

    Ok(records)
}

/// Fails unless `dir` holds exactly `expected` entries.
pub fn check_image_count(dir: &Path, expected: usize) -> Result<()> {
    let found = fs::read_dir(dir)?.count();

    if found != expected {
        return Err(Error::Input(format!(
            "'{}' holds {found} files but the label file lists {expected} images",
            dir.display()
        )));
    }

    Ok(())
}

/// Maps breed names to dense indices in lexicographic order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    /// Fits over every name in `names`. Callers chain the train and test label
    /// sets so both share a single index assignment.
    pub fn fit<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let classes: BTreeSet<&str> = names.into_iter().collect();

        Self {
            classes: classes.into_iter().map(str::to_owned).collect(),
        }
    }

    pub fn encode(&self, name: &str) -> Result<usize> {
        self.classes
            .binary_search_by(|class| class.as_str().cmp(name))
            .map_err(|_| Error::UnknownClass(name.to_owned()))
    }

    pub fn encode_all(&self, records: &[LabelRecord]) -> Result<Vec<usize>> {
        records
            .iter()
            .map(|record| self.encode(&record.breed))
            .collect()
    }

    pub fn decode(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}
