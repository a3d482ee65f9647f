use ndarray::{Array2, ArrayView2, Axis};
use std::path::Path;

pub mod batch;
pub mod classes;
pub mod error;
pub mod mnist;

pub use error::DatasetError;

pub const IMAGE_SIDE: usize = 28;
pub const NUM_FEATURES: usize = IMAGE_SIDE * IMAGE_SIDE;
pub const NUM_CLASSES: usize = 10;

/// A set of flattened greyscale images and their one-hot targets.
/// Row `i` of `data` is the image whose label is encoded in row `i` of `target`.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub data: Array2<f64>,
    pub target: Array2<f64>,
}

/// Which half of the dataset to read from a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The integer label of every sample, recovered from the one-hot rows
    pub fn labels(&self) -> Vec<usize> {
        self.target.axis_iter(Axis(0)).map(|row| argmax(row.iter())).collect()
    }

    /// The `index`-th image as a 28x28 matrix
    pub fn image(&self, index: usize) -> Option<ArrayView2<f64>> {
        if index >= self.len() {
            return None;
        }

        self.data
            .row(index)
            .into_shape((IMAGE_SIDE, IMAGE_SIDE))
            .ok()
    }

    /// Keep only the first `n` samples
    pub fn subset(&self, n: usize) -> Dataset {
        let n = n.min(self.len());

        Dataset {
            data: self.data.slice(ndarray::s![..n, ..]).to_owned(),
            target: self.target.slice(ndarray::s![..n, ..]).to_owned(),
        }
    }
}

/// Index of the largest element. Ties resolve to the first one.
pub fn argmax<'a>(values: impl Iterator<Item = &'a f64>) -> usize {
    values
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (idx, &x)| {
            if x > best.1 {
                (idx, x)
            } else {
                best
            }
        })
        .0
}

/// Load a split from `path`.
///
/// A file is read as CSV. A directory is searched for the IDX files the usual
/// download layout produces (optionally gzipped), then for the Kaggle CSV export.
pub fn load_split(path: &Path, split: Split) -> Result<Dataset, DatasetError> {
    if path.is_file() {
        return mnist::parse_dataset_csv(path);
    }

    if !path.is_dir() {
        return Err(DatasetError::NotFound(path.to_path_buf()));
    }

    let prefix = match split {
        Split::Train => "train",
        Split::Test => "t10k",
    };

    for suffix in ["", ".gz"] {
        let images = path.join(format!("{prefix}-images-idx3-ubyte{suffix}"));
        let labels = path.join(format!("{prefix}-labels-idx1-ubyte{suffix}"));

        if images.is_file() && labels.is_file() {
            tracing::debug!("reading IDX files from {}", path.display());
            return mnist::parse_idx(&images, &labels);
        }
    }

    let csv_name = match split {
        Split::Train => "fashion-mnist_train.csv",
        Split::Test => "fashion-mnist_test.csv",
    };
    let csv_path = path.join(csv_name);

    if csv_path.is_file() {
        return mnist::parse_dataset_csv(&csv_path);
    }

    Err(DatasetError::NotFound(path.to_path_buf()))
}
