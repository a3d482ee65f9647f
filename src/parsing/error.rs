use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset not found at {0}")]
    NotFound(PathBuf),

    #[error("failed to read dataset")]
    Io(#[from] std::io::Error),

    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("unexpected IDX magic number {found} (expected {expected})")]
    BadMagic { expected: u32, found: u32 },

    #[error("IDX images are {rows}x{cols}, expected 28x28")]
    BadDimensions { rows: u32, cols: u32 },

    #[error("{images} images but {labels} labels")]
    LengthMismatch { images: usize, labels: usize },

    #[error("sample {index} has label {label}, which is not a garment class")]
    LabelOutOfRange { index: usize, label: usize },

    #[error("dataset contains no samples")]
    Empty,

    #[error("batch size must be at least 1")]
    ZeroBatchSize,
}
