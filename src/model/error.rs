use crate::parsing::DatasetError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("invalid network structure {0:?}: need at least an input and an output layer of non-zero width")]
    InvalidStructure(Vec<usize>),

    #[error("invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),

    #[error("inputs have {found} features but the network expects {expected}")]
    FeatureMismatch { expected: usize, found: usize },

    #[error("network outputs {found} classes but the targets have {expected}")]
    ClassMismatch { expected: usize, found: usize },

    #[error("malformed weights file: {0}")]
    MalformedWeights(String),

    #[error("failed to parse weights file")]
    Json(#[from] json::Error),

    #[error("failed to write metrics")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
