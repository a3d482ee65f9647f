use ndarray::{Array1, Array2, ArrayView2};

use crate::parsing::Dataset;

pub mod error;
pub mod metrics;
pub mod neural_net;
pub mod optimizer;
pub mod weights;

pub use error::ModelError;
use metrics::EpochMetrics;

/// A weight matrix (fan_in x fan_out) and a bias vector (fan_out)
pub type Layer = (Array2<f64>, Array1<f64>);

pub trait Model {
    /// Train on `train`, scoring on `validation` after every epoch when given
    fn fit(
        &mut self,
        train: &Dataset,
        validation: Option<&Dataset>,
    ) -> Result<Vec<EpochMetrics>, ModelError>;

    /// Class probabilities, one row per input row
    fn predict(&self, inputs: &ArrayView2<f64>) -> Result<Array2<f64>, ModelError>;
}
