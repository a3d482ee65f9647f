use ndarray::{ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use super::ModelError;
use crate::parsing::{argmax, NUM_CLASSES};

/// Percentage of rows whose highest-scoring class matches the target's
pub fn accuracy(predictions: &ArrayView2<f64>, targets: &ArrayView2<f64>) -> f64 {
    let total = predictions.nrows();
    if total == 0 {
        return 0.0;
    }

    let correct = predictions
        .axis_iter(Axis(0))
        .zip(targets.axis_iter(Axis(0)))
        .filter(|(p, t)| argmax(p.iter()) == argmax(t.iter()))
        .count();

    100.0 * correct as f64 / total as f64
}

/// Correct and total counts for one class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassTally {
    pub correct: usize,
    pub total: usize,
}

impl ClassTally {
    pub fn accuracy(&self) -> Option<f64> {
        (self.total > 0).then(|| 100.0 * self.correct as f64 / self.total as f64)
    }
}

/// Accuracy broken down by the true class of each row
pub fn per_class(predictions: &ArrayView2<f64>, targets: &ArrayView2<f64>) -> Vec<ClassTally> {
    let mut tallies = vec![ClassTally::default(); NUM_CLASSES];

    for (p, t) in predictions
        .axis_iter(Axis(0))
        .zip(targets.axis_iter(Axis(0)))
    {
        let truth = argmax(t.iter());
        if let Some(tally) = tallies.get_mut(truth) {
            tally.total += 1;
            if argmax(p.iter()) == truth {
                tally.correct += 1;
            }
        }
    }

    tallies
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Starts at 1
    pub epoch: usize,
    /// Mean of the per-batch training losses
    pub train_loss: f64,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
}

/// Appends one CSV row per epoch
pub struct MetricsLogger {
    path: PathBuf,
    writer: csv::Writer<std::fs::File>,
}

impl MetricsLogger {
    pub fn create(path: &Path) -> Result<Self, ModelError> {
        let exists = path.exists() && std::fs::metadata(path)?.len() > 0;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(!exists)
            .from_writer(file);

        tracing::debug!("metrics will be appended to {}", path.display());

        Ok(MetricsLogger {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn log(&mut self, metrics: &EpochMetrics) -> Result<(), ModelError> {
        self.writer.serialize(metrics)?;
        self.writer.flush()?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
