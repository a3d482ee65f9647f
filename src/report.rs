use ndarray::ArrayView2;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::model::metrics::{self, EpochMetrics};
use crate::model::neural_net::NeuralNet;
use crate::model::{Model, ModelError};
use crate::parsing::classes::{class_name, CLASS_NAMES};
use crate::parsing::Dataset;

/// Darkest to brightest
const SHADES: [char; 5] = [' ', '.', ':', 'o', '@'];

/// Test the model on the validation set and print a per-class breakdown
pub fn test_model(dataset: &Dataset, model: &NeuralNet) -> Result<(), ModelError> {
    let predictions = model.predict(&dataset.data.view())?;
    let accuracy = metrics::accuracy(&predictions.view(), &dataset.target.view());
    let tallies = metrics::per_class(&predictions.view(), &dataset.target.view());
    let correct: usize = tallies.iter().map(|t| t.correct).sum();

    println!("The number of mistakes is {}", dataset.len() - correct);
    println!("Accuracy: {:.2}%", accuracy);

    for (name, tally) in CLASS_NAMES.iter().zip(&tallies) {
        match tally.accuracy() {
            Some(acc) => println!("  {:<12} {:>6.2}% ({}/{})", name, acc, tally.correct, tally.total),
            None => println!("  {:<12}      - (0 samples)", name),
        }
    }

    Ok(())
}

/// Write the losses to a debug file, one "epoch    loss" line per epoch.
/// The validation loss is used when there is one
pub fn write_losses(debug_path: &Path, losses: &[EpochMetrics]) -> std::io::Result<()> {
    let mut file = BufWriter::new(File::create(debug_path)?);

    for m in losses {
        writeln!(file, "{}    {}", m.epoch, m.val_loss.unwrap_or(m.train_loss))?;
    }

    file.flush()
}

/// Greyscale image as text, one line per pixel row
pub fn render_image(image: &ArrayView2<f64>) -> String {
    let mut out = String::with_capacity(image.len() * 2 + image.nrows());

    for row in image.rows() {
        for &pixel in row {
            let level = (pixel.clamp(0.0, 1.0) * (SHADES.len() - 1) as f64).round() as usize;
            // Doubled so the picture keeps its aspect ratio in a terminal
            out.push(SHADES[level]);
            out.push(SHADES[level]);
        }
        out.push('\n');
    }

    out
}

pub fn label_text(label: usize) -> String {
    match class_name(label) {
        Some(name) => format!("{} ({})", label, name),
        None => label.to_string(),
    }
}
