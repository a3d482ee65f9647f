use json::{object, JsonValue};
use ndarray::{Array1, Array2};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use super::neural_net::{ActivationFunction, NeuralNet};
use super::{Layer, ModelError};

/// Serialize the weights of the model as JSON.
/// The keys are e.g. W0, b0, W1, b1. The values are the row-major weights,
/// `structure` holds the layer widths needed to reshape them
pub fn to_json(model: &NeuralNet) -> JsonValue {
    let mut data = object! {};
    data["structure"] = model.structure().into();
    data["activation"] = model.activation_function.name().into();

    for (i, (w, b)) in model.layers.iter().enumerate() {
        let w: Vec<f64> = w.iter().copied().collect();
        let b: Vec<f64> = b.iter().copied().collect();

        data[format!("W{}", i)] = w.into();
        data[format!("b{}", i)] = b.into();
    }

    data
}

pub fn write_weights(weight_path: &Path, model: &NeuralNet) -> Result<(), ModelError> {
    let mut file = File::create(weight_path)?;
    file.write_all(to_json(model).dump().as_bytes())?;

    tracing::info!("wrote weights to {}", weight_path.display());

    Ok(())
}

fn malformed(msg: impl Into<String>) -> ModelError {
    ModelError::MalformedWeights(msg.into())
}

fn numbers(data: &JsonValue, key: &str, expected: usize) -> Result<Vec<f64>, ModelError> {
    let values = &data[key];
    if !values.is_array() {
        return Err(malformed(format!("missing array {key}")));
    }

    let parsed = values
        .members()
        .map(|v| v.as_f64().ok_or_else(|| malformed(format!("{key} holds a non-number"))))
        .collect::<Result<Vec<f64>, _>>()?;

    if parsed.len() != expected {
        return Err(malformed(format!(
            "{key} has {} values, expected {expected}",
            parsed.len()
        )));
    }

    Ok(parsed)
}

/// Rebuild a network from a document produced by `to_json`
pub fn from_json(data: &JsonValue) -> Result<NeuralNet, ModelError> {
    let structure = data["structure"]
        .members()
        .map(|v| v.as_usize().ok_or_else(|| malformed("structure holds a non-integer")))
        .collect::<Result<Vec<usize>, _>>()?;
    if structure.len() < 2 {
        return Err(ModelError::InvalidStructure(structure));
    }

    let activation = match data["activation"].as_str() {
        Some(name) => ActivationFunction::from_name(name)
            .ok_or_else(|| malformed(format!("unknown activation {name}")))?,
        None => ActivationFunction::ReLU,
    };

    let layers = structure
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            let w = numbers(data, &format!("W{i}"), fan_in * fan_out)?;
            let b = numbers(data, &format!("b{i}"), fan_out)?;
            let w = Array2::from_shape_vec((fan_in, fan_out), w)
                .map_err(|e| malformed(e.to_string()))?;

            Ok((w, Array1::from(b)))
        })
        .collect::<Result<Vec<Layer>, ModelError>>()?;

    NeuralNet::from_layers(layers, activation)
}

pub fn read_weights(weight_path: &Path) -> Result<NeuralNet, ModelError> {
    let contents = std::fs::read_to_string(weight_path)?;
    let model = from_json(&json::parse(&contents)?)?;

    tracing::debug!(
        "loaded {:?} network from {}",
        model.structure(),
        weight_path.display()
    );

    Ok(model)
}
