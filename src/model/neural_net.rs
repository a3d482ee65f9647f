use crate::parsing::batch::BatchIter;
use crate::parsing::Dataset;
use ndarray::{Array, Array1, Array2, ArrayView2, Axis};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::metrics::{self, EpochMetrics, MetricsLogger};
use super::optimizer::{LayerGrad, OptimizerConfig};
use super::{Layer, Model, ModelError};

/// Probabilities are clamped to this before taking the log
const MIN_PROBABILITY: f64 = 1e-12;

/// Represents a neural net
pub struct NeuralNet {
    pub layers: Vec<Layer>,
    pub activation_function: ActivationFunction,
    pub hyper: Hyperparams,
}

/// Training hyperparams
#[derive(Clone, Debug)]
pub struct Hyperparams {
    /// When `None`, training runs until the loss stops improving by `epsilon`
    pub num_epochs: Option<usize>,
    /// Upper bound for early stopping
    pub max_epochs: usize,
    pub epsilon: f64,
    pub batch_size: usize,
    pub shuffle: bool,
    pub seed: u64,
    pub optimizer: OptimizerConfig,
}

impl Default for Hyperparams {
    fn default() -> Self {
        Hyperparams {
            num_epochs: Some(5),
            max_epochs: 100,
            epsilon: 1e-4,
            batch_size: 64,
            shuffle: true,
            seed: 0,
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl Hyperparams {
    pub fn validate(&self) -> Result<(), ModelError> {
        let bad = |msg: String| Err(ModelError::InvalidHyperparameter(msg));

        if self.batch_size == 0 {
            return bad("batch size must be at least 1".into());
        }
        if !(self.optimizer.learning_rate > 0.0) {
            return bad(format!(
                "learning rate must be positive, got {}",
                self.optimizer.learning_rate
            ));
        }
        if !(0.0..1.0).contains(&self.optimizer.momentum) {
            return bad(format!(
                "momentum must be in [0, 1), got {}",
                self.optimizer.momentum
            ));
        }
        if self.optimizer.weight_decay < 0.0 {
            return bad("weight decay cannot be negative".into());
        }
        if self.num_epochs.is_none() && self.max_epochs == 0 {
            return bad("early stopping needs max epochs of at least 1".into());
        }

        Ok(())
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationFunction {
    #[value(name = "relu")]
    ReLU,
    Sigmoid,
    Tanh,
    Linear,
    #[value(name = "leaky-relu")]
    LeakyReLU,
}

impl ActivationFunction {
    pub fn name(&self) -> &'static str {
        match self {
            ActivationFunction::ReLU => "relu",
            ActivationFunction::Sigmoid => "sigmoid",
            ActivationFunction::Tanh => "tanh",
            ActivationFunction::Linear => "linear",
            ActivationFunction::LeakyReLU => "leaky-relu",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        <Self as clap::ValueEnum>::from_str(name, true).ok()
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitMethod {
    Default,
    Xavier,
    Kaiming,
}

/// Average loss and accuracy over a dataset
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
}

impl NeuralNet {
    /// Construct a new neural net according to the specified hyperparams
    pub fn new(
        layer_structure: &[usize],
        activation_function: ActivationFunction,
        init_method: InitMethod,
        hyper: Hyperparams,
    ) -> Result<NeuralNet, ModelError> {
        check_structure(layer_structure)?;
        hyper.validate()?;

        let mut rng = StdRng::seed_from_u64(hyper.seed);
        let layers = match init_method {
            InitMethod::Default => init_layers_default(layer_structure, &mut rng),
            InitMethod::Xavier => init_layers_xavier(layer_structure, &mut rng),
            InitMethod::Kaiming => init_layers_kaiming(layer_structure, &mut rng),
        };

        Ok(NeuralNet {
            layers,
            activation_function,
            hyper,
        })
    }

    /// Wrap already trained layers, e.g. ones read back from disk
    pub fn from_layers(
        layers: Vec<Layer>,
        activation_function: ActivationFunction,
    ) -> Result<NeuralNet, ModelError> {
        let structure = structure_of(&layers);
        check_structure(&structure)?;

        for (idx, pair) in layers.windows(2).enumerate() {
            if pair[0].0.ncols() != pair[1].0.nrows() {
                return Err(ModelError::MalformedWeights(format!(
                    "layer {} outputs {} values but layer {} takes {}",
                    idx,
                    pair[0].0.ncols(),
                    idx + 1,
                    pair[1].0.nrows()
                )));
            }
        }
        for (idx, (w, b)) in layers.iter().enumerate() {
            if w.ncols() != b.len() {
                return Err(ModelError::MalformedWeights(format!(
                    "layer {} has {} outputs but {} biases",
                    idx,
                    w.ncols(),
                    b.len()
                )));
            }
        }

        Ok(NeuralNet {
            layers,
            activation_function,
            hyper: Hyperparams::default(),
        })
    }

    /// Layer widths, input first
    pub fn structure(&self) -> Vec<usize> {
        structure_of(&self.layers)
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(|(w, b)| w.len() + b.len()).sum()
    }

    fn check_inputs(&self, inputs: &ArrayView2<f64>) -> Result<(), ModelError> {
        let expected = self.layers[0].0.nrows();

        if inputs.ncols() != expected {
            return Err(ModelError::FeatureMismatch {
                expected,
                found: inputs.ncols(),
            });
        }

        Ok(())
    }

    /// Number of classes the output layer scores
    pub fn num_outputs(&self) -> usize {
        self.layers.last().map_or(0, |(w, _)| w.ncols())
    }

    fn check_targets(&self, dataset: &Dataset) -> Result<(), ModelError> {
        self.check_inputs(&dataset.data.view())?;

        if dataset.target.ncols() != self.num_outputs() {
            return Err(ModelError::ClassMismatch {
                expected: dataset.target.ncols(),
                found: self.num_outputs(),
            });
        }

        Ok(())
    }

    // Perform a forward pass of the network on some input.
    // Returns the outputs of the layers (the input first), and the non-activated outputs (used for backprop)
    fn forward(&self, inputs: &ArrayView2<f64>) -> (Vec<Array2<f64>>, Vec<Array2<f64>>) {
        let mut hidden = Vec::with_capacity(self.layers.len() + 1);
        let mut hidden_linear = Vec::with_capacity(self.layers.len());
        // The first layer is a passthrough layer, so it outputs whatever its input is
        hidden.push(inputs.to_owned());

        let last = self.layers.len() - 1;

        for (idx, layer) in self.layers.iter().enumerate() {
            let previous = &hidden[hidden.len() - 1];
            // The output of the layer without applying the activation function
            let lin_output = previous.dot(&layer.0) + &layer.1;
            // Hidden layers go through the activation function, the output layer emits raw scores
            let real_output = if idx == last {
                lin_output.clone()
            } else {
                lin_output.mapv(|x| activation(self.activation_function, x))
            };

            hidden.push(real_output);
            hidden_linear.push(lin_output);
        }

        (hidden, hidden_linear)
    }

    /// Calculate the gradients of the mean loss using backprop.
    /// `grad` is the gradient of the summed loss WRT the output scores.
    fn backward(
        &self,
        hidden: &[Array2<f64>],
        hidden_linear: &[Array2<f64>],
        grad: Array2<f64>,
    ) -> Vec<LayerGrad> {
        let batch = grad.nrows().max(1) as f64;
        let mut grads = Vec::with_capacity(self.layers.len());
        // The gradient WRT the output of the current layer
        let mut grad_help = grad / batch;

        for idx in (0..self.layers.len()).rev() {
            // If we aren't at the last layer, go back through the activation function
            if idx != self.layers.len() - 1 {
                let step_mat =
                    hidden_linear[idx].mapv(|x| delta_activation(self.activation_function, x));
                grad_help = grad_help * step_mat;
            }

            let weight_grad = hidden[idx].t().dot(&grad_help);
            let bias_grad = grad_help.sum_axis(Axis(0));

            if idx > 0 {
                grad_help = grad_help.dot(&self.layers[idx].0.t());
            }

            grads.push((weight_grad, bias_grad));
        }

        grads.reverse();
        grads
    }

    /// Gradients of the mean cross-entropy loss on one batch, and that loss
    pub fn gradients(
        &self,
        inputs: &ArrayView2<f64>,
        targets: &ArrayView2<f64>,
    ) -> (Vec<LayerGrad>, f64) {
        let (hidden, hidden_linear) = self.forward(inputs);
        let predictions = softmax(&hidden[hidden.len() - 1]);
        let loss = cross_entropy(&predictions, targets);

        // Gradient is initialized to the gradient of the loss WRT the output layer
        let grad = predictions - targets;

        (self.backward(&hidden, &hidden_linear, grad), loss)
    }

    /// Average loss and accuracy on a dataset, evaluated in batches
    pub fn evaluate(&self, dataset: &Dataset, batch_size: usize) -> Result<Evaluation, ModelError> {
        let mut loss_sum = 0f64;
        let mut correct = 0f64;
        let total = dataset.len();
        self.check_targets(dataset)?;

        for batch in BatchIter::new(dataset, batch_size)? {
            let predictions = self.predict(&batch.inputs.view())?;
            let n = batch.len() as f64;

            loss_sum += n * cross_entropy(&predictions, &batch.targets.view());
            correct += n * metrics::accuracy(&predictions.view(), &batch.targets.view()) / 100.0;
        }

        if total == 0 {
            return Ok(Evaluation {
                loss: 0.0,
                accuracy: 0.0,
            });
        }

        Ok(Evaluation {
            loss: loss_sum / total as f64,
            accuracy: 100.0 * correct / total as f64,
        })
    }

    /// Like `fit`, but also appends each epoch's metrics to `logger`
    pub fn fit_logged(
        &mut self,
        train: &Dataset,
        validation: Option<&Dataset>,
        mut logger: Option<&mut MetricsLogger>,
    ) -> Result<Vec<EpochMetrics>, ModelError> {
        self.hyper.validate()?;
        self.check_targets(train)?;
        if let Some(v) = validation {
            self.check_targets(v)?;
        }
        if train.is_empty() {
            return Err(crate::parsing::DatasetError::Empty.into());
        }

        let mut optimizer = self.hyper.optimizer.build();
        let mut rng = StdRng::seed_from_u64(self.hyper.seed.wrapping_add(1));
        let epochs = self.hyper.num_epochs.unwrap_or(self.hyper.max_epochs);
        let mut history: Vec<EpochMetrics> = vec![];

        for epoch in 1..=epochs {
            let batches = if self.hyper.shuffle {
                BatchIter::shuffled(train, self.hyper.batch_size, &mut rng)?
            } else {
                BatchIter::new(train, self.hyper.batch_size)?
            };
            let num_batches = batches.num_batches();

            let mut loss_sum = 0f64;
            for batch in batches {
                let (grads, loss) = self.gradients(&batch.inputs.view(), &batch.targets.view());
                optimizer.step(&mut self.layers, grads);
                loss_sum += loss;
            }

            let train_loss = loss_sum / num_batches as f64;
            let evaluation = match validation {
                Some(v) => Some(self.evaluate(v, self.hyper.batch_size)?),
                None => None,
            };

            let record = EpochMetrics {
                epoch,
                train_loss,
                val_loss: evaluation.map(|e| e.loss),
                val_accuracy: evaluation.map(|e| e.accuracy),
            };

            match evaluation {
                Some(e) => tracing::info!(
                    "epoch {}: train_loss={:.4}, val_loss={:.4}, val_accuracy={:.2}%",
                    epoch,
                    train_loss,
                    e.loss,
                    e.accuracy
                ),
                None => tracing::info!("epoch {}: train_loss={:.4}", epoch, train_loss),
            }

            if let Some(logger) = logger.as_deref_mut() {
                logger.log(&record)?;
            }

            let stop = self.hyper.num_epochs.is_none()
                && history
                    .last()
                    .map_or(false, |prev| !improved(prev, &record, self.hyper.epsilon));
            history.push(record);

            if stop {
                tracing::info!(epoch, "loss improved by less than {}, stopping", self.hyper.epsilon);
                break;
            }
        }

        Ok(history)
    }
}

impl Model for NeuralNet {
    /// Fit the model to the dataset
    /// Return the metrics of every epoch (used for plotting)
    fn fit(
        &mut self,
        train: &Dataset,
        validation: Option<&Dataset>,
    ) -> Result<Vec<EpochMetrics>, ModelError> {
        self.fit_logged(train, validation, None)
    }

    /// Predict the probabities for a set of instances - each instance is a row in "inputs"
    fn predict(&self, inputs: &ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        self.check_inputs(inputs)?;
        let (hidden, _) = self.forward(inputs);

        Ok(softmax(&hidden[hidden.len() - 1]))
    }
}

/// Early stopping compares validation loss when there is one, training loss otherwise
fn improved(previous: &EpochMetrics, current: &EpochMetrics, epsilon: f64) -> bool {
    let loss = |m: &EpochMetrics| m.val_loss.unwrap_or(m.train_loss);

    loss(previous) - loss(current) >= epsilon
}

fn check_structure(layer_structure: &[usize]) -> Result<(), ModelError> {
    if layer_structure.len() < 2 || layer_structure.contains(&0) {
        return Err(ModelError::InvalidStructure(layer_structure.to_vec()));
    }

    Ok(())
}

fn structure_of(layers: &[Layer]) -> Vec<usize> {
    let mut structure: Vec<usize> = layers.iter().map(|(w, _)| w.nrows()).collect();
    if let Some((w, _)) = layers.last() {
        structure.push(w.ncols());
    }

    structure
}

fn activation(name: ActivationFunction, z: f64) -> f64 {
    match name {
        ActivationFunction::ReLU => z.max(0f64),
        ActivationFunction::Sigmoid => (1f64 + (-z).exp()).recip(),
        ActivationFunction::Tanh => z.tanh(),
        ActivationFunction::Linear => z,
        ActivationFunction::LeakyReLU => z.max(0.01 * z),
    }
}

fn delta_activation(name: ActivationFunction, z: f64) -> f64 {
    match name {
        ActivationFunction::ReLU => {
            if z > 0f64 {
                1f64
            } else {
                0f64
            }
        }
        ActivationFunction::Sigmoid => activation(name, z) * (1f64 - activation(name, z)),
        ActivationFunction::Tanh => 1f64 - activation(name, z) * activation(name, z),
        ActivationFunction::Linear => 1f64,
        ActivationFunction::LeakyReLU => {
            if z > 0f64 {
                1f64
            } else {
                0.01f64
            }
        }
    }
}

fn init_layers_uniform(
    layer_structure: &[usize],
    rng: &mut StdRng,
    weight_bound: impl Fn(usize, usize) -> f64,
    bias: impl Fn(usize, usize, &mut StdRng) -> f64,
) -> Vec<Layer> {
    layer_structure
        .windows(2)
        .map(|pair| {
            let (fan_in, fan_out) = (pair[0], pair[1]);
            let bound = weight_bound(fan_in, fan_out);
            let dist = Uniform::new_inclusive(-bound, bound);
            // Random matrix of the weights between this layer and the next layer
            let weights = Array::from_shape_simple_fn((fan_in, fan_out), || dist.sample(&mut *rng));
            let biases = Array1::from_shape_simple_fn(fan_out, || bias(fan_in, fan_out, &mut *rng));

            (weights, biases)
        })
        .collect()
}

/// Weights uniform in +-0.3, biases init'd to ones
fn init_layers_default(layer_structure: &[usize], rng: &mut StdRng) -> Vec<Layer> {
    init_layers_uniform(layer_structure, rng, |_, _| 0.3, |_, _, _| 1f64)
}

fn init_layers_xavier(layer_structure: &[usize], rng: &mut StdRng) -> Vec<Layer> {
    init_layers_uniform(
        layer_structure,
        rng,
        |fan_in, fan_out| (6f64 / (fan_in + fan_out) as f64).sqrt(),
        |_, _, _| 0f64,
    )
}

/// He-uniform as used by common frameworks for linear layers: weights and
/// biases both drawn from +-1/sqrt(fan_in)
fn init_layers_kaiming(layer_structure: &[usize], rng: &mut StdRng) -> Vec<Layer> {
    init_layers_uniform(
        layer_structure,
        rng,
        |fan_in, _| (fan_in as f64).sqrt().recip(),
        |fan_in, _, rng| {
            let bound = (fan_in as f64).sqrt().recip();
            Uniform::new_inclusive(-bound, bound).sample(rng)
        },
    )
}

/// Row-wise softmax - Convert scores into probability distributions
pub fn softmax(scores: &Array2<f64>) -> Array2<f64> {
    let mut out = scores.clone();

    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(f64::NEG_INFINITY, |acc, &x| acc.max(x));
        // Shifting by the max keeps exp from overflowing
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|x| x / sum);
    }

    out
}

/// Mean cross-entropy loss (natural log) of a batch of probabilities
pub fn cross_entropy(predictions: &Array2<f64>, target: &ArrayView2<f64>) -> f64 {
    if predictions.nrows() == 0 {
        return 0f64;
    }

    let total: f64 = predictions
        .axis_iter(Axis(0))
        .zip(target.axis_iter(Axis(0)))
        .map(|(actual_row, target_row)| {
            target_row.dot(&actual_row.mapv(|x| x.max(MIN_PROBABILITY).ln()))
        })
        .sum();

    -total / predictions.nrows() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::{NUM_CLASSES, NUM_FEATURES};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn small_net(activation: ActivationFunction) -> NeuralNet {
        NeuralNet::new(
            &[3, 4, 2],
            activation,
            InitMethod::Kaiming,
            Hyperparams {
                seed: 11,
                ..Default::default()
            },
        )
        .unwrap()
    }

    /// Two separable blobs in the garment input space
    fn toy_dataset(n: usize) -> Dataset {
        let data = Array2::from_shape_fn((n, NUM_FEATURES), |(i, j)| {
            let class = i % 2;
            let on = if class == 0 { j < NUM_FEATURES / 2 } else { j >= NUM_FEATURES / 2 };
            if on {
                0.8 + 0.01 * ((i * 7 + j) % 10) as f64
            } else {
                0.05 * ((i + j) % 3) as f64
            }
        });
        let target = Array2::from_shape_fn((n, NUM_CLASSES), |(i, j)| {
            if j == (i % 2) * 5 {
                1.0
            } else {
                0.0
            }
        });

        Dataset { data, target }
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let scores = array![[1.0, 2.0, 3.0], [1000.0, 1000.0, -1000.0]];
        let probs = softmax(&scores);

        for row in probs.axis_iter(Axis(0)) {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(probs[[1, 0]], 0.5, epsilon = 1e-12);
        assert!(probs[[0, 2]] > probs[[0, 1]]);
    }

    #[test]
    fn cross_entropy_uses_natural_log() {
        let predictions = array![[0.5, 0.5], [0.25, 0.75]];
        let targets = array![[1.0, 0.0], [0.0, 1.0]];
        let expected = -(0.5f64.ln() + 0.75f64.ln()) / 2.0;

        assert_abs_diff_eq!(
            cross_entropy(&predictions, &targets.view()),
            expected,
            epsilon = 1e-12
        );
    }

    #[test]
    fn cross_entropy_survives_zero_probability() {
        let predictions = array![[0.0, 1.0]];
        let targets = array![[1.0, 0.0]];

        assert!(cross_entropy(&predictions, &targets.view()).is_finite());
    }

    #[test]
    fn structure_round_trips() {
        let net = small_net(ActivationFunction::ReLU);

        assert_eq!(net.structure(), vec![3, 4, 2]);
        assert_eq!(net.num_parameters(), 3 * 4 + 4 + 4 * 2 + 2);
    }

    #[test]
    fn bad_structures_are_rejected() {
        for structure in [vec![784], vec![784, 0, 10], vec![]] {
            let result = NeuralNet::new(
                &structure,
                ActivationFunction::ReLU,
                InitMethod::Default,
                Hyperparams::default(),
            );
            assert!(matches!(result, Err(ModelError::InvalidStructure(_))));
        }
    }

    #[test]
    fn bad_hyperparams_are_rejected() {
        let hyper = Hyperparams {
            batch_size: 0,
            ..Default::default()
        };
        let result = NeuralNet::new(&[2, 2], ActivationFunction::ReLU, InitMethod::Xavier, hyper);

        assert!(matches!(result, Err(ModelError::InvalidHyperparameter(_))));
    }

    #[test]
    fn same_seed_same_weights() {
        let a = small_net(ActivationFunction::Tanh);
        let b = small_net(ActivationFunction::Tanh);

        assert_eq!(a.layers, b.layers);
    }

    #[test]
    fn kaiming_weights_stay_in_bounds() {
        let net = NeuralNet::new(
            &[784, 32, 10],
            ActivationFunction::ReLU,
            InitMethod::Kaiming,
            Hyperparams::default(),
        )
        .unwrap();
        let bound = 1.0 / 784f64.sqrt();

        assert!(net.layers[0].0.iter().all(|w| w.abs() <= bound));
        assert!(net.layers[0].1.iter().all(|b| b.abs() <= bound));
    }

    #[test]
    fn predict_rejects_wrong_width() {
        let net = small_net(ActivationFunction::ReLU);
        let inputs = Array2::zeros((1, 5));

        assert!(matches!(
            net.predict(&inputs.view()),
            Err(ModelError::FeatureMismatch { expected: 3, found: 5 })
        ));
    }

    /// Compare backprop against central finite differences
    fn check_gradients(activation: ActivationFunction) {
        let net = small_net(activation);
        let inputs = array![[0.1, -0.4, 0.9], [0.7, 0.2, -0.3]];
        let targets = array![[1.0, 0.0], [0.0, 1.0]];
        let (grads, _) = net.gradients(&inputs.view(), &targets.view());

        let loss_with = |layers: Vec<Layer>| {
            let probe = NeuralNet::from_layers(layers, activation).unwrap();
            let probs = probe.predict(&inputs.view()).unwrap();
            cross_entropy(&probs, &targets.view())
        };
        let h = 1e-6;

        for layer in 0..net.layers.len() {
            for ((i, j), analytic) in grads[layer].0.indexed_iter() {
                let mut plus = net.layers.clone();
                plus[layer].0[[i, j]] += h;
                let mut minus = net.layers.clone();
                minus[layer].0[[i, j]] -= h;

                let numeric = (loss_with(plus) - loss_with(minus)) / (2.0 * h);
                assert_abs_diff_eq!(*analytic, numeric, epsilon = 1e-5);
            }
            for (k, analytic) in grads[layer].1.indexed_iter() {
                let mut plus = net.layers.clone();
                plus[layer].1[k] += h;
                let mut minus = net.layers.clone();
                minus[layer].1[k] -= h;

                let numeric = (loss_with(plus) - loss_with(minus)) / (2.0 * h);
                assert_abs_diff_eq!(*analytic, numeric, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn gradients_match_finite_differences() {
        check_gradients(ActivationFunction::Sigmoid);
        check_gradients(ActivationFunction::Tanh);
        check_gradients(ActivationFunction::Linear);
    }

    #[test]
    fn training_reduces_loss_and_learns_toy_task() {
        let train = toy_dataset(40);
        let mut net = NeuralNet::new(
            &[NUM_FEATURES, 16, NUM_CLASSES],
            ActivationFunction::ReLU,
            InitMethod::Kaiming,
            Hyperparams {
                num_epochs: Some(20),
                batch_size: 8,
                seed: 3,
                optimizer: OptimizerConfig {
                    learning_rate: 0.01,
                    momentum: 0.5,
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .unwrap();

        let before = net.evaluate(&train, 16).unwrap();
        let history = net.fit(&train, Some(&train)).unwrap();
        let after = net.evaluate(&train, 16).unwrap();

        assert_eq!(history.len(), 20);
        assert!(after.loss < before.loss);
        assert_eq!(after.accuracy, 100.0);
        assert_eq!(history.last().unwrap().val_accuracy, Some(100.0));
    }

    #[test]
    fn early_stopping_respects_cap() {
        let train = toy_dataset(10);
        let mut net = NeuralNet::new(
            &[NUM_FEATURES, 4, NUM_CLASSES],
            ActivationFunction::ReLU,
            InitMethod::Xavier,
            Hyperparams {
                num_epochs: None,
                max_epochs: 3,
                epsilon: -1.0,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(net.fit(&train, None).unwrap().len(), 3);
    }

    #[test]
    fn early_stopping_stops_when_flat() {
        let train = toy_dataset(10);
        let mut net = NeuralNet::new(
            &[NUM_FEATURES, 4, NUM_CLASSES],
            ActivationFunction::ReLU,
            InitMethod::Xavier,
            Hyperparams {
                num_epochs: None,
                max_epochs: 50,
                epsilon: f64::INFINITY,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(net.fit(&train, None).unwrap().len(), 2);
    }

    #[test]
    fn improvement_prefers_validation_loss() {
        let m = |train_loss, val_loss| EpochMetrics {
            epoch: 1,
            train_loss,
            val_loss,
            val_accuracy: None,
        };

        assert!(improved(&m(1.0, Some(0.5)), &m(2.0, Some(0.4)), 0.05));
        assert!(!improved(&m(1.0, None), &m(0.99, None), 0.05));
    }

    #[test]
    fn evaluate_on_perfect_net() {
        // Identity-like single layer: input feature k drives class k
        let mut w = Array2::zeros((NUM_CLASSES, NUM_CLASSES));
        w.diag_mut().fill(50.0);
        let net = NeuralNet::from_layers(
            vec![(w, Array1::zeros(NUM_CLASSES))],
            ActivationFunction::ReLU,
        )
        .unwrap();
        let eye = Array2::eye(NUM_CLASSES);
        let ds = Dataset {
            data: eye.clone(),
            target: eye,
        };

        let evaluation = net.evaluate(&ds, 3).unwrap();
        assert_eq!(evaluation.accuracy, 100.0);
        assert!(evaluation.loss < 1e-6);
    }

    #[test]
    fn output_width_must_match_targets() {
        let mut net = NeuralNet::new(
            &[NUM_FEATURES, 5],
            ActivationFunction::ReLU,
            InitMethod::Kaiming,
            Hyperparams::default(),
        )
        .unwrap();
        let ds = toy_dataset(2);

        assert!(matches!(
            net.evaluate(&ds, 4),
            Err(ModelError::ClassMismatch { expected: 10, found: 5 })
        ));
        assert!(matches!(
            net.fit(&ds, None),
            Err(ModelError::ClassMismatch { .. })
        ));
    }

    #[test]
    fn huge_batch_size_is_one_batch() {
        let train = toy_dataset(2);
        let mut net = NeuralNet::new(
            &[NUM_FEATURES, 4, NUM_CLASSES],
            ActivationFunction::ReLU,
            InitMethod::Kaiming,
            Hyperparams {
                num_epochs: Some(1),
                batch_size: usize::MAX,
                ..Default::default()
            },
        )
        .unwrap();

        let history = net.fit(&train, None).unwrap();
        assert!(history[0].train_loss.is_finite());
    }

    #[test]
    fn mismatched_layers_are_rejected() {
        let layers = vec![
            (Array2::zeros((4, 3)), Array1::zeros(3)),
            (Array2::zeros((2, 1)), Array1::zeros(1)),
        ];

        assert!(matches!(
            NeuralNet::from_layers(layers, ActivationFunction::ReLU),
            Err(ModelError::MalformedWeights(_))
        ));
    }
}
