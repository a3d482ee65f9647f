use ndarray::{Array1, Array2};

use super::Layer;

/// Gradients for a single layer, shaped like the layer itself
pub type LayerGrad = (Array2<f64>, Array1<f64>);

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimizerKind {
    Sgd,
    Adam,
}

#[derive(Clone, Debug)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub learning_rate: f64,
    /// Only used by SGD
    pub momentum: f64,
    /// L2 penalty added to the weight gradients (biases are left alone)
    pub weight_decay: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            kind: OptimizerKind::Sgd,
            learning_rate: 1e-3,
            momentum: 0.0,
            weight_decay: 0.0,
        }
    }
}

impl OptimizerConfig {
    pub fn build(&self) -> Box<dyn Optimizer> {
        match self.kind {
            OptimizerKind::Sgd => Box::new(Sgd::new(
                self.learning_rate,
                self.momentum,
                self.weight_decay,
            )),
            OptimizerKind::Adam => Box::new(Adam::new(self.learning_rate, self.weight_decay)),
        }
    }
}

/// Updates the parameters of a network given the gradients of the loss
pub trait Optimizer {
    fn step(&mut self, layers: &mut [Layer], grads: Vec<LayerGrad>);
}

fn zeros_like(layers: &[Layer]) -> Vec<LayerGrad> {
    layers
        .iter()
        .map(|(w, b)| (Array2::zeros(w.raw_dim()), Array1::zeros(b.raw_dim())))
        .collect()
}

/// Stochastic gradient descent with optional momentum
pub struct Sgd {
    learning_rate: f64,
    momentum: f64,
    weight_decay: f64,
    velocity: Vec<LayerGrad>,
}

impl Sgd {
    pub fn new(learning_rate: f64, momentum: f64, weight_decay: f64) -> Self {
        Sgd {
            learning_rate,
            momentum,
            weight_decay,
            velocity: vec![],
        }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, layers: &mut [Layer], grads: Vec<LayerGrad>) {
        if self.velocity.len() != layers.len() {
            self.velocity = zeros_like(layers);
        }

        for ((layer, (mut w_grad, b_grad)), velocity) in layers
            .iter_mut()
            .zip(grads)
            .zip(self.velocity.iter_mut())
        {
            if self.weight_decay != 0.0 {
                w_grad.scaled_add(self.weight_decay, &layer.0);
            }

            if self.momentum != 0.0 {
                velocity.0 = self.momentum * &velocity.0 + &w_grad;
                velocity.1 = self.momentum * &velocity.1 + &b_grad;
                layer.0.scaled_add(-self.learning_rate, &velocity.0);
                layer.1.scaled_add(-self.learning_rate, &velocity.1);
            } else {
                layer.0.scaled_add(-self.learning_rate, &w_grad);
                layer.1.scaled_add(-self.learning_rate, &b_grad);
            }
        }
    }
}

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;

/// Adam (Kingma & Ba) with bias-corrected moment estimates
pub struct Adam {
    learning_rate: f64,
    weight_decay: f64,
    time: i32,
    first: Vec<LayerGrad>,
    second: Vec<LayerGrad>,
}

impl Adam {
    pub fn new(learning_rate: f64, weight_decay: f64) -> Self {
        Adam {
            learning_rate,
            weight_decay,
            time: 0,
            first: vec![],
            second: vec![],
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, layers: &mut [Layer], grads: Vec<LayerGrad>) {
        if self.first.len() != layers.len() {
            self.first = zeros_like(layers);
            self.second = zeros_like(layers);
            self.time = 0;
        }
        self.time += 1;

        let correction1 = 1.0 - BETA1.powi(self.time);
        let correction2 = 1.0 - BETA2.powi(self.time);
        let lr = self.learning_rate;

        let update = |param: f64, m: f64, v: f64| {
            param - lr * (m / correction1) / ((v / correction2).sqrt() + ADAM_EPSILON)
        };

        for (((layer, (mut w_grad, b_grad)), m), v) in layers
            .iter_mut()
            .zip(grads)
            .zip(self.first.iter_mut())
            .zip(self.second.iter_mut())
        {
            if self.weight_decay != 0.0 {
                w_grad.scaled_add(self.weight_decay, &layer.0);
            }

            m.0 = BETA1 * &m.0 + (1.0 - BETA1) * &w_grad;
            m.1 = BETA1 * &m.1 + (1.0 - BETA1) * &b_grad;
            v.0 = BETA2 * &v.0 + (1.0 - BETA2) * &w_grad.mapv(|g| g * g);
            v.1 = BETA2 * &v.1 + (1.0 - BETA2) * &b_grad.mapv(|g| g * g);

            ndarray::Zip::from(&mut layer.0)
                .and(&m.0)
                .and(&v.0)
                .for_each(|p, &m, &v| *p = update(*p, m, v));
            ndarray::Zip::from(&mut layer.1)
                .and(&m.1)
                .and(&v.1)
                .for_each(|p, &m, &v| *p = update(*p, m, v));
        }
    }
}
