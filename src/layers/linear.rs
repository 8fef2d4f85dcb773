use ndarray::{Array1, Array2, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use serde::{Serialize, Deserialize};
use crate::activations::Activation;
use super::traits::Parameterized;

/// A fully connected layer: `activation(inputs · W + b)`.
///
/// Unlike a stateful layer, `forward` does not keep its inputs around; it
/// hands back a [`LinearCache`] that the caller stores in its own graph.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Linear {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
    pub activation: Activation,
}

/// Saved activations of one `Linear::forward` call.
#[derive(Clone, Debug)]
pub struct LinearCache {
    inputs: Array2<f32>,
    pre_activation: Array2<f32>,
}

/// Gradients produced by `Linear::backward`.
#[derive(Clone, Debug)]
pub struct LinearGrads {
    /// Gradient with respect to the layer inputs
    pub input_errors: Array2<f32>,
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
}

impl Linear {
    /// Create a new layer. Weights are drawn from `U(-1/sqrt(in), 1/sqrt(in))`,
    /// biases start at zero.
    pub fn new(input_size: usize, output_size: usize, activation: Activation) -> Self {
        let bound = 1.0 / (input_size.max(1) as f32).sqrt();
        let weights = Array2::random((input_size, output_size), Uniform::new(-bound, bound));
        let biases = Array1::zeros(output_size);
        Linear {
            weights,
            biases,
            activation,
        }
    }

    pub fn with_weights(mut self, weights: Array2<f32>) -> Self {
        assert_eq!(weights.dim(), self.weights.dim());
        self.weights = weights;
        self
    }

    pub fn with_biases(mut self, biases: Array1<f32>) -> Self {
        assert_eq!(biases.dim(), self.biases.dim());
        self.biases = biases;
        self
    }

    pub fn input_size(&self) -> usize {
        self.weights.shape()[0]
    }

    pub fn output_size(&self) -> usize {
        self.weights.shape()[1]
    }

    /// Forward pass without keeping anything for backward.
    pub fn infer(&self, inputs: ArrayView2<f32>) -> Array2<f32> {
        let mut outputs = inputs.dot(&self.weights) + &self.biases.view().insert_axis(Axis(0));
        self.activation.apply_batch(&mut outputs);
        outputs
    }

    /// Forward pass for a batch, returning the outputs and the cache needed by `backward`.
    pub fn forward(&self, inputs: ArrayView2<f32>) -> (Array2<f32>, LinearCache) {
        let pre_activation = inputs.dot(&self.weights) + &self.biases.view().insert_axis(Axis(0));
        let mut outputs = pre_activation.clone();
        self.activation.apply_batch(&mut outputs);
        let cache = LinearCache {
            inputs: inputs.to_owned(),
            pre_activation,
        };
        (outputs, cache)
    }

    /// Backward pass for a batch of output errors.
    pub fn backward(&self, cache: &LinearCache, output_errors: ArrayView2<f32>) -> LinearGrads {
        let activation_deriv = self.activation.derivative_batch(cache.pre_activation.view());
        let adjusted_error = &output_errors * &activation_deriv;
        let weights = cache.inputs.t().dot(&adjusted_error);
        let biases = adjusted_error.sum_axis(Axis(0));
        let input_errors = adjusted_error.dot(&self.weights.t());
        LinearGrads {
            input_errors,
            weights,
            biases,
        }
    }
}

impl Parameterized for Linear {
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.weights.view().into_dyn(), self.biases.view().into_dyn()]
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![self.weights.view_mut().into_dyn(), self.biases.view_mut().into_dyn()]
    }
}

impl LinearGrads {
    /// Gradient leaves in `Parameterized` order.
    pub fn into_leaves(self) -> Vec<ndarray::ArrayD<f32>> {
        vec![self.weights.into_dyn(), self.biases.into_dyn()]
    }
}
