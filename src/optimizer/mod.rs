pub mod gradient_clipper;

use ndarray::{ArrayD, ArrayViewMutD, Zip};
use serde::{Serialize, Deserialize};

use crate::error::{HermesError, Result};
use crate::gradients::Gradients;

pub use gradient_clipper::GradientClipper;

/// An optimizer bound to one parameter group.
///
/// Parameters are passed in on every step rather than owned, so several
/// optimizers can take turns stepping the same shared tensors.
pub trait Optimizer {
    /// Apply one update to `params` using `grads` (same order, same shapes).
    fn step(&mut self, params: Vec<ArrayViewMutD<'_, f32>>, grads: &Gradients) -> Result<()>;

    /// Clear the gradient leaves this optimizer reads from.
    fn zero_grad(&self, grads: &mut Gradients) {
        grads.zero();
    }

    fn learning_rate(&self) -> f32;
}

fn check_group(params: &[ArrayViewMutD<'_, f32>], grads: &Gradients) -> Result<()> {
    if params.len() != grads.len() {
        return Err(HermesError::dimension_mismatch(
            format!("{} gradient leaves", params.len()),
            format!("{}", grads.len()),
        ));
    }
    for (i, (p, g)) in params.iter().zip(grads.leaves()).enumerate() {
        if p.shape() != g.shape() {
            return Err(HermesError::dimension_mismatch(
                format!("parameter {} shape {:?}", i, p.shape()),
                format!("{:?}", g.shape()),
            ));
        }
    }
    Ok(())
}

/// Adam with bias correction. Moment buffers are created on the first step
/// and are private to this optimizer even when its parameters are shared.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Adam {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    m: Vec<ArrayD<f32>>,
    v: Vec<ArrayD<f32>>,
    pub t: usize,
}

impl Adam {
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }

    pub fn default(learning_rate: f32) -> Self {
        Self::new(learning_rate, 0.9, 0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: Vec<ArrayViewMutD<'_, f32>>, grads: &Gradients) -> Result<()> {
        check_group(&params, grads)?;
        if self.m.is_empty() {
            self.m = grads.leaves().iter().map(|g| ArrayD::zeros(g.raw_dim())).collect();
            self.v = self.m.clone();
        }
        self.t += 1;

        let (beta1, beta2, eps, lr) = (self.beta1, self.beta2, self.epsilon, self.learning_rate);
        let bias1 = 1.0 - beta1.powi(self.t as i32);
        let bias2 = 1.0 - beta2.powi(self.t as i32);

        for (((mut p, g), m), v) in params
            .into_iter()
            .zip(grads.leaves())
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            Zip::from(&mut p)
                .and(g)
                .and(m)
                .and(v)
                .par_for_each(|w, &g, m, v| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    let m_hat = *m / bias1;
                    let v_hat = *v / bias2;
                    *w -= lr * m_hat / (v_hat.sqrt() + eps);
                });
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}
