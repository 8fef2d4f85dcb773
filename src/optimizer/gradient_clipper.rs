use serde::{Serialize, Deserialize};

use crate::gradients::Gradients;

/// Gradient clipping methods
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GradientClipper {
    /// Clamp every element into `[min, max]`
    ClipByValue { min: f32, max: f32 },

    /// No clipping
    None,
}

impl GradientClipper {
    /// Element-wise clamp to `[-1, 1]`, the policy-gradient trainer's clip.
    pub fn unit_value() -> Self {
        GradientClipper::ClipByValue { min: -1.0, max: 1.0 }
    }

    /// Clip `grads` in place.
    pub fn clip(&self, grads: &mut Gradients) {
        match self {
            GradientClipper::ClipByValue { min, max } => grads.clamp(*min, *max),
            GradientClipper::None => {}
        }
    }
}
