//! Gradient leaves for a parameter group.
//!
//! A [`Gradients`] value plays the role of the `.grad` slots attached to the
//! tensors of one parameter group: backward passes add into it, optimizers
//! zero it and read it, and the trainer copies it out as a snapshot.

use ndarray::{ArrayD, ArrayViewD, Zip};
use serde::{Serialize, Deserialize};

use crate::error::{HermesError, Result};

/// One gradient tensor per parameter, in `Parameterized` order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gradients {
    leaves: Vec<ArrayD<f32>>,
}

impl Gradients {
    /// Zero gradients shaped like `params`.
    pub fn zeros_like(params: &[ArrayViewD<'_, f32>]) -> Self {
        Gradients {
            leaves: params.iter().map(|p| ArrayD::zeros(p.raw_dim())).collect(),
        }
    }

    pub fn from_leaves(leaves: Vec<ArrayD<f32>>) -> Self {
        Gradients { leaves }
    }

    pub fn leaves(&self) -> &[ArrayD<f32>] {
        &self.leaves
    }

    pub fn leaves_mut(&mut self) -> &mut [ArrayD<f32>] {
        &mut self.leaves
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Reset every leaf to zero, keeping shapes.
    pub fn zero(&mut self) {
        for leaf in &mut self.leaves {
            leaf.fill(0.0);
        }
    }

    /// Add `other` leaf by leaf. Shapes must agree exactly.
    pub fn accumulate(&mut self, other: &Gradients) -> Result<()> {
        if self.leaves.len() != other.leaves.len() {
            return Err(HermesError::dimension_mismatch(
                format!("{} gradient leaves", self.leaves.len()),
                format!("{} gradient leaves", other.leaves.len()),
            ));
        }
        for (i, (dst, src)) in self.leaves.iter_mut().zip(&other.leaves).enumerate() {
            if dst.shape() != src.shape() {
                return Err(HermesError::dimension_mismatch(
                    format!("leaf {} shape {:?}", i, dst.shape()),
                    format!("{:?}", src.shape()),
                ));
            }
            Zip::from(dst).and(src).for_each(|d, &s| *d += s);
        }
        Ok(())
    }

    /// Overwrite with `other`, keeping this allocation when shapes match.
    pub fn assign(&mut self, other: &Gradients) -> Result<()> {
        self.zero();
        self.accumulate(other)
    }

    /// Clamp every element into `[min, max]`.
    pub fn clamp(&mut self, min: f32, max: f32) {
        for leaf in &mut self.leaves {
            leaf.mapv_inplace(|g| g.max(min).min(max));
        }
    }

    /// Global L2 norm across all leaves.
    pub fn norm(&self) -> f32 {
        self.leaves
            .iter()
            .map(|g| g.iter().map(|&x| x * x).sum::<f32>())
            .sum::<f32>()
            .sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_accumulate_and_norm() {
        let w = Array2::<f32>::zeros((2, 2));
        let mut grads = Gradients::zeros_like(&[w.view().into_dyn()]);
        let other = Gradients::from_leaves(vec![array![[3.0, 0.0], [0.0, 4.0]].into_dyn()]);
        grads.accumulate(&other).unwrap();
        assert!((grads.norm() - 5.0).abs() < 1e-6);

        grads.clamp(-1.0, 1.0);
        assert_eq!(grads.leaves()[0], array![[1.0, 0.0], [0.0, 1.0]].into_dyn());

        grads.zero();
        assert_eq!(grads.norm(), 0.0);
    }

    #[test]
    fn test_accumulate_rejects_shape_mismatch() {
        let mut a = Gradients::from_leaves(vec![ArrayD::zeros(vec![2])]);
        let b = Gradients::from_leaves(vec![ArrayD::zeros(vec![3])]);
        assert!(matches!(a.accumulate(&b), Err(HermesError::DimensionMismatch { .. })));
    }
}
