use ndarray::{ArrayViewD, ArrayViewMutD, Zip};

/// Anything that owns trainable tensors.
///
/// `parameters` and `parameters_mut` must list the tensors in the same
/// order every call; gradient leaves produced by backward passes follow
/// that order so optimizers can zip them together.
pub trait Parameterized {
    /// Immutable views of every trainable tensor
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>>;

    /// Mutable views of every trainable tensor, same order as [`Parameterized::parameters`]
    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>>;

    /// Total number of scalar parameters
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.len()).sum()
    }

    /// `θ ← (1 - tau)·θ + tau·θ_source`. `tau = 1` copies `source`.
    fn soft_update_from(&mut self, source: &Self, tau: f32)
    where
        Self: Sized,
    {
        let source = source.parameters();
        for (mut dst, src) in self.parameters_mut().into_iter().zip(source) {
            Zip::from(&mut dst)
                .and(&src)
                .for_each(|d, &s| *d = (1.0 - tau) * *d + tau * s);
        }
    }
}
