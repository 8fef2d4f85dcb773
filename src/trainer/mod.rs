//! # Trainers
//!
//! - [`PgTrainer`]: policy-gradient training with one action optimizer and
//!   one value optimizer per agent over shared parameters
//! - [`QTrainer`]: online value-based training with a single optimizer
//!
//! Both own the environment loop, the replay buffer and every optimizer.

pub mod pg_trainer;
pub mod q_trainer;

use ndarray::{Array2, ArrayView2, Axis};
use rand::Rng;

use crate::distributions::{argmax, one_hot, sample_categorical, sample_gaussian, softmax};
use crate::models::ActionOutput;

pub use pg_trainer::PgTrainer;
pub use q_trainer::QTrainer;

/// Sampling during training, greedy choice during evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionMode {
    Train,
    Eval,
}

/// Pick one action per agent from the output of a single-observation pass.
///
/// Returns `(action, raw_action)`, both `(agents, act_dim)`: the encoding the
/// losses score (one-hot or the sampled value) and what the environment
/// receives (one-hot, or the sample clipped to `[-1, 1]`).
pub fn select_action<R: Rng + ?Sized>(output: &ActionOutput, mode: ActionMode, rng: &mut R) -> (Array2<f32>, Array2<f32>) {
    match output {
        ActionOutput::Discrete { logits } => {
            let logits = logits.index_axis(Axis(0), 0);
            let probs = softmax(logits);
            let act_dim = probs.ncols();
            let mut action = Array2::zeros(probs.raw_dim());
            for (mut row, p) in action.axis_iter_mut(Axis(0)).zip(probs.rows()) {
                let choice = match mode {
                    ActionMode::Train => sample_categorical(p, rng),
                    ActionMode::Eval => argmax(p),
                };
                row.assign(&one_hot(choice, act_dim));
            }
            (action.clone(), action)
        }
        ActionOutput::Continuous { means, log_std } => {
            let means = means.index_axis(Axis(0), 0);
            let action = match mode {
                ActionMode::Train => sample_gaussian(means, log_std.view(), rng),
                ActionMode::Eval => means.to_owned(),
            };
            let raw = action.mapv(|a| a.max(-1.0).min(1.0));
            (action, raw)
        }
    }
}

/// One-hot epsilon-greedy choice per agent over `(agents, act_dim)` action values.
pub fn epsilon_greedy<R: Rng + ?Sized>(q: ArrayView2<f32>, epsilon: f32, rng: &mut R) -> Array2<f32> {
    let act_dim = q.ncols();
    let mut action = Array2::zeros(q.raw_dim());
    for (mut row, values) in action.axis_iter_mut(Axis(0)).zip(q.rows()) {
        let choice = if rng.gen::<f32>() < epsilon {
            rng.gen_range(0..act_dim)
        } else {
            argmax(values)
        };
        row.assign(&one_hot(choice, act_dim));
    }
    action
}
