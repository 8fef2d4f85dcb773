use ndarray::{Array3, Axis};

use crate::batch::Batch;
use crate::error::{HermesError, Result};
use crate::models::independent_qnet::max_action_value;
use crate::models::{IndependentQNet, QGraph};

/// Output of [`QLearning::get_loss`].
pub struct QLoss {
    /// `Σ (y - Q(s, a))² / B`, summed over agents
    pub value_loss: f32,
    /// Gradient of `value_loss` with respect to the action values
    pub seed: Array3<f32>,
    pub graph: QGraph,
}

/// One-step Q-learning: `y = r + γ·(1 - done)·max_a Q'(s', a)`.
///
/// `Q'` is the target network when one is given, else the behaviour network.
/// Only true termination stops the bootstrap; a step-limit cut still bootstraps.
#[derive(Clone, Debug)]
pub struct QLearning {
    pub gamma: f32,
}

impl QLearning {
    pub fn new(gamma: f32) -> Self {
        QLearning { gamma }
    }

    pub fn get_loss(&self, batch: &Batch, behaviour: &IndependentQNet, target: Option<&IndependentQNet>) -> Result<QLoss> {
        let (q, graph) = behaviour.forward(batch.state.view())?;
        if q.shape() != batch.action.shape() {
            return Err(HermesError::dimension_mismatch(
                format!("actions of shape {:?}", q.shape()),
                format!("{:?}", batch.action.shape()),
            ));
        }
        let next_q = target.unwrap_or(behaviour).q_values(batch.next_state.view())?;
        let next_max = max_action_value(&next_q);

        let q_taken = (&q * &batch.action).sum_axis(Axis(2));
        let mut deltas = q_taken.clone();
        for (t, mut row) in deltas.axis_iter_mut(Axis(0)).enumerate() {
            let not_done = if batch.done[t] { 0.0 } else { 1.0 };
            for (i, d) in row.iter_mut().enumerate() {
                let y = batch.reward[[t, i]] + self.gamma * not_done * next_max[[t, i]];
                *d = y - q_taken[[t, i]];
            }
        }

        deltas *= &batch.agent_mask;

        let b = batch.len() as f32;
        let value_loss = deltas.iter().map(|d| d * d).sum::<f32>() / b;
        let scale = deltas.mapv(|d| -2.0 * d / b).insert_axis(Axis(2));
        let seed = &batch.action * &scale;
        Ok(QLoss {
            value_loss,
            seed,
            graph,
        })
    }
}
