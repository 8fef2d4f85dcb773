//! Column-wise view of a set of transitions.
//!
//! Rows keep the order of the input slice, which the return computations
//! rely on: a batch drawn from an episode buffer or a rollout is ordered by
//! time and every episode ends on a `last_step` row.

use ndarray::{s, Array1, Array2, Array3};

use crate::error::{HermesError, Result};
use crate::replay_buffer::Transition;

#[derive(Clone, Debug)]
pub struct Batch {
    /// `(batch, agents, obs_dim)`
    pub state: Array3<f32>,
    /// `(batch, agents, act_dim)`
    pub action: Array3<f32>,
    /// `(batch, agents)`
    pub reward: Array2<f32>,
    /// `(batch, agents, obs_dim)`
    pub next_state: Array3<f32>,
    /// `(batch, agents)`
    pub agent_mask: Array2<f32>,
    pub start_step: Array1<bool>,
    pub last_step: Array1<bool>,
    pub done: Array1<bool>,
}

impl Batch {
    /// Stack `transitions` field by field.
    ///
    /// Every transition must agree on agent count, observation size and
    /// action size with the first one.
    pub fn from_transitions(transitions: &[&Transition]) -> Result<Batch> {
        let first = transitions
            .first()
            .ok_or_else(|| HermesError::EmptyBuffer("cannot build a batch from no transitions".to_string()))?;
        let (n, obs_dim) = first.state.dim();
        let act_dim = first.action.ncols();
        let size = transitions.len();

        let mut batch = Batch {
            state: Array3::zeros((size, n, obs_dim)),
            action: Array3::zeros((size, n, act_dim)),
            reward: Array2::zeros((size, n)),
            next_state: Array3::zeros((size, n, obs_dim)),
            agent_mask: Array2::zeros((size, n)),
            start_step: Array1::from_elem(size, false),
            last_step: Array1::from_elem(size, false),
            done: Array1::from_elem(size, false),
        };

        for (row, trans) in transitions.iter().enumerate() {
            check_dim("state", (n, obs_dim), trans.state.dim(), row)?;
            check_dim("next_state", (n, obs_dim), trans.next_state.dim(), row)?;
            check_dim("action", (n, act_dim), trans.action.dim(), row)?;
            check_len("reward", n, trans.reward.len(), row)?;
            check_len("agent_mask", n, trans.agent_mask.len(), row)?;

            batch.state.slice_mut(s![row, .., ..]).assign(&trans.state);
            batch.action.slice_mut(s![row, .., ..]).assign(&trans.action);
            batch.next_state.slice_mut(s![row, .., ..]).assign(&trans.next_state);
            batch.reward.row_mut(row).assign(&trans.reward);
            batch.agent_mask.row_mut(row).assign(&trans.agent_mask);
            batch.start_step[row] = trans.start_step;
            batch.last_step[row] = trans.last_step;
            batch.done[row] = trans.done;
        }
        Ok(batch)
    }

    /// Convenience for owned rollouts.
    pub fn from_owned(transitions: &[Transition]) -> Result<Batch> {
        let refs: Vec<&Transition> = transitions.iter().collect();
        Batch::from_transitions(&refs)
    }

    pub fn len(&self) -> usize {
        self.state.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn agent_num(&self) -> usize {
        self.state.shape()[1]
    }
}

fn check_dim(field: &str, expected: (usize, usize), actual: (usize, usize), row: usize) -> Result<()> {
    if expected != actual {
        return Err(HermesError::dimension_mismatch(
            format!("{} of shape {:?}", field, expected),
            format!("{:?} at row {}", actual, row),
        ));
    }
    Ok(())
}

fn check_len(field: &str, expected: usize, actual: usize, row: usize) -> Result<()> {
    if expected != actual {
        return Err(HermesError::dimension_mismatch(
            format!("{} of length {}", field, expected),
            format!("{} at row {}", actual, row),
        ));
    }
    Ok(())
}
