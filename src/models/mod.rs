//! # Policy and Value Networks
//!
//! The credit-assignment engine and the trainers see networks only through
//! [`PolicyModel`] and [`ValueModel`]. A forward pass over a batch returns a
//! [`RetainedGraph`] that can be driven backward many times, once per agent,
//! before it is released.
//!
//! Implementations:
//!
//! - [`Ic3Net`]: communication-gated recurrent policy with a separate value head
//! - [`IndependentQNet`]: shared per-agent action-value network for the value-based trainer

pub mod graph;
pub mod ic3net;
pub mod independent_qnet;

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, ArrayViewMutD};
use serde::{Serialize, Deserialize};

use crate::config::TrainingConfig;
use crate::error::{HermesError, Result};
use crate::gradients::Gradients;

pub use graph::ForwardGraph;
pub use ic3net::{normalization_divisor, Ic3Net, PolicyNet, ValueNet};
pub use independent_qnet::{IndependentQNet, QGraph};

/// Whether agents exchange messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommVariant {
    /// Gated message passing, at least two rounds
    Cooperative,
    /// A single round with nothing to receive yet, so no communication
    Independent,
}

/// Shape and strategy of a communicating policy network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub agent_num: usize,
    pub obs_dim: usize,
    pub hid_dim: usize,
    pub action_dim: usize,
    pub comm_iters: usize,
    pub variant: CommVariant,
    pub continuous: bool,
    pub init_std: f32,
}

impl ModelSpec {
    pub fn from_config(config: &TrainingConfig, variant: CommVariant) -> Self {
        ModelSpec {
            agent_num: config.agent_num,
            obs_dim: config.obs_size,
            hid_dim: config.hid_size,
            action_dim: config.action_dim,
            comm_iters: config.comm_iters,
            variant,
            continuous: config.continuous,
            init_std: config.init_std,
        }
    }

    /// The one check shared by both variants.
    pub fn validate(&self) -> Result<()> {
        match (self.comm_iters, self.variant) {
            (0, _) => return Err(HermesError::CommItersTooLow(0)),
            (1, CommVariant::Cooperative) => return Err(HermesError::UseIndependentVariant(1)),
            (k, CommVariant::Independent) if k > 1 => return Err(HermesError::UseCooperativeVariant(k)),
            _ => {}
        }
        for (name, value) in [
            ("agent_num", self.agent_num),
            ("obs_dim", self.obs_dim),
            ("hid_dim", self.hid_dim),
            ("action_dim", self.action_dim),
        ] {
            if value == 0 {
                return Err(HermesError::invalid_parameter(name, "must be greater than 0"));
            }
        }
        if self.continuous && !(self.init_std > 0.0) {
            return Err(HermesError::invalid_parameter("init_std", "must be positive"));
        }
        Ok(())
    }
}

/// Action-distribution parameters for a batch, `(batch, agents, act_dim)`.
#[derive(Clone, Debug)]
pub enum ActionOutput {
    /// Unnormalised categorical logits
    Discrete { logits: Array3<f32> },
    /// Gaussian means with a state-independent log standard deviation
    Continuous { means: Array3<f32>, log_std: Array1<f32> },
}

impl ActionOutput {
    /// The tensor stored as `action_out` in transitions.
    pub fn primary(&self) -> &Array3<f32> {
        match self {
            ActionOutput::Discrete { logits } => logits,
            ActionOutput::Continuous { means, .. } => means,
        }
    }
}

/// Gradient of a scalar loss with respect to an [`ActionOutput`].
#[derive(Clone, Debug)]
pub enum ActionSeed {
    Discrete { dlogits: Array3<f32> },
    Continuous { dmeans: Array3<f32>, dlog_std: Array1<f32> },
}

/// Output of one forward pass over a batch.
pub struct ForwardPass<G> {
    pub action: ActionOutput,
    /// `(batch, agents)`
    pub values: Array2<f32>,
    /// Last round's communication gate, `(agents, agents)`, only for a batch of one
    pub comm_gate: Option<Array2<f32>>,
    pub graph: G,
}

/// Saved activations of a forward pass that can be differentiated repeatedly.
///
/// `backward_*` adds into `leaves` and leaves the graph intact; `release_*`
/// does the same and then drops it, for the last caller.
pub trait RetainedGraph: Sized {
    fn backward_action(&self, seed: &ActionSeed, leaves: &mut Gradients) -> Result<()>;

    fn backward_value(&self, seed: ArrayView2<f32>, leaves: &mut Gradients) -> Result<()>;

    fn release_action(self, seed: &ActionSeed, leaves: &mut Gradients) -> Result<()> {
        self.backward_action(seed, leaves)
    }

    fn release_value(self, seed: ArrayView2<f32>, leaves: &mut Gradients) -> Result<()> {
        self.backward_value(seed, leaves)
    }
}

/// A policy network shared by all agents.
pub trait PolicyModel {
    type Graph: RetainedGraph;

    fn agent_num(&self) -> usize;

    fn action_dim(&self) -> usize;

    fn is_continuous(&self) -> bool;

    /// Policy and value forward over `(batch, agents, obs_dim)` observations,
    /// keeping the graph. `agent_mask` is `(batch, agents)`.
    fn forward(&self, obs: ArrayView3<f32>, agent_mask: ArrayView2<f32>) -> Result<ForwardPass<Self::Graph>>;

    /// Detached policy forward; returns the action output and, for a batch
    /// of one, the communication gate.
    fn policy(&self, obs: ArrayView3<f32>, agent_mask: ArrayView2<f32>) -> Result<(ActionOutput, Option<Array2<f32>>)>;

    fn action_grads(&self) -> &Gradients;

    fn action_grads_mut(&mut self) -> &mut Gradients;

    /// Action parameters together with their gradient leaves.
    fn action_group(&mut self) -> (Vec<ArrayViewMutD<'_, f32>>, &Gradients);

    /// Blend parameters from `source` into `self`.
    fn update_target_from(&mut self, source: &Self, tau: f32)
    where
        Self: Sized;
}

/// A value estimator shared by all agents.
pub trait ValueModel {
    /// Detached value estimate, `(batch, agents)`.
    fn value(&self, obs: ArrayView3<f32>) -> Result<Array2<f32>>;

    fn value_grads(&self) -> &Gradients;

    fn value_grads_mut(&mut self) -> &mut Gradients;

    /// Value parameters together with their gradient leaves.
    fn value_group(&mut self) -> (Vec<ArrayViewMutD<'_, f32>>, &Gradients);
}

/// `(batch, agents, d)` → `(batch * agents, d)`, agent index fastest.
pub(crate) fn flatten_agents(x: ArrayView3<f32>) -> Array2<f32> {
    let (b, n, d) = x.dim();
    Array2::from_shape_fn((b * n, d), |(r, k)| x[[r / n, r % n, k]])
}

/// Inverse of [`flatten_agents`].
pub(crate) fn unflatten_agents(x: ArrayView2<f32>, agents: usize) -> Array3<f32> {
    let (rows, d) = x.dim();
    let b = if agents == 0 { 0 } else { rows / agents };
    Array3::from_shape_fn((b, agents, d), |(i, j, k)| x[[i * agents + j, k]])
}

pub(crate) fn check_obs(obs: ArrayView3<f32>, agents: usize, obs_dim: usize) -> Result<()> {
    let (_, n, d) = obs.dim();
    if n != agents || d != obs_dim {
        return Err(HermesError::dimension_mismatch(
            format!("observations of shape (batch, {}, {})", agents, obs_dim),
            format!("{:?}", obs.shape()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn test_flatten_round_trip() {
        let x = Array::from_shape_fn((2, 3, 4), |(i, j, k)| (i * 100 + j * 10 + k) as f32);
        let flat = flatten_agents(x.view());
        assert_eq!(flat[[4, 2]], 112.0);
        assert_eq!(unflatten_agents(flat.view(), 3), x);
    }

    #[test]
    fn test_spec_comm_iter_errors_are_distinct() {
        let mut spec = ModelSpec::from_config(&TrainingConfig::default(), CommVariant::Cooperative);
        spec.comm_iters = 0;
        assert!(matches!(spec.validate(), Err(HermesError::CommItersTooLow(0))));
        spec.comm_iters = 1;
        assert!(matches!(spec.validate(), Err(HermesError::UseIndependentVariant(1))));
        spec.comm_iters = 2;
        assert!(spec.validate().is_ok());

        spec.variant = CommVariant::Independent;
        assert!(matches!(spec.validate(), Err(HermesError::UseCooperativeVariant(2))));
        spec.comm_iters = 1;
        assert!(spec.validate().is_ok());
    }
}
