use ndarray::{Array2, Array3, ArrayView3, ArrayViewD, ArrayViewMutD, Axis};
use serde::{Serialize, Deserialize};
use std::path::Path;

use crate::activations::Activation;
use crate::config::TrainingConfig;
use crate::error::{HermesError, Result};
use crate::gradients::Gradients;
use crate::layers::{Linear, LinearCache, Parameterized};

use super::{check_obs, flatten_agents, unflatten_agents};

/// Action-value network shared by all agents, no communication.
///
/// `obs → linear → relu → linear → Q(obs, ·)` applied to every agent row.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct IndependentQNet {
    agent_num: usize,
    obs_dim: usize,
    action_dim: usize,
    body: Linear,
    head: Linear,
    value_grads: Gradients,
}

/// Saved activations of [`IndependentQNet::forward`].
pub struct QGraph {
    body: Linear,
    head: Linear,
    agents: usize,
    rows: usize,
    body_cache: LinearCache,
    head_cache: LinearCache,
}

impl IndependentQNet {
    pub fn new(agent_num: usize, obs_dim: usize, hid_dim: usize, action_dim: usize) -> Result<Self> {
        for (name, value) in [
            ("agent_num", agent_num),
            ("obs_dim", obs_dim),
            ("hid_dim", hid_dim),
            ("action_dim", action_dim),
        ] {
            if value == 0 {
                return Err(HermesError::invalid_parameter(name, "must be greater than 0"));
            }
        }
        let body = Linear::new(obs_dim, hid_dim, Activation::Relu);
        let head = Linear::new(hid_dim, action_dim, Activation::Linear);
        let mut net = IndependentQNet {
            agent_num,
            obs_dim,
            action_dim,
            body,
            head,
            value_grads: Gradients::from_leaves(Vec::new()),
        };
        net.value_grads = Gradients::zeros_like(&net.parameters());
        Ok(net)
    }

    pub fn from_config(config: &TrainingConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.agent_num, config.obs_size, config.hid_size, config.action_dim)
    }

    pub fn agent_num(&self) -> usize {
        self.agent_num
    }

    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    /// Detached action values, `(batch, agents, action_dim)`.
    pub fn q_values(&self, obs: ArrayView3<f32>) -> Result<Array3<f32>> {
        check_obs(obs, self.agent_num, self.obs_dim)?;
        let x = flatten_agents(obs);
        let q = self.head.infer(self.body.infer(x.view()).view());
        Ok(unflatten_agents(q.view(), self.agent_num))
    }

    pub fn forward(&self, obs: ArrayView3<f32>) -> Result<(Array3<f32>, QGraph)> {
        check_obs(obs, self.agent_num, self.obs_dim)?;
        let x = flatten_agents(obs);
        let (hidden, body_cache) = self.body.forward(x.view());
        let (q, head_cache) = self.head.forward(hidden.view());
        let graph = QGraph {
            body: self.body.clone(),
            head: self.head.clone(),
            agents: self.agent_num,
            rows: x.nrows(),
            body_cache,
            head_cache,
        };
        Ok((unflatten_agents(q.view(), self.agent_num), graph))
    }

    pub fn value_grads(&self) -> &Gradients {
        &self.value_grads
    }

    pub fn value_grads_mut(&mut self) -> &mut Gradients {
        &mut self.value_grads
    }

    pub fn value_group(&mut self) -> (Vec<ArrayViewMutD<'_, f32>>, &Gradients) {
        let mut params = self.body.parameters_mut();
        params.extend(self.head.parameters_mut());
        (params, &self.value_grads)
    }

    pub fn update_target_from(&mut self, source: &Self, tau: f32) {
        self.soft_update_from(source, tau);
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serialized = bincode::serialize(self)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        let mut net: Self = bincode::deserialize(&data)?;
        net.value_grads.zero();
        Ok(net)
    }
}

impl Parameterized for IndependentQNet {
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut params = self.body.parameters();
        params.extend(self.head.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        self.value_group().0
    }
}

impl QGraph {
    /// Add the gradient of `Σ dq · Q` into `leaves`. `dq` is `(batch, agents, action_dim)`.
    pub fn backward(self, dq: ArrayView3<f32>, leaves: &mut Gradients) -> Result<()> {
        let batch = self.rows / self.agents;
        if dq.shape() != [batch, self.agents, self.head.output_size()] {
            return Err(HermesError::dimension_mismatch(
                format!("q seed of shape ({}, {}, {})", batch, self.agents, self.head.output_size()),
                format!("{:?}", dq.shape()),
            ));
        }
        let head = self.head.backward(&self.head_cache, flatten_agents(dq).view());
        let body = self.body.backward(&self.body_cache, head.input_errors.view());
        let mut grads = body.into_leaves();
        grads.extend(head.into_leaves());
        leaves.accumulate(&Gradients::from_leaves(grads))
    }
}

/// Max over the action axis, `(batch, agents)`.
pub fn max_action_value(q: &Array3<f32>) -> Array2<f32> {
    q.map_axis(Axis(2), |row| row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b)))
}
