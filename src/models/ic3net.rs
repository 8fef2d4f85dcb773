//! Communication-gated recurrent policy (IC3Net).
//!
//! Every agent encodes its observation, then for `comm_iters` rounds each
//! agent decides through a hard binary gate whether to send its hidden state
//! to each peer. Incoming messages from live peers are averaged, added to
//! the agent's own encoding and fed through one LSTM cell shared by all
//! agents. A linear head turns the final hidden state into action logits.
//!
//! The value path is a separate two-layer MLP on the raw observation.

use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, ArrayViewD, ArrayViewMutD, Axis};
use serde::{Serialize, Deserialize};
use std::path::Path;
use tracing::debug;

use crate::activations::{sigmoid, Activation};
use crate::config::TrainingConfig;
use crate::error::{HermesError, Result};
use crate::gradients::Gradients;
use crate::layers::{Linear, LinearCache, LstmCell, LstmStepCache, Parameterized};

use super::graph::{CommRound, ForwardGraph};
use super::{
    check_obs, flatten_agents, unflatten_agents, ActionOutput, CommVariant, ForwardPass, ModelSpec,
    PolicyModel, ValueModel,
};

/// Trainable tensors of the policy path.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PolicyNet {
    pub encoder: Linear,
    pub f_module: LstmCell,
    /// Gate logits, one per peer; shared by every round
    pub g_module: Linear,
    pub action_head: Linear,
    /// Present only for continuous actions
    pub log_std: Option<Array1<f32>>,
}

/// Trainable tensors of the value path.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ValueNet {
    pub value_body: Linear,
    pub value_head: Linear,
}

impl Parameterized for PolicyNet {
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut params = self.encoder.parameters();
        params.extend(self.f_module.parameters());
        params.extend(self.g_module.parameters());
        params.extend(self.action_head.parameters());
        if let Some(log_std) = &self.log_std {
            params.push(log_std.view().into_dyn());
        }
        params
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut params = self.encoder.parameters_mut();
        params.extend(self.f_module.parameters_mut());
        params.extend(self.g_module.parameters_mut());
        params.extend(self.action_head.parameters_mut());
        if let Some(log_std) = &mut self.log_std {
            params.push(log_std.view_mut().into_dyn());
        }
        params
    }
}

impl Parameterized for ValueNet {
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut params = self.value_body.parameters();
        params.extend(self.value_head.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut params = self.value_body.parameters_mut();
        params.extend(self.value_head.parameters_mut());
        params
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Ic3Net {
    spec: ModelSpec,
    comm_mask: Array2<f32>,
    policy_net: PolicyNet,
    value_net: ValueNet,
    action_grads: Gradients,
    value_grads: Gradients,
}

/// Divisor of the message average for `num_alive` live agents.
///
/// `None` when at most one agent is alive: there is nobody to average over
/// and the messages are left as they are.
pub fn normalization_divisor(num_alive: usize) -> Option<f32> {
    if num_alive > 1 {
        Some((num_alive - 1) as f32)
    } else {
        None
    }
}

/// Rounds a gate probability to `{0, 1}` with ties going to the closed gate,
/// matching round-half-to-even on `[0, 1]`.
pub fn hard_gate(p: f32) -> f32 {
    if p > 0.5 {
        1.0
    } else {
        0.0
    }
}

/// Intermediate results of the policy path.
pub(crate) struct PolicyTrace {
    pub logits: Array2<f32>,
    pub encoder_cache: LinearCache,
    pub rounds: Vec<CommRound>,
    pub head_cache: LinearCache,
    pub last_gate: Array3<f32>,
}

impl Ic3Net {
    /// Build a network. Fails if `spec` is not valid for its variant.
    pub fn new(spec: ModelSpec) -> Result<Self> {
        spec.validate()?;
        debug!(
            agents = spec.agent_num,
            comm_iters = spec.comm_iters,
            variant = ?spec.variant,
            "constructing ic3net"
        );

        let hid = spec.hid_dim;
        let policy_net = PolicyNet {
            encoder: Linear::new(spec.obs_dim, hid, Activation::Relu),
            f_module: LstmCell::new(hid, hid),
            g_module: Linear::new(hid, spec.agent_num, Activation::Linear),
            action_head: Linear::new(hid, spec.action_dim, Activation::Linear),
            log_std: spec
                .continuous
                .then(|| Array1::from_elem(spec.action_dim, spec.init_std.ln())),
        };
        let value_net = ValueNet {
            value_body: Linear::new(spec.obs_dim, hid, Activation::Relu),
            value_head: Linear::new(hid, 1, Activation::Linear),
        };
        let action_grads = Gradients::zeros_like(&policy_net.parameters());
        let value_grads = Gradients::zeros_like(&value_net.parameters());

        Ok(Ic3Net {
            comm_mask: comm_mask(spec.agent_num),
            spec,
            policy_net,
            value_net,
            action_grads,
            value_grads,
        })
    }

    pub fn from_config(config: &TrainingConfig, variant: CommVariant) -> Result<Self> {
        config.validate()?;
        Self::new(ModelSpec::from_config(config, variant))
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// `ones - identity`: an agent never messages itself.
    pub fn comm_mask(&self) -> &Array2<f32> {
        &self.comm_mask
    }

    pub fn policy_net(&self) -> &PolicyNet {
        &self.policy_net
    }

    pub fn policy_net_mut(&mut self) -> &mut PolicyNet {
        &mut self.policy_net
    }

    pub fn value_net(&self) -> &ValueNet {
        &self.value_net
    }

    pub fn value_net_mut(&mut self) -> &mut ValueNet {
        &mut self.value_net
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serialized = bincode::serialize(self)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        let mut net: Self = bincode::deserialize(&data)?;
        net.spec.validate()?;
        net.action_grads.zero();
        net.value_grads.zero();
        Ok(net)
    }

    fn check_mask(&self, agent_mask: ArrayView2<f32>, batch: usize) -> Result<()> {
        if agent_mask.dim() != (batch, self.spec.agent_num) {
            return Err(HermesError::dimension_mismatch(
                format!("agent mask of shape ({}, {})", batch, self.spec.agent_num),
                format!("{:?}", agent_mask.shape()),
            ));
        }
        Ok(())
    }

    /// Hard gate `round(sigmoid(g(h))) · comm_mask`, `(batch, agents, peers)`.
    fn gate(&self, h: ArrayView2<f32>, batch: usize) -> Array3<f32> {
        let n = self.spec.agent_num;
        let logits = self.policy_net.g_module.infer(h);
        Array3::from_shape_fn((batch, n, n), |(b, i, j)| {
            hard_gate(sigmoid(logits[[b * n + i, j]])) * self.comm_mask[[i, j]]
        })
    }

    pub(crate) fn run_policy(&self, obs: ArrayView3<f32>, agent_mask: ArrayView2<f32>) -> Result<PolicyTrace> {
        check_obs(obs, self.spec.agent_num, self.spec.obs_dim)?;
        let batch = obs.shape()[0];
        self.check_mask(agent_mask, batch)?;
        let n = self.spec.agent_num;

        let x = flatten_agents(obs);
        let (e, encoder_cache) = self.policy_net.encoder.forward(x.view());
        let (mut h, mut c) = self.policy_net.f_module.zero_state(batch * n);

        let divisors: Vec<f32> = agent_mask
            .rows()
            .into_iter()
            .map(|alive| {
                let num_alive = alive.iter().filter(|&&a| a > 0.0).count();
                normalization_divisor(num_alive).unwrap_or(1.0)
            })
            .collect();

        let mut rounds = Vec::with_capacity(self.spec.comm_iters);
        let mut last_gate = Array3::zeros((batch, n, n));
        for _ in 0..self.spec.comm_iters {
            let gate = self.gate(h.view(), batch);
            let weights = Array3::from_shape_fn((batch, n, n), |(b, i, j)| {
                gate[[b, i, j]] * agent_mask[[b, i]] * agent_mask[[b, j]] / divisors[b]
            });
            let input = &e + &communicate(&weights, h.view());
            let (h_next, c_next, lstm) = self.policy_net.f_module.step(input.view(), h.view(), c.view());
            rounds.push(CommRound { weights, lstm });
            h = h_next;
            c = c_next;
            last_gate = gate;
        }

        let (logits, head_cache) = self.policy_net.action_head.forward(h.view());
        Ok(PolicyTrace {
            logits,
            encoder_cache,
            rounds,
            head_cache,
            last_gate,
        })
    }

    fn action_output(&self, logits: ArrayView2<f32>) -> ActionOutput {
        let out = unflatten_agents(logits, self.spec.agent_num);
        match &self.policy_net.log_std {
            Some(log_std) => ActionOutput::Continuous {
                means: out,
                log_std: log_std.clone(),
            },
            None => ActionOutput::Discrete { logits: out },
        }
    }

    fn exposed_gate(trace: &PolicyTrace) -> Option<Array2<f32>> {
        (trace.last_gate.shape()[0] == 1).then(|| trace.last_gate.index_axis(Axis(0), 0).to_owned())
    }
}

/// `comm[b, j] = Σ_i w[b, i, j] · h[b, i]` on flattened rows.
pub(crate) fn communicate(weights: &Array3<f32>, h: ArrayView2<f32>) -> Array2<f32> {
    let (batch, n, _) = weights.dim();
    let mut comm = Array2::zeros(h.raw_dim());
    for b in 0..batch {
        let w = weights.index_axis(Axis(0), b);
        let sent = w.t().dot(&h.slice(s![b * n..(b + 1) * n, ..]));
        comm.slice_mut(s![b * n..(b + 1) * n, ..]).assign(&sent);
    }
    comm
}

fn comm_mask(n: usize) -> Array2<f32> {
    Array2::ones((n, n)) - Array2::<f32>::eye(n)
}

impl PolicyModel for Ic3Net {
    type Graph = ForwardGraph;

    fn agent_num(&self) -> usize {
        self.spec.agent_num
    }

    fn action_dim(&self) -> usize {
        self.spec.action_dim
    }

    fn is_continuous(&self) -> bool {
        self.spec.continuous
    }

    fn forward(&self, obs: ArrayView3<f32>, agent_mask: ArrayView2<f32>) -> Result<ForwardPass<ForwardGraph>> {
        let trace = self.run_policy(obs, agent_mask)?;
        let action = self.action_output(trace.logits.view());
        let comm_gate = Self::exposed_gate(&trace);

        let x = flatten_agents(obs);
        let (hidden, value_body_cache) = self.value_net.value_body.forward(x.view());
        let (v, value_head_cache) = self.value_net.value_head.forward(hidden.view());
        let values = unflatten_agents(v.view(), self.spec.agent_num).index_axis_move(Axis(2), 0);

        let graph = ForwardGraph::new(
            self.policy_net.clone(),
            self.value_net.clone(),
            self.spec.agent_num,
            trace,
            value_body_cache,
            value_head_cache,
        );
        Ok(ForwardPass {
            action,
            values,
            comm_gate,
            graph,
        })
    }

    fn policy(&self, obs: ArrayView3<f32>, agent_mask: ArrayView2<f32>) -> Result<(ActionOutput, Option<Array2<f32>>)> {
        let trace = self.run_policy(obs, agent_mask)?;
        Ok((self.action_output(trace.logits.view()), Self::exposed_gate(&trace)))
    }

    fn action_grads(&self) -> &Gradients {
        &self.action_grads
    }

    fn action_grads_mut(&mut self) -> &mut Gradients {
        &mut self.action_grads
    }

    fn action_group(&mut self) -> (Vec<ArrayViewMutD<'_, f32>>, &Gradients) {
        (self.policy_net.parameters_mut(), &self.action_grads)
    }

    fn update_target_from(&mut self, source: &Self, tau: f32) {
        self.policy_net.soft_update_from(&source.policy_net, tau);
        self.value_net.soft_update_from(&source.value_net, tau);
    }
}

impl ValueModel for Ic3Net {
    fn value(&self, obs: ArrayView3<f32>) -> Result<Array2<f32>> {
        check_obs(obs, self.spec.agent_num, self.spec.obs_dim)?;
        let x = flatten_agents(obs);
        let hidden = self.value_net.value_body.infer(x.view());
        let v = self.value_net.value_head.infer(hidden.view());
        Ok(unflatten_agents(v.view(), self.spec.agent_num).index_axis_move(Axis(2), 0))
    }

    fn value_grads(&self) -> &Gradients {
        &self.value_grads
    }

    fn value_grads_mut(&mut self) -> &mut Gradients {
        &mut self.value_grads
    }

    fn value_group(&mut self) -> (Vec<ArrayViewMutD<'_, f32>>, &Gradients) {
        (self.value_net.parameters_mut(), &self.value_grads)
    }
}
