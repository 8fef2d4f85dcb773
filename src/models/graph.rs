use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};

use crate::error::{HermesError, Result};
use crate::gradients::Gradients;
use crate::layers::{LinearCache, LinearGrads, LstmGrads, LstmStepCache, LstmStepGrads};

use super::ic3net::{PolicyNet, PolicyTrace, ValueNet};
use super::{flatten_agents, ActionSeed, RetainedGraph};

/// One communication round as seen by backward.
#[derive(Clone, Debug)]
pub(crate) struct CommRound {
    /// Effective message weights `gate · alive_i · alive_j / divisor`, `(batch, agents, agents)`
    pub weights: Array3<f32>,
    pub lstm: LstmStepCache,
}

/// Saved activations of one [`Ic3Net`](super::Ic3Net) forward pass over all
/// agents of a batch.
///
/// The graph owns a copy of the weights it was built with, so it stays
/// valid while optimizers step the live network between backward calls.
/// The communication gate is hard-rounded and passes no gradient, so the
/// gate parameters always receive zeros.
pub struct ForwardGraph {
    policy_net: PolicyNet,
    value_net: ValueNet,
    agents: usize,
    rows: usize,
    encoder_cache: LinearCache,
    rounds: Vec<CommRound>,
    head_cache: LinearCache,
    value_body_cache: LinearCache,
    value_head_cache: LinearCache,
}

impl ForwardGraph {
    pub(crate) fn new(
        policy_net: PolicyNet,
        value_net: ValueNet,
        agents: usize,
        trace: PolicyTrace,
        value_body_cache: LinearCache,
        value_head_cache: LinearCache,
    ) -> Self {
        ForwardGraph {
            policy_net,
            value_net,
            agents,
            rows: trace.logits.nrows(),
            encoder_cache: trace.encoder_cache,
            rounds: trace.rounds,
            head_cache: trace.head_cache,
            value_body_cache,
            value_head_cache,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.rows / self.agents.max(1)
    }

    pub fn comm_rounds(&self) -> usize {
        self.rounds.len()
    }

    fn policy_gradients(&self, seed: &ActionSeed) -> Result<Gradients> {
        let (dout, dlog_std) = match (seed, &self.policy_net.log_std) {
            (ActionSeed::Discrete { dlogits }, None) => (dlogits, None),
            (ActionSeed::Continuous { dmeans, dlog_std }, Some(log_std)) => {
                if dlog_std.len() != log_std.len() {
                    return Err(HermesError::dimension_mismatch(
                        format!("log std gradient of length {}", log_std.len()),
                        format!("{}", dlog_std.len()),
                    ));
                }
                (dmeans, Some(dlog_std))
            }
            _ => {
                return Err(HermesError::invalid_parameter(
                    "seed",
                    "action seed does not match the action space of the graph",
                ))
            }
        };
        let action_dim = self.policy_net.action_head.output_size();
        if dout.shape() != [self.batch_size(), self.agents, action_dim] {
            return Err(HermesError::dimension_mismatch(
                format!("action seed of shape ({}, {}, {})", self.batch_size(), self.agents, action_dim),
                format!("{:?}", dout.shape()),
            ));
        }

        let f_module = &self.policy_net.f_module;
        let LinearGrads {
            input_errors: mut dh,
            weights: dw_head,
            biases: db_head,
        } = self.policy_net.action_head.backward(&self.head_cache, flatten_agents(dout.view()).view());
        let mut dc = Array2::zeros(dh.raw_dim());
        let mut de = Array2::zeros(dh.raw_dim());
        let mut lstm_grads = LstmGrads::zeros(f_module);
        let n = self.agents;

        for round in self.rounds.iter().rev() {
            let LstmStepGrads { dx, mut dh_prev, dc_prev } =
                f_module.backward_step(&round.lstm, dh.view(), dc.view(), &mut lstm_grads);
            // the cell input is e + comm, so dx reaches both
            for b in 0..self.batch_size() {
                let w = round.weights.index_axis(Axis(0), b);
                let back = w.dot(&dx.slice(s![b * n..(b + 1) * n, ..]));
                let mut senders = dh_prev.slice_mut(s![b * n..(b + 1) * n, ..]);
                senders += &back;
            }
            de += &dx;
            dh = dh_prev;
            dc = dc_prev;
        }

        let mut leaves = self.policy_net.encoder.backward(&self.encoder_cache, de.view()).into_leaves();
        leaves.extend(lstm_grads.into_leaves());
        leaves.push(Array2::<f32>::zeros(self.policy_net.g_module.weights.raw_dim()).into_dyn());
        leaves.push(Array1::<f32>::zeros(self.policy_net.g_module.biases.raw_dim()).into_dyn());
        leaves.push(dw_head.into_dyn());
        leaves.push(db_head.into_dyn());
        if let Some(d) = dlog_std {
            leaves.push(d.clone().into_dyn());
        }
        Ok(Gradients::from_leaves(leaves))
    }

    fn value_gradients(&self, seed: ArrayView2<f32>) -> Result<Gradients> {
        if seed.dim() != (self.batch_size(), self.agents) {
            return Err(HermesError::dimension_mismatch(
                format!("value seed of shape ({}, {})", self.batch_size(), self.agents),
                format!("{:?}", seed.shape()),
            ));
        }
        let n = self.agents;
        let dv = Array2::from_shape_fn((self.rows, 1), |(r, _)| seed[[r / n, r % n]]);
        let head = self.value_net.value_head.backward(&self.value_head_cache, dv.view());
        let body = self.value_net.value_body.backward(&self.value_body_cache, head.input_errors.view());

        let mut leaves = body.into_leaves();
        leaves.extend(head.into_leaves());
        Ok(Gradients::from_leaves(leaves))
    }
}

impl RetainedGraph for ForwardGraph {
    fn backward_action(&self, seed: &ActionSeed, leaves: &mut Gradients) -> Result<()> {
        let grads = self.policy_gradients(seed)?;
        leaves.accumulate(&grads)
    }

    fn backward_value(&self, seed: ArrayView2<f32>, leaves: &mut Gradients) -> Result<()> {
        let grads = self.value_gradients(seed)?;
        leaves.accumulate(&grads)
    }
}
