//! # Credit Assignment
//!
//! Turns a batch of transitions plus a forward pass of the behaviour
//! network into per-agent action and value losses, and into the seeds that
//! drive each agent's backward pass through the shared graph.
//!
//! - [`Reinforce`]: Monte-Carlo returns with a learned baseline
//! - [`ActorCritic`]: one-step TD advantages with a per-episode discount
//! - [`Ddpg`]: TD advantages bootstrapped from a target network
//! - [`QLearning`]: TD loss for the value-based trainer

pub mod actor_critic;
pub mod ddpg;
pub mod q_learning;
pub mod reinforce;

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, Zip};

use crate::batch::Batch;
use crate::config::{Strategy, TrainingConfig};
use crate::distributions::{categorical_entropy, categorical_log_density, gaussian_log_density, log_softmax};
use crate::error::{HermesError, Result};
use crate::models::{flatten_agents, unflatten_agents, ActionOutput, ActionSeed, ForwardPass, PolicyModel, ValueModel};

pub use actor_critic::ActorCritic;
pub use ddpg::Ddpg;
pub use q_learning::{QLearning, QLoss};
pub use reinforce::Reinforce;

/// A rule that assigns credit for a batch to every agent.
pub trait CreditAssignment<M: PolicyModel + ValueModel> {
    fn name(&self) -> &'static str;

    /// Run `behaviour` over `batch` once for all agents and build the losses.
    /// `target` is the target network when the trainer keeps one.
    fn get_loss(&self, batch: &Batch, behaviour: &M, target: Option<&M>) -> Result<LossOutput<M::Graph>>;
}

/// Build the rule selected by `config.strategy`.
pub fn from_config<M>(config: &TrainingConfig) -> Box<dyn CreditAssignment<M>>
where
    M: PolicyModel + ValueModel + 'static,
{
    let (gamma, normalize) = (config.gamma, config.normalize_advantages);
    match config.strategy {
        Strategy::Reinforce => Box::new(Reinforce::new(gamma).normalize_advantages(normalize)),
        Strategy::ActorCritic => Box::new(ActorCritic::new(gamma).normalize_advantages(normalize)),
        Strategy::Ddpg => Box::new(Ddpg::new(gamma).normalize_advantages(normalize)),
    }
}

/// Losses of one batch, one entry per agent, plus everything needed to
/// differentiate them.
pub struct LossOutput<G> {
    /// `-Σ_b m·adv·log π / B` per agent, without the entropy bonus
    pub action_loss: Array1<f32>,
    /// `Σ_b m·δ² / B` per agent
    pub value_loss: Array1<f32>,
    /// `(batch, agents)`
    pub log_prob: Array2<f32>,
    /// Detached advantages, `(batch, agents)`
    pub advantages: Array2<f32>,
    pub action: ActionOutput,
    pub comm_gate: Option<Array2<f32>>,
    pub graph: G,
    /// Row-wise log-probabilities for discrete actions, `(batch, agents, act_dim)`
    log_p_a: Option<Array3<f32>>,
    actions: Array3<f32>,
    deltas: Array2<f32>,
    /// `-∂δ/∂v` per entry
    value_scale: Array2<f32>,
    /// Agent mask `m` of the batch; dead rows drop out of both losses
    mask: Array2<f32>,
}

impl<G> LossOutput<G> {
    pub fn batch_size(&self) -> usize {
        self.log_prob.nrows()
    }

    pub fn agent_num(&self) -> usize {
        self.log_prob.ncols()
    }

    /// Mean categorical entropy of `agent`'s policy over the batch.
    /// `None` for continuous actions.
    pub fn entropy(&self, agent: usize) -> Option<f32> {
        self.log_p_a.as_ref().map(|lp| {
            let rows = lp.index_axis(Axis(1), agent);
            categorical_entropy(rows).mean().unwrap_or(0.0)
        })
    }

    /// Gradient of `agent`'s action loss minus `entr · H` with respect to
    /// the action output. Every other agent's rows are zero, and so are the
    /// rows where `agent` is dead.
    pub fn action_seed(&self, agent: usize, entr: f32) -> ActionSeed {
        let b = self.batch_size() as f32;
        match (&self.action, &self.log_p_a) {
            (ActionOutput::Discrete { logits }, Some(log_p_a)) => {
                let mut dlogits = Array3::zeros(logits.raw_dim());
                for t in 0..self.batch_size() {
                    let lp = log_p_a.slice(s![t, agent, ..]);
                    let a = self.actions.slice(s![t, agent, ..]);
                    let alive = self.mask[[t, agent]];
                    let adv = self.advantages[[t, agent]] * alive;
                    let mass = a.sum();
                    let row_entropy = -lp.iter().map(|&l| l.exp() * l).sum::<f32>();
                    let mut d = dlogits.slice_mut(s![t, agent, ..]);
                    Zip::from(&mut d).and(&a).and(&lp).for_each(|d, &a, &l| {
                        let p = l.exp();
                        *d = -adv / b * (a - p * mass);
                        if entr > 0.0 {
                            *d += entr * alive / b * p * (l + row_entropy);
                        }
                    });
                }
                ActionSeed::Discrete { dlogits }
            }
            (ActionOutput::Continuous { means, log_std }, _) => {
                let mut dmeans = Array3::zeros(means.raw_dim());
                let mut dlog_std = Array1::zeros(log_std.raw_dim());
                let var = log_std.mapv(|ls| (2.0 * ls).exp());
                for t in 0..self.batch_size() {
                    let adv = self.advantages[[t, agent]] * self.mask[[t, agent]];
                    for k in 0..log_std.len() {
                        let diff = self.actions[[t, agent, k]] - means[[t, agent, k]];
                        dmeans[[t, agent, k]] = -adv / b * diff / var[k];
                        dlog_std[k] += -adv / b * (diff * diff / var[k] - 1.0);
                    }
                }
                ActionSeed::Continuous { dmeans, dlog_std }
            }
            (ActionOutput::Discrete { logits }, None) => ActionSeed::Discrete {
                dlogits: Array3::zeros(logits.raw_dim()),
            },
        }
    }

    /// Gradient of `agent`'s value loss with respect to the value estimates.
    pub fn value_seed(&self, agent: usize) -> Array2<f32> {
        let b = self.batch_size() as f32;
        let mut seed = Array2::zeros(self.deltas.raw_dim());
        for t in 0..self.batch_size() {
            seed[[t, agent]] = -2.0 * self.mask[[t, agent]] * self.value_scale[[t, agent]] * self.deltas[[t, agent]] / b;
        }
        seed
    }
}

/// Discounted returns computed backward through time order, restarting at
/// every `last_step` row: `R[t] = r[t] + γ·R[t+1]`, `R[last] = r[last]`.
pub fn discounted_returns(rewards: ArrayView2<f32>, last_step: ArrayView1<bool>, gamma: f32) -> Array2<f32> {
    let mut returns = Array2::zeros(rewards.raw_dim());
    let mut running = Array1::<f32>::zeros(rewards.ncols());
    for t in (0..rewards.nrows()).rev() {
        if last_step[t] {
            running.fill(0.0);
        }
        let row = &rewards.row(t) + &(&running * gamma);
        returns.row_mut(t).assign(&row);
        running = row;
    }
    returns
}

/// One-step TD errors with the episode discount `I`: `I` restarts at 1 on
/// `start_step` rows and is multiplied by `γ` after every row. Returns the
/// deltas and the `I` used for each row.
pub fn td_deltas(
    rewards: ArrayView2<f32>,
    values: ArrayView2<f32>,
    next_values: ArrayView2<f32>,
    start_step: ArrayView1<bool>,
    last_step: ArrayView1<bool>,
    gamma: f32,
) -> Result<(Array2<f32>, Array2<f32>)> {
    check_same_shape("values", values, "next_values", next_values)?;
    check_same_shape("values", values, "rewards", rewards)?;
    let mut deltas = Array2::zeros(rewards.raw_dim());
    let mut scale = Array2::zeros(rewards.raw_dim());
    let mut discount = 1.0;
    for t in 0..rewards.nrows() {
        if start_step[t] {
            discount = 1.0;
        }
        let target = if last_step[t] {
            rewards.row(t).to_owned()
        } else {
            &rewards.row(t) + &(&next_values.row(t) * gamma)
        };
        deltas.row_mut(t).assign(&((target - &values.row(t)) * discount));
        scale.row_mut(t).fill(discount);
        discount *= gamma;
    }
    Ok((deltas, scale))
}

/// Standardise each agent column to zero mean and unit variance.
pub fn normalize_columns(advantages: &mut Array2<f32>) {
    for mut col in advantages.axis_iter_mut(Axis(1)) {
        let mean = col.mean().unwrap_or(0.0);
        let var = col.iter().map(|&a| (a - mean).powi(2)).sum::<f32>() / col.len().max(1) as f32;
        let std = var.sqrt();
        col.mapv_inplace(|a| (a - mean) / (std + 1e-8));
    }
}

pub(crate) fn check_same_shape(a_name: &str, a: ArrayView2<f32>, b_name: &str, b: ArrayView2<f32>) -> Result<()> {
    if a.dim() != b.dim() {
        return Err(HermesError::dimension_mismatch(
            format!("{} of shape {:?}", b_name, a.shape()),
            format!("{:?} (against {})", b.shape(), a_name),
        ));
    }
    Ok(())
}

/// Log-densities of the batch actions, `(batch, agents)`, and the
/// row-wise log-probabilities for discrete outputs.
fn log_density(action: &ActionOutput, actions: &Array3<f32>) -> Result<(Array2<f32>, Option<Array3<f32>>)> {
    let out = action.primary();
    if out.shape() != actions.shape() {
        return Err(HermesError::dimension_mismatch(
            format!("actions of shape {:?}", out.shape()),
            format!("{:?}", actions.shape()),
        ));
    }
    let agents = out.shape()[1];
    let flat_actions = flatten_agents(actions.view());
    let (log_prob, log_p_a) = match action {
        ActionOutput::Discrete { logits } => {
            let lp = log_softmax(flatten_agents(logits.view()).view());
            let density = categorical_log_density(flat_actions.view(), lp.view());
            (density, Some(unflatten_agents(lp.view(), agents)))
        }
        ActionOutput::Continuous { means, log_std } => {
            let density = gaussian_log_density(flat_actions.view(), flatten_agents(means.view()).view(), log_std.view());
            (density, None)
        }
    };
    let log_prob = unflatten_agents(log_prob.insert_axis(Axis(1)).view(), agents).index_axis_move(Axis(2), 0);
    Ok((log_prob, log_p_a))
}

/// Shared tail of every policy-gradient rule: log-densities, the
/// shape invariant, advantages and loss aggregation.
pub(crate) fn assemble<G>(
    batch: &Batch,
    pass: ForwardPass<G>,
    deltas: Array2<f32>,
    value_scale: Array2<f32>,
    normalize: bool,
) -> Result<LossOutput<G>> {
    let (log_prob, log_p_a) = log_density(&pass.action, &batch.action)?;
    let mut advantages = deltas.clone();
    if log_prob.dim() != advantages.dim() {
        return Err(HermesError::dimension_mismatch(
            format!("log_prob of shape {:?}", advantages.shape()),
            format!("{:?}", log_prob.shape()),
        ));
    }
    if normalize {
        normalize_columns(&mut advantages);
    }

    let mask = batch.agent_mask.clone();
    check_same_shape("advantages", advantages.view(), "agent_mask", mask.view())?;

    let b = batch.len() as f32;
    let action_loss = (-&advantages * &log_prob * &mask).sum_axis(Axis(0)) / b;
    let value_loss = (deltas.mapv(|d| d * d) * &mask).sum_axis(Axis(0)) / b;

    Ok(LossOutput {
        action_loss,
        value_loss,
        log_prob,
        advantages,
        action: pass.action,
        comm_gate: pass.comm_gate,
        graph: pass.graph,
        log_p_a,
        actions: batch.action.clone(),
        deltas,
        value_scale,
        mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_discounted_returns_known_values() {
        let rewards = array![[1.0], [1.0], [1.0], [0.0]];
        let last = array![false, false, false, true];
        let returns = discounted_returns(rewards.view(), last.view(), 0.9);
        let expected = [2.71, 1.9, 1.0, 0.0];
        for (r, e) in returns.iter().zip(expected.iter()) {
            assert!((r - e).abs() < 1e-5, "{} vs {}", r, e);
        }
    }

    #[test]
    fn test_returns_reset_at_episode_boundary() {
        let rewards = array![[1.0], [2.0], [3.0], [4.0]];
        let last = array![false, true, false, true];
        let returns = discounted_returns(rewards.view(), last.view(), 0.5);
        assert_eq!(returns, array![[2.0], [2.0], [5.0], [4.0]]);
    }

    #[test]
    fn test_td_deltas_discount_and_terminal() {
        let rewards = array![[1.0], [1.0], [1.0]];
        let values = array![[0.5], [0.5], [0.5]];
        let next_values = array![[2.0], [2.0], [2.0]];
        let start = array![true, false, true];
        let last = array![false, true, false];
        let (deltas, scale) =
            td_deltas(rewards.view(), values.view(), next_values.view(), start.view(), last.view(), 0.5).unwrap();
        // row 0: I=1, 1 + 0.5*2 - 0.5; row 1 terminal: I=0.5, (1 - 0.5); row 2 restarts
        assert!((deltas[[0, 0]] - 1.5).abs() < 1e-6);
        assert!((deltas[[1, 0]] - 0.25).abs() < 1e-6);
        assert!((deltas[[2, 0]] - 1.5).abs() < 1e-6);
        assert_eq!(scale, array![[1.0], [0.5], [1.0]]);
    }

    #[test]
    fn test_normalize_columns() {
        let mut adv = array![[1.0, 5.0], [3.0, 5.0]];
        normalize_columns(&mut adv);
        assert!((adv[[0, 0]] + 1.0).abs() < 1e-4);
        assert!((adv[[1, 0]] - 1.0).abs() < 1e-4);
        assert_eq!(adv[[0, 1]], 0.0);
    }
}
