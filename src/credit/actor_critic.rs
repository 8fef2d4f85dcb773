use crate::batch::Batch;
use crate::error::Result;
use crate::models::{PolicyModel, ValueModel};

use super::{assemble, td_deltas, CreditAssignment, LossOutput};

/// One-step actor-critic.
///
/// `δ = I·(r + γ·V(s') - V(s))`, or `I·(r - V(s))` on the last step, where
/// `V(s')` comes from the behaviour network and is detached.
#[derive(Clone, Debug)]
pub struct ActorCritic {
    pub gamma: f32,
    pub normalize_advantages: bool,
}

impl ActorCritic {
    pub fn new(gamma: f32) -> Self {
        ActorCritic {
            gamma,
            normalize_advantages: false,
        }
    }

    pub fn normalize_advantages(mut self, normalize: bool) -> Self {
        self.normalize_advantages = normalize;
        self
    }
}

impl<M: PolicyModel + ValueModel> CreditAssignment<M> for ActorCritic {
    fn name(&self) -> &'static str {
        "actor_critic"
    }

    fn get_loss(&self, batch: &Batch, behaviour: &M, _target: Option<&M>) -> Result<LossOutput<M::Graph>> {
        let pass = behaviour.forward(batch.state.view(), batch.agent_mask.view())?;
        let next_values = behaviour.value(batch.next_state.view())?;
        let (deltas, scale) = td_deltas(
            batch.reward.view(),
            pass.values.view(),
            next_values.view(),
            batch.start_step.view(),
            batch.last_step.view(),
            self.gamma,
        )?;
        assemble(batch, pass, deltas, scale, self.normalize_advantages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommVariant, Ic3Net, ModelSpec, RetainedGraph};
    use crate::replay_buffer::Transition;
    use ndarray::{array, Array1, Array2};

    #[test]
    fn test_deltas_use_detached_next_value() {
        let net = Ic3Net::new(ModelSpec {
            agent_num: 2,
            obs_dim: 2,
            hid_dim: 4,
            action_dim: 2,
            comm_iters: 2,
            variant: CommVariant::Cooperative,
            continuous: false,
            init_std: 0.1,
        })
        .unwrap();
        let steps: Vec<Transition> = (0..3)
            .map(|t| Transition {
                state: Array2::from_elem((2, 2), t as f32 * 0.2),
                action: array![[1.0, 0.0], [0.0, 1.0]],
                raw_action: array![[1.0, 0.0], [0.0, 1.0]],
                action_out: Array2::zeros((2, 2)),
                reward: Array1::from_elem(2, 1.0),
                next_state: Array2::from_elem((2, 2), (t + 1) as f32 * 0.2),
                agent_mask: Array1::ones(2),
                start_step: t == 0,
                done: t == 2,
                last_step: t == 2,
            })
            .collect();
        let batch = Batch::from_owned(&steps).unwrap();
        let gamma = 0.5;
        let loss = ActorCritic::new(gamma).get_loss(&batch, &net, None).unwrap();

        let v = net.value(batch.state.view()).unwrap();
        let nv = net.value(batch.next_state.view()).unwrap();
        for i in 0..2 {
            let expected = [
                1.0 * (1.0 + gamma * nv[[0, i]] - v[[0, i]]),
                gamma * (1.0 + gamma * nv[[1, i]] - v[[1, i]]),
                gamma * gamma * (1.0 - v[[2, i]]),
            ];
            for t in 0..3 {
                assert!((loss.advantages[[t, i]] - expected[t]).abs() < 1e-5);
            }
        }

        // the graph is still usable for every agent's value backward
        let mut leaves = net.value_grads().clone();
        for i in 0..2 {
            loss.graph.backward_value(loss.value_seed(i).view(), &mut leaves).unwrap();
        }
        assert!(leaves.norm() > 0.0);
    }
}
