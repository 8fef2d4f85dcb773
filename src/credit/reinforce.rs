use ndarray::Array2;

use crate::batch::Batch;
use crate::error::Result;
use crate::models::{PolicyModel, ValueModel};

use super::{assemble, check_same_shape, discounted_returns, CreditAssignment, LossOutput};

/// REINFORCE with the value head as baseline.
///
/// Advantage is `return - value`, detached from the value path.
#[derive(Clone, Debug)]
pub struct Reinforce {
    pub gamma: f32,
    pub normalize_advantages: bool,
}

impl Reinforce {
    pub fn new(gamma: f32) -> Self {
        Reinforce {
            gamma,
            normalize_advantages: false,
        }
    }

    pub fn normalize_advantages(mut self, normalize: bool) -> Self {
        self.normalize_advantages = normalize;
        self
    }
}

impl<M: PolicyModel + ValueModel> CreditAssignment<M> for Reinforce {
    fn name(&self) -> &'static str {
        "reinforce"
    }

    fn get_loss(&self, batch: &Batch, behaviour: &M, _target: Option<&M>) -> Result<LossOutput<M::Graph>> {
        let pass = behaviour.forward(batch.state.view(), batch.agent_mask.view())?;
        check_same_shape("values", pass.values.view(), "rewards", batch.reward.view())?;

        let returns = discounted_returns(batch.reward.view(), batch.last_step.view(), self.gamma);
        let deltas = &returns - &pass.values;
        let scale = Array2::ones(deltas.raw_dim());
        assemble(batch, pass, deltas, scale, self.normalize_advantages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HermesError;
    use crate::models::{ActionSeed, CommVariant, Ic3Net, ModelSpec};
    use crate::replay_buffer::Transition;
    use ndarray::{array, Array1};

    fn net() -> Ic3Net {
        Ic3Net::new(ModelSpec {
            agent_num: 3,
            obs_dim: 2,
            hid_dim: 6,
            action_dim: 2,
            comm_iters: 2,
            variant: CommVariant::Cooperative,
            continuous: false,
            init_std: 0.1,
        })
        .unwrap()
    }

    fn episode(rewards: &[f32]) -> Vec<Transition> {
        let len = rewards.len();
        rewards
            .iter()
            .enumerate()
            .map(|(t, &r)| Transition {
                state: Array2::from_elem((3, 2), 0.1 * t as f32),
                action: array![[1.0, 0.0], [0.0, 1.0], [1.0, 0.0]],
                raw_action: array![[1.0, 0.0], [0.0, 1.0], [1.0, 0.0]],
                action_out: Array2::zeros((3, 2)),
                reward: Array1::from_elem(3, r),
                next_state: Array2::from_elem((3, 2), 0.1 * (t + 1) as f32),
                agent_mask: Array1::ones(3),
                start_step: t == 0,
                done: t + 1 == len,
                last_step: t + 1 == len,
            })
            .collect()
    }

    #[test]
    fn test_losses_follow_returns_and_values() {
        let net = net();
        let batch = Batch::from_owned(&episode(&[1.0, 1.0, 1.0, 0.0])).unwrap();
        let loss = Reinforce::new(0.9).get_loss(&batch, &net, None).unwrap();

        let values = net.value(batch.state.view()).unwrap();
        let returns = array![2.71, 1.9, 1.0, 0.0];
        for i in 0..3 {
            let mut action_loss = 0.0;
            let mut value_loss = 0.0;
            for t in 0..4 {
                let adv = returns[t] - values[[t, i]];
                assert!((loss.advantages[[t, i]] - adv).abs() < 1e-4);
                action_loss += -adv * loss.log_prob[[t, i]];
                value_loss += adv * adv;
            }
            assert!((loss.action_loss[i] - action_loss / 4.0).abs() < 1e-4);
            assert!((loss.value_loss[i] - value_loss / 4.0).abs() < 1e-4);
        }
        assert!(loss.log_prob.iter().all(|&lp| lp <= 0.0));
    }

    #[test]
    fn test_action_shape_mismatch_is_an_error() {
        let net = net();
        let mut steps = episode(&[1.0, 0.0]);
        for step in &mut steps {
            step.action = Array2::zeros((3, 4));
        }
        let batch = Batch::from_owned(&steps).unwrap();
        assert!(matches!(
            Reinforce::new(0.9).get_loss(&batch, &net, None),
            Err(HermesError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_value_seed_is_local_to_agent() {
        let net = net();
        let batch = Batch::from_owned(&episode(&[1.0, 0.5, 0.0])).unwrap();
        let loss = Reinforce::new(0.9).get_loss(&batch, &net, None).unwrap();
        let seed = loss.value_seed(1);
        for t in 0..3 {
            assert_eq!(seed[[t, 0]], 0.0);
            assert_eq!(seed[[t, 2]], 0.0);
            assert!((seed[[t, 1]] + 2.0 * loss.advantages[[t, 1]] / 3.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_dead_agent_rows_drop_out_of_losses() {
        let net = net();
        let mut steps = episode(&[1.0, 0.5, 0.0]);
        for step in &mut steps {
            step.agent_mask[2] = 0.0;
        }
        let batch = Batch::from_owned(&steps).unwrap();
        let loss = Reinforce::new(0.9).get_loss(&batch, &net, None).unwrap();

        assert_eq!(loss.action_loss[2], 0.0);
        assert_eq!(loss.value_loss[2], 0.0);
        assert!(loss.value_loss[0] > 0.0);
        assert!(loss.value_seed(2).iter().all(|&g| g == 0.0));
        match loss.action_seed(2, 0.05) {
            ActionSeed::Discrete { dlogits } => assert!(dlogits.iter().all(|&g| g == 0.0)),
            ActionSeed::Continuous { .. } => panic!("expected a discrete seed"),
        }
    }
}
