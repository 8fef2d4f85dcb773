mod common;

use common::transition;
use hermes::credit::discounted_returns;
use hermes::models::{normalization_divisor, CommVariant, Ic3Net, ModelSpec};
use hermes::replay_buffer::TransReplayBuffer;
use ndarray::{Array1, Array2};
use proptest::prelude::*;

fn reward_strategy() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-5.0f32..5.0, 1..24)
}

proptest! {
    #[test]
    fn test_returns_follow_the_discount_recursion(rewards in reward_strategy(), gamma in 0.0f32..0.999) {
        let steps = rewards.len();
        let reward = Array2::from_shape_vec((steps, 1), rewards.clone()).unwrap();
        let mut last_step = Array1::from_elem(steps, false);
        last_step[steps - 1] = true;

        let returns = discounted_returns(reward.view(), last_step.view(), gamma);
        prop_assert!((returns[[steps - 1, 0]] - rewards[steps - 1]).abs() < 1e-5);
        for t in 0..steps - 1 {
            let expected = rewards[t] + gamma * returns[[t + 1, 0]];
            prop_assert!((returns[[t, 0]] - expected).abs() < 1e-4 * expected.abs().max(1.0));
        }
    }

    #[test]
    fn test_returns_reset_at_every_boundary(rewards in reward_strategy(), cut in 0usize..23, gamma in 0.0f32..0.999) {
        let steps = rewards.len();
        prop_assume!(cut < steps);
        let reward = Array2::from_shape_vec((steps, 1), rewards.clone()).unwrap();
        let mut last_step = Array1::from_elem(steps, false);
        last_step[cut] = true;
        last_step[steps - 1] = true;

        let returns = discounted_returns(reward.view(), last_step.view(), gamma);
        prop_assert!((returns[[cut, 0]] - rewards[cut]).abs() < 1e-5);
    }

    #[test]
    fn test_comm_mask_is_anti_reflexive(agents in 1usize..8) {
        let net = Ic3Net::new(ModelSpec {
            agent_num: agents,
            obs_dim: 2,
            hid_dim: 4,
            action_dim: 2,
            comm_iters: 2,
            variant: CommVariant::Cooperative,
            continuous: false,
            init_std: 0.1,
        })
        .unwrap();
        let mask = net.comm_mask();
        prop_assert_eq!(mask.dim(), (agents, agents));
        for i in 0..agents {
            prop_assert_eq!(mask[[i, i]], 0.0);
            for j in 0..agents {
                prop_assert_eq!(mask[[i, j]], mask[[j, i]]);
                if i != j {
                    prop_assert_eq!(mask[[i, j]], 1.0);
                }
            }
        }
    }

    #[test]
    fn test_divisor_counts_other_alive_agents(alive in 0usize..16) {
        match normalization_divisor(alive) {
            Some(divisor) => {
                prop_assert!(alive >= 2);
                prop_assert_eq!(divisor, (alive - 1) as f32);
            }
            None => prop_assert!(alive <= 1),
        }
    }

    #[test]
    fn test_buffer_never_exceeds_capacity(capacity in 1usize..20, inserts in 0usize..50) {
        let mut buffer = TransReplayBuffer::new(capacity);
        for k in 0..inserts {
            buffer.add_experience(transition(2, k as f32, k == 0, false));
            prop_assert!(buffer.len() <= capacity);
        }
        prop_assert_eq!(buffer.len(), inserts.min(capacity));
        // once full, exactly the oldest entries are gone
        let kept: Vec<f32> = buffer.iter().map(|t| t.reward[0]).collect();
        let first = inserts.saturating_sub(capacity);
        let expected: Vec<f32> = (first..inserts).map(|k| k as f32).collect();
        prop_assert_eq!(kept, expected);
    }
}
