use crate::batch::Batch;
use crate::error::{HermesError, Result};
use crate::models::{PolicyModel, ValueModel};

use super::{assemble, td_deltas, CreditAssignment, LossOutput};

/// Actor-critic whose bootstrap value `V(s')` comes from the target network.
///
/// Loss aggregation is the same as [`ActorCritic`](super::ActorCritic);
/// only the source of the next-state estimate differs. Fails when the
/// trainer keeps no target network.
#[derive(Clone, Debug)]
pub struct Ddpg {
    pub gamma: f32,
    pub normalize_advantages: bool,
}

impl Ddpg {
    pub fn new(gamma: f32) -> Self {
        Ddpg {
            gamma,
            normalize_advantages: false,
        }
    }

    pub fn normalize_advantages(mut self, normalize: bool) -> Self {
        self.normalize_advantages = normalize;
        self
    }
}

impl<M: PolicyModel + ValueModel> CreditAssignment<M> for Ddpg {
    fn name(&self) -> &'static str {
        "ddpg"
    }

    fn get_loss(&self, batch: &Batch, behaviour: &M, target: Option<&M>) -> Result<LossOutput<M::Graph>> {
        let target = target.ok_or_else(|| {
            HermesError::invalid_parameter("target", "ddpg needs a target network to bootstrap from")
        })?;
        let pass = behaviour.forward(batch.state.view(), batch.agent_mask.view())?;
        let next_values = target.value(batch.next_state.view())?;
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
