use ndarray::Axis;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::batch::Batch;
use crate::config::TrainingConfig;
use crate::credit::QLearning;
use crate::error::{HermesError, Result};
use crate::logger::{write_stat, Stat, SummaryWriter};
use crate::metrics::RewardRecorder;
use crate::models::IndependentQNet;
use crate::multi_agent::{EpisodeInfo, MultiAgentEnvironment};
use crate::optimizer::{Adam, GradientClipper, Optimizer};
use crate::replay_buffer::{TransReplayBuffer, Transition};

use super::epsilon_greedy;

/// Online value-based trainer for [`IndependentQNet`].
///
/// Acts epsilon-greedily, learns one step at a time (or from replay), and
/// keeps an optional target network that is blended in every
/// `target_update_freq` steps.
pub struct QTrainer<E> {
    config: TrainingConfig,
    behaviour_net: IndependentQNet,
    target_net: Option<IndependentQNet>,
    q_learning: QLearning,
    env: E,
    replay: Option<TransReplayBuffer>,
    value_optimizer: Adam,
    clipper: GradientClipper,
    steps: usize,
    episodes: usize,
    rewards: RewardRecorder,
    rng: StdRng,
    writer: Option<Box<dyn SummaryWriter>>,
}

impl<E: MultiAgentEnvironment> QTrainer<E> {
    pub fn new(config: TrainingConfig, model: IndependentQNet, env: E) -> Result<Self> {
        config.validate()?;
        if model.agent_num() != env.num_agents() || model.action_dim() != env.action_dim() {
            return Err(HermesError::dimension_mismatch(
                format!("{} agents with {} actions", model.agent_num(), model.action_dim()),
                format!("{} agents with {} actions", env.num_agents(), env.action_dim()),
            ));
        }
        info!(agents = model.agent_num(), replay = config.replay, "q-learning trainer ready");
        Ok(QTrainer {
            target_net: config.target.then(|| model.clone()),
            behaviour_net: model,
            q_learning: QLearning::new(config.gamma),
            env,
            replay: config.replay.then(|| TransReplayBuffer::new(config.replay_buffer_size)),
            value_optimizer: Adam::default(config.value_lrate),
            clipper: if config.grad_clip {
                GradientClipper::unit_value()
            } else {
                GradientClipper::None
            },
            steps: 0,
            episodes: 0,
            rewards: RewardRecorder::new(config.reward_record_type),
            rng: StdRng::from_entropy(),
            writer: None,
            config,
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_summary_writer(mut self, writer: Box<dyn SummaryWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn behaviour_net(&self) -> &IndependentQNet {
        &self.behaviour_net
    }

    pub fn target_net(&self) -> Option<&IndependentQNet> {
        self.target_net.as_ref()
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn episodes(&self) -> usize {
        self.episodes
    }

    pub fn mean_reward(&self) -> f32 {
        self.rewards.mean_reward()
    }

    pub fn replay_len(&self) -> usize {
        self.replay.as_ref().map_or(0, TransReplayBuffer::len)
    }

    /// One gradient step on `batch`.
    pub fn transition_process(&mut self, stat: &mut Stat, batch: &Batch) -> Result<()> {
        let loss = self
            .q_learning
            .get_loss(batch, &self.behaviour_net, self.target_net.as_ref())?;
        self.value_optimizer.zero_grad(self.behaviour_net.value_grads_mut());
        loss.graph.backward(loss.seed.view(), self.behaviour_net.value_grads_mut())?;

        let leaves = self.behaviour_net.value_grads_mut();
        self.clipper.clip(leaves);
        let grad_norm = leaves.norm();
        let (params, grads) = self.behaviour_net.value_group();
        self.value_optimizer.step(params, grads)?;

        debug!(value_loss = loss.value_loss, grad_norm, "q update");
        stat.insert_scalar("value_loss", loss.value_loss);
        stat.insert_scalar("value_grad_norm", grad_norm);
        Ok(())
    }

    /// One gradient step on a batch drawn from the replay buffer.
    pub fn replay_process(&mut self, stat: &mut Stat) -> Result<()> {
        let batch = match &self.replay {
            Some(buffer) => Batch::from_transitions(&buffer.get_batch_with(self.config.batch_size, &mut self.rng))?,
            None => return Err(HermesError::EmptyBuffer("replay is disabled".to_string())),
        };
        self.transition_process(stat, &batch)
    }

    fn replay_ready(&self) -> bool {
        self.replay.as_ref().map_or(false, |buffer| {
            self.steps > self.config.replay_warmup
                && buffer.len() >= self.config.batch_size
                && self.steps % self.config.behaviour_update_freq == 0
        })
    }

    /// Play one episode, learning after every step.
    pub fn train_online(&mut self, stat: &mut Stat) -> Result<()> {
        let max_steps = self.config.max_steps;
        let mut state = self.env.reset()?;
        let mut info = EpisodeInfo::all_alive(self.behaviour_net.agent_num());

        for t in 0..max_steps {
            let q = self.behaviour_net.q_values(state.view().insert_axis(Axis(0)))?;
            let q = q.index_axis_move(Axis(0), 0);
            let action = epsilon_greedy(q.view(), self.config.epsilon, &mut self.rng);
            let result = self.env.step(&action)?;
            let terminal = result.done || t + 1 == max_steps;
            self.rewards.record_step(result.reward.mean().unwrap_or(0.0));

            let transition = Transition {
                state,
                raw_action: action.clone(),
                action,
                action_out: q,
                reward: result.reward,
                next_state: result.next_obs.clone(),
                agent_mask: info.alive_mask,
                start_step: t == 0,
                done: result.done,
                last_step: terminal,
            };

            if let Some(buffer) = self.replay.as_mut() {
                buffer.add_experience(transition);
                if self.replay_ready() {
                    self.replay_process(stat)?;
                }
            } else if self.steps % self.config.behaviour_update_freq == 0 {
                self.transition_process(stat, &Batch::from_owned(&[transition])?)?;
            }

            if self.steps % self.config.target_update_freq == 0 {
                if let Some(target) = self.target_net.as_mut() {
                    target.update_target_from(&self.behaviour_net, self.config.target_lr);
                }
            }
            self.steps += 1;

            state = result.next_obs;
            info = result.info;
            if terminal {
                break;
            }
        }

        self.episodes += 1;
        self.rewards.end_episode();
        stat.insert_scalar("mean_reward", self.rewards.mean_reward());
        Ok(())
    }

    pub fn run(&mut self, stat: &mut Stat) -> Result<()> {
        self.train_online(stat)
    }

    pub fn logging(&mut self, stat: &Stat) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            write_stat(writer.as_mut(), stat, self.episodes)?;
        }
        Ok(())
    }

    pub fn print_info(&self, stat: &Stat) {
        info!(
            episode = self.episodes,
            steps = self.steps,
            mean_reward = self.rewards.mean_reward(),
            value_loss = ?stat.scalar("value_loss"),
            "episode finished"
        );
    }

    /// Run `train_episodes_num` episodes; returns the last episode's stat.
    pub fn train(&mut self) -> Result<Stat> {
        let mut last = Stat::new();
        for _ in 0..self.config.train_episodes_num {
            let mut stat = Stat::new();
            self.run(&mut stat)?;
            self.logging(&stat)?;
            self.print_info(&stat);
            last = stat;
        }
        Ok(last)
    }
}
