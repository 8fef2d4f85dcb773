use std::path::{Path, PathBuf};

use ndarray::Axis;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info};

use crate::batch::Batch;
use crate::config::{Strategy, TrainingConfig};
use crate::credit::{self, CreditAssignment};
use crate::error::{HermesError, Result};
use crate::gradients::Gradients;
use crate::logger::{write_stat, Stat, SummaryWriter};
use crate::metrics::RewardRecorder;
use crate::models::{ActionSeed, PolicyModel, RetainedGraph, ValueModel};
use crate::multi_agent::{EpisodeInfo, MultiAgentEnvironment};
use crate::optimizer::{Adam, GradientClipper, Optimizer};
use crate::replay_buffer::{EpisodeReplayBuffer, TransReplayBuffer, Transition};

use super::{select_action, ActionMode};

/// Where experience waits for an update.
enum ReplayStore {
    Transitions(TransReplayBuffer),
    Episodes(EpisodeReplayBuffer),
    /// On-policy: each episode is used once, at its end.
    OnPolicy,
}

/// Policy-gradient trainer.
///
/// All agents share one policy and one value network, but every agent owns
/// an action optimizer and a value optimizer. An update computes every
/// agent's loss from one forward pass, collects each agent's gradient into
/// its own snapshot of the shared leaves, then lets the optimizers step in
/// agent order, each on its own snapshot.
pub struct PgTrainer<M, E>
where
    M: PolicyModel + ValueModel,
{
    config: TrainingConfig,
    behaviour_net: M,
    target_net: Option<M>,
    credit: Box<dyn CreditAssignment<M>>,
    env: E,
    replay: ReplayStore,
    action_optimizers: Vec<Adam>,
    value_optimizers: Vec<Adam>,
    clipper: GradientClipper,
    steps: usize,
    episodes: usize,
    entr: f32,
    entr_inc: f32,
    rewards: RewardRecorder,
    rng: StdRng,
    writer: Option<Box<dyn SummaryWriter>>,
    checkpoint_path: Option<PathBuf>,
}

impl<M, E> PgTrainer<M, E>
where
    M: PolicyModel + ValueModel + Clone + Serialize + 'static,
    E: MultiAgentEnvironment,
{
    pub fn new(config: TrainingConfig, model: M, env: E) -> Result<Self> {
        config.validate()?;
        let n = config.agent_num;
        if model.agent_num() != n || env.num_agents() != n {
            return Err(HermesError::dimension_mismatch(
                format!("{} agents", n),
                format!("model {} and environment {}", model.agent_num(), env.num_agents()),
            ));
        }
        if env.obs_dim() != config.obs_size || env.action_dim() != model.action_dim() {
            return Err(HermesError::dimension_mismatch(
                format!("obs {} act {}", config.obs_size, model.action_dim()),
                format!("obs {} act {}", env.obs_dim(), env.action_dim()),
            ));
        }
        if config.strategy == Strategy::Ddpg && !config.target {
            return Err(HermesError::invalid_parameter(
                "target",
                "ddpg bootstraps from a target network; set target = true",
            ));
        }

        let replay = match (config.replay, config.online) {
            (true, true) => ReplayStore::Transitions(TransReplayBuffer::new(config.replay_buffer_size)),
            (true, false) => ReplayStore::Episodes(EpisodeReplayBuffer::new(config.replay_buffer_size)),
            (false, _) => ReplayStore::OnPolicy,
        };
        let action_optimizers = (0..n)
            .map(|_| Adam::default(config.policy_lrate))
            .collect();
        let value_optimizers = (0..n)
            .map(|_| Adam::default(config.value_lrate))
            .collect();
        let clipper = if config.grad_clip {
            GradientClipper::unit_value()
        } else {
            GradientClipper::None
        };

        let credit_rule = credit::from_config::<M>(&config);
        info!(
            strategy = credit_rule.name(),
            agents = n,
            replay = config.replay,
            online = config.online,
            "policy-gradient trainer ready"
        );
        Ok(PgTrainer {
            target_net: config.target.then(|| model.clone()),
            credit: credit_rule,
            behaviour_net: model,
            env,
            replay,
            action_optimizers,
            value_optimizers,
            clipper,
            steps: 0,
            episodes: 0,
            entr: config.entr,
            entr_inc: config.entr_inc,
            rewards: RewardRecorder::new(config.reward_record_type),
            rng: StdRng::from_entropy(),
            writer: None,
            checkpoint_path: None,
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

    /// Save the behaviour network here every `save_model_freq` episodes.
    pub fn with_checkpoint_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.checkpoint_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn behaviour_net(&self) -> &M {
        &self.behaviour_net
    }

    pub fn target_net(&self) -> Option<&M> {
        self.target_net.as_ref()
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn episodes(&self) -> usize {
        self.episodes
    }

    /// Current entropy coefficient.
    pub fn entr(&self) -> f32 {
        self.entr
    }

    pub fn mean_reward(&self) -> f32 {
        self.rewards.mean_reward()
    }

    /// Transitions currently held for replay.
    pub fn replay_len(&self) -> usize {
        match &self.replay {
            ReplayStore::Transitions(buffer) => buffer.len(),
            ReplayStore::Episodes(buffer) => buffer.num_transitions(),
            ReplayStore::OnPolicy => 0,
        }
    }

    /// Update the policy on `batch`: one gradient snapshot per agent, then
    /// every action optimizer steps on its own snapshot.
    pub fn action_transition_process(&mut self, stat: &mut Stat, batch: &Batch) -> Result<()> {
        let loss = self
            .credit
            .get_loss(batch, &self.behaviour_net, self.target_net.as_ref())?;
        let n = loss.agent_num();
        let seeds: Vec<ActionSeed> = (0..n).map(|i| loss.action_seed(i, self.entr)).collect();
        let entropy: Vec<f32> = (0..n).filter_map(|i| loss.entropy(i)).collect();
        let action_loss = loss.action_loss.mean().unwrap_or(0.0);
        if let Some(gate) = loss.comm_gate.as_ref() {
            stat.insert_array("comm_gate", gate.clone());
        }
        let graph = loss.graph;

        let mut snapshots = Vec::with_capacity(n);
        if let Some((last, rest)) = seeds.split_last() {
            for (i, seed) in rest.iter().enumerate() {
                self.action_optimizers[i].zero_grad(self.behaviour_net.action_grads_mut());
                graph.backward_action(seed, self.behaviour_net.action_grads_mut())?;
                snapshots.push(self.behaviour_net.action_grads().clone());
            }
            self.action_optimizers[n - 1].zero_grad(self.behaviour_net.action_grads_mut());
            graph.release_action(last, self.behaviour_net.action_grads_mut())?;
            snapshots.push(self.behaviour_net.action_grads().clone());
        }

        let norms = self.replay_action_snapshots(snapshots)?;
        let grad_norm = mean(&norms);
        debug!(action_loss, grad_norm, "action update");
        stat.insert_scalar("action_loss", action_loss);
        stat.insert_scalar("policy_grad_norm", grad_norm);
        if !entropy.is_empty() {
            stat.insert_scalar("entropy", mean(&entropy));
        }
        Ok(())
    }

    /// Update the value network on `batch` the same way, one snapshot per agent.
    pub fn value_transition_process(&mut self, stat: &mut Stat, batch: &Batch) -> Result<()> {
        let loss = self
            .credit
            .get_loss(batch, &self.behaviour_net, self.target_net.as_ref())?;
        let n = loss.agent_num();
        let seeds: Vec<_> = (0..n).map(|i| loss.value_seed(i)).collect();
        let value_loss = loss.value_loss.mean().unwrap_or(0.0);
        let graph = loss.graph;

        let mut snapshots = Vec::with_capacity(n);
        if let Some((last, rest)) = seeds.split_last() {
            for (i, seed) in rest.iter().enumerate() {
                self.value_optimizers[i].zero_grad(self.behaviour_net.value_grads_mut());
                graph.backward_value(seed.view(), self.behaviour_net.value_grads_mut())?;
                snapshots.push(self.behaviour_net.value_grads().clone());
            }
            self.value_optimizers[n - 1].zero_grad(self.behaviour_net.value_grads_mut());
            graph.release_value(last.view(), self.behaviour_net.value_grads_mut())?;
            snapshots.push(self.behaviour_net.value_grads().clone());
        }

        let norms = self.replay_value_snapshots(snapshots)?;
        let grad_norm = mean(&norms);
        debug!(value_loss, grad_norm, "value update");
        stat.insert_scalar("value_loss", value_loss);
        stat.insert_scalar("value_grad_norm", grad_norm);
        Ok(())
    }

    fn replay_action_snapshots(&mut self, mut snapshots: Vec<Gradients>) -> Result<Vec<f32>> {
        snapshots.reverse();
        let mut norms = Vec::with_capacity(self.action_optimizers.len());
        for optimizer in self.action_optimizers.iter_mut() {
            let snapshot = snapshots
                .pop()
                .ok_or_else(|| HermesError::Training("missing action gradient snapshot".to_string()))?;
            let leaves = self.behaviour_net.action_grads_mut();
            leaves.assign(&snapshot)?;
            self.clipper.clip(leaves);
            norms.push(leaves.norm());
            let (params, grads) = self.behaviour_net.action_group();
            optimizer.step(params, grads)?;
        }
        Ok(norms)
    }

    fn replay_value_snapshots(&mut self, mut snapshots: Vec<Gradients>) -> Result<Vec<f32>> {
        snapshots.reverse();
        let mut norms = Vec::with_capacity(self.value_optimizers.len());
        for optimizer in self.value_optimizers.iter_mut() {
            let snapshot = snapshots
                .pop()
                .ok_or_else(|| HermesError::Training("missing value gradient snapshot".to_string()))?;
            let leaves = self.behaviour_net.value_grads_mut();
            leaves.assign(&snapshot)?;
            self.clipper.clip(leaves);
            norms.push(leaves.norm());
            let (params, grads) = self.behaviour_net.value_group();
            optimizer.step(params, grads)?;
        }
        Ok(norms)
    }

    fn sample_replay(&mut self) -> Result<Batch> {
        let batch_size = self.config.batch_size;
        match &self.replay {
            ReplayStore::Transitions(buffer) => Batch::from_transitions(&buffer.get_batch_with(batch_size, &mut self.rng)),
            ReplayStore::Episodes(buffer) => Batch::from_transitions(&buffer.get_batch_with(batch_size, &mut self.rng)),
            ReplayStore::OnPolicy => Err(HermesError::EmptyBuffer("on-policy training keeps no replay buffer".to_string())),
        }
    }

    /// Policy update on a batch drawn from the replay buffer.
    pub fn action_replay_process(&mut self, stat: &mut Stat) -> Result<()> {
        let batch = self.sample_replay()?;
        self.action_transition_process(stat, &batch)
    }

    /// Value update on an independently drawn replay batch.
    pub fn value_replay_process(&mut self, stat: &mut Stat) -> Result<()> {
        let batch = self.sample_replay()?;
        self.value_transition_process(stat, &batch)
    }

    fn replay_ready(&self, counter: usize) -> bool {
        let held = match &self.replay {
            ReplayStore::Transitions(buffer) => buffer.len(),
            ReplayStore::Episodes(buffer) => buffer.len(),
            ReplayStore::OnPolicy => return false,
        };
        self.steps > self.config.replay_warmup
            && held >= self.config.batch_size
            && counter % self.config.behaviour_update_freq == 0
    }

    fn replay_process(&mut self, stat: &mut Stat) -> Result<()> {
        self.action_replay_process(stat)?;
        self.value_replay_process(stat)
    }

    /// Roll out one episode, updating the networks as experience arrives.
    pub fn run(&mut self, stat: &mut Stat) -> Result<()> {
        self.train_episode(stat)?;
        self.entr += self.entr_inc;
        Ok(())
    }

    fn train_episode(&mut self, stat: &mut Stat) -> Result<()> {
        let n = self.config.agent_num;
        let max_steps = self.config.max_steps;
        let mut state = self.env.reset()?;
        let mut info = EpisodeInfo::all_alive(n);
        let mut episode = Vec::new();

        for t in 0..max_steps {
            let (output, gate) = self.behaviour_net.policy(
                state.view().insert_axis(Axis(0)),
                info.alive_mask.view().insert_axis(Axis(0)),
            )?;
            if let Some(gate) = gate {
                stat.insert_array("comm_gate", gate);
            }
            let (action, raw_action) = select_action(&output, ActionMode::Train, &mut self.rng);
            let result = self.env.step(&raw_action)?;
            let last_step = result.done || t + 1 == max_steps;
            self.rewards.record_step(result.reward.mean().unwrap_or(0.0));

            let transition = Transition {
                state,
                action,
                raw_action,
                action_out: output.primary().index_axis(Axis(0), 0).to_owned(),
                reward: result.reward,
                next_state: result.next_obs.clone(),
                agent_mask: info.alive_mask,
                start_step: t == 0,
                done: result.done,
                last_step,
            };
            self.steps += 1;

            if let ReplayStore::Transitions(buffer) = &mut self.replay {
                buffer.add_experience(transition);
                if self.replay_ready(self.steps) {
                    self.replay_process(stat)?;
                }
            } else {
                episode.push(transition);
            }

            state = result.next_obs;
            info = result.info;
            if last_step {
                break;
            }
        }

        self.episodes += 1;
        match &mut self.replay {
            ReplayStore::Episodes(buffer) => {
                buffer.add_episode(episode);
                if self.replay_ready(self.episodes) {
                    self.replay_process(stat)?;
                }
            }
            ReplayStore::OnPolicy => {
                let batch = Batch::from_owned(&episode)?;
                self.action_transition_process(stat, &batch)?;
                self.value_transition_process(stat, &batch)?;
            }
            ReplayStore::Transitions(_) => {}
        }

        if self.episodes % self.config.target_update_freq == 0 {
            if let Some(target) = self.target_net.as_mut() {
                target.update_target_from(&self.behaviour_net, self.config.target_lr);
                debug!(episode = self.episodes, tau = self.config.target_lr, "target network updated");
            }
        }

        self.rewards.end_episode();
        stat.insert_scalar("mean_reward", self.rewards.mean_reward());

        if self.episodes % self.config.save_model_freq == 0 {
            if let Some(path) = &self.checkpoint_path {
                std::fs::write(path, bincode::serialize(&self.behaviour_net)?)?;
                debug!(episode = self.episodes, path = %path.display(), "checkpoint saved");
            }
        }
        Ok(())
    }

    /// Send `stat` to the summary writer, if one is attached.
    pub fn logging(&mut self, stat: &Stat) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            write_stat(writer.as_mut(), stat, self.episodes)?;
        }
        Ok(())
    }

    pub fn print_info(&self, stat: &Stat) {
        let entropy = stat.scalar("entropy").unwrap_or(0.0);
        let action_loss = stat.scalar("action_loss").map(|l| l + self.entr * entropy);
        info!(
            episode = self.episodes,
            mean_reward = self.rewards.mean_reward(),
            action_loss = ?action_loss,
            value_loss = ?stat.scalar("value_loss"),
            entropy,
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

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}
