//! Training configuration.
//!
//! A flat, enumerated set of hyperparameters. Loading from JSON rejects
//! unknown keys, and every trainer/model constructor that takes a config
//! calls [`TrainingConfig::validate`] first.

use serde::{Serialize, Deserialize};
use std::fs;
use std::path::Path;

use crate::error::{HermesError, Result};

/// Which credit-assignment rule turns a batch into losses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Reinforce,
    ActorCritic,
    Ddpg,
}

/// How the running mean reward is fed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardRecordType {
    /// One update per environment step with that step's mean reward
    MeanStep,
    /// One update per episode with the episode's mean step reward
    EpisodeMeanStep,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub agent_num: usize,
    pub hid_size: usize,
    pub obs_size: usize,
    pub action_dim: usize,
    pub continuous: bool,
    /// Initial standard deviation of the Gaussian policy
    pub init_std: f32,
    pub policy_lrate: f32,
    pub value_lrate: f32,
    /// Episode step cap
    pub max_steps: usize,
    pub batch_size: usize,
    pub gamma: f32,
    pub normalize_advantages: bool,
    /// Entropy bonus coefficient
    pub entr: f32,
    /// Added to `entr` after every training call
    pub entr_inc: f32,
    pub train_episodes_num: usize,
    pub replay: bool,
    pub replay_buffer_size: usize,
    /// Steps to collect before replay updates start
    pub replay_warmup: usize,
    /// Clamp gradients to `[-1, 1]` before each optimizer step
    pub grad_clip: bool,
    pub save_model_freq: usize,
    pub target: bool,
    /// Blend rate of the target network soft update
    pub target_lr: f32,
    pub behaviour_update_freq: usize,
    pub target_update_freq: usize,
    /// Communication rounds of the policy network
    pub comm_iters: usize,
    /// Per-step transitions (`true`) or whole episodes (`false`) in replay
    pub online: bool,
    pub reward_record_type: RewardRecordType,
    /// Exploration rate of epsilon-greedy action selection
    pub epsilon: f32,
    pub strategy: Strategy,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            agent_num: 3,
            hid_size: 64,
            obs_size: 18,
            action_dim: 5,
            continuous: false,
            init_std: 0.1,
            policy_lrate: 1e-3,
            value_lrate: 1e-2,
            max_steps: 200,
            batch_size: 32,
            gamma: 0.9,
            normalize_advantages: false,
            entr: 1e-3,
            entr_inc: 0.0,
            train_episodes_num: 2000,
            replay: true,
            replay_buffer_size: 1000,
            replay_warmup: 0,
            grad_clip: true,
            save_model_freq: 10,
            target: true,
            target_lr: 0.1,
            behaviour_update_freq: 100,
            target_update_freq: 200,
            comm_iters: 2,
            online: true,
            reward_record_type: RewardRecordType::EpisodeMeanStep,
            epsilon: 0.1,
            strategy: Strategy::Reinforce,
        }
    }
}

macro_rules! setters {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            pub fn $name(mut self, $name: $ty) -> Self {
                self.$name = $name;
                self
            }
        )*
    };
}

impl TrainingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    setters! {
        agent_num: usize,
        hid_size: usize,
        obs_size: usize,
        action_dim: usize,
        continuous: bool,
        init_std: f32,
        policy_lrate: f32,
        value_lrate: f32,
        max_steps: usize,
        batch_size: usize,
        gamma: f32,
        normalize_advantages: bool,
        entr: f32,
        entr_inc: f32,
        train_episodes_num: usize,
        replay: bool,
        replay_buffer_size: usize,
        replay_warmup: usize,
        grad_clip: bool,
        save_model_freq: usize,
        target: bool,
        target_lr: f32,
        behaviour_update_freq: usize,
        target_update_freq: usize,
        comm_iters: usize,
        online: bool,
        reward_record_type: RewardRecordType,
        epsilon: f32,
        strategy: Strategy,
    }

    /// Parse a JSON document. Keys not listed on this struct are an error.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: TrainingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Range checks. Communication rounds are checked by the model
    /// constructor, which knows the variant.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("agent_num", self.agent_num),
            ("hid_size", self.hid_size),
            ("obs_size", self.obs_size),
            ("action_dim", self.action_dim),
            ("max_steps", self.max_steps),
            ("batch_size", self.batch_size),
            ("replay_buffer_size", self.replay_buffer_size),
            ("save_model_freq", self.save_model_freq),
            ("behaviour_update_freq", self.behaviour_update_freq),
            ("target_update_freq", self.target_update_freq),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(HermesError::invalid_parameter(name, "must be greater than 0"));
            }
        }
        if !(self.policy_lrate > 0.0) {
            return Err(HermesError::invalid_parameter("policy_lrate", "must be positive"));
        }
        if !(self.value_lrate > 0.0) {
            return Err(HermesError::invalid_parameter("value_lrate", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(HermesError::invalid_parameter("gamma", "must be in [0, 1]"));
        }
        if !(self.target_lr > 0.0 && self.target_lr <= 1.0) {
            return Err(HermesError::invalid_parameter("target_lr", "must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(HermesError::invalid_parameter("epsilon", "must be in [0, 1]"));
        }
        if self.continuous && !(self.init_std > 0.0) {
            return Err(HermesError::invalid_parameter("init_std", "must be positive"));
        }
        if self.entr < 0.0 {
            return Err(HermesError::invalid_parameter("entr", "must not be negative"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(TrainingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = TrainingConfig::from_json_str(r#"{"gamma": 0.5, "learning_rate": 0.1}"#).unwrap_err();
        assert!(matches!(err, HermesError::Serialization(_)));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = TrainingConfig::from_json_str(r#"{"gamma": 0.5, "strategy": "actor_critic"}"#).unwrap();
        assert_eq!(config.gamma, 0.5);
        assert_eq!(config.strategy, Strategy::ActorCritic);
        assert_eq!(config.batch_size, 32);
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        assert!(TrainingConfig::new().gamma(1.5).validate().is_err());
        assert!(TrainingConfig::new().batch_size(0).validate().is_err());
        assert!(TrainingConfig::new().target_lr(0.0).validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = TrainingConfig::new().agent_num(4).reward_record_type(RewardRecordType::MeanStep);
        config.save(&path).unwrap();
        assert_eq!(TrainingConfig::load(&path).unwrap(), config);
    }
}
