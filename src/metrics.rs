//! Running reward statistics.

use serde::{Serialize, Deserialize};

use crate::config::RewardRecordType;

/// Incremental mean and variance (Welford), updated one value at a time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunningMean {
    count: usize,
    mean: f64,
    m2: f64,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update with a new value
    pub fn update(&mut self, value: f32) {
        self.count += 1;
        let delta = value as f64 - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value as f64 - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn mean(&self) -> f32 {
        self.mean as f32
    }

    pub fn variance(&self) -> f32 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64) as f32
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Feeds a [`RunningMean`] according to a [`RewardRecordType`].
#[derive(Debug, Clone)]
pub struct RewardRecorder {
    record_type: RewardRecordType,
    running: RunningMean,
    episode_sum: f32,
    episode_steps: usize,
}

impl RewardRecorder {
    pub fn new(record_type: RewardRecordType) -> Self {
        RewardRecorder {
            record_type,
            running: RunningMean::new(),
            episode_sum: 0.0,
            episode_steps: 0,
        }
    }

    /// Record one step; `step_mean` is the step's reward averaged over agents.
    pub fn record_step(&mut self, step_mean: f32) {
        match self.record_type {
            RewardRecordType::MeanStep => self.running.update(step_mean),
            RewardRecordType::EpisodeMeanStep => {
                self.episode_sum += step_mean;
                self.episode_steps += 1;
            }
        }
    }

    /// Close the current episode.
    pub fn end_episode(&mut self) {
        if self.record_type == RewardRecordType::EpisodeMeanStep && self.episode_steps > 0 {
            self.running.update(self.episode_sum / self.episode_steps as f32);
        }
        self.episode_sum = 0.0;
        self.episode_steps = 0;
    }

    pub fn mean_reward(&self) -> f32 {
        self.running.mean()
    }
}
