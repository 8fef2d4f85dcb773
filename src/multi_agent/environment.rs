use ndarray::{Array1, Array2};

/// Per-step side information from the environment.
#[derive(Clone, Debug, PartialEq)]
pub struct EpisodeInfo {
    /// Liveness per agent, 1.0 alive and 0.0 dead
    pub alive_mask: Array1<f32>,
}

impl EpisodeInfo {
    pub fn all_alive(num_agents: usize) -> Self {
        EpisodeInfo {
            alive_mask: Array1::ones(num_agents),
        }
    }

    pub fn num_alive(&self) -> usize {
        self.alive_mask.iter().filter(|&&a| a > 0.0).count()
    }
}

/// Result of one simultaneous step of all agents.
#[derive(Clone, Debug)]
pub struct StepResult {
    /// `(agents, obs_dim)`
    pub next_obs: Array2<f32>,
    /// Reward per agent
    pub reward: Array1<f32>,
    pub done: bool,
    pub info: EpisodeInfo,
}

/// Environment in which every agent acts at every step.
///
/// Observations are one row per agent. Actions arrive the same way: one-hot
/// rows for discrete action spaces, raw values for continuous ones.
pub trait MultiAgentEnvironment {
    fn num_agents(&self) -> usize;

    fn obs_dim(&self) -> usize;

    fn action_dim(&self) -> usize;

    /// Start a new episode and return the first observations.
    fn reset(&mut self) -> crate::error::Result<Array2<f32>>;

    fn step(&mut self, actions: &Array2<f32>) -> crate::error::Result<StepResult>;
}
