#![allow(dead_code)]

use hermes::error::{HermesError, Result};
use hermes::multi_agent::{EpisodeInfo, MultiAgentEnvironment, StepResult};
use hermes::replay_buffer::Transition;
use ndarray::{Array1, Array2};

/// Agents on a line walk toward a shared meeting point.
///
/// Observation per agent: `[position, target - position, progress]`.
/// Discrete actions are `{left, stay, right}` (one-hot rows); continuous
/// actions use the first column as a velocity in `[-1, 1]`. Reward is the
/// negative distance to the target after the move.
pub struct Rendezvous {
    positions: Array1<f32>,
    target: f32,
    horizon: usize,
    t: usize,
    continuous: bool,
}

impl Rendezvous {
    pub const OBS_DIM: usize = 3;

    pub fn new(agents: usize, horizon: usize) -> Self {
        Rendezvous {
            positions: Self::start(agents),
            target: 0.5,
            horizon,
            t: 0,
            continuous: false,
        }
    }

    pub fn continuous(mut self) -> Self {
        self.continuous = true;
        self
    }

    fn start(agents: usize) -> Array1<f32> {
        Array1::from_shape_fn(agents, |i| -1.0 + 2.0 * i as f32 / agents.max(2) as f32)
    }

    fn observe(&self) -> Array2<f32> {
        let progress = self.t as f32 / self.horizon as f32;
        Array2::from_shape_fn((self.positions.len(), Self::OBS_DIM), |(i, j)| match j {
            0 => self.positions[i],
            1 => self.target - self.positions[i],
            _ => progress,
        })
    }
}

impl MultiAgentEnvironment for Rendezvous {
    fn num_agents(&self) -> usize {
        self.positions.len()
    }

    fn obs_dim(&self) -> usize {
        Self::OBS_DIM
    }

    fn action_dim(&self) -> usize {
        if self.continuous {
            1
        } else {
            3
        }
    }

    fn reset(&mut self) -> Result<Array2<f32>> {
        self.positions = Self::start(self.positions.len());
        self.t = 0;
        Ok(self.observe())
    }

    fn step(&mut self, actions: &Array2<f32>) -> Result<StepResult> {
        if actions.dim() != (self.num_agents(), self.action_dim()) {
            return Err(HermesError::dimension_mismatch(
                format!("{:?}", (self.num_agents(), self.action_dim())),
                format!("{:?}", actions.dim()),
            ));
        }
        for (i, row) in actions.rows().into_iter().enumerate() {
            let velocity = if self.continuous {
                row[0]
            } else {
                let choice = row
                    .iter()
                    .enumerate()
                    .fold(0, |best, (k, &v)| if v > row[best] { k } else { best });
                choice as f32 - 1.0
            };
            self.positions[i] += 0.1 * velocity;
        }
        self.t += 1;
        let reward = self.positions.mapv(|p| -(p - self.target).abs());
        Ok(StepResult {
            next_obs: self.observe(),
            reward,
            done: self.t >= self.horizon,
            info: EpisodeInfo::all_alive(self.num_agents()),
        })
    }
}

/// A hand-built discrete transition for `agents` agents with three actions.
pub fn transition(agents: usize, reward: f32, start_step: bool, last_step: bool) -> Transition {
    let mut action = Array2::zeros((agents, 3));
    for i in 0..agents {
        action[[i, i % 3]] = 1.0;
    }
    Transition {
        state: Array2::from_shape_fn((agents, Rendezvous::OBS_DIM), |(i, j)| 0.1 * i as f32 - 0.2 * j as f32),
        raw_action: action.clone(),
        action,
        action_out: Array2::zeros((agents, 3)),
        reward: Array1::from_elem(agents, reward),
        next_state: Array2::from_elem((agents, Rendezvous::OBS_DIM), 0.25),
        agent_mask: Array1::ones(agents),
        start_step,
        done: last_step,
        last_step,
    }
}
