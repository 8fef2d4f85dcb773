use ndarray::{Array1, Array2};
use rand::seq::index;
use rand::{thread_rng, Rng};
use serde::{Serialize, Deserialize};
use std::collections::VecDeque;

/// One environment step for all agents at once.
///
/// Rows of the 2-D fields are agents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Observations, shape `(agents, obs_dim)`
    pub state: Array2<f32>,
    /// Encoded action used for log-densities: one-hot rows for discrete
    /// policies, the sampled value for continuous ones. `(agents, act_dim)`
    pub action: Array2<f32>,
    /// Action as handed to the environment (clipped/rescaled). `(agents, act_dim)`
    pub raw_action: Array2<f32>,
    /// Network output that produced the action, kept for diagnostics
    pub action_out: Array2<f32>,
    /// Reward per agent
    pub reward: Array1<f32>,
    /// Observations after the step, shape `(agents, obs_dim)`
    pub next_state: Array2<f32>,
    /// Liveness per agent at this step (1.0 alive, 0.0 dead)
    pub agent_mask: Array1<f32>,
    /// First step of an episode
    pub start_step: bool,
    /// The environment reported termination
    pub done: bool,
    /// Last stored step of an episode, either terminated or cut at `max_steps`
    pub last_step: bool,
}

/// Fixed-capacity ring of transitions; once full, the oldest entry is evicted.
#[derive(Clone, Debug)]
pub struct TransReplayBuffer {
    buffer: VecDeque<Transition>,
    capacity: usize,
}

impl TransReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        TransReplayBuffer {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn add_experience(&mut self, transition: Transition) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    /// Sample `batch_size` transitions using the thread RNG.
    pub fn get_batch(&self, batch_size: usize) -> Vec<&Transition> {
        self.get_batch_with(batch_size, &mut thread_rng())
    }

    /// Sample `batch_size` transitions. Indices are distinct while the
    /// buffer holds enough entries and drawn with replacement otherwise.
    pub fn get_batch_with<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<&Transition> {
        let len = self.buffer.len();
        if len == 0 {
            return Vec::new();
        }
        if batch_size <= len {
            index::sample(rng, len, batch_size)
                .into_iter()
                .map(|i| &self.buffer[i])
                .collect()
        } else {
            (0..batch_size).map(|_| &self.buffer[rng.gen_range(0..len)]).collect()
        }
    }

    /// Stored transitions, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Fixed-capacity ring of whole episodes.
///
/// Sampling returns the transitions of the chosen episodes back to back in
/// time order, so every episode still ends on its own `last_step`.
#[derive(Clone, Debug)]
pub struct EpisodeReplayBuffer {
    episodes: VecDeque<Vec<Transition>>,
    capacity: usize,
}

impl EpisodeReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        EpisodeReplayBuffer {
            episodes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn add_episode(&mut self, episode: Vec<Transition>) {
        if self.capacity == 0 || episode.is_empty() {
            return;
        }
        if self.episodes.len() == self.capacity {
            self.episodes.pop_front();
        }
        self.episodes.push_back(episode);
    }

    pub fn get_batch(&self, batch_size: usize) -> Vec<&Transition> {
        self.get_batch_with(batch_size, &mut thread_rng())
    }

    /// Sample `batch_size` episodes and flatten them.
    pub fn get_batch_with<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<&Transition> {
        let len = self.episodes.len();
        if len == 0 {
            return Vec::new();
        }
        let picks: Vec<usize> = if batch_size <= len {
            index::sample(rng, len, batch_size).into_vec()
        } else {
            (0..batch_size).map(|_| rng.gen_range(0..len)).collect()
        };
        picks
            .into_iter()
            .flat_map(|i| self.episodes[i].iter())
            .collect()
    }

    /// Number of stored episodes
    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    /// Number of stored transitions across all episodes
    pub fn num_transitions(&self) -> usize {
        self.episodes.iter().map(Vec::len).sum()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
