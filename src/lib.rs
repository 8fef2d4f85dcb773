//! # Hermes - Multi-Agent Policy-Gradient Training
//!
//! Hermes trains cooperative agents that share one policy network and one
//! value network. The policy is IC3Net-style: agents encode their
//! observations, exchange gated hidden-state messages for a fixed number of
//! rounds through a shared LSTM cell, then emit an action distribution.
//!
//! ## Key Features
//!
//! - **Communication-gated policy**: hard-rounded learned gates, self-exclusion
//!   mask and dead-agent masking
//! - **Credit assignment**: REINFORCE, actor-critic and target-bootstrapped
//!   (DDPG-style) losses, one loss per agent
//! - **Per-agent optimizers** over shared parameters, driven by a retained
//!   forward graph and gradient snapshots
//! - **Replay**: per-step and per-episode buffers
//! - **Value-based path**: independent Q-network with an online trainer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hermes::config::TrainingConfig;
//! use hermes::registry::ModelRegistry;
//!
//! let config = TrainingConfig::new().agent_num(3).obs_size(18).action_dim(5);
//! let registry = ModelRegistry::with_defaults();
//! let model = registry.build("ic3net", &config).unwrap().into_ic3net().unwrap();
//! // PgTrainer::new(config, model, env)?.train()?;
//! # let _ = model;
//! ```
//!
//! ## Module Organization
//!
//! - [`activations`] - Activation functions and derivatives
//! - [`batch`] - Column-wise training batches
//! - [`config`] - Hyperparameters
//! - [`credit`] - Loss engine and credit-assignment rules
//! - [`distributions`] - Categorical and Gaussian helpers
//! - [`error`] - Error types and result handling
//! - [`gradients`] - Gradient leaves shared by optimizers
//! - [`layers`] - Linear layer and LSTM cell with explicit backward passes
//! - [`logger`] - Per-episode statistics and summary writers
//! - [`metrics`] - Running reward statistics
//! - [`models`] - Policy and value networks
//! - [`multi_agent`] - Environment interface
//! - [`optimizer`] - Optimization algorithms and gradient clipping
//! - [`registry`] - Name to model lookup
//! - [`replay_buffer`] - Experience replay
//! - [`trainer`] - Training loops

pub mod activations;
pub mod batch;
pub mod config;
pub mod credit;
pub mod distributions;
pub mod error;
pub mod gradients;
pub mod layers;
pub mod logger;
pub mod metrics;
pub mod models;
pub mod multi_agent;
pub mod optimizer;
pub mod registry;
pub mod replay_buffer;
pub mod trainer;

pub use batch::Batch;
pub use config::{RewardRecordType, Strategy, TrainingConfig};
pub use error::{HermesError, Result};
pub use models::{CommVariant, Ic3Net, IndependentQNet, ModelSpec};
pub use registry::ModelRegistry;
pub use replay_buffer::{EpisodeReplayBuffer, TransReplayBuffer, Transition};
pub use trainer::{PgTrainer, QTrainer};
