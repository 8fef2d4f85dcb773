//! # Multi-Agent Environment Interface
//!
//! Trainers talk to the simulation only through [`MultiAgentEnvironment`]:
//! all agents act simultaneously, the environment reports a reward per
//! agent and which agents are still alive.

pub mod environment;

pub use environment::{EpisodeInfo, MultiAgentEnvironment, StepResult};
