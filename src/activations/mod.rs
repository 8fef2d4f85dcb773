//! # Activation Functions Module
//!
//! Element-wise nonlinearities used by the hand-written forward and backward
//! passes in [`crate::layers`]. Every function has a matching derivative so
//! that backward passes never need an autodiff engine.
//!
//! ## Available Activations
//!
//! - **ReLU**: `max(0, x)`, used by the observation encoder and the value body
//! - **Sigmoid**: `1 / (1 + e^(-x))`, used by communication gates and LSTM gates
//! - **Tanh**: used by the LSTM candidate and cell output
//! - **Linear**: identity, used by action and value heads

pub mod functions;

pub use functions::{sigmoid, sigmoid_derivative, tanh_derivative, Activation};
