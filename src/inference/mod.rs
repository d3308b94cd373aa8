//! Inference layer: talks to the local model server.
//!
//! This module handles all communication with the model endpoint:
//! - The [`ModelBackend`] trait the agent core depends on
//! - An Ollama HTTP implementation ([`OllamaClient`])
//! - Backend configuration loading from `.devpilot/config.yaml`
//! - Function-call extraction from free-form model text
//!
//! Switching models is a config change, not a code change.

pub mod backend;
pub mod client;
pub mod config;
pub mod errors;
pub mod function_call;
pub mod types;

// Re-exports for convenience
pub use backend::ModelBackend;
pub use client::OllamaClient;
pub use config::{ModelConfig, ModelsConfig};
pub use errors::InferenceError;
pub use function_call::{extract_function_call, FunctionCall};
pub use types::{Completion, GenerateOptions, GenerateRequest, ModelInfo};
