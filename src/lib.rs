//! Failure analysis over equipment failure datasets.
//!
//! Two paths share one [`state::AppState`]:
//!
//! - the interactive agent loop ([`agent`]) answers questions through
//!   perceive, decide, act and explain;
//! - the background job ([`cache`]) precomputes the long failure report right
//!   after an upload so report reads never wait on generation.
//!
//! [`service::AnalystService`] is the entry point for both.

pub mod agent;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod generation;
pub mod knowledge;
pub mod normalizer;
pub mod prompts;
pub mod providers;
pub mod rate_limit;
pub mod service;
pub mod state;
pub mod stats;

pub use error::{AnalystError, Result};
pub use service::AnalystService;
