// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Rankwatch: a tiered, low-profile fetch-and-extract engine for best-sellers
//! rank tracking.
//!
//! The [`Orchestrator`] is the entry point. It checks per-target block state,
//! tries a plain HTTP fetch, escalates to a pooled headless browser when the
//! page looks blocked, classifies what came back and extracts a validated
//! [`RankValue`]. [`blocking::RankClient`] wraps it for synchronous callers.

pub mod audit;
pub mod blocking;
pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod metrics;
pub mod orchestrator;
pub mod renderer;
pub mod state;
pub mod target;
pub mod types;

pub use classify::{BlockClassifier, Inspection, PageInspector};
pub use config::EngineConfig;
pub use error::{RankwatchError, Result};
pub use extract::RankExtractor;
pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use orchestrator::{Orchestrator, OrchestratorParts, OrchestratorSettings, RankReport};
pub use state::{BlockState, BlockStore};
pub use target::Target;
pub use types::*;
