// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for the rankwatch engine.
//!
//! Only configuration-class failures cross the orchestrator boundary as
//! errors. Blocks, CAPTCHAs, timeouts and network failures are ordinary
//! [`FetchOutcome`](crate::types::FetchOutcome) values.

use thiserror::Error;

/// All errors the engine can raise to its caller.
#[derive(Error, Debug)]
pub enum RankwatchError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("cache backend error: {0}")]
    Cache(String),

    #[error("browser engine unavailable: {0}")]
    Browser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RankwatchError {
    /// Whether this error belongs to the configuration class that is
    /// propagated to the caller instead of being absorbed.
    pub fn is_configuration(&self) -> bool {
        matches!(self, RankwatchError::Config(_) | RankwatchError::Browser(_))
    }
}

pub type Result<T> = std::result::Result<T, RankwatchError>;
