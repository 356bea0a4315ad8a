// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Synchronous facade over the async engine.
//!
//! Owns its own multi-threaded runtime. Do not use from inside an async
//! context; call [`Orchestrator`] directly there.

use crate::config::EngineConfig;
use crate::error::{RankwatchError, Result};
use crate::metrics::MetricsSnapshot;
use crate::orchestrator::{Orchestrator, RankReport};
use crate::types::{RankValue, TierPreference};
use tokio::runtime::Runtime;

pub struct RankClient {
    runtime: Runtime,
    engine: Orchestrator,
}

impl RankClient {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let runtime = build_runtime()?;
        let engine = runtime.block_on(Orchestrator::from_config(config))?;
        Ok(Self { runtime, engine })
    }

    /// Wrap an already assembled orchestrator.
    pub fn with_orchestrator(engine: Orchestrator) -> Result<Self> {
        Ok(Self {
            runtime: build_runtime()?,
            engine,
        })
    }

    pub fn extract_rank(&self, url: &str, preference: TierPreference) -> Result<Option<RankValue>> {
        self.runtime
            .block_on(self.engine.extract_rank(url, preference))
    }

    pub fn resolve(&self, url: &str, preference: TierPreference) -> Result<RankReport> {
        self.runtime.block_on(self.engine.resolve(url, preference))
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.engine.metrics().snapshot()
    }

    pub fn shutdown(self) -> Result<()> {
        self.runtime.block_on(self.engine.shutdown())
    }
}

fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("rankwatch")
        .build()
        .map_err(RankwatchError::Io)
}
