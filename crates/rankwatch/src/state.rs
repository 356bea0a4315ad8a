// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-target block state with exponential backoff.
//!
//! Active cooldowns live in a `DashMap` keyed by normalized URL, so workers on
//! disjoint targets never contend. When a cooldown expires the record is
//! evicted on the next read, but its block count moves to a strike ledger for
//! `strike_memory_secs`: a target that gets blocked again soon after cooling
//! down resumes the backoff where it left off. Only a success resets it.
//!
//! Every mutation is written through to the `block:` cache namespace so that
//! cooldowns survive a process restart. Map guards are always dropped before
//! the cache is awaited.

use crate::cache::{Cache, Namespace};
use crate::config::BackoffConfig;
use crate::target::Target;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Cooldown record of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockState {
    pub url: String,
    pub blocked_until: DateTime<Utc>,
    pub consecutive_blocks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BlockState {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.blocked_until
    }

    /// Remaining cooldown, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.blocked_until - now).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy)]
struct Strikes {
    count: u32,
    forget_at: DateTime<Utc>,
}

/// The target state store.
pub struct BlockStore {
    config: BackoffConfig,
    active: DashMap<String, BlockState>,
    strikes: DashMap<String, Strikes>,
    cache: Option<Arc<dyn Cache>>,
}

impl BlockStore {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            active: DashMap::new(),
            strikes: DashMap::new(),
            cache: None,
        }
    }

    /// Persist block state through `cache`.
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Cooldown for the `n`-th consecutive block: `base * 2^(n-1)`, capped.
    pub fn delay_for(&self, n: u32) -> Duration {
        let factor = 2u64.saturating_pow(n.saturating_sub(1));
        let secs = self
            .config
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.config.max_delay_secs);
        Duration::from_secs(secs)
    }

    // ── Public async API ────────────────────────────────────────────────

    pub async fn is_blocked(&self, target: &Target) -> bool {
        self.hydrate(target).await;
        self.is_blocked_at(target.url(), Utc::now())
    }

    /// Current active cooldown, if any.
    pub async fn block_state(&self, target: &Target) -> Option<BlockState> {
        self.hydrate(target).await;
        let now = Utc::now();
        self.is_blocked_at(target.url(), now);
        self.active.get(target.url()).map(|s| s.clone())
    }

    pub async fn record_block(&self, target: &Target, reason: &str) -> BlockState {
        self.hydrate(target).await;
        let now = Utc::now();
        let state = self.record_block_at(target.url(), reason, now);

        tracing::warn!(
            "blocked {} (strike {}, cooling down {}s): {reason}",
            target,
            state.consecutive_blocks,
            state.remaining(now).as_secs()
        );
        self.persist(target, &state, now).await;
        state
    }

    pub async fn record_success(&self, target: &Target) {
        let cleared = self.clear(target.url());
        if cleared {
            tracing::info!("cleared block state for {target}");
        }
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete(&Namespace::Block.key(target)).await {
                tracing::warn!("failed to clear persisted block state for {target}: {e}");
            }
        }
    }

    /// Number of targets currently tracked as cooling down.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    // ── Synchronous core ────────────────────────────────────────────────

    /// Lazily evicts an expired record, keeping its strikes.
    fn is_blocked_at(&self, url: &str, now: DateTime<Utc>) -> bool {
        let expired = match self.active.get(url) {
            Some(state) if state.is_active(now) => return true,
            Some(_) => true,
            None => false,
        };
        if expired {
            if let Some((_, state)) = self.active.remove_if(url, |_, s| !s.is_active(now)) {
                self.remember_strikes(&state);
            }
        }
        false
    }

    fn record_block_at(&self, url: &str, reason: &str, now: DateTime<Utc>) -> BlockState {
        self.is_blocked_at(url, now);

        let previous = self.strikes_at(url, now);
        let mut entry = self
            .active
            .entry(url.to_string())
            .or_insert_with(|| BlockState {
                url: url.to_string(),
                blocked_until: now,
                consecutive_blocks: previous,
                reason: None,
            });

        let count = entry.consecutive_blocks.saturating_add(1);
        let delay = TimeDelta::from_std(self.delay_for(count)).unwrap_or(TimeDelta::MAX);
        let until = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);

        entry.consecutive_blocks = count;
        entry.blocked_until = until.max(entry.blocked_until);
        entry.reason = Some(reason.to_string());
        let state = entry.clone();
        drop(entry);

        self.strikes.remove(url);
        state
    }

    fn clear(&self, url: &str) -> bool {
        let active = self.active.remove(url).is_some();
        let strikes = self.strikes.remove(url).is_some();
        active || strikes
    }

    fn strikes_at(&self, url: &str, now: DateTime<Utc>) -> u32 {
        let count = match self.strikes.get(url) {
            Some(s) if now < s.forget_at => return s.count,
            Some(_) => 0,
            None => return 0,
        };
        self.strikes.remove(url);
        count
    }

    fn remember_strikes(&self, state: &BlockState) {
        let memory = TimeDelta::try_seconds(self.config.strike_memory_secs as i64)
            .unwrap_or(TimeDelta::MAX);
        let forget_at = state
            .blocked_until
            .checked_add_signed(memory)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.strikes.insert(
            state.url.clone(),
            Strikes {
                count: state.consecutive_blocks,
                forget_at,
            },
        );
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Load persisted state for a target this process has not seen.
    async fn hydrate(&self, target: &Target) {
        let Some(cache) = &self.cache else { return };
        if self.active.contains_key(target.url()) || self.strikes.contains_key(target.url()) {
            return;
        }

        let raw = match cache.get(&Namespace::Block.key(target)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("failed to read persisted block state for {target}: {e}");
                return;
            }
        };
        let state: BlockState = match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("discarding corrupt block state for {target}: {e}");
                return;
            }
        };

        let now = Utc::now();
        if state.is_active(now) {
            self.active.entry(state.url.clone()).or_insert(state);
        } else {
            self.remember_strikes(&state);
        }
    }

    async fn persist(&self, target: &Target, state: &BlockState, now: DateTime<Utc>) {
        let Some(cache) = &self.cache else { return };
        let ttl = state.remaining(now) + Duration::from_secs(self.config.strike_memory_secs);
        let value = match serde_json::to_string(state) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("failed to serialize block state for {target}: {e}");
                return;
            }
        };
        if let Err(e) = cache.set(&Namespace::Block.key(target), &value, ttl).await {
            tracing::warn!("failed to persist block state for {target}: {e}");
        }
    }
}
