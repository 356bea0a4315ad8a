// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Key/value cache with per-entry TTL.
//!
//! One backend holds three namespaces: raw HTML (short TTL), derived values
//! such as the last known rank (long TTL), and persisted block state. Keys are
//! `<namespace>:<normalized url>`, so namespaces never collide.

pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use memory::MemoryCache;
#[cfg(feature = "redis-backend")]
pub use self::redis::RedisCache;

use crate::config::{CacheBackend, CacheConfig};
use crate::error::{RankwatchError, Result};
use crate::target::Target;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Cache collaborator. Implementations must be safe to share between workers.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Delete every key starting with `prefix`, returning how many went.
    async fn delete_pattern(&self, prefix: &str) -> Result<u64>;
}

/// Cache namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Raw HTML of pages that inspected clean.
    Html,
    /// Last successfully extracted rank.
    Rank,
    /// Persisted block state.
    Block,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Html, Namespace::Rank, Namespace::Block];

    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Html => "html:",
            Namespace::Rank => "rank:",
            Namespace::Block => "block:",
        }
    }

    pub fn key(self, target: &Target) -> String {
        format!("{}{}", self.prefix(), target.url())
    }
}

/// Build the configured backend.
pub async fn connect(config: &CacheConfig) -> Result<Arc<dyn Cache>> {
    match config.backend {
        CacheBackend::Memory => Ok(Arc::new(MemoryCache::new())),
        CacheBackend::Redis => connect_redis(config).await,
    }
}

#[cfg(feature = "redis-backend")]
async fn connect_redis(config: &CacheConfig) -> Result<Arc<dyn Cache>> {
    let url = config
        .redis_url
        .as_deref()
        .ok_or_else(|| RankwatchError::Config("cache.redis_url is required".into()))?;
    Ok(Arc::new(RedisCache::connect(url).await?))
}

#[cfg(not(feature = "redis-backend"))]
async fn connect_redis(_config: &CacheConfig) -> Result<Arc<dyn Cache>> {
    Err(RankwatchError::Config(
        "redis cache backend requested but rankwatch was built without `redis-backend`".into(),
    ))
}
