// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-process cache backend.
//!
//! Expired entries are dropped lazily on read and during prefix deletes.

use super::Cache;
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// DashMap-backed cache for single-process deployments and tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all expired entries.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        // The read guard is gone by now; removing under it would deadlock.
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, prefix: &str) -> Result<u64> {
        let now = Instant::now();
        let mut removed = 0u64;
        self.entries.retain(|key, entry| {
            if key.starts_with(prefix) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
                return false;
            }
            true
        });
        tracing::debug!("purged {removed} cache entries with prefix {prefix:?}");
        Ok(removed)
    }
}
