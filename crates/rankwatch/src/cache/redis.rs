// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Redis cache backend, shared between processes.

use super::Cache;
use crate::error::{RankwatchError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::time::Duration;

const SCAN_BATCH: usize = 500;

/// Redis-backed cache. Cloning shares the underlying connection manager.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to `redis_url`. A failure here is a configuration error: the
    /// engine refuses to run without the cache it was configured with.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| RankwatchError::Config(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| RankwatchError::Config(format!("redis connection failed: {e}")))?;
        tracing::info!("connected to redis cache");
        Ok(Self { conn })
    }
}

fn cache_err(e: RedisError) -> RankwatchError {
    RankwatchError::Cache(e.to_string())
}

/// Escape glob metacharacters so a URL prefix matches literally.
fn glob_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('*');
    out
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(cache_err)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, secs).await.map_err(cache_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(cache_err)?;
        Ok(())
    }

    async fn delete_pattern(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pattern = glob_escape(prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(cache_err)?;

            if !keys.is_empty() {
                let n: u64 = conn.del(&keys).await.map_err(cache_err)?;
                removed += n;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!("purged {removed} redis keys matching {pattern:?}");
        Ok(removed)
    }
}
