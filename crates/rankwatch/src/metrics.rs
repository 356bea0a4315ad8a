// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Operational counters for resolve requests.
//!
//! Only raw counts are stored. Rates are derived in [`MetricsRecorder::snapshot`]
//! so they always agree with the counts they came from.

use crate::types::{ReportStatus, Tier};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct Counters {
    total_requests: u64,
    successes: u64,
    captcha_hits: u64,
    network_errors: u64,
    other_errors: u64,
    retries: u64,
    durations_ms: Vec<u64>,
    failure_reasons: BTreeMap<String, u64>,
    tier_successes: BTreeMap<String, u64>,
    since: DateTime<Utc>,
}

impl Counters {
    fn new() -> Self {
        Self {
            total_requests: 0,
            successes: 0,
            captcha_hits: 0,
            network_errors: 0,
            other_errors: 0,
            retries: 0,
            durations_ms: Vec::new(),
            failure_reasons: BTreeMap::new(),
            tier_successes: BTreeMap::new(),
            since: Utc::now(),
        }
    }
}

/// Point-in-time view of the counters with derived rates.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successes: u64,
    pub captcha_hits: u64,
    pub network_errors: u64,
    pub other_errors: u64,
    pub retries: u64,
    pub success_rate: f64,
    pub captcha_rate: f64,
    pub retry_rate: f64,
    pub network_error_rate: f64,
    pub mean_duration_ms: f64,
    pub max_duration_ms: u64,
    pub failure_reasons: BTreeMap<String, u64>,
    pub tier_successes: BTreeMap<String, u64>,
    pub since: DateTime<Utc>,
}

/// Shared metrics accumulator. One update per terminal request.
#[derive(Debug)]
pub struct MetricsRecorder {
    inner: Mutex<Counters>,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Counters::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one terminal request. `reason` defaults to the status name for
    /// non-success outcomes.
    pub fn record(
        &self,
        duration: Duration,
        status: ReportStatus,
        tier: Option<Tier>,
        retried: bool,
        reason: Option<&str>,
    ) {
        let mut c = self.lock();
        c.total_requests += 1;
        c.durations_ms.push(duration.as_millis() as u64);
        if retried {
            c.retries += 1;
        }

        match status {
            ReportStatus::Success => {
                c.successes += 1;
                if let Some(tier) = tier {
                    *c.tier_successes.entry(tier.to_string()).or_default() += 1;
                }
                return;
            }
            ReportStatus::Captcha => c.captcha_hits += 1,
            ReportStatus::NetworkError | ReportStatus::Timeout => c.network_errors += 1,
            ReportStatus::Blocked | ReportStatus::RankNotFound | ReportStatus::CoolingDown => {
                c.other_errors += 1
            }
        }

        let reason = reason.unwrap_or(status.as_str()).to_string();
        *c.failure_reasons.entry(reason).or_default() += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = self.lock();
        let rate = |n: u64| {
            if c.total_requests == 0 {
                0.0
            } else {
                n as f64 / c.total_requests as f64
            }
        };
        let mean_duration_ms = if c.durations_ms.is_empty() {
            0.0
        } else {
            c.durations_ms.iter().sum::<u64>() as f64 / c.durations_ms.len() as f64
        };

        MetricsSnapshot {
            total_requests: c.total_requests,
            successes: c.successes,
            captcha_hits: c.captcha_hits,
            network_errors: c.network_errors,
            other_errors: c.other_errors,
            retries: c.retries,
            success_rate: rate(c.successes),
            captcha_rate: rate(c.captcha_hits),
            retry_rate: rate(c.retries),
            network_error_rate: rate(c.network_errors),
            mean_duration_ms,
            max_duration_ms: c.durations_ms.iter().copied().max().unwrap_or(0),
            failure_reasons: c.failure_reasons.clone(),
            tier_successes: c.tier_successes.clone(),
            since: c.since,
        }
    }

    /// Operator reset.
    pub fn reset(&self) {
        *self.lock() = Counters::new();
        tracing::info!("metrics reset");
    }

    pub fn log_stats(&self) {
        let s = self.snapshot();
        tracing::info!(
            "requests={} success={} ({:.1}%) captcha={} ({:.1}%) network_errors={} ({:.1}%) other={} retries={} mean={:.0}ms max={}ms",
            s.total_requests,
            s.successes,
            s.success_rate * 100.0,
            s.captcha_hits,
            s.captcha_rate * 100.0,
            s.network_errors,
            s.network_error_rate * 100.0,
            s.other_errors,
            s.retries,
            s.mean_duration_ms,
            s.max_duration_ms
        );
        for (reason, count) in &s.failure_reasons {
            tracing::info!("  failure {reason}: {count}");
        }
    }
}
