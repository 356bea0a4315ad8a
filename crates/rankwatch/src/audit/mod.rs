// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Structured failure log for offline forensic review.

pub mod failure_log;

pub use failure_log::{JsonlFailureLog, MemoryFailureLog};

use crate::error::Result;
use crate::types::Tier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One failed tier attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub tier: u8,
    pub failure_type: String,
    pub message: String,
    pub page_length: Option<usize>,
    pub page_snippet: Option<String>,
    pub retry_after: Option<DateTime<Utc>>,
}

impl FailureRecord {
    pub fn new(
        url: impl Into<String>,
        tier: Tier,
        failure_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            url: url.into(),
            tier: tier.number(),
            failure_type: failure_type.into(),
            message: message.into(),
            page_length: None,
            page_snippet: None,
            retry_after: None,
        }
    }

    /// Attach the page length and its first `snippet_chars` characters.
    pub fn with_page(mut self, html: &str, snippet_chars: usize) -> Self {
        self.page_length = Some(html.len());
        if snippet_chars > 0 && !html.is_empty() {
            self.page_snippet = Some(html.chars().take(snippet_chars).collect());
        }
        self
    }

    pub fn with_retry_after(mut self, retry_after: DateTime<Utc>) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Append-only sink for failure records.
pub trait FailureSink: Send + Sync {
    fn append(&self, record: &FailureRecord) -> Result<()>;
}
