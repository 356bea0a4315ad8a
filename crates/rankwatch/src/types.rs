// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core value types shared by every layer of the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest rank the engine will ever report.
pub const MAX_RANK: u32 = 10_000_000;

/// A validated best-sellers rank in `[1, MAX_RANK]`.
///
/// The only constructors are [`RankValue::new`] and [`RankValue::parse`], both of
/// which reject zero, negative, non-numeric, and out-of-range values, so a
/// `RankValue` held anywhere in the program is always valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RankValue(u32);

impl RankValue {
    /// Accept `value` only if it lies in `[1, MAX_RANK]`.
    pub fn new(value: u64) -> Option<Self> {
        if value == 0 || value > u64::from(MAX_RANK) {
            return None;
        }
        Some(Self(value as u32))
    }

    /// Strict numeric validator for captured rank strings.
    ///
    /// Strips `#`, commas and whitespace, then requires the remainder to be
    /// ASCII digits only. Anything else, including a leading `-`, is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned: String = raw
            .chars()
            .filter(|c| *c != '#' && *c != ',' && !c.is_whitespace())
            .collect();

        if cleaned.is_empty() || !cleaned.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        // Longer than u64 can hold is certainly out of range.
        let value: u64 = cleaned.parse().ok()?;
        Self::new(value)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl<'de> Deserialize<'de> for RankValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = u64::deserialize(deserializer)?;
        RankValue::new(raw)
            .ok_or_else(|| serde::de::Error::custom(format!("rank {raw} out of range")))
    }
}

impl fmt::Display for RankValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One of the two escalating fetch strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Lightweight HTTP client.
    Http,
    /// Full browser emulation.
    Browser,
}

impl Tier {
    /// Numeric tier as written to the failure log (1 or 2).
    pub fn number(self) -> u8 {
        match self {
            Tier::Http => 1,
            Tier::Browser => 2,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier{}", self.number())
    }
}

/// Which tiers the caller allows for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierPreference {
    /// Tier-1 first, escalate to Tier-2 on a block verdict.
    #[default]
    Auto,
    /// Tier-1 only; a block verdict ends the request.
    HttpOnly,
    /// Skip Tier-1 entirely.
    BrowserOnly,
}

/// Verdict of the block classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Clean,
    Blocked,
    Captcha,
}

/// Outcome of one tier fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    Success,
    Blocked,
    Captcha,
    NetworkError,
    Timeout,
}

impl FetchOutcome {
    /// Transient conditions: retried locally, never escalate block state.
    pub fn is_transient(self) -> bool {
        matches!(self, FetchOutcome::NetworkError | FetchOutcome::Timeout)
    }

    /// Block-class conditions that feed the target state store.
    pub fn is_block(self) -> bool {
        matches!(self, FetchOutcome::Blocked | FetchOutcome::Captcha)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FetchOutcome::Success => "success",
            FetchOutcome::Blocked => "blocked",
            FetchOutcome::Captcha => "captcha",
            FetchOutcome::NetworkError => "network_error",
            FetchOutcome::Timeout => "timeout",
        }
    }
}

impl From<Verdict> for FetchOutcome {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Clean => FetchOutcome::Success,
            Verdict::Blocked => FetchOutcome::Blocked,
            Verdict::Captcha => FetchOutcome::Captcha,
        }
    }
}

/// Terminal status of one resolve request, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    /// Clean page without an extractable rank. Not a block.
    RankNotFound,
    Blocked,
    Captcha,
    /// Skipped without a network call: the target is inside its cooldown.
    CoolingDown,
    NetworkError,
    Timeout,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::Success => "success",
            ReportStatus::RankNotFound => "rank_not_found",
            ReportStatus::Blocked => "blocked",
            ReportStatus::Captcha => "captcha",
            ReportStatus::CoolingDown => "cooling_down",
            ReportStatus::NetworkError => "network_error",
            ReportStatus::Timeout => "timeout",
        }
    }

    /// Whether the caller should read this as "blocked".
    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            ReportStatus::Blocked | ReportStatus::Captcha | ReportStatus::CoolingDown
        )
    }
}

impl From<FetchOutcome> for ReportStatus {
    fn from(outcome: FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Success => ReportStatus::Success,
            FetchOutcome::Blocked => ReportStatus::Blocked,
            FetchOutcome::Captcha => ReportStatus::Captcha,
            FetchOutcome::NetworkError => ReportStatus::NetworkError,
            FetchOutcome::Timeout => ReportStatus::Timeout,
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one fetch attempt at one tier.
///
/// Produced by a tier fetcher, consumed by the orchestrator. `rank` is filled
/// in when the page was inspected and yielded a valid value.
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    #[serde(skip)]
    pub html: Option<String>,
    pub outcome: FetchOutcome,
    pub tier: Tier,
    pub duration_ms: u64,
    pub detail: Option<String>,
    pub rank: Option<RankValue>,
    /// Whether a 500/503 backoff-and-retry happened inside the tier.
    pub retried: bool,
    /// Length of the page that was classified, if any.
    pub page_length: Option<usize>,
}

impl FetchResult {
    pub fn new(tier: Tier, outcome: FetchOutcome) -> Self {
        Self {
            html: None,
            outcome,
            tier,
            duration_ms: 0,
            detail: None,
            rank: None,
            retried: false,
            page_length: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_retried(mut self, retried: bool) -> Self {
        self.retried = retried;
        self
    }

    /// Attach inspected HTML together with whatever rank it yielded.
    pub fn with_page(mut self, html: String, rank: Option<RankValue>) -> Self {
        self.page_length = Some(html.len());
        self.html = Some(html);
        self.rank = rank;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == FetchOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_separators() {
        assert_eq!(RankValue::parse("#12,345").map(RankValue::get), Some(12_345));
        assert_eq!(RankValue::parse(" 1 726 ").map(RankValue::get), Some(1_726));
        assert_eq!(RankValue::parse("#1").map(RankValue::get), Some(1));
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        assert!(RankValue::parse("#0").is_none());
        assert!(RankValue::parse("-5").is_none());
        assert!(RankValue::parse("15,000,000").is_none());
        assert!(RankValue::parse("99999999999999999999999").is_none());
        assert_eq!(RankValue::parse("10,000,000").map(RankValue::get), Some(MAX_RANK));
    }

    #[test]
    fn test_parse_rejects_non_digits() {
        assert!(RankValue::parse("12.5").is_none());
        assert!(RankValue::parse("1,2k").is_none());
        assert!(RankValue::parse("#").is_none());
        assert!(RankValue::parse("").is_none());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: RankValue = serde_json::from_str("5678").unwrap();
        assert_eq!(ok.get(), 5678);
        assert!(serde_json::from_str::<RankValue>("0").is_err());
        assert!(serde_json::from_str::<RankValue>("10000001").is_err());
    }

    #[test]
    fn test_outcome_classes() {
        assert!(FetchOutcome::Timeout.is_transient());
        assert!(!FetchOutcome::Timeout.is_block());
        assert!(FetchOutcome::Captcha.is_block());
        assert_eq!(FetchOutcome::from(Verdict::Captcha), FetchOutcome::Captcha);
    }
}
