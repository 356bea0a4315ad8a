// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Block classifier and the combined page inspection.
//!
//! The classifier is a heuristic. Treating a block page as clean is the
//! expensive mistake (the rank silently goes missing), so the default verdict
//! is `Blocked` and only positive evidence makes a page clean.

use crate::config::{ClassifierConfig, EngineConfig};
use crate::error::{RankwatchError, Result};
use crate::extract::RankExtractor;
use crate::types::{RankValue, Verdict};
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;

const DEFAULT_CAPTCHA_PATTERNS: &[&str] = &[
    r"enter the characters you see",
    r"type the characters",
    r"robot\s+check",
    r"verify\s+you\s+are\s+(a\s+)?human",
    r"make sure you'?re not a robot",
    r"unusual\s+traffic",
    r"validateCaptcha",
    r"captcha",
];

const DEFAULT_INDICATOR_PATTERNS: &[&str] = &[
    r"add[\s_-]to[\s_-]cart",
    r"customer\s+reviews",
    r"a-price|priceToPay|[$£€]\s?\d+[.,]\d{2}",
    r"data-asin=|\bASIN\b|/dp/[A-Z0-9]{10}",
    r"product\s+details",
    r"buy\s+now",
];

/// Classifier verdict plus the rule that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub verdict: Verdict,
    pub reason: &'static str,
}

impl Classification {
    fn new(verdict: Verdict, reason: &'static str) -> Self {
        Self { verdict, reason }
    }
}

pub struct BlockClassifier {
    min_page_len: usize,
    captcha_max_len: usize,
    min_indicators: usize,
    captcha: Vec<Regex>,
    indicators: Vec<Regex>,
}

impl BlockClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let captcha = compile_set(config.captcha_patterns.as_deref(), DEFAULT_CAPTCHA_PATTERNS)?;
        let indicators =
            compile_set(config.indicator_patterns.as_deref(), DEFAULT_INDICATOR_PATTERNS)?;

        Ok(Self {
            min_page_len: config.min_page_len,
            captcha_max_len: config.captcha_max_len,
            min_indicators: config.min_indicators,
            captcha,
            indicators,
        })
    }

    /// Classify `html`, given the rank already extracted from the same page.
    ///
    /// A valid rank wins over every other rule.
    pub fn classify(&self, html: &str, rank: Option<RankValue>) -> Classification {
        if rank.is_some() {
            return Classification::new(Verdict::Clean, "rank_found");
        }

        let len = html.chars().count();
        if len < self.min_page_len {
            return Classification::new(Verdict::Blocked, "page_too_short");
        }

        let indicators = self.indicator_count(html);
        if len < self.captcha_max_len
            && indicators < self.min_indicators
            && self.has_captcha_phrase(html)
        {
            return Classification::new(Verdict::Captcha, "captcha_phrase");
        }

        if indicators >= self.min_indicators {
            return Classification::new(Verdict::Clean, "page_indicators");
        }
        if len > self.captcha_max_len {
            return Classification::new(Verdict::Clean, "large_page");
        }

        Classification::new(Verdict::Blocked, "no_indicators")
    }

    pub fn has_captcha_phrase(&self, html: &str) -> bool {
        self.captcha.iter().any(|re| re.is_match(html))
    }

    /// Number of distinct normal-page indicators present.
    pub fn indicator_count(&self, html: &str) -> usize {
        self.indicators.iter().filter(|re| re.is_match(html)).count()
    }
}

fn compile_set(custom: Option<&[String]>, defaults: &[&str]) -> Result<Vec<Regex>> {
    let compile = |p: &str| {
        Regex::new(&format!("(?i){p}"))
            .map_err(|e| RankwatchError::Config(format!("invalid classifier pattern {p:?}: {e}")))
    };
    match custom {
        Some(patterns) => patterns.iter().map(|p| compile(p)).collect(),
        None => defaults.iter().map(|p| compile(p)).collect(),
    }
}

// ── Inspection ──────────────────────────────────────────────────────────

/// Extraction and classification of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Inspection {
    pub verdict: Verdict,
    pub rank: Option<RankValue>,
    pub reason: &'static str,
}

/// Extractor and classifier bundled so the rank-first ordering is applied
/// the same way by every tier.
pub struct PageInspector {
    extractor: RankExtractor,
    classifier: BlockClassifier,
}

impl PageInspector {
    pub fn new(extractor: RankExtractor, classifier: BlockClassifier) -> Self {
        Self {
            extractor,
            classifier,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self::new(
            RankExtractor::new(&config.extractor)?,
            BlockClassifier::new(&config.classifier)?,
        ))
    }

    pub fn extractor(&self) -> &RankExtractor {
        &self.extractor
    }

    pub fn classifier(&self) -> &BlockClassifier {
        &self.classifier
    }

    /// Extract first, then classify with the result.
    pub fn inspect(&self, html: &str) -> Inspection {
        let rank = self.extractor.extract(html);
        let Classification { verdict, reason } = self.classifier.classify(html, rank);
        Inspection {
            verdict,
            rank,
            reason,
        }
    }

    /// Run [`inspect`](Self::inspect) on the blocking pool and hand the HTML
    /// back to the caller.
    pub async fn inspect_owned(self: Arc<Self>, html: String) -> (Inspection, String) {
        let handle = tokio::task::spawn_blocking(move || {
            let inspection = self.inspect(&html);
            (inspection, html)
        });
        match handle.await {
            Ok(done) => done,
            Err(e) => {
                tracing::error!("page inspection task failed: {e}");
                (
                    Inspection {
                        verdict: Verdict::Blocked,
                        rank: None,
                        reason: "inspection_failed",
                    },
                    String::new(),
                )
            }
        }
    }
}
