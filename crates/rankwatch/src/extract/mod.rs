// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Rank extraction from raw product-page HTML.
//!
//! Pure and synchronous. The `scraper` document types are `!Send`, so async
//! callers run [`RankExtractor::extract`] inside `spawn_blocking`.
//!
//! Strategies, first valid hit wins:
//!
//! 1. the ordered grammar over the text of a sales-rank container element
//! 2. the same grammar over the visible text of the whole page
//! 3. grouped numbers inside rank-named elements, then near a
//!    "Best Sellers Rank" label
//!
//! Every candidate goes through [`RankValue::parse`], so nothing outside
//! `[1, MAX_RANK]` can escape this module.

pub mod patterns;

use crate::config::{CategoryRankPolicy, ExtractorConfig};
use crate::error::{RankwatchError, Result};
use crate::types::RankValue;
use patterns::{PatternScope, RankPattern, GROUPED_NUMBER, QUALIFIER};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::sync::LazyLock;

static RANK_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)rank|bsr").unwrap());

static RANK_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)best\W{0,3}sellers?\W{0,3}rank").unwrap());

static ID_ELEMENTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span[id], div[id], li[id], td[id]").unwrap());

/// Elements whose text never counts as page text.
const INVISIBLE: &[&str] = &["script", "style", "noscript", "template"];

/// Which strategy produced a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Container,
    PageText,
    RankElement,
    LabelNeighborhood,
}

/// A validated rank together with where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankMatch {
    pub rank: RankValue,
    pub strategy: Strategy,
    pub pattern: &'static str,
}

/// Compiled rank extractor.
#[derive(Debug)]
pub struct RankExtractor {
    grammar: Vec<RankPattern>,
    containers: Vec<Selector>,
    primary_store: String,
    min_html_len: usize,
    policy: CategoryRankPolicy,
}

impl RankExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        let grammar = patterns::build_grammar(&config.primary_store)
            .map_err(|e| RankwatchError::Config(format!("rank grammar: {e}")))?;

        let containers = config
            .container_ids
            .iter()
            .map(|id| {
                Selector::parse(&format!("[id=\"{id}\"]")).map_err(|e| {
                    RankwatchError::Config(format!("invalid container id {id:?}: {e:?}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            grammar,
            containers,
            primary_store: collapse_lower(&config.primary_store),
            min_html_len: config.min_html_len,
            policy: config.category_policy,
        })
    }

    /// Extract the rank, or `None` when the page carries no valid one.
    pub fn extract(&self, html: &str) -> Option<RankValue> {
        self.extract_detailed(html).map(|m| m.rank)
    }

    pub fn extract_detailed(&self, html: &str) -> Option<RankMatch> {
        if html.len() < self.min_html_len {
            return None;
        }

        let document = Html::parse_document(html);

        let found = self
            .from_containers(&document)
            .or_else(|| self.search_text(&page_text(&document), Strategy::PageText))
            .or_else(|| self.from_rank_elements(&document))
            .or_else(|| self.from_label_neighborhood(&document));

        match found {
            Some(m) => tracing::debug!(
                "rank {} via {:?} ({})",
                m.rank,
                m.strategy,
                m.pattern
            ),
            None => tracing::debug!("no rank in {} bytes of HTML", html.len()),
        }
        found
    }

    fn from_containers(&self, document: &Html) -> Option<RankMatch> {
        self.containers.iter().find_map(|selector| {
            document.select(selector).find_map(|container| {
                let text = element_text(container);
                self.search_text(&text, Strategy::Container)
            })
        })
    }

    /// Run the ordered grammar over `text`. Patterns are tried in priority
    /// order, so a lower-priority match earlier in the text never wins.
    fn search_text(&self, text: &str, strategy: Strategy) -> Option<RankMatch> {
        if text.is_empty() {
            return None;
        }

        for pattern in &self.grammar {
            if pattern.scope == PatternScope::Category
                && self.policy == CategoryRankPolicy::Reject
            {
                continue;
            }

            for caps in pattern.regex.captures_iter(text) {
                let Some(number) = caps.get(1) else { continue };
                let Some(rank) = RankValue::parse(number.as_str()) else {
                    continue;
                };
                if !self.accepts_qualifier(&text[number.end()..]) {
                    continue;
                }
                return Some(RankMatch {
                    rank,
                    strategy,
                    pattern: pattern.name,
                });
            }
        }
        None
    }

    fn from_rank_elements(&self, document: &Html) -> Option<RankMatch> {
        document
            .select(&ID_ELEMENTS)
            .filter(|el| el.value().id().is_some_and(|id| RANK_ID.is_match(id)))
            .find_map(|el| self.grouped_in(&element_text(el), Strategy::RankElement))
    }

    fn from_label_neighborhood(&self, document: &Html) -> Option<RankMatch> {
        for node in document.root_element().descendants() {
            let Some(text) = node.value().as_text() else { continue };
            if !RANK_LABEL.is_match(text) {
                continue;
            }
            // The label usually sits in its own bold span; widen the scope
            // a few levels until the number is in view.
            for ancestor in node.ancestors().take(3) {
                let Some(el) = ElementRef::wrap(ancestor) else { continue };
                if let Some(m) = self.grouped_in(&element_text(el), Strategy::LabelNeighborhood) {
                    return Some(m);
                }
            }
        }
        None
    }

    fn grouped_in(&self, text: &str, strategy: Strategy) -> Option<RankMatch> {
        GROUPED_NUMBER.captures_iter(text).find_map(|caps| {
            let number = caps.get(1)?;
            let rank = RankValue::parse(number.as_str())?;
            self.accepts_qualifier(&text[number.end()..])
                .then_some(RankMatch {
                    rank,
                    strategy,
                    pattern: "grouped_number",
                })
        })
    }

    /// Under [`CategoryRankPolicy::Reject`], a rank qualified with anything
    /// other than the primary store ("#45 in Thrillers") is refused.
    fn accepts_qualifier(&self, rest: &str) -> bool {
        if self.policy == CategoryRankPolicy::Accept {
            return true;
        }
        match QUALIFIER.captures(rest) {
            Some(caps) => collapse_lower(&caps[1]).starts_with(&self.primary_store),
            None => true,
        }
    }
}

/// Visible text of the whole document, script and style bodies excluded.
fn page_text(document: &Html) -> String {
    let mut out = String::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .is_some_and(|name| INVISIBLE.contains(&name.as_str()));
        if hidden {
            continue;
        }
        out.push_str(text);
        out.push(' ');
    }
    out
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

fn collapse_lower(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MAX_RANK;

    fn extractor() -> RankExtractor {
        RankExtractor::new(&ExtractorConfig::default()).unwrap()
    }

    fn extractor_with(policy: CategoryRankPolicy) -> RankExtractor {
        let config = ExtractorConfig {
            category_policy: policy,
            ..ExtractorConfig::default()
        };
        RankExtractor::new(&config).unwrap()
    }

    /// Wrap a fragment in enough product-page scaffolding to pass the
    /// length short-circuit.
    fn page(body: &str) -> String {
        format!(
            "<html><head><title>A Novel</title></head><body>\
             <div id=\"title\">A Novel: Book One of the Series (Kindle Edition)</div>\
             <div id=\"detail\">{body}</div></body></html>"
        )
    }

    #[test]
    fn test_store_rank_with_separators() {
        let html = page("#12,345 in Kindle Store");
        assert_eq!(extractor().extract(&html).map(RankValue::get), Some(12_345));
    }

    #[test]
    fn test_sales_rank_container() {
        let html = page(
            "<div id=\"SalesRank\"><b>Amazon Best Sellers Rank:</b> #5,678 in Kindle Store \
             (See Top 100 in Kindle Store)<ul><li>#12 in Thrillers</li></ul></div>",
        );
        let m = extractor().extract_detailed(&html).unwrap();
        assert_eq!(m.rank.get(), 5_678);
        assert_eq!(m.strategy, Strategy::Container);
        assert_eq!(m.pattern, "labeled_store_hash");
    }

    #[test]
    fn test_regional_format_without_hash() {
        let html = page("<span>Best Sellers Rank: 1,726 in Kindle Store (See Top 100)</span>");
        assert_eq!(extractor().extract(&html).map(RankValue::get), Some(1_726));
    }

    #[test]
    fn test_prioritized_not_positional() {
        let html = page("<li>#45 in Thrillers (Kindle Store)</li><li>#12,345 in Kindle Store</li>");
        assert_eq!(extractor().extract(&html).map(RankValue::get), Some(12_345));
    }

    #[test]
    fn test_zero_and_oversized_are_absent() {
        assert!(extractor().extract(&page("#0 in Kindle Store")).is_none());
        assert!(extractor()
            .extract(&page("#15,000,000 in Kindle Store"))
            .is_none());
    }

    #[test]
    fn test_invalid_first_candidate_falls_through() {
        let html = page("#0 in Kindle Store ... later #2,222 in Kindle Store");
        assert_eq!(extractor().extract(&html).map(RankValue::get), Some(2_222));
    }

    #[test]
    fn test_category_only_page_policy() {
        let html = page("<ul><li>#45 in Thrillers</li><li>#1,234 in Mystery</li></ul>");
        assert!(extractor_with(CategoryRankPolicy::Reject).extract(&html).is_none());
        assert_eq!(
            extractor_with(CategoryRankPolicy::Accept)
                .extract(&html)
                .map(RankValue::get),
            Some(45)
        );
    }

    #[test]
    fn test_labeled_category_rank_rejected_then_primary_found() {
        let html = page(
            "<p>Best Sellers Rank: #45 in Thrillers</p><p>elsewhere #9,876 in Kindle Store</p>",
        );
        assert_eq!(extractor().extract(&html).map(RankValue::get), Some(9_876));
    }

    #[test]
    fn test_rank_element_fallback() {
        let html = page("<span id=\"bsr-value\">Ranked 23,456 overall</span>");
        let m = extractor().extract_detailed(&html).unwrap();
        assert_eq!(m.rank.get(), 23_456);
        assert_eq!(m.strategy, Strategy::RankElement);
    }

    #[test]
    fn test_label_neighborhood_fallback() {
        let html = page(
            "<div class=\"bullets\"><span class=\"a-text-bold\">Best-Sellers-Rank</span>\
             <span>Position 3,456</span></div>",
        );
        let m = extractor().extract_detailed(&html).unwrap();
        assert_eq!(m.rank.get(), 3_456);
        assert_eq!(m.strategy, Strategy::LabelNeighborhood);
    }

    #[test]
    fn test_script_text_is_ignored() {
        let html = page("<script>var fake = '#7,777 in Kindle Store';</script><p>no rank</p>");
        assert!(extractor().extract(&html).is_none());
    }

    #[test]
    fn test_short_html_short_circuits() {
        assert!(extractor().extract("#12,345 in Kindle Store").is_none());
        assert!(extractor().extract("").is_none());
    }

    #[test]
    fn test_idempotent() {
        let html = page("#3,210 in Kindle Store");
        let ex = extractor();
        assert_eq!(ex.extract(&html), ex.extract(&html));
    }

    #[test]
    fn test_never_exceeds_bounds() {
        for raw in ["#10,000,000", "#10,000,001", "#1", "#999,999,999"] {
            let html = page(&format!("{raw} in Kindle Store"));
            if let Some(rank) = extractor().extract(&html) {
                assert!(rank.get() >= 1 && rank.get() <= MAX_RANK);
            }
        }
    }
}
