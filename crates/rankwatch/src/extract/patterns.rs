// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Priority-ordered rank pattern grammar.
//!
//! Every pattern captures the rank number in group 1. Order matters: the
//! labeled primary-store forms come first, then unlabeled primary-store forms,
//! and only then the category forms that could match unrelated counters.

use regex::Regex;
use std::sync::LazyLock;

/// A thousands-grouped integer (`12,345`, `12 345` with a no-break space) or a
/// plain run of digits. The grouped alternative is tried first.
const NUM: &str = r"\d{1,3}(?:[,\x{a0}\x{202f}]\d{3})+|\d+";

/// Which class of ranking a pattern is meant to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternScope {
    /// The marketplace-wide rank ("in Kindle Store"), or a labeled rank.
    Primary,
    /// A narrower sub-category ranking.
    Category,
}

/// One compiled pattern of the grammar.
#[derive(Debug)]
pub struct RankPattern {
    pub name: &'static str,
    pub scope: PatternScope,
    pub regex: Regex,
}

/// Build the ordered grammar for a primary store name.
pub fn build_grammar(primary_store: &str) -> Result<Vec<RankPattern>, regex::Error> {
    let store = store_regex(primary_store);

    let specs: Vec<(&'static str, PatternScope, String)> = vec![
        (
            "labeled_store_hash",
            PatternScope::Primary,
            format!(r"Best\s+Sellers?\s+Rank\s*:?\s*#\s*({NUM})\s+in\s+{store}"),
        ),
        (
            "labeled_store_bare",
            PatternScope::Primary,
            format!(r"Best\s+Sellers?\s+Rank\s*:?\s*\b({NUM})\s+in\s+{store}"),
        ),
        (
            "labeled_any",
            PatternScope::Primary,
            format!(r"Best\s+Sellers?\s+Rank\s*:?\s*#?\s*\b({NUM})\b"),
        ),
        (
            "store_see_top",
            PatternScope::Primary,
            format!(r"#?\b({NUM})\s+in\s+{store}[^#]{{0,80}}?\(\s*See\s+Top"),
        ),
        (
            "store_hash",
            PatternScope::Primary,
            format!(r"#\s*({NUM})\s+in\s+{store}"),
        ),
        (
            "store_bare",
            PatternScope::Primary,
            format!(r"\b({NUM})\s+in\s+{store}"),
        ),
        (
            "category_see_top",
            PatternScope::Category,
            format!(r"#\s*({NUM})\s+in\s+[^#(\n]{{1,80}}?\(\s*See\s+Top"),
        ),
        (
            "category_hash",
            PatternScope::Category,
            format!(r"#\s*({NUM})\s+in\s+\w[^#\n]{{0,80}}"),
        ),
    ];

    specs
        .into_iter()
        .map(|(name, scope, pattern)| {
            Ok(RankPattern {
                name,
                scope,
                regex: Regex::new(&format!("(?i){pattern}"))?,
            })
        })
        .collect()
}

/// Grouped number used by the fallback element search, so stray single
/// digits in rank-named widgets are ignored.
pub static GROUPED_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#?\s*\b(\d{1,3}(?:,\d{3})+)\b").unwrap());

/// The qualifier that follows a captured rank (`in Thrillers`).
pub static QUALIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s+in\s+(\S[^\n#]*)").unwrap());

/// Turn a store name into a whitespace-tolerant regex fragment.
fn store_regex(store: &str) -> String {
    store
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grammar_compiles_in_order() {
        let grammar = build_grammar("Kindle Store").unwrap();
        assert_eq!(grammar.first().map(|p| p.name), Some("labeled_store_hash"));
        assert!(grammar
            .iter()
            .skip_while(|p| p.scope == PatternScope::Primary)
            .all(|p| p.scope == PatternScope::Category));
    }

    #[test]
    fn test_store_names_are_escaped() {
        let grammar = build_grammar("Books (Paperback)").unwrap();
        let hit = grammar
            .iter()
            .find_map(|p| p.regex.captures("#1,234 in Books  (Paperback)"))
            .unwrap();
        assert_eq!(&hit[1], "1,234");
    }

    #[test]
    fn test_number_prefers_grouped_form() {
        let grammar = build_grammar("Kindle Store").unwrap();
        let store_hash = grammar.iter().find(|p| p.name == "store_hash").unwrap();
        let caps = store_hash.regex.captures("#12,345 in Kindle Store").unwrap();
        assert_eq!(&caps[1], "12,345");
        let caps = store_hash.regex.captures("#1726 in Kindle Store").unwrap();
        assert_eq!(&caps[1], "1726");
    }
}
