// Copyright 2026 Rankwatch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Target normalization.
//!
//! A [`Target`] is the identity used for caching and block state, so two
//! spellings of the same product page must normalize to the same string:
//! tracking suffixes (`/ref=...`), query strings and fragments are stripped
//! and a trailing slash is enforced.

use crate::error::{RankwatchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Host/path typos seen in hand-maintained catalogs, where the slash between
/// the TLD and the first path segment was lost.
const HOST_REPAIRS: &[(&str, &str)] = &[(".co.ukgp/", ".co.uk/gp/"), (".comgp/", ".com/gp/")];

/// A normalized, immutable fetch target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    url: String,
    host: String,
}

impl Target {
    /// Normalize a raw URL into a target.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut candidate = raw.trim().to_string();
        if candidate.is_empty() {
            return Err(RankwatchError::InvalidTarget("empty URL".into()));
        }

        for (broken, fixed) in HOST_REPAIRS {
            if candidate.contains(broken) {
                candidate = candidate.replacen(broken, fixed, 1);
            }
        }

        let mut url = Url::parse(&candidate)
            .map_err(|e| RankwatchError::InvalidTarget(format!("{raw}: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(RankwatchError::InvalidTarget(format!(
                "{raw}: unsupported scheme {}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| RankwatchError::InvalidTarget(format!("{raw}: missing host")))?
            .to_string();

        url.set_query(None);
        url.set_fragment(None);

        let path = strip_tracking_suffix(url.path());
        let path = format!("{}/", path.trim_end_matches('/'));
        url.set_path(&path);

        Ok(Self {
            url: url.to_string(),
            host,
        })
    }

    /// The normalized URL string.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Lower-cased host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether the target's host is `domain` or a subdomain of it.
    pub fn host_matches(&self, domain: &str) -> bool {
        let domain = domain.trim_start_matches('.').to_ascii_lowercase();
        self.host == domain || self.host.ends_with(&format!(".{domain}"))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Cut the path at a `/ref=` or `/ref/` tracking segment.
fn strip_tracking_suffix(path: &str) -> &str {
    for marker in ["/ref=", "/ref/"] {
        if let Some(idx) = path.find(marker) {
            return &path[..idx];
        }
    }
    path.strip_suffix("/ref").unwrap_or(path)
}
