//! Mirror dedup and ranking.
//!
//! After a record is merged it can carry the same file location several
//! times, written differently by each provider. The resolver collapses
//! duplicates by canonical URL and orders what remains so the download
//! manager always walks the most promising mirrors first. Resolution is
//! pure and deterministic: the same mirror set always ranks the same way.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

use tracing::{debug, instrument};
use url::Url;

use crate::record::MirrorLink;

/// Query parameters that never change which file a URL points at.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "ref",
    "fbclid",
    "gclid",
];

/// Default period during which a failed mirror is demoted to the end.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3600);

/// Deduplicates and ranks a record's mirror list.
#[derive(Debug, Clone)]
pub struct MirrorResolver {
    cooldown: Duration,
}

impl Default for MirrorResolver {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl MirrorResolver {
    /// Creates a resolver with the given failure cooldown.
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    /// Collapses duplicate mirrors and orders the survivors.
    ///
    /// Duplicates (same canonical URL) keep the first-seen link. Ranking
    /// is by address durability, with two demotions: links whose declared
    /// size disagrees with the consensus sink within their class, and
    /// links that failed within the cooldown sink to the end outright.
    /// Input order breaks all remaining ties, and the returned links carry
    /// their final position in `priority`.
    #[must_use]
    #[instrument(skip_all, fields(candidates = mirrors.len()))]
    pub fn resolve(&self, mirrors: Vec<MirrorLink>) -> Vec<MirrorLink> {
        let mut seen = HashSet::new();
        let mut unique: Vec<MirrorLink> = Vec::with_capacity(mirrors.len());
        for link in mirrors {
            if seen.insert(canonical_url(&link.url)) {
                unique.push(link);
            }
        }

        let consensus = consensus_size(&unique);
        let now = SystemTime::now();

        let mut indexed: Vec<(usize, MirrorLink)> = unique.into_iter().enumerate().collect();
        indexed.sort_by_key(|(input_order, link)| {
            let cooled = link
                .last_failure
                .as_ref()
                .and_then(|f| now.duration_since(f.at).ok())
                .is_some_and(|age| age < self.cooldown);
            let size_disagrees = match (link.declared_size, consensus) {
                (Some(declared), Some(consensus)) => declared != consensus,
                _ => false,
            };
            (u8::from(cooled), link.kind.rank(), u8::from(size_disagrees), *input_order)
        });

        let ranked: Vec<MirrorLink> = indexed
            .into_iter()
            .enumerate()
            .map(|(position, (_, mut link))| {
                link.priority = u32::try_from(position).unwrap_or(u32::MAX);
                link
            })
            .collect();
        debug!(ranked = ranked.len(), "mirror set resolved");
        ranked
    }
}

/// Reduces a URL to the form used for duplicate detection: lowercased
/// scheme and host, default ports dropped, trailing slash trimmed, query
/// keys sorted with tracking parameters removed.
#[must_use]
pub fn canonical_url(raw: &str) -> String {
    let Ok(url) = Url::parse(raw) else {
        // Unparseable URLs dedup by exact text.
        return raw.to_string();
    };

    let host = url.host_str().unwrap_or_default().to_lowercase();
    let port = match url.port() {
        Some(p) if Some(p) != default_port(url.scheme()) => format!(":{p}"),
        _ => String::new(),
    };
    let path = url.path().trim_end_matches('/');

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();
    let query = if params.is_empty() {
        String::new()
    } else {
        let joined: Vec<String> = params.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("?{}", joined.join("&"))
    };

    format!("{}://{host}{port}{path}{query}", url.scheme().to_lowercase())
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// The most commonly declared size across the candidate links, with ties
/// broken by first appearance.
fn consensus_size(links: &[MirrorLink]) -> Option<u64> {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    let mut first_seen: Vec<u64> = Vec::new();
    for link in links {
        if let Some(size) = link.declared_size {
            if !counts.contains_key(&size) {
                first_seen.push(size);
            }
            *counts.entry(size).or_insert(0) += 1;
        }
    }
    // A strict `>` keeps the earliest size on count ties; max_by_key
    // would keep the latest.
    let mut best: Option<(u64, usize)> = None;
    for size in first_seen {
        let count = counts.get(&size).copied().unwrap_or(0);
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((size, count));
        }
    }
    best.map(|(size, _)| size)
}
