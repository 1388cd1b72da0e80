//! Optional metadata enrichment.
//!
//! After merging, records that carry a verified ISBN but are missing
//! descriptive fields can be topped up from a public metadata service.
//! Enrichment only ever fills gaps; it never overwrites what a provider
//! reported, and a failing lookup leaves the record untouched.

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::record::BookRecord;

/// Metadata fetched for one ISBN.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    pub description: Option<String>,
    pub genres: Vec<String>,
    pub publisher: Option<String>,
    pub cover_url: Option<String>,
}

/// A lookup service keyed by ISBN-13.
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    /// Looks up metadata for an ISBN. `Ok(None)` means the service has
    /// no entry; errors are treated the same way by callers.
    async fn lookup(&self, isbn13: &str) -> anyhow::Result<Option<Enrichment>>;
}

/// Open Library `/isbn/{isbn}.json` client.
#[derive(Debug, Clone)]
pub struct OpenLibrarySource {
    client: reqwest::Client,
    base_url: String,
}

impl OpenLibrarySource {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl EnrichmentSource for OpenLibrarySource {
    #[instrument(skip(self))]
    async fn lookup(&self, isbn13: &str) -> anyhow::Result<Option<Enrichment>> {
        let url = format!("{}/isbn/{isbn13}.json", self.base_url);
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: serde_json::Value = response.error_for_status()?.json().await?;

        // The description field is either a string or {"value": "..."}.
        let description = match body.get("description") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Object(o)) => o
                .get("value")
                .and_then(|v| v.as_str())
                .map(String::from),
            _ => None,
        };
        let genres = body
            .get("subjects")
            .and_then(|v| v.as_array())
            .map(|subjects| {
                subjects
                    .iter()
                    .filter_map(|s| s.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let publisher = body
            .get("publishers")
            .and_then(|v| v.as_array())
            .and_then(|p| p.first())
            .and_then(|p| p.as_str())
            .map(String::from);

        Ok(Some(Enrichment {
            description,
            genres,
            publisher,
            cover_url: None,
        }))
    }
}

/// Whether a record has gaps worth an enrichment lookup.
#[must_use]
pub fn needs_enrichment(record: &BookRecord) -> bool {
    record.isbn13.is_some()
        && (record.description.is_none() || record.genres.is_empty() || record.publisher.is_none())
}

/// Fills a record's gaps from an enrichment source, leaving populated
/// fields alone. Lookup failures are logged and swallowed.
pub async fn apply(source: &dyn EnrichmentSource, record: &mut BookRecord) {
    let Some(isbn) = record.isbn13.clone() else {
        return;
    };
    match source.lookup(&isbn).await {
        Ok(Some(extra)) => {
            record.description = record.description.take().or(extra.description);
            record.publisher = record.publisher.take().or(extra.publisher);
            record.cover_url = record.cover_url.take().or(extra.cover_url);
            if record.genres.is_empty() {
                record.genres = extra.genres;
            }
            debug!(isbn = %isbn, "record enriched");
        }
        Ok(None) => debug!(isbn = %isbn, "no enrichment entry"),
        Err(e) => warn!(isbn = %isbn, error = %e, "enrichment lookup failed"),
    }
}
