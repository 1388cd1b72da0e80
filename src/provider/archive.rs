//! Archive catalog adapter.
//!
//! The archive exposes a JSON search endpoint whose rows carry flat
//! metadata plus a `links` array of mirror URLs. Link durability is
//! inferred from the URL shape: hash-addressed paths are content
//! addressed, URLs ending in a known file extension are direct, and
//! everything else is assumed to be a redirect page.

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::record::{isbn, BookRecord, MirrorKind, MirrorLink, RawHit, SourceId};

use super::{extract_year, native_map, parse_file_size, ProviderAdapter, ProviderError, ProviderHttp};

/// File extensions recognized as direct download links.
const FILE_EXTENSIONS: &[&str] = &["pdf", "epub", "mobi", "azw3", "djvu", "fb2", "txt"];

/// Adapter for the archive-style catalog.
#[derive(Debug, Clone)]
pub struct ArchiveAdapter {
    http: ProviderHttp,
    base_url: String,
}

impl ArchiveAdapter {
    #[must_use]
    pub fn new(http: ProviderHttp, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn classify(url: &str) -> MirrorKind {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.contains("/md5/") {
            return MirrorKind::ContentAddressed;
        }
        let has_file_extension = path
            .rsplit('.')
            .next()
            .is_some_and(|ext| FILE_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
        if has_file_extension {
            MirrorKind::Direct
        } else {
            MirrorKind::MirrorRedirect
        }
    }
}

#[async_trait]
impl ProviderAdapter for ArchiveAdapter {
    fn source(&self) -> SourceId {
        SourceId::Archive
    }

    #[instrument(skip(self), fields(provider = "archive"))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RawHit>, ProviderError> {
        let url = format!(
            "{}/search?index=books&q={}&limit={max_results}",
            self.base_url,
            urlencoding::encode(query)
        );
        let body = self.http.get_json(self.source(), &url).await?;

        let rows = body
            .get("results")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ProviderError::malformed(self.source(), "missing results array"))?;

        let hits: Vec<RawHit> = rows
            .iter()
            .filter_map(|row| row.as_object())
            .take(max_results)
            .map(|obj| RawHit::new(self.source(), native_map(obj)))
            .collect();
        debug!(hits = hits.len(), "archive search complete");
        Ok(hits)
    }

    fn normalize(&self, hit: &RawHit) -> BookRecord {
        let title = hit.field("title").unwrap_or("Untitled").to_string();
        let authors: Vec<String> = hit
            .field("authors")
            .map(|a| {
                a.split(';')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let mut record = BookRecord::fragment(title, authors, self.source());

        record.year = hit.field("year").and_then(extract_year);
        record.publisher = hit.field("publisher").map(String::from);
        record.language = hit.field("language").map(String::from);
        record.isbn13 = hit.field("isbn").and_then(isbn::extract);
        record.file_format = hit.field("extension").map(str::to_lowercase);
        record.file_size_bytes = hit.field("filesize").and_then(parse_file_size);
        record.cover_url = hit.field("cover_url").map(String::from);

        let links: Vec<String> = hit
            .field("links")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        let declared_size = record.file_size_bytes;
        record.mirrors = links
            .into_iter()
            .map(|url| {
                let kind = Self::classify(&url);
                MirrorLink::new(url, self.source(), kind).with_declared_size(declared_size)
            })
            .collect();
        record
    }
}
