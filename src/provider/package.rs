//! Package-backed catalog adapter.
//!
//! This catalog is fronted by a search API whose rows carry relative
//! download paths and a human-readable size. Relative paths are joined
//! against the configured base URL at normalization time; a content
//! hash, when present, contributes a second content-addressed mirror.

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::record::{isbn, BookRecord, MirrorKind, MirrorLink, RawHit, SourceId};

use super::{extract_year, native_map, parse_file_size, ProviderAdapter, ProviderError, ProviderHttp};

/// Adapter for the package-backed catalog.
#[derive(Debug, Clone)]
pub struct PackageAdapter {
    http: ProviderHttp,
    base_url: String,
}

impl PackageAdapter {
    #[must_use]
    pub fn new(http: ProviderHttp, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Joins a possibly-relative URL against the catalog base.
    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl ProviderAdapter for PackageAdapter {
    fn source(&self) -> SourceId {
        SourceId::Package
    }

    #[instrument(skip(self), fields(provider = "package"))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RawHit>, ProviderError> {
        let url = format!(
            "{}/api/search?message={}&limit={max_results}",
            self.base_url,
            urlencoding::encode(query)
        );
        let body = self.http.get_json(self.source(), &url).await?;

        let rows = body
            .get("books")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ProviderError::malformed(self.source(), "missing books array"))?;

        let hits: Vec<RawHit> = rows
            .iter()
            .filter_map(|row| row.as_object())
            .take(max_results)
            .map(|obj| RawHit::new(self.source(), native_map(obj)))
            .collect();
        debug!(hits = hits.len(), "package search complete");
        Ok(hits)
    }

    fn normalize(&self, hit: &RawHit) -> BookRecord {
        let title = hit.field("title").unwrap_or("Untitled").to_string();
        let authors: Vec<String> = hit
            .field("author")
            .map(|a| {
                a.split(',')
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
        record.file_size_bytes = hit.field("size").and_then(parse_file_size);
        record.cover_url = hit.field("cover").map(|c| self.absolute(c));

        let declared_size = record.file_size_bytes;
        if let Some(download) = hit.field("download") {
            record.mirrors.push(
                MirrorLink::new(self.absolute(download), self.source(), MirrorKind::Direct)
                    .with_declared_size(declared_size),
            );
        }
        if let Some(hash) = hit.field("hash") {
            record.mirrors.push(
                MirrorLink::new(
                    format!("{}/md5/{}", self.base_url, hash.to_lowercase()),
                    self.source(),
                    MirrorKind::ContentAddressed,
                )
                .with_declared_size(declared_size),
            );
        }
        record
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::limiter::RateLimiter;

    fn adapter(base_url: &str) -> PackageAdapter {
        let http = ProviderHttp::new(
            reqwest::Client::new(),
            Arc::new(RateLimiter::per_provider(1000, Duration::from_secs(60))),
        );
        PackageAdapter::new(http, base_url.to_string())
    }

    fn hit(fields: &[(&str, &str)]) -> RawHit {
        let native = fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RawHit::new(SourceId::Package, native)
    }

    // ==================== Normalization Tests ====================

    #[test]
    fn test_normalize_joins_relative_download() {
        let adapter = adapter("https://package.test");
        let record = adapter.normalize(&hit(&[
            ("title", "Clean Code"),
            ("author", "Robert C. Martin"),
            ("size", "4 MB"),
            ("download", "/dl/12345"),
            ("hash", "ABC123"),
        ]));

        assert_eq!(record.mirrors.len(), 2);
        assert_eq!(record.mirrors[0].url, "https://package.test/dl/12345");
        assert_eq!(record.mirrors[0].kind, MirrorKind::Direct);
        assert_eq!(record.mirrors[1].url, "https://package.test/md5/abc123");
        assert_eq!(record.mirrors[1].kind, MirrorKind::ContentAddressed);
        assert_eq!(record.file_size_bytes, Some(4_194_304));
    }

    #[test]
    fn test_normalize_keeps_absolute_urls() {
        let adapter = adapter("https://package.test");
        let record = adapter.normalize(&hit(&[
            ("title", "Clean Code"),
            ("download", "https://cdn.package.test/dl/1"),
        ]));
        assert_eq!(record.mirrors[0].url, "https://cdn.package.test/dl/1");
    }

    #[test]
    fn test_normalize_human_readable_size() {
        let adapter = adapter("https://package.test");
        let record = adapter.normalize(&hit(&[("title", "T"), ("size", "2.5 MB")]));
        assert_eq!(record.file_size_bytes, Some(2_621_440));
    }

    // ==================== Search Tests ====================

    #[tokio::test]
    async fn test_search_parses_books() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "books": [{"title": "Clean Code", "author": "Robert C. Martin"}]
            })))
            .mount(&server)
            .await;

        let hits = adapter(&server.uri()).search("clean code", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_search_respects_max_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "books": [
                    {"title": "A"}, {"title": "B"}, {"title": "C"}
                ]
            })))
            .mount(&server)
            .await;

        let hits = adapter(&server.uri()).search("x", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}
