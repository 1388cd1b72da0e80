//! Mirror-index catalog adapter.
//!
//! The index keys every row by the file's MD5 and serves a JSON API.
//! Download locations are not listed in the payload; they are derived
//! from the hash: a content-addressed `/main/{md5}` link plus a
//! `get.php` redirect fallback.

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::record::{isbn, BookRecord, MirrorKind, MirrorLink, RawHit, SourceId};

use super::{extract_year, native_map, parse_file_size, ProviderAdapter, ProviderError, ProviderHttp};

/// Adapter for the mirror-index catalog.
#[derive(Debug, Clone)]
pub struct MirrorIndexAdapter {
    http: ProviderHttp,
    base_url: String,
}

impl MirrorIndexAdapter {
    #[must_use]
    pub fn new(http: ProviderHttp, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for MirrorIndexAdapter {
    fn source(&self) -> SourceId {
        SourceId::MirrorIndex
    }

    #[instrument(skip(self), fields(provider = "mirror-index"))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<RawHit>, ProviderError> {
        let url = format!(
            "{}/json.php?req={}&limit={max_results}&fields=*",
            self.base_url,
            urlencoding::encode(query)
        );
        let body = self.http.get_json(self.source(), &url).await?;

        // The index returns a bare array of rows.
        let rows = body
            .as_array()
            .ok_or_else(|| ProviderError::malformed(self.source(), "expected a row array"))?;

        let hits: Vec<RawHit> = rows
            .iter()
            .filter_map(|row| row.as_object())
            .take(max_results)
            .map(|obj| RawHit::new(self.source(), native_map(obj)))
            .collect();
        debug!(hits = hits.len(), "mirror-index search complete");
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
        // The identifier field may pack several ISBNs; the first valid wins.
        record.isbn13 = hit.field("identifier").and_then(isbn::extract);
        record.file_format = hit.field("extension").map(str::to_lowercase);
        record.file_size_bytes = hit.field("filesize").and_then(parse_file_size);
        record.cover_url = hit
            .field("coverurl")
            .map(|c| format!("{}/covers/{}", self.base_url, c.trim_start_matches('/')));

        if let Some(md5) = hit.field("md5") {
            let md5 = md5.to_lowercase();
            record.mirrors = vec![
                MirrorLink::new(
                    format!("{}/main/{md5}", self.base_url),
                    self.source(),
                    MirrorKind::ContentAddressed,
                )
                .with_declared_size(record.file_size_bytes),
                MirrorLink::new(
                    format!("{}/get.php?md5={md5}", self.base_url),
                    self.source(),
                    MirrorKind::MirrorRedirect,
                )
                .with_declared_size(record.file_size_bytes),
            ];
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

    fn adapter(base_url: &str) -> MirrorIndexAdapter {
        let http = ProviderHttp::new(
            reqwest::Client::new(),
            Arc::new(RateLimiter::per_provider(1000, Duration::from_secs(60))),
        );
        MirrorIndexAdapter::new(http, base_url.to_string())
    }

    fn hit(fields: &[(&str, &str)]) -> RawHit {
        let native = fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RawHit::new(SourceId::MirrorIndex, native)
    }

    // ==================== Normalization Tests ====================

    #[test]
    fn test_normalize_builds_hash_mirrors() {
        let adapter = adapter("https://index.test");
        let record = adapter.normalize(&hit(&[
            ("title", "Clean Code"),
            ("author", "Robert C. Martin"),
            ("md5", "ABC123DEF456"),
            ("filesize", "4194304"),
        ]));

        assert_eq!(record.mirrors.len(), 2);
        assert_eq!(record.mirrors[0].url, "https://index.test/main/abc123def456");
        assert_eq!(record.mirrors[0].kind, MirrorKind::ContentAddressed);
        assert_eq!(
            record.mirrors[1].url,
            "https://index.test/get.php?md5=abc123def456"
        );
        assert_eq!(record.mirrors[1].kind, MirrorKind::MirrorRedirect);
        assert_eq!(record.mirrors[0].declared_size, Some(4_194_304));
    }

    #[test]
    fn test_normalize_without_hash_has_no_mirrors() {
        let adapter = adapter("https://index.test");
        let record = adapter.normalize(&hit(&[("title", "Orphan Row")]));
        assert!(record.mirrors.is_empty());
    }

    #[test]
    fn test_normalize_identifier_with_multiple_isbns() {
        let adapter = adapter("https://index.test");
        let record = adapter.normalize(&hit(&[
            ("title", "Clean Code"),
            ("identifier", "1234567890 9780132350884"),
        ]));
        assert_eq!(record.isbn13.as_deref(), Some("9780132350884"));
    }

    #[test]
    fn test_normalize_cover_is_absolute() {
        let adapter = adapter("https://index.test");
        let record = adapter.normalize(&hit(&[
            ("title", "Clean Code"),
            ("coverurl", "cc/abc.jpg"),
        ]));
        assert_eq!(
            record.cover_url.as_deref(),
            Some("https://index.test/covers/cc/abc.jpg")
        );
    }

    // ==================== Search Tests ====================

    #[tokio::test]
    async fn test_search_parses_row_array() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"title": "Clean Code", "author": "Robert C. Martin", "md5": "abc"}
            ])))
            .mount(&server)
            .await;

        let hits = adapter(&server.uri()).search("clean code", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].field("md5"), Some("abc"));
    }

    #[tokio::test]
    async fn test_search_object_payload_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"error": "x"})))
            .mount(&server)
            .await;

        let err = adapter(&server.uri()).search("x", 5).await.unwrap_err();
        assert!(matches!(err, ProviderError::Malformed { .. }));
    }
}
