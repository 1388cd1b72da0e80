//! Canonical book data model.
//!
//! This module defines the shapes shared across the acquisition pipeline:
//! - [`RawHit`] - a provider-specific search result before normalization
//! - [`BookRecord`] - the canonical merged entity
//! - [`MirrorLink`] / [`MirrorKind`] - alternate download locations
//! - [`IdentityKey`] - the dedup/merge key derived per record
//!
//! Normalization helpers (`normalize_title`, `slugify`) live here because
//! both identity derivation and artifact naming depend on them.

pub mod isbn;
pub mod merge;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Maximum length of a generated slug (title part).
const SLUG_TITLE_MAX: usize = 50;

/// Maximum length of the author part of a generated slug.
const SLUG_AUTHOR_MAX: usize = 30;

/// Identifies which provider a hit or mirror came from.
///
/// The set of providers is closed by design: shared logic matches on the
/// variant instead of branching on free-form provider names.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// Archive-style catalog (HTML/JSON search over a large archive).
    Archive,
    /// Mirror-index catalog (rows keyed by content hash with mirror lists).
    MirrorIndex,
    /// Package-backed catalog (third-party book-search package API).
    Package,
}

impl SourceId {
    /// Returns the stable string form used in logs and the cache.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Archive => "archive",
            Self::MirrorIndex => "mirror-index",
            Self::Package => "package",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "archive" => Ok(Self::Archive),
            "mirror-index" => Ok(Self::MirrorIndex),
            "package" => Ok(Self::Package),
            _ => Err(format!("unknown provider: {s}")),
        }
    }
}

/// A provider-specific search result before normalization.
///
/// The `native` payload is an opaque key-value map; only the adapter that
/// produced the hit knows how to interpret it. Hits are transient and are
/// discarded once normalized into a [`BookRecord`] fragment.
#[derive(Debug, Clone)]
pub struct RawHit {
    /// The provider that produced this hit.
    pub source: SourceId,
    /// Opaque provider-native fields. Array values are stored as JSON text.
    pub native: HashMap<String, String>,
    /// When the hit was fetched from the provider.
    pub fetched_at: SystemTime,
}

impl RawHit {
    /// Creates a hit for the given provider with a fetch timestamp of now.
    #[must_use]
    pub fn new(source: SourceId, native: HashMap<String, String>) -> Self {
        Self {
            source,
            native,
            fetched_at: SystemTime::now(),
        }
    }

    /// Returns a native field as a trimmed string, or `None` when absent or empty.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.native
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// How durable a mirror's address is expected to be.
///
/// Content-addressed links are derived from the file's hash and are
/// presumed most durable; redirects through a mirror page are least.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorKind {
    /// Address derived from the file's content hash.
    ContentAddressed,
    /// Direct link to the file itself.
    Direct,
    /// Link through a mirror/redirect page.
    MirrorRedirect,
}

impl MirrorKind {
    /// Rank used for mirror ordering; lower is tried first.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::ContentAddressed => 0,
            Self::Direct => 1,
            Self::MirrorRedirect => 2,
        }
    }
}

/// A recorded failure against a mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorFailure {
    /// When the failure was observed.
    pub at: SystemTime,
    /// Human-readable failure reason (the error's display form).
    pub reason: String,
}

/// An alternate download location for a record's file.
///
/// Owned by exactly one [`BookRecord`]; never shared between records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorLink {
    /// The download URL.
    pub url: String,
    /// Which provider contributed this link.
    pub provider: SourceId,
    /// Durability class of the link.
    pub kind: MirrorKind,
    /// Resolved try order; lower is tried first.
    pub priority: u32,
    /// File size the contributing provider declared for this link.
    pub declared_size: Option<u64>,
    /// Most recent failure against this mirror, if any.
    pub last_failure: Option<MirrorFailure>,
}

impl MirrorLink {
    /// Creates a link with unassigned priority and no failure history.
    #[must_use]
    pub fn new(url: impl Into<String>, provider: SourceId, kind: MirrorKind) -> Self {
        Self {
            url: url.into(),
            provider,
            kind,
            priority: 0,
            declared_size: None,
            last_failure: None,
        }
    }

    /// Sets the provider-declared file size for corroboration during ranking.
    #[must_use]
    pub fn with_declared_size(mut self, size: Option<u64>) -> Self {
        self.declared_size = size;
        self
    }

    /// Records a failure against this mirror with a timestamp of now.
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.last_failure = Some(MirrorFailure {
            at: SystemTime::now(),
            reason: reason.into(),
        });
    }
}

/// The derived key deciding whether two fragments describe the same book.
///
/// A checksum-valid ISBN-13 wins when any contributing fragment carries
/// one; otherwise a composite of normalized title and primary-author
/// surname is used (year compatibility is checked at merge time, since an
/// equality key cannot express "year omitted when absent on either side").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IdentityKey {
    /// Normalized, checksum-verified ISBN-13.
    Isbn(String),
    /// Composite of normalized title and primary-author surname.
    TitleAuthor {
        /// Normalized title (lowercased, punctuation stripped, whitespace collapsed).
        title: String,
        /// Normalized primary-author surname.
        author: String,
    },
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Isbn(isbn) => write!(f, "isbn:{isbn}"),
            Self::TitleAuthor { title, author } => write!(f, "ta:{title}|{author}"),
        }
    }
}

/// The canonical book entity.
///
/// Produced as a per-provider fragment by `ProviderAdapter::normalize` and
/// consolidated by the merge engine. Unknown fields are `None` (or empty
/// collections), never a crash. A record intended for download must have a
/// non-empty `mirrors` list; records failing that are abandoned by the
/// orchestrator before any network call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    /// Book title as reported (cleaned of markup and excess whitespace).
    pub title: String,
    /// Authors in provider order; first is the primary author.
    pub authors: Vec<String>,
    /// Publication year when known.
    pub year: Option<u16>,
    /// Publisher when known.
    pub publisher: Option<String>,
    /// Language when known.
    pub language: Option<String>,
    /// Checksum-verified ISBN-13 when known (ISBN-10 inputs converted).
    pub isbn13: Option<String>,
    /// File format when known (lowercase, e.g. "pdf", "epub").
    pub file_format: Option<String>,
    /// Declared file size in bytes when known.
    pub file_size_bytes: Option<u64>,
    /// Cover image URL when known.
    pub cover_url: Option<String>,
    /// Description filled by enrichment when available.
    pub description: Option<String>,
    /// Genres filled by enrichment when available.
    pub genres: Vec<String>,
    /// Ordered candidate download locations.
    pub mirrors: Vec<MirrorLink>,
    /// Providers that contributed to this record.
    pub sources: BTreeSet<SourceId>,
}

impl BookRecord {
    /// Creates a fragment with the given title, authors, and contributing source.
    #[must_use]
    pub fn fragment(title: impl Into<String>, authors: Vec<String>, source: SourceId) -> Self {
        let mut sources = BTreeSet::new();
        sources.insert(source);
        Self {
            title: title.into(),
            authors,
            year: None,
            publisher: None,
            language: None,
            isbn13: None,
            file_format: None,
            file_size_bytes: None,
            cover_url: None,
            description: None,
            genres: Vec::new(),
            mirrors: Vec::new(),
            sources,
        }
    }

    /// Derives the identity key for this record.
    ///
    /// Stable for the life of a merged record: the merge engine derives the
    /// key once per group and never re-keys a record afterwards.
    #[must_use]
    pub fn identity_key(&self) -> IdentityKey {
        match &self.isbn13 {
            Some(isbn) => IdentityKey::Isbn(isbn.clone()),
            None => IdentityKey::TitleAuthor {
                title: normalize_title(&self.title),
                author: primary_author_surname(&self.authors),
            },
        }
    }

    /// Returns the filesystem slug derived from title and primary author.
    #[must_use]
    pub fn slug(&self) -> String {
        let title_part = slugify(&self.title, SLUG_TITLE_MAX);
        let author_part = self
            .authors
            .first()
            .map(|a| slugify(a, SLUG_AUTHOR_MAX))
            .filter(|a| !a.is_empty());
        match author_part {
            Some(author) => format!("{title_part}-{author}"),
            None => title_part,
        }
    }
}

/// Normalizes a title for identity comparison: lowercased, punctuation
/// stripped, whitespace collapsed.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_was_space = true;
    for c in title.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    out.trim_end().to_string()
}

/// Extracts the normalized surname of the primary author.
///
/// Handles both "Robert C. Martin" and "Martin, Robert C." forms; the
/// normalized result is lowercase alphanumeric.
#[must_use]
pub fn primary_author_surname(authors: &[String]) -> String {
    let Some(primary) = authors.first() else {
        return String::new();
    };
    let name = match primary.split_once(',') {
        Some((surname, _)) => surname,
        None => primary.split_whitespace().last().unwrap_or(primary),
    };
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Produces a lowercase hyphen-separated slug, truncated to `max_len`.
///
/// Truncation never splits mid-word: the last partial segment is dropped.
#[must_use]
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut out = String::new();
    let mut last_was_hyphen = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            out.push('-');
            last_was_hyphen = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.len() > max_len {
        let mut boundary = max_len;
        while !out.is_char_boundary(boundary) {
            boundary -= 1;
        }
        let cut = out[..boundary].rfind('-').unwrap_or(boundary);
        out.truncate(cut);
        while out.ends_with('-') {
            out.pop();
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== SourceId Tests ====================

    #[test]
    fn test_source_id_round_trip() {
        for source in [SourceId::Archive, SourceId::MirrorIndex, SourceId::Package] {
            assert_eq!(source.as_str().parse::<SourceId>().unwrap(), source);
        }
    }

    #[test]
    fn test_source_id_from_str_invalid() {
        assert!("gopher".parse::<SourceId>().is_err());
    }

    // ==================== Normalization Tests ====================

    #[test]
    fn test_normalize_title_collapses_whitespace_and_case() {
        assert_eq!(normalize_title("Clean  Code"), "clean code");
        assert_eq!(normalize_title("clean code"), "clean code");
    }

    #[test]
    fn test_normalize_title_strips_punctuation() {
        assert_eq!(
            normalize_title("The Pragmatic Programmer: Your Journey!"),
            "the pragmatic programmer your journey"
        );
    }

    #[test]
    fn test_primary_author_surname_western_order() {
        let authors = vec!["Robert C. Martin".to_string()];
        assert_eq!(primary_author_surname(&authors), "martin");
    }

    #[test]
    fn test_primary_author_surname_comma_order() {
        let authors = vec!["Martin, Robert C.".to_string()];
        assert_eq!(primary_author_surname(&authors), "martin");
    }

    #[test]
    fn test_primary_author_surname_empty() {
        assert_eq!(primary_author_surname(&[]), "");
    }

    // ==================== Slug Tests ====================

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Clean Code", 50), "clean-code");
    }

    #[test]
    fn test_slugify_strips_special_characters() {
        assert_eq!(slugify("C++ & Friends (2nd ed.)", 50), "c-friends-2nd-ed");
    }

    #[test]
    fn test_slugify_truncates_on_word_boundary() {
        let slug = slugify("a very long title that keeps going and going", 20);
        assert!(slug.len() <= 20);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn test_record_slug_includes_author() {
        let record = BookRecord::fragment(
            "Clean Code",
            vec!["Robert C. Martin".to_string()],
            SourceId::Archive,
        );
        assert_eq!(record.slug(), "clean-code-robert-c-martin");
    }

    #[test]
    fn test_record_slug_without_author() {
        let record = BookRecord::fragment("Clean Code", vec![], SourceId::Archive);
        assert_eq!(record.slug(), "clean-code");
    }

    // ==================== IdentityKey Tests ====================

    #[test]
    fn test_identity_key_prefers_isbn() {
        let mut record = BookRecord::fragment(
            "Clean Code",
            vec!["Robert C. Martin".to_string()],
            SourceId::Archive,
        );
        record.isbn13 = Some("9780132350884".to_string());
        assert_eq!(
            record.identity_key(),
            IdentityKey::Isbn("9780132350884".to_string())
        );
    }

    #[test]
    fn test_identity_key_falls_back_to_title_author() {
        let record = BookRecord::fragment(
            "Clean  Code",
            vec!["Robert C. Martin".to_string()],
            SourceId::Archive,
        );
        assert_eq!(
            record.identity_key(),
            IdentityKey::TitleAuthor {
                title: "clean code".to_string(),
                author: "martin".to_string(),
            }
        );
    }

    #[test]
    fn test_identity_key_display() {
        let key = IdentityKey::Isbn("9780132350884".to_string());
        assert_eq!(key.to_string(), "isbn:9780132350884");

        let key = IdentityKey::TitleAuthor {
            title: "clean code".to_string(),
            author: "martin".to_string(),
        };
        assert_eq!(key.to_string(), "ta:clean code|martin");
    }

    // ==================== MirrorLink Tests ====================

    #[test]
    fn test_mirror_kind_rank_ordering() {
        assert!(MirrorKind::ContentAddressed.rank() < MirrorKind::Direct.rank());
        assert!(MirrorKind::Direct.rank() < MirrorKind::MirrorRedirect.rank());
    }

    #[test]
    fn test_mirror_link_record_failure() {
        let mut link = MirrorLink::new(
            "https://m1.example/file",
            SourceId::Archive,
            MirrorKind::Direct,
        );
        assert!(link.last_failure.is_none());
        link.record_failure("HTTP 503");
        let failure = link.last_failure.unwrap();
        assert_eq!(failure.reason, "HTTP 503");
    }

    // ==================== RawHit Tests ====================

    #[test]
    fn test_raw_hit_field_trims_and_filters_empty() {
        let mut native = HashMap::new();
        native.insert("title".to_string(), "  Clean Code  ".to_string());
        native.insert("publisher".to_string(), "   ".to_string());
        let hit = RawHit::new(SourceId::Archive, native);

        assert_eq!(hit.field("title"), Some("Clean Code"));
        assert_eq!(hit.field("publisher"), None);
        assert_eq!(hit.field("missing"), None);
    }
}
