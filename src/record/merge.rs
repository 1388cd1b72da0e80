//! Consolidation of per-provider fragments into canonical records.
//!
//! The merge engine is pure: it takes normalized fragments and produces
//! merged records plus any conflicts, without touching the network or
//! filesystem. Field conflicts are settled by provider priority order;
//! mirrors and sources are unioned so a merged record is never poorer
//! than its richest fragment.

use std::collections::HashMap;

use tracing::{debug, instrument};

use super::{normalize_title, primary_author_surname, BookRecord, SourceId};

/// An identity collision that could not be merged safely.
///
/// Raised when a fragment without an ISBN matches the title/author key of
/// more than one ISBN-bearing record. Merging would have to pick an ISBN
/// arbitrarily, so the fragment is kept as its own record instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    /// Normalized title shared by the colliding fragments.
    pub title: String,
    /// Normalized primary-author surname shared by the colliding fragments.
    pub author: String,
    /// The ISBNs that disagreed under the shared key.
    pub isbns: Vec<String>,
    /// Providers whose fragments were involved.
    pub sources: Vec<SourceId>,
}

/// The result of a merge pass.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Consolidated records in first-appearance order.
    pub records: Vec<BookRecord>,
    /// Collisions that were kept separate rather than merged.
    pub conflicts: Vec<MergeConflict>,
}

/// Merges fragments from multiple providers into canonical records.
#[derive(Debug, Clone)]
pub struct RecordMerger {
    priority: Vec<SourceId>,
}

impl RecordMerger {
    /// Creates a merger that settles field conflicts in the given provider
    /// priority order (earlier wins).
    #[must_use]
    pub fn new(priority: Vec<SourceId>) -> Self {
        Self { priority }
    }

    /// Consolidates fragments into merged records.
    ///
    /// Fragments carrying a verified ISBN-13 group by ISBN. Fragments
    /// without one group by normalized title plus primary-author surname,
    /// with year treated as corroborating: equal years or an absent year
    /// on either side are compatible, disagreeing years split the group.
    /// The output order follows first appearance in the input, so the same
    /// input always yields the same output.
    #[instrument(skip_all, fields(fragments = fragments.len()))]
    pub fn merge(&self, fragments: Vec<BookRecord>) -> MergeOutcome {
        let mut isbn_groups: Vec<(String, Vec<BookRecord>)> = Vec::new();
        let mut isbn_index: HashMap<String, usize> = HashMap::new();
        let mut keyless: Vec<BookRecord> = Vec::new();

        for fragment in fragments {
            match fragment.isbn13.clone() {
                Some(isbn) => match isbn_index.get(&isbn) {
                    Some(&i) => isbn_groups[i].1.push(fragment),
                    None => {
                        isbn_index.insert(isbn.clone(), isbn_groups.len());
                        isbn_groups.push((isbn, vec![fragment]));
                    }
                },
                None => keyless.push(fragment),
            }
        }

        let mut outcome = MergeOutcome::default();
        for (_, group) in isbn_groups {
            outcome.records.push(self.merge_group(group));
        }

        self.merge_keyless(keyless, &mut outcome);
        debug!(
            records = outcome.records.len(),
            conflicts = outcome.conflicts.len(),
            "merge pass complete"
        );
        outcome
    }

    /// Folds keyless fragments into existing ISBN records where the
    /// title/author key matches unambiguously, otherwise groups them among
    /// themselves.
    fn merge_keyless(&self, keyless: Vec<BookRecord>, outcome: &mut MergeOutcome) {
        // Groups of keyless fragments that matched nothing ISBN-bearing.
        let mut groups: Vec<(CompositeKey, Vec<BookRecord>)> = Vec::new();

        for fragment in keyless {
            let key = CompositeKey::of(&fragment);

            let matching_isbn_records: Vec<usize> = outcome
                .records
                .iter()
                .enumerate()
                .filter(|(_, r)| {
                    r.isbn13.is_some()
                        && CompositeKey::of(r).matches(&key)
                        && years_compatible(r.year, fragment.year)
                })
                .map(|(i, _)| i)
                .collect();

            match matching_isbn_records.len() {
                1 => {
                    let record = &mut outcome.records[matching_isbn_records[0]];
                    *record = self.merge_pair(record.clone(), fragment);
                    continue;
                }
                n if n > 1 => {
                    // Same composite key resolves to several distinct ISBNs;
                    // attaching would pick one arbitrarily.
                    let conflict = MergeConflict {
                        title: key.title.clone(),
                        author: key.author.clone(),
                        isbns: matching_isbn_records
                            .iter()
                            .filter_map(|&i| outcome.records[i].isbn13.clone())
                            .collect(),
                        sources: fragment.sources.iter().copied().collect(),
                    };
                    debug!(
                        title = %conflict.title,
                        isbns = ?conflict.isbns,
                        "identity collision, keeping fragment separate"
                    );
                    outcome.conflicts.push(conflict);
                    outcome.records.push(fragment);
                    continue;
                }
                _ => {}
            }

            let position = groups.iter().position(|(k, g)| {
                k.matches(&key) && g.iter().all(|r| years_compatible(r.year, fragment.year))
            });
            match position {
                Some(i) => groups[i].1.push(fragment),
                None => groups.push((key, vec![fragment])),
            }
        }

        for (_, group) in groups {
            outcome.records.push(self.merge_group(group));
        }
    }

    /// Merges a group known to describe the same book.
    fn merge_group(&self, group: Vec<BookRecord>) -> BookRecord {
        let mut ordered = group;
        ordered.sort_by_key(|r| self.rank_of(r));

        let mut iter = ordered.into_iter();
        let Some(base) = iter.next() else {
            unreachable!("merge groups are never empty");
        };
        iter.fold(base, |acc, next| self.merge_pair(acc, next))
    }

    /// Merges `other` into `base`; `base`'s populated fields win.
    fn merge_pair(&self, base: BookRecord, other: BookRecord) -> BookRecord {
        let (mut into, from) = if self.rank_of(&other) < self.rank_of(&base) {
            (other, base)
        } else {
            (base, other)
        };

        if into.authors.is_empty() {
            into.authors = from.authors;
        }
        into.year = into.year.or(from.year);
        into.publisher = into.publisher.or(from.publisher);
        into.language = into.language.or(from.language);
        into.isbn13 = into.isbn13.or(from.isbn13);
        into.file_format = into.file_format.or(from.file_format);
        into.file_size_bytes = into.file_size_bytes.or(from.file_size_bytes);
        into.cover_url = into.cover_url.or(from.cover_url);
        into.description = into.description.or(from.description);
        if into.genres.is_empty() {
            into.genres = from.genres;
        }
        into.mirrors.extend(from.mirrors);
        into.sources.extend(from.sources);
        into
    }

    /// Position of the record's best source in the priority order;
    /// unknown sources sort last.
    fn rank_of(&self, record: &BookRecord) -> usize {
        record
            .sources
            .iter()
            .filter_map(|s| self.priority.iter().position(|p| p == s))
            .min()
            .unwrap_or(self.priority.len())
    }
}

/// Title/author composite used for keyless grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CompositeKey {
    title: String,
    author: String,
}

impl CompositeKey {
    fn of(record: &BookRecord) -> Self {
        Self {
            title: normalize_title(&record.title),
            author: primary_author_surname(&record.authors),
        }
    }

    fn matches(&self, other: &Self) -> bool {
        self == other
    }
}

/// Years corroborate when equal or when either side is unknown.
fn years_compatible(a: Option<u16>, b: Option<u16>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}
