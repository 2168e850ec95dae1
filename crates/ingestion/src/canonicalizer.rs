//! Canonicalizer
//!
//! Maps heterogeneous identifiers onto one canonical key per paper and
//! decides whether an incoming record merges with a known node.

use chrono::{Datelike, Utc};
use sha2::{Digest, Sha256};
use spillscope_common::errors::{AppError, Result};
use spillscope_common::models::{
    first_author_surname, CanonicalKey, ExternalId, IdScheme, NodeResolution, PaperNode,
    PaperRecord, FALLBACK_PREFIX,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::identifiers::{normalize, parse_reference};

/// Earliest publication year accepted for fallback keys
const MIN_YEAR: i32 = 1600;

/// Hex characters kept from the fallback digest
const FALLBACK_DIGEST_LEN: usize = 32;

/// How a record was matched against known nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// No known node shares an identifier or fallback key
    New,
    /// Shares this external identifier with a known node
    MatchedIdentifier(ExternalId),
    /// Same title, first author and year as a known node
    MatchedFallback,
}

/// A known key folded into a better one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRename {
    pub from: CanonicalKey,
    pub to: CanonicalKey,
}

/// A reference that could not be turned into an edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedReference {
    pub reference: String,
    pub reason: String,
}

/// Output of canonicalizing one record
#[derive(Debug, Clone)]
pub struct Canonicalized {
    pub key: CanonicalKey,
    pub decision: MergeDecision,
    pub node: PaperNode,
    /// Known keys that now belong to `key` and must be folded into it
    pub renamed: Vec<KeyRename>,
    /// Cited keys in reference order, deduplicated
    pub citations: Vec<CanonicalKey>,
    pub dropped_references: Vec<DroppedReference>,
}

/// Key choice for one record before it is registered
struct Resolution {
    key: CanonicalKey,
    decision: MergeDecision,
    /// Matched keys other than `key`
    merged: Vec<CanonicalKey>,
    /// Every identifier the merged paper carries
    owned: BTreeSet<ExternalId>,
}

/// Identifier index over every key seen so far.
///
/// Each identifier maps to exactly one key, and a key is always the best
/// identifier its paper carries, so the key of a paper does not depend on
/// the order records and references arrive in.
#[derive(Debug, Default)]
pub struct Canonicalizer {
    by_identifier: BTreeMap<ExternalId, CanonicalKey>,
    by_fallback: BTreeMap<CanonicalKey, CanonicalKey>,
    /// Identifiers owned by each live key
    members: BTreeMap<CanonicalKey, BTreeSet<ExternalId>>,
    /// Retired key -> live key it was folded into
    aliases: BTreeMap<CanonicalKey, CanonicalKey>,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from stored nodes, e.g. when resuming a run
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a PaperNode>) -> Self {
        let mut canonicalizer = Self::new();
        for node in nodes {
            for id in &node.identifiers {
                canonicalizer
                    .by_identifier
                    .entry(id.clone())
                    .or_insert_with(|| node.key.clone());
            }
            canonicalizer
                .members
                .insert(node.key.clone(), node.identifiers.clone());
            for alias in &node.aliases {
                canonicalizer
                    .aliases
                    .insert(alias.clone(), node.key.clone());
            }
            if let Some(year) = node.year {
                if let Some(fallback) =
                    fallback_key(node.title.as_deref().unwrap_or_default(), &node.authors, year)
                {
                    canonicalizer
                        .by_fallback
                        .entry(fallback)
                        .or_insert_with(|| node.key.clone());
                }
            }
        }
        canonicalizer
    }

    /// Canonicalize one adapter record
    pub fn canonicalize(&mut self, record: &PaperRecord) -> Result<Canonicalized> {
        let identifiers = self.normalize_identifiers(record);
        let title = record.title.trim();
        let year = match record.year {
            Some(y) if plausible_year(y) => Some(y),
            Some(y) => {
                if identifiers.is_empty() {
                    return Err(AppError::invalid_field(
                        "year",
                        format!("malformed year {} and no external identifier", y),
                    ));
                }
                warn!(year = y, "Dropping implausible year");
                None
            }
            None => None,
        };

        if identifiers.is_empty() {
            if year.is_none() {
                return Err(AppError::invalid_field(
                    "year",
                    "missing year and no external identifier",
                ));
            }
            if title.is_empty() {
                return Err(AppError::invalid_field(
                    "title",
                    "missing title and no external identifier",
                ));
            }
        }

        let fallback = year.and_then(|y| fallback_key(title, &record.authors, y));
        let Resolution {
            key,
            decision,
            merged,
            owned,
        } = self.resolve(&identifiers, fallback.as_ref())?;
        self.register(&key, owned, &merged, fallback.as_ref());

        let renamed: Vec<KeyRename> = merged
            .into_iter()
            .map(|from| KeyRename {
                from,
                to: key.clone(),
            })
            .collect();
        for rename in &renamed {
            info!(from = %rename.from, to = %rename.to, "Folding known paper into a better key");
        }

        let mut citations = Vec::new();
        let mut dropped_references = Vec::new();
        let mut seen = BTreeSet::new();
        for reference in &record.citations {
            match self.resolve_reference(reference) {
                Some(cited) if cited == key => dropped_references.push(DroppedReference {
                    reference: reference.clone(),
                    reason: "self-citation".into(),
                }),
                Some(cited) => {
                    if seen.insert(cited.clone()) {
                        citations.push(cited);
                    }
                }
                None => dropped_references.push(DroppedReference {
                    reference: reference.clone(),
                    reason: "unrecognized identifier".into(),
                }),
            }
        }

        let mut citation_contexts = BTreeMap::new();
        for context in &record.citation_contexts {
            if let Some(cited) = self.resolve_reference(&context.reference) {
                let snippet = context.snippet.trim();
                if !snippet.is_empty() {
                    citation_contexts
                        .entry(cited)
                        .or_insert_with(|| snippet.to_string());
                }
            }
        }

        let node = PaperNode {
            key: key.clone(),
            resolution: NodeResolution::Resolved,
            title: (!title.is_empty()).then(|| title.to_string()),
            authors: record.authors.clone(),
            year,
            venue: non_blank(record.venue.as_deref()),
            abstract_text: non_blank(record.abstract_text.as_deref()),
            source: non_blank(record.source.as_deref()),
            identifiers: identifiers.into_iter().collect(),
            alternates: Vec::new(),
            citation_contexts,
            aliases: BTreeSet::new(),
        };

        debug!(key = %key, decision = ?decision, citations = citations.len(), "Record canonicalized");

        Ok(Canonicalized {
            key,
            decision,
            node,
            renamed,
            citations,
            dropped_references,
        })
    }

    /// Key for a citation reference. Known identifiers map to their node;
    /// unknown ones are registered so a later record merges with the stub.
    pub fn resolve_reference(&mut self, reference: &str) -> Option<CanonicalKey> {
        let reference = reference.trim();
        if reference.starts_with(&format!("{}:", FALLBACK_PREFIX)) {
            return Some(self.canonical_key(&CanonicalKey::from_canonical(reference)));
        }
        let id = parse_reference(reference)?;
        if let Some(key) = self.by_identifier.get(&id) {
            return Some(key.clone());
        }
        let key = CanonicalKey::from_external(&id);
        self.by_identifier.insert(id.clone(), key.clone());
        self.members.entry(key.clone()).or_default().insert(id);
        Some(key)
    }

    /// Key a reference points at without registering anything
    pub fn lookup(&self, reference: &str) -> Option<CanonicalKey> {
        let reference = reference.trim();
        if reference.starts_with(&format!("{}:", FALLBACK_PREFIX)) {
            return Some(self.canonical_key(&CanonicalKey::from_canonical(reference)));
        }
        let id = parse_reference(reference)?;
        Some(
            self.by_identifier
                .get(&id)
                .cloned()
                .unwrap_or_else(|| CanonicalKey::from_external(&id)),
        )
    }

    /// Map a key onto the node that currently owns it; live keys map to themselves
    pub fn canonical_key(&self, key: &CanonicalKey) -> CanonicalKey {
        if let Some(live) = self.aliases.get(key) {
            return live.clone();
        }
        key.external_id()
            .and_then(|id| self.by_identifier.get(&id))
            .cloned()
            .unwrap_or_else(|| key.clone())
    }

    fn normalize_identifiers(&self, record: &PaperRecord) -> BTreeSet<ExternalId> {
        record
            .identifiers
            .iter()
            .filter_map(|(scheme, value)| {
                let Some(scheme) = IdScheme::from_name(scheme) else {
                    debug!(scheme = %scheme, "Ignoring unknown identifier scheme");
                    return None;
                };
                let normalized = normalize(scheme, value);
                if normalized.is_none() {
                    warn!(scheme = %scheme, value = %value, "Ignoring malformed identifier");
                }
                normalized
            })
            .collect()
    }

    fn resolve(
        &self,
        identifiers: &BTreeSet<ExternalId>,
        fallback: Option<&CanonicalKey>,
    ) -> Result<Resolution> {
        let mut matched = BTreeSet::new();
        let mut decision = MergeDecision::New;

        // Identifiers iterate in scheme priority order
        for id in identifiers {
            if let Some(key) = self.by_identifier.get(id) {
                if decision == MergeDecision::New {
                    decision = MergeDecision::MatchedIdentifier(id.clone());
                }
                matched.insert(key.clone());
            }
        }
        if let Some(key) = fallback.and_then(|f| self.by_fallback.get(f)) {
            if decision == MergeDecision::New {
                decision = MergeDecision::MatchedFallback;
            }
            matched.insert(key.clone());
        }

        let mut owned = identifiers.clone();
        for key in &matched {
            owned.extend(self.owned_by(key));
        }

        let key = match owned.iter().next() {
            Some(best) => CanonicalKey::from_external(best),
            None => matched
                .iter()
                .next()
                .or(fallback)
                .cloned()
                .ok_or_else(|| {
                    AppError::validation("record has neither identifiers nor a fallback key")
                })?,
        };
        let merged = matched.into_iter().filter(|k| *k != key).collect();

        Ok(Resolution {
            key,
            decision,
            merged,
            owned,
        })
    }

    fn owned_by(&self, key: &CanonicalKey) -> BTreeSet<ExternalId> {
        let mut ids = self.members.get(key).cloned().unwrap_or_default();
        ids.extend(key.external_id());
        ids
    }

    fn register(
        &mut self,
        key: &CanonicalKey,
        owned: BTreeSet<ExternalId>,
        merged: &[CanonicalKey],
        fallback: Option<&CanonicalKey>,
    ) {
        for id in &owned {
            self.by_identifier.insert(id.clone(), key.clone());
        }
        for old in merged {
            self.members.remove(old);
            self.aliases.insert(old.clone(), key.clone());
        }
        if !merged.is_empty() {
            for target in self.by_fallback.values_mut().chain(self.aliases.values_mut()) {
                if merged.contains(target) {
                    *target = key.clone();
                }
            }
        }
        self.aliases.remove(key);
        self.members.entry(key.clone()).or_default().extend(owned);
        if let Some(fallback) = fallback {
            self.by_fallback
                .entry(fallback.clone())
                .or_insert_with(|| key.clone());
        }
    }
}

/// `fp:` key from lower-cased, whitespace-collapsed title, first author surname and year
pub fn fallback_key(title: &str, authors: &[String], year: i32) -> Option<CanonicalKey> {
    let title = title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if title.is_empty() {
        return None;
    }
    let surname = first_author_surname(authors).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|{}", title, surname, year).as_bytes());
    let digest = hex::encode(hasher.finalize());
    Some(CanonicalKey::fallback(&digest[..FALLBACK_DIGEST_LEN]))
}

fn plausible_year(year: i32) -> bool {
    (MIN_YEAR..=Utc::now().year() + 1).contains(&year)
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spillscope_common::models::CitationContext;

    fn record(ids: &[(&str, &str)], title: &str, year: Option<i32>) -> PaperRecord {
        PaperRecord {
            identifiers: ids
                .iter()
                .map(|(s, v)| (s.to_string(), v.to_string()))
                .collect(),
            title: title.to_string(),
            authors: vec!["Ada Lovelace".into()],
            year,
            ..Default::default()
        }
    }

    #[test]
    fn test_priority_key_selection() {
        let mut canon = Canonicalizer::new();
        let out = canon
            .canonicalize(&record(
                &[("openalex", "W1"), ("doi", "10.1/A"), ("arxiv", "2101.00001v2")],
                "Paper",
                Some(2021),
            ))
            .unwrap();

        assert_eq!(out.key.as_str(), "doi:10.1/a");
        assert_eq!(out.decision, MergeDecision::New);
        assert_eq!(out.node.identifiers.len(), 3);
    }

    #[test]
    fn test_merge_on_any_shared_identifier() {
        let mut canon = Canonicalizer::new();
        let first = canon
            .canonicalize(&record(&[("doi", "10.1/a")], "Paper", Some(2021)))
            .unwrap();
        let second = canon
            .canonicalize(&record(
                &[("arxiv", "2101.00001"), ("doi", "https://doi.org/10.1/A")],
                "Paper (preprint)",
                Some(2020),
            ))
            .unwrap();

        assert_eq!(first.key, second.key);
        assert!(matches!(second.decision, MergeDecision::MatchedIdentifier(_)));
        // The arXiv id now resolves to the same node
        assert_eq!(canon.resolve_reference("arXiv:2101.00001"), Some(first.key));
    }

    #[test]
    fn test_merge_on_fallback_key() {
        let mut canon = Canonicalizer::new();
        let first = canon
            .canonicalize(&record(&[], "Scaling   Laws for  Oversight", Some(2022)))
            .unwrap();
        let second = canon
            .canonicalize(&record(&[], "scaling laws for oversight", Some(2022)))
            .unwrap();

        assert!(first.key.is_fallback());
        assert_eq!(first.key, second.key);
        assert_eq!(second.decision, MergeDecision::MatchedFallback);
    }

    #[test]
    fn test_rejects_missing_year_without_identifiers() {
        let mut canon = Canonicalizer::new();
        let err = canon.canonicalize(&record(&[], "Untitled", None)).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let err = canon.canonicalize(&record(&[], "Untitled", Some(20211))).unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        // An identifier makes the year optional
        assert!(canon.canonicalize(&record(&[("doi", "10.1/x")], "", None)).is_ok());
    }

    #[test]
    fn test_canonicalization_is_idempotent() {
        let mut canon = Canonicalizer::new();
        let out = canon
            .canonicalize(&record(&[("arxiv", "2101.00001"), ("doi", "10.1/a")], "P", Some(2021)))
            .unwrap();

        assert_eq!(canon.canonical_key(&out.key), out.key);
        assert_eq!(canon.resolve_reference(out.key.as_str()), Some(out.key.clone()));
        assert_eq!(
            canon.canonical_key(&CanonicalKey::from_canonical("arxiv:2101.00001")),
            out.key
        );

        let again = canon
            .canonicalize(&record(&[("arxiv", "2101.00001"), ("doi", "10.1/a")], "P", Some(2021)))
            .unwrap();
        assert_eq!(again.key, out.key);
    }

    #[test]
    fn test_citations_resolved_and_deduplicated() {
        let mut canon = Canonicalizer::new();
        let mut rec = record(&[("doi", "10.1/a")], "P", Some(2021));
        rec.citations = vec![
            "10.1/B".into(),
            "doi:10.1/b".into(),
            "10.1/a".into(),
            "free text".into(),
        ];
        rec.citation_contexts = vec![CitationContext {
            reference: "https://doi.org/10.1/b".into(),
            snippet: " we build on their red-teaming protocol ".into(),
        }];

        let out = canon.canonicalize(&rec).unwrap();

        assert_eq!(out.citations, vec![CanonicalKey::from_canonical("doi:10.1/b")]);
        assert_eq!(out.dropped_references.len(), 2);
        assert_eq!(
            out.node.citation_contexts[&CanonicalKey::from_canonical("doi:10.1/b")],
            "we build on their red-teaming protocol"
        );
    }

    #[test]
    fn test_stub_reference_folds_into_best_identifier() {
        let mut canon = Canonicalizer::new();
        let stub = canon.resolve_reference("W77").unwrap();
        assert_eq!(stub.as_str(), "openalex:W77");

        let out = canon
            .canonicalize(&record(&[("doi", "10.1/z"), ("openalex", "W77")], "Z", Some(2019)))
            .unwrap();

        assert_eq!(out.key.as_str(), "doi:10.1/z");
        assert_eq!(
            out.decision,
            MergeDecision::MatchedIdentifier(ExternalId::new(IdScheme::OpenAlex, "W77"))
        );
        assert_eq!(
            out.renamed,
            vec![KeyRename {
                from: stub.clone(),
                to: out.key.clone()
            }]
        );
        assert_eq!(canon.resolve_reference("W77"), Some(out.key.clone()));
        assert_eq!(canon.canonical_key(&stub), out.key);
    }

    #[test]
    fn test_lookup_normalizes_without_registering() {
        let mut canon = Canonicalizer::new();
        let z = canon
            .canonicalize(&record(&[("doi", "10.1/z"), ("openalex", "W77")], "Z", Some(2019)))
            .unwrap()
            .key;

        assert_eq!(canon.lookup("doi:10.1/Z"), Some(z.clone()));
        assert_eq!(canon.lookup("https://openalex.org/W77"), Some(z));
        assert_eq!(canon.lookup("10.1/unseen").unwrap().as_str(), "doi:10.1/unseen");
        assert_eq!(canon.lookup("   "), None);

        // Lookups leave the tables alone
        assert_eq!(canon.resolve_reference("10.1/unseen").unwrap().as_str(), "doi:10.1/unseen");
        assert!(canon.lookup("W78").is_some());
        assert_eq!(canon.by_identifier.len(), 3);
    }

    #[test]
    fn test_key_independent_of_arrival_order() {
        let full = record(&[("doi", "10.1/z"), ("openalex", "W77")], "Z", Some(2019));
        let mut citing = record(&[("arxiv", "2301.00009")], "Cites Z", Some(2023));
        citing.citations = vec!["https://openalex.org/W77".into()];

        let mut record_first = Canonicalizer::new();
        let z_first = record_first.canonicalize(&full).unwrap();
        let citing_first = record_first.canonicalize(&citing).unwrap();

        let mut reference_first = Canonicalizer::new();
        let citing_second = reference_first.canonicalize(&citing).unwrap();
        let z_second = reference_first.canonicalize(&full).unwrap();

        assert_eq!(z_first.key, z_second.key);
        assert_eq!(citing_first.citations, vec![z_first.key.clone()]);
        // The early reference still lands on the same paper
        assert_eq!(
            reference_first.canonical_key(&citing_second.citations[0]),
            z_second.key
        );
    }

    #[test]
    fn test_bridging_record_merges_known_papers() {
        let mut canon = Canonicalizer::new();
        let a = canon.canonicalize(&record(&[("doi", "10.1/a")], "A", Some(2020))).unwrap();
        let b = canon
            .canonicalize(&record(&[("arxiv", "2001.00002")], "A (preprint)", Some(2020)))
            .unwrap();
        assert_ne!(a.key, b.key);

        let merged = canon
            .canonicalize(&record(&[("doi", "10.1/a"), ("arxiv", "2001.00002")], "A", Some(2020)))
            .unwrap();

        assert_eq!(merged.key, a.key);
        assert_eq!(
            merged.renamed,
            vec![KeyRename {
                from: b.key.clone(),
                to: a.key.clone()
            }]
        );
        // Every identifier of all three records now resolves to one key
        assert_eq!(canon.canonical_key(&b.key), a.key);
        assert_eq!(canon.resolve_reference("arXiv:2001.00002"), Some(a.key.clone()));
        let again = canon
            .canonicalize(&record(&[("arxiv", "2001.00002")], "A (preprint)", Some(2020)))
            .unwrap();
        assert_eq!(again.key, a.key);
        assert!(again.renamed.is_empty());
    }

    #[test]
    fn test_fallback_key_upgrades_to_identifier() {
        let mut canon = Canonicalizer::new();
        let bare = canon.canonicalize(&record(&[], "Scalable Oversight", Some(2022))).unwrap();
        assert!(bare.key.is_fallback());

        let with_doi = canon
            .canonicalize(&record(&[("doi", "10.1/so")], "Scalable Oversight", Some(2022)))
            .unwrap();

        assert_eq!(with_doi.key.as_str(), "doi:10.1/so");
        assert_eq!(with_doi.decision, MergeDecision::MatchedFallback);
        assert_eq!(with_doi.renamed[0].from, bare.key);
        assert_eq!(canon.resolve_reference(bare.key.as_str()), Some(with_doi.key.clone()));

        let later = canon.canonicalize(&record(&[], "Scalable Oversight", Some(2022))).unwrap();
        assert_eq!(later.key, with_doi.key);
    }

    #[test]
    fn test_rebuild_from_nodes() {
        let mut canon = Canonicalizer::new();
        let out = canon.canonicalize(&record(&[], "Rebuilt Paper", Some(2018))).unwrap();

        let mut rebuilt = Canonicalizer::from_nodes([&out.node]);
        let again = rebuilt.canonicalize(&record(&[], "Rebuilt Paper", Some(2018))).unwrap();

        assert_eq!(again.key, out.key);
        assert_eq!(again.decision, MergeDecision::MatchedFallback);
    }
}
