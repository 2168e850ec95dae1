//! Paper records and canonical graph nodes

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Identifier schemes in priority order, most authoritative first.
///
/// The derived `Ord` is the priority order used when picking the
/// canonical key of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdScheme {
    Doi,
    Arxiv,
    Pmid,
    #[serde(rename = "openalex")]
    OpenAlex,
    #[serde(rename = "s2")]
    SemanticScholar,
    Mag,
}

impl IdScheme {
    /// All schemes in priority order
    pub const ALL: [IdScheme; 6] = [
        IdScheme::Doi,
        IdScheme::Arxiv,
        IdScheme::Pmid,
        IdScheme::OpenAlex,
        IdScheme::SemanticScholar,
        IdScheme::Mag,
    ];

    /// Prefix used in canonical keys
    pub const fn prefix(self) -> &'static str {
        match self {
            IdScheme::Doi => "doi",
            IdScheme::Arxiv => "arxiv",
            IdScheme::Pmid => "pmid",
            IdScheme::OpenAlex => "openalex",
            IdScheme::SemanticScholar => "s2",
            IdScheme::Mag => "mag",
        }
    }

    /// Resolve an adapter-provided scheme name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "doi" => Some(IdScheme::Doi),
            "arxiv" | "arxiv_id" => Some(IdScheme::Arxiv),
            "pmid" | "pubmed" => Some(IdScheme::Pmid),
            "openalex" | "openalex_id" => Some(IdScheme::OpenAlex),
            "s2" | "semantic_scholar" | "s2_paper_id" | "corpus_id" => {
                Some(IdScheme::SemanticScholar)
            }
            "mag" => Some(IdScheme::Mag),
            _ => None,
        }
    }
}

impl fmt::Display for IdScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// One normalized external identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExternalId {
    pub scheme: IdScheme,
    pub value: String,
}

impl ExternalId {
    pub fn new(scheme: IdScheme, value: impl Into<String>) -> Self {
        Self {
            scheme,
            value: value.into(),
        }
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme.prefix(), self.value)
    }
}

/// Prefix of keys derived from title, first author and year
pub const FALLBACK_PREFIX: &str = "fp";

/// Deduplicated identity of a paper.
///
/// Either `<scheme>:<normalized value>` or `fp:<hash>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    /// Key for a normalized external identifier
    pub fn from_external(id: &ExternalId) -> Self {
        Self(id.to_string())
    }

    /// Key for a fallback digest
    pub fn fallback(digest: &str) -> Self {
        Self(format!("{}:{}", FALLBACK_PREFIX, digest))
    }

    /// Wrap a string that is already in canonical form
    pub fn from_canonical(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the key was derived from title/author/year
    pub fn is_fallback(&self) -> bool {
        self.0.starts_with("fp:")
    }

    /// The external identifier this key was derived from, if any
    pub fn external_id(&self) -> Option<ExternalId> {
        let (prefix, value) = self.0.split_once(':')?;
        IdScheme::ALL
            .iter()
            .find(|s| s.prefix() == prefix)
            .map(|s| ExternalId::new(*s, value))
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CanonicalKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Citation snippet attached to one reference of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationContext {
    /// Identifier reference as written in `citations`
    pub reference: String,
    /// Sentence around the citation
    pub snippet: String,
}

/// Normalized metadata record handed over by a source adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    /// Scheme name -> raw identifier value
    #[serde(default)]
    pub identifiers: BTreeMap<String, String>,

    #[serde(default)]
    pub title: String,

    /// Author display names, first author first
    #[serde(default)]
    pub authors: Vec<String>,

    pub year: Option<i32>,

    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,

    #[serde(default)]
    pub venue: Option<String>,

    /// Provenance tag (openalex, s2, manual, ...)
    #[serde(default)]
    pub source: Option<String>,

    /// Identifier references of the works this record cites
    #[serde(default)]
    pub citations: Vec<String>,

    #[serde(default)]
    pub citation_contexts: Vec<CitationContext>,
}

/// Whether a node carries metadata yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeResolution {
    /// Known only as a citation target
    Stub,
    /// Metadata captured from a record
    Resolved,
}

/// Later-arriving metadata that disagreed with the first captured value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataAlternate {
    pub field: String,
    pub value: String,
    pub source: Option<String>,
}

/// A paper in the citation graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperNode {
    pub key: CanonicalKey,
    pub resolution: NodeResolution,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub abstract_text: Option<String>,
    pub source: Option<String>,
    /// Every raw identifier that resolved to this node
    pub identifiers: BTreeSet<ExternalId>,
    pub alternates: Vec<MetadataAlternate>,
    /// Cited key -> snippet; first captured snippet wins
    #[serde(default)]
    pub citation_contexts: BTreeMap<CanonicalKey, String>,
    /// Keys this node was known under before a merge
    #[serde(default)]
    pub aliases: BTreeSet<CanonicalKey>,
}

impl PaperNode {
    /// Placeholder for a cited work whose metadata has not arrived
    pub fn stub(key: CanonicalKey) -> Self {
        let identifiers = key.external_id().into_iter().collect();
        Self {
            key,
            resolution: NodeResolution::Stub,
            title: None,
            authors: Vec::new(),
            year: None,
            venue: None,
            abstract_text: None,
            source: None,
            identifiers,
            alternates: Vec::new(),
            citation_contexts: BTreeMap::new(),
            aliases: BTreeSet::new(),
        }
    }

    pub fn is_stub(&self) -> bool {
        self.resolution == NodeResolution::Stub
    }

    /// Fill a stub with resolved metadata, keeping identifiers it already had
    pub fn resolve_from(&mut self, other: PaperNode) {
        let identifiers = std::mem::take(&mut self.identifiers);
        let contexts = std::mem::take(&mut self.citation_contexts);
        let aliases = std::mem::take(&mut self.aliases);
        let key = self.key.clone();
        *self = other;
        self.key = key;
        self.identifiers.extend(identifiers);
        self.aliases.extend(aliases);
        self.aliases.remove(&self.key);
        for (k, v) in contexts {
            self.citation_contexts.entry(k).or_insert(v);
        }
        self.resolution = NodeResolution::Resolved;
    }

    /// Merge later metadata: first write wins, disagreements become alternates
    pub fn merge_from(&mut self, other: &PaperNode) {
        if other.is_stub() {
            self.identifiers.extend(other.identifiers.iter().cloned());
            self.aliases.extend(other.aliases.iter().cloned());
            self.aliases.remove(&self.key);
            return;
        }
        if self.is_stub() {
            self.resolve_from(other.clone());
            return;
        }

        let mut conflicts: Vec<(&str, String)> = Vec::new();
        match (&self.title, &other.title) {
            (Some(a), Some(b)) if a != b => conflicts.push(("title", b.clone())),
            _ => {}
        }
        match (self.year, other.year) {
            (Some(a), Some(b)) if a != b => conflicts.push(("year", b.to_string())),
            _ => {}
        }
        match (&self.venue, &other.venue) {
            (Some(a), Some(b)) if a != b => conflicts.push(("venue", b.clone())),
            _ => {}
        }
        if !self.authors.is_empty() && !other.authors.is_empty() && self.authors != other.authors {
            conflicts.push(("authors", other.authors.join("; ")));
        }
        for (field, value) in conflicts {
            let alt = MetadataAlternate {
                field: field.to_string(),
                value,
                source: other.source.clone(),
            };
            if !self.alternates.contains(&alt) {
                self.alternates.push(alt);
            }
        }

        // Missing values are filled, never replaced
        if self.title.is_none() {
            self.title = other.title.clone();
        }
        if self.year.is_none() {
            self.year = other.year;
        }
        if self.venue.is_none() {
            self.venue = other.venue.clone();
        }
        if self.abstract_text.is_none() {
            self.abstract_text = other.abstract_text.clone();
        }
        if self.authors.is_empty() {
            self.authors = other.authors.clone();
        }
        if self.source.is_none() {
            self.source = other.source.clone();
        }
        self.identifiers.extend(other.identifiers.iter().cloned());
        self.aliases.extend(other.aliases.iter().cloned());
        self.aliases.remove(&self.key);
        for (k, v) in &other.citation_contexts {
            self.citation_contexts.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    /// Surname of the first author, lower-cased
    pub fn first_author_surname(&self) -> Option<String> {
        first_author_surname(&self.authors)
    }
}

/// Surname of the first author in a list of display names
pub fn first_author_surname(authors: &[String]) -> Option<String> {
    let first = authors.first()?.trim();
    if first.is_empty() {
        return None;
    }
    // "Surname, Given" or "Given Surname"
    let surname = match first.split_once(',') {
        Some((surname, _)) => surname.trim(),
        None => first.split_whitespace().last().unwrap_or(first),
    };
    Some(surname.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(key: &str, year: Option<i32>) -> PaperNode {
        let mut node = PaperNode::stub(CanonicalKey::from_canonical(key));
        node.resolution = NodeResolution::Resolved;
        node.title = Some("Original Title".into());
        node.year = year;
        node
    }

    #[test]
    fn test_scheme_priority_order() {
        assert!(IdScheme::Doi < IdScheme::Arxiv);
        assert!(IdScheme::Arxiv < IdScheme::OpenAlex);
        assert_eq!(IdScheme::from_name("PubMed"), Some(IdScheme::Pmid));
        assert_eq!(IdScheme::from_name("unknown"), None);
    }

    #[test]
    fn test_key_round_trips_external_id() {
        let id = ExternalId::new(IdScheme::Doi, "10.1000/xyz");
        let key = CanonicalKey::from_external(&id);
        assert_eq!(key.as_str(), "doi:10.1000/xyz");
        assert_eq!(key.external_id(), Some(id));
        assert!(CanonicalKey::fallback("abc").external_id().is_none());
    }

    #[test]
    fn test_merge_keeps_first_write() {
        let mut first = resolved("doi:10.1/a", Some(2020));
        let mut later = resolved("doi:10.1/a", Some(2021));
        later.title = Some("Revised Title".into());
        later.source = Some("s2".into());

        first.merge_from(&later);

        assert_eq!(first.year, Some(2020));
        assert_eq!(first.title.as_deref(), Some("Original Title"));
        assert_eq!(first.alternates.len(), 2);
        assert!(first
            .alternates
            .iter()
            .any(|a| a.field == "year" && a.value == "2021"));
    }

    #[test]
    fn test_stub_resolution_keeps_identifiers() {
        let mut stub = PaperNode::stub(CanonicalKey::from_canonical("arxiv:2101.00001"));
        let mut full = resolved("arxiv:2101.00001", Some(2021));
        full.identifiers
            .insert(ExternalId::new(IdScheme::Doi, "10.1/b"));

        stub.merge_from(&full);

        assert!(!stub.is_stub());
        assert_eq!(stub.identifiers.len(), 2);
    }

    #[test]
    fn test_first_author_surname() {
        assert_eq!(
            first_author_surname(&["Ada Lovelace".into()]),
            Some("lovelace".into())
        );
        assert_eq!(
            first_author_surname(&["Turing, Alan".into()]),
            Some("turing".into())
        );
        assert_eq!(first_author_surname(&[]), None);
    }
}
