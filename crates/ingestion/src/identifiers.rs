//! Per-scheme identifier normalization and reference detection

use regex_lite::Regex;
use spillscope_common::models::{ExternalId, IdScheme};
use std::sync::OnceLock;

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi.org/",
    "doi:",
];

const ARXIV_PREFIXES: &[&str] = &[
    "https://arxiv.org/abs/",
    "http://arxiv.org/abs/",
    "https://arxiv.org/pdf/",
    "arxiv.org/abs/",
    "arxiv:",
];

const PUBMED_PREFIXES: &[&str] = &[
    "https://pubmed.ncbi.nlm.nih.gov/",
    "http://pubmed.ncbi.nlm.nih.gov/",
    "pmid:",
];

const OPENALEX_PREFIXES: &[&str] = &["https://openalex.org/", "http://openalex.org/", "openalex:"];

const S2_PREFIXES: &[&str] = &["https://www.semanticscholar.org/paper/", "s2:"];

fn arxiv_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // New-style 2101.00001 and old-style hep-th/9901001, optional version
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{4}\.\d{4,5}|[a-z\-]+(\.[a-z]{2})?/\d{7})(v\d+)?$")
            .expect("arxiv pattern is valid")
    })
}

fn openalex_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^W\d+$").expect("openalex pattern is valid"))
}

/// Remove the first matching prefix, ignoring ASCII case
fn strip_any<'a>(value: &'a str, prefixes: &[&str]) -> &'a str {
    for prefix in prefixes {
        if value.len() >= prefix.len()
            && value.is_char_boundary(prefix.len())
            && value[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            return &value[prefix.len()..];
        }
    }
    value
}

fn digits_only(value: &str) -> Option<String> {
    let value = value.trim().trim_end_matches('/');
    (!value.is_empty() && value.chars().all(|c| c.is_ascii_digit())).then(|| value.to_string())
}

/// Normalize a raw value for a known scheme.
///
/// Returns `None` when the value is not a well-formed identifier of that scheme.
pub fn normalize(scheme: IdScheme, raw: &str) -> Option<ExternalId> {
    let raw = raw.trim();
    let value = match scheme {
        IdScheme::Doi => {
            let doi = strip_any(raw, DOI_PREFIXES).trim().to_lowercase();
            doi.starts_with("10.").then_some(doi)?
        }
        IdScheme::Arxiv => {
            let id = strip_any(raw, ARXIV_PREFIXES)
                .trim()
                .trim_end_matches(".pdf")
                .to_lowercase();
            let caps = arxiv_pattern().captures(&id)?;
            caps.get(1)?.as_str().to_string()
        }
        IdScheme::Pmid => digits_only(strip_any(raw, PUBMED_PREFIXES))?,
        IdScheme::OpenAlex => {
            let id = strip_any(raw, OPENALEX_PREFIXES).trim().to_uppercase();
            openalex_pattern().is_match(&id).then_some(id)?
        }
        IdScheme::SemanticScholar => {
            let id = strip_any(raw, S2_PREFIXES).trim().trim_end_matches('/');
            // Paper URLs end with the hash after a title slug
            let id = id.rsplit('/').next().unwrap_or(id).to_lowercase();
            (!id.is_empty()).then_some(id)?
        }
        IdScheme::Mag => digits_only(strip_any(raw, &["mag:"]))?,
    };
    Some(ExternalId::new(scheme, value))
}

/// Detect the scheme of a citation reference and normalize it.
///
/// Accepts `scheme:value` forms, resolver URLs and bare DOI, arXiv and
/// OpenAlex values.
pub fn parse_reference(raw: &str) -> Option<ExternalId> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let lower = raw.to_ascii_lowercase();

    if lower.starts_with("10.") || lower.contains("doi.org/") || lower.starts_with("doi:") {
        return normalize(IdScheme::Doi, raw);
    }
    if lower.contains("arxiv.org/") {
        return normalize(IdScheme::Arxiv, raw);
    }
    if lower.contains("openalex.org/") {
        return normalize(IdScheme::OpenAlex, raw);
    }
    if lower.contains("pubmed.ncbi.nlm.nih.gov/") {
        return normalize(IdScheme::Pmid, raw);
    }
    if lower.contains("semanticscholar.org/") {
        return normalize(IdScheme::SemanticScholar, raw);
    }

    if let Some((prefix, value)) = raw.split_once(':') {
        if let Some(scheme) = IdScheme::from_name(prefix) {
            return normalize(scheme, value);
        }
    }

    if arxiv_pattern().is_match(&lower) {
        return normalize(IdScheme::Arxiv, raw);
    }
    if openalex_pattern().is_match(&raw.to_uppercase()) {
        return normalize(IdScheme::OpenAlex, raw);
    }
    None
}
