//! Schema gate for classifier output

use spillscope_common::errors::{AppError, Result};
use spillscope_common::models::{
    AuditStatus, CanonicalKey, EvidenceSpan, IntentCategory, LabelMethod, LabelRecord,
};

use crate::classifier::ClassifierResponse;

fn violation(message: impl Into<String>) -> AppError {
    AppError::SchemaViolation {
        message: message.into(),
    }
}

/// Turn a raw classifier response into a pending automated label.
///
/// Anything short of a category, a confidence in [0, 1] and one non-blank
/// evidence snippet is a `SchemaViolation`.
pub fn validate_response(
    key: &CanonicalKey,
    response: &ClassifierResponse,
    producer: &str,
) -> Result<LabelRecord> {
    let category: IntentCategory = response
        .category
        .as_deref()
        .ok_or_else(|| violation("category is missing"))?
        .parse()?;
    let confidence = response
        .confidence
        .ok_or_else(|| violation("confidence is missing"))?;

    let evidence = response
        .evidence
        .iter()
        .map(|raw| {
            let snippet = raw
                .snippet
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| violation("evidence entry has no snippet"))?;
            let mut span = EvidenceSpan::new(snippet);
            if let Some(citation) = raw.citation.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                span = span.with_citation(CanonicalKey::from_canonical(citation));
            }
            if let Some(note) = &raw.note {
                span = span.with_note(note.clone());
            }
            Ok(span)
        })
        .collect::<Result<Vec<_>>>()?;

    let record = LabelRecord::new(
        key.clone(),
        category,
        confidence,
        evidence,
        LabelMethod::Automated,
        producer,
    );
    record.check_schema()?;
    debug_assert_eq!(record.status, AuditStatus::Pending);
    Ok(record)
}
