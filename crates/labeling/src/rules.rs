//! Rule labeler
//!
//! Fixed keyword, venue and co-citation rules. A paper gets a label only
//! when every matching rule names the same category; conflicts and silence
//! fall through to the automated labeler.

use regex_lite::Regex;
use spillscope_common::config::AnchorPaper;
use spillscope_common::errors::{AppError, Result};
use spillscope_common::models::{
    AuditStatus, CanonicalKey, EvidenceSpan, IntentCategory, LabelContext, LabelMethod,
    LabelRecord,
};
use std::collections::{BTreeMap, BTreeSet};

/// Producer tag on rule labels
pub const RULE_PRODUCER: &str = "rules-v1";

const KEYWORD_RULES: &[(&str, IntentCategory, &str)] = &[
    ("kw.safety.alignment", IntentCategory::SafetyUse, r"(?i)\balignment\b"),
    ("kw.safety.interpretability", IntentCategory::SafetyUse, r"(?i)\b(interpretability|explainability)\b"),
    ("kw.safety.red_team", IntentCategory::SafetyUse, r"(?i)\bred[- ]?team(s|ing)?\b"),
    ("kw.safety.robustness", IntentCategory::SafetyUse, r"(?i)\brobustness\b"),
    ("kw.safety.safety", IntentCategory::SafetyUse, r"(?i)\bsafety\b"),
    ("kw.safety.bias", IntentCategory::SafetyUse, r"(?i)\b(bias|fairness)\b"),
    ("kw.capability.sota", IntentCategory::CapabilityUse, r"(?i)\b(state[- ]of[- ]the[- ]art|sota)\b"),
    ("kw.capability.outperform", IntentCategory::CapabilityUse, r"(?i)\boutperform(s|ed|ing)?\b"),
    ("kw.capability.benchmark", IntentCategory::CapabilityUse, r"(?i)\bbenchmarks?\b"),
    ("kw.capability.accuracy", IntentCategory::CapabilityUse, r"(?i)\baccuracy\b"),
    ("kw.capability.scale", IntentCategory::CapabilityUse, r"(?i)\bscal(e|es|ing)\b"),
];

const VENUE_RULES: &[(&str, IntentCategory, &str)] = &[(
    "venue.safety",
    IntentCategory::SafetyUse,
    r"(?i)\b(safeai|ai safety|trustworthy ml|alignment)\b",
)];

/// One matched rule and what it matched
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule_id: String,
    pub category: IntentCategory,
    pub evidence: EvidenceSpan,
}

struct PatternRule {
    id: &'static str,
    category: IntentCategory,
    pattern: Regex,
}

/// Deterministic, side-effect-free labeler
pub struct RuleLabeler {
    keywords: Vec<PatternRule>,
    venues: Vec<PatternRule>,
    anchors: BTreeMap<CanonicalKey, IntentCategory>,
    min_anchor_citations: usize,
    auto_verify_threshold: f64,
}

fn compile(rules: &[(&'static str, IntentCategory, &str)]) -> Result<Vec<PatternRule>> {
    rules
        .iter()
        .map(|(id, category, pattern)| {
            let pattern = Regex::new(pattern).map_err(|e| AppError::Configuration {
                message: format!("rule {} has an invalid pattern: {}", id, e),
            })?;
            Ok(PatternRule {
                id: *id,
                category: *category,
                pattern,
            })
        })
        .collect()
}

impl RuleLabeler {
    /// Standard rule set with the given co-citation anchors
    pub fn new(
        anchors: &[AnchorPaper],
        min_anchor_citations: usize,
        auto_verify_threshold: f64,
    ) -> Result<Self> {
        Ok(Self {
            keywords: compile(KEYWORD_RULES)?,
            venues: compile(VENUE_RULES)?,
            anchors: anchors
                .iter()
                .map(|a| (CanonicalKey::from_canonical(a.key.trim()), a.category))
                .collect(),
            min_anchor_citations: min_anchor_citations.max(1),
            auto_verify_threshold,
        })
    }

    /// Ids of every rule in the set, for audit listings
    pub fn rule_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .keywords
            .iter()
            .chain(&self.venues)
            .map(|r| r.id.to_string())
            .collect();
        for category in self.anchors.values().collect::<BTreeSet<_>>() {
            ids.push(format!("cocite.{}", category));
        }
        ids
    }

    /// Every rule that fires on the context
    pub fn matches(&self, context: &LabelContext) -> Vec<RuleMatch> {
        let mut found = Vec::new();

        let text = context.text();
        for rule in &self.keywords {
            if let Some(m) = rule.pattern.find(&text) {
                found.push(RuleMatch {
                    rule_id: rule.id.to_string(),
                    category: rule.category,
                    evidence: EvidenceSpan::new(m.as_str()).with_note(rule.id),
                });
            }
        }

        if let Some(venue) = &context.venue {
            for rule in &self.venues {
                if rule.pattern.is_match(venue) {
                    found.push(RuleMatch {
                        rule_id: rule.id.to_string(),
                        category: rule.category,
                        evidence: EvidenceSpan::new(venue.clone()).with_note(rule.id),
                    });
                }
            }
        }

        let mut cited_anchors: BTreeMap<IntentCategory, Vec<&CanonicalKey>> = BTreeMap::new();
        for cited in &context.cited {
            if let Some(category) = self.anchors.get(cited) {
                cited_anchors.entry(*category).or_default().push(cited);
            }
        }
        for (category, keys) in cited_anchors {
            if keys.len() >= self.min_anchor_citations {
                let rule_id = format!("cocite.{}", category);
                let snippet = context
                    .snippets
                    .get(keys[0])
                    .cloned()
                    .unwrap_or_else(|| format!("cites {} {} anchor papers", keys.len(), category));
                found.push(RuleMatch {
                    evidence: EvidenceSpan::new(snippet)
                        .with_citation(keys[0].clone())
                        .with_note(rule_id.clone()),
                    rule_id,
                    category,
                });
            }
        }

        found
    }

    /// Zero or one label with confidence 1.0
    pub fn label(&self, context: &LabelContext) -> Option<LabelRecord> {
        let matches = self.matches(context);
        let categories: BTreeSet<IntentCategory> = matches.iter().map(|m| m.category).collect();
        if categories.len() != 1 {
            return None;
        }
        let category = *categories.iter().next()?;

        let mut record = LabelRecord::new(
            context.key.clone(),
            category,
            1.0,
            matches.into_iter().map(|m| m.evidence).collect(),
            LabelMethod::Rule,
            RULE_PRODUCER,
        );
        if record.confidence >= self.auto_verify_threshold {
            record.status = AuditStatus::Verified;
        }
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(title: &str, abstract_text: Option<&str>) -> LabelContext {
        LabelContext {
            key: CanonicalKey::from_canonical("doi:10.1/x"),
            title: Some(title.to_string()),
            abstract_text: abstract_text.map(str::to_string),
            venue: None,
            year: Some(2022),
            authors: vec![],
            cited: vec![],
            snippets: BTreeMap::new(),
        }
    }

    fn labeler() -> RuleLabeler {
        RuleLabeler::new(&[], 2, 1.0).unwrap()
    }

    #[test]
    fn test_unambiguous_safety_paper() {
        let label = labeler()
            .label(&context(
                "Red-teaming language models",
                Some("We study alignment failures."),
            ))
            .unwrap();

        assert_eq!(label.category, IntentCategory::SafetyUse);
        assert_eq!(label.confidence, 1.0);
        assert_eq!(label.method, LabelMethod::Rule);
        assert_eq!(label.status, AuditStatus::Verified);
        assert_eq!(label.evidence.len(), 2);
        assert!(label.check_schema().is_ok());
    }

    #[test]
    fn test_conflicting_rules_yield_nothing() {
        let ctx = context("Robustness benchmarks for vision", None);
        assert_eq!(labeler().matches(&ctx).len(), 2);
        assert!(labeler().label(&ctx).is_none());
    }

    #[test]
    fn test_no_match_yields_nothing() {
        assert!(labeler().label(&context("A survey of graph databases", None)).is_none());
    }

    #[test]
    fn test_word_boundaries() {
        // "scalar" and "biased" are not the keywords "scale" and "bias"
        let ctx = context("Scalar fields", Some("unbiased estimators"));
        assert!(labeler().matches(&ctx).is_empty());
    }

    #[test]
    fn test_cocitation_anchor_rule() {
        let anchors = vec![
            AnchorPaper {
                key: "doi:10.1/anchor1".into(),
                category: IntentCategory::CapabilityUse,
            },
            AnchorPaper {
                key: "doi:10.1/anchor2".into(),
                category: IntentCategory::CapabilityUse,
            },
        ];
        let labeler = RuleLabeler::new(&anchors, 2, 1.0).unwrap();
        let mut ctx = context("Untitled work", None);
        ctx.cited = vec![
            CanonicalKey::from_canonical("doi:10.1/anchor1"),
            CanonicalKey::from_canonical("doi:10.1/anchor2"),
        ];

        let label = labeler.label(&ctx).unwrap();

        assert_eq!(label.category, IntentCategory::CapabilityUse);
        assert_eq!(
            label.evidence[0].citation,
            Some(CanonicalKey::from_canonical("doi:10.1/anchor1"))
        );
        assert!(labeler.rule_ids().contains(&"cocite.capability_use".to_string()));
    }

    #[test]
    fn test_pending_when_auto_verify_disabled() {
        let labeler = RuleLabeler::new(&[], 2, 1.1).unwrap();
        let label = labeler.label(&context("Interpretability of circuits", None)).unwrap();
        assert_eq!(label.status, AuditStatus::Pending);
    }
}
