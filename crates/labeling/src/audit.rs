//! Audit queue and adjudication
//!
//! Every label that is not `verified` has exactly one open entry. Human
//! adjudication moves labels through `pending -> {verified, disputed}` and
//! `disputed -> verified`; each transition is appended to the event log so
//! the history can be replayed and checked.

use chrono::Utc;
use spillscope_common::config::FlowLabelPolicy;
use spillscope_common::errors::{AppError, Result};
use spillscope_common::metrics;
use spillscope_common::models::{
    Adjudication, AdjudicationOutcome, AuditEvent, AuditQueueEntry, AuditStatus, AuditSubject,
    CanonicalKey, Decision, EvidenceSpan, IntentCategory, LabelMethod, LabelRecord,
    PriorityBand,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Allowed label status transitions; `None` is creation
pub fn is_allowed_transition(from: Option<AuditStatus>, to: AuditStatus) -> bool {
    matches!(
        (from, to),
        (None, AuditStatus::Pending)
            | (None, AuditStatus::Verified)
            | (Some(AuditStatus::Pending), AuditStatus::Verified)
            | (Some(AuditStatus::Pending), AuditStatus::Disputed)
            | (Some(AuditStatus::Disputed), AuditStatus::Verified)
    )
}

/// Fold an event log into the final status of each label.
///
/// Fails with `InvalidTransition` on the first event that does not continue
/// its label's chain.
pub fn replay(events: &[AuditEvent]) -> Result<BTreeMap<Uuid, AuditStatus>> {
    let mut statuses: BTreeMap<Uuid, AuditStatus> = BTreeMap::new();
    for event in events {
        let current = statuses.get(&event.label_id).copied();
        if current != event.from || !is_allowed_transition(event.from, event.to) {
            return Err(AppError::InvalidTransition {
                from: current.map_or("none", AuditStatus::as_str).to_string(),
                action: format!(
                    "{} -> {} on {}",
                    event.from.map_or("none", AuditStatus::as_str),
                    event.to,
                    event.label_id
                ),
            });
        }
        statuses.insert(event.label_id, event.to);
    }
    Ok(statuses)
}

/// Presentation order: centrality desc, (1 - confidence) desc, key asc
fn presentation_order(a: &AuditQueueEntry, b: &AuditQueueEntry) -> Ordering {
    b.centrality
        .total_cmp(&a.centrality)
        .then_with(|| (1.0 - b.confidence).total_cmp(&(1.0 - a.confidence)))
        .then_with(|| a.paper_key.cmp(&b.paper_key))
        .then_with(|| a.entry_id.cmp(&b.entry_id))
}

/// Labels, queue entries and their transition history
#[derive(Debug, Clone)]
pub struct AuditQueue {
    acceptance_threshold: f64,
    labels: BTreeMap<Uuid, LabelRecord>,
    entries: BTreeMap<Uuid, AuditQueueEntry>,
    events: Vec<AuditEvent>,
}

impl AuditQueue {
    pub fn new(acceptance_threshold: f64) -> Self {
        Self {
            acceptance_threshold,
            labels: BTreeMap::new(),
            entries: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    /// Rebuild from stored rows
    pub fn from_parts(
        acceptance_threshold: f64,
        labels: impl IntoIterator<Item = LabelRecord>,
        entries: impl IntoIterator<Item = AuditQueueEntry>,
        events: Vec<AuditEvent>,
    ) -> Self {
        Self {
            acceptance_threshold,
            labels: labels.into_iter().map(|l| (l.label_id, l)).collect(),
            entries: entries.into_iter().map(|e| (e.entry_id, e)).collect(),
            events,
        }
    }

    fn record(
        &mut self,
        label: &LabelRecord,
        from: Option<AuditStatus>,
        actor: &str,
        entry_id: Option<Uuid>,
        decision: Option<Decision>,
        note: Option<String>,
    ) {
        self.events.push(AuditEvent {
            at: Utc::now(),
            actor: actor.to_string(),
            entry_id,
            label_id: label.label_id,
            paper_key: label.paper_key.clone(),
            from,
            to: label.status,
            decision,
            note,
        });
    }

    fn open_entry(
        &mut self,
        paper_key: CanonicalKey,
        subject: AuditSubject,
        centrality: f64,
        confidence: f64,
        band: PriorityBand,
    ) -> Uuid {
        let entry = AuditQueueEntry {
            entry_id: Uuid::new_v4(),
            paper_key,
            subject,
            centrality,
            confidence,
            priority: centrality * (1.0 - confidence),
            band,
            opened_at: Utc::now(),
            outcome: None,
        };
        let id = entry.entry_id;
        self.entries.insert(id, entry);
        id
    }

    /// Take ownership of a new label.
    ///
    /// Verified labels are stored and need no review; anything else gets an
    /// open entry whose id is returned.
    pub fn submit(&mut self, label: LabelRecord, centrality: f64) -> Option<Uuid> {
        if self.labels.contains_key(&label.label_id) {
            return self.open_entry_for_label(label.label_id).map(|e| e.entry_id);
        }

        self.record(&label, None, &label.producer, None, None, None);
        let entry_id = if label.status == AuditStatus::Verified {
            None
        } else {
            let band = if label.confidence < self.acceptance_threshold {
                PriorityBand::LowConfidence
            } else {
                PriorityBand::Confirmation
            };
            Some(self.open_entry(
                label.paper_key.clone(),
                AuditSubject::Label {
                    label_id: label.label_id,
                },
                centrality,
                label.confidence,
                band,
            ))
        };

        debug!(
            key = %label.paper_key,
            status = %label.status,
            confidence = label.confidence,
            queued = entry_id.is_some(),
            "Label submitted"
        );
        self.labels.insert(label.label_id, label);
        entry_id
    }

    /// Queue a node that has no usable label
    pub fn submit_unlabeled(
        &mut self,
        key: CanonicalKey,
        centrality: f64,
        reason: impl Into<String>,
    ) -> Uuid {
        if let Some(existing) = self
            .entries
            .values()
            .find(|e| e.is_open() && e.paper_key == key && e.label_id().is_none())
        {
            return existing.entry_id;
        }
        self.open_entry(
            key,
            AuditSubject::Unlabeled {
                reason: reason.into(),
            },
            centrality,
            0.0,
            PriorityBand::NeedsHuman,
        )
    }

    fn open_entry_for_label(&self, label_id: Uuid) -> Option<&AuditQueueEntry> {
        self.entries
            .values()
            .find(|e| e.is_open() && e.label_id() == Some(label_id))
    }

    /// Open entries in presentation order
    pub fn ordered(&self) -> Vec<&AuditQueueEntry> {
        let mut open: Vec<&AuditQueueEntry> =
            self.entries.values().filter(|e| e.is_open()).collect();
        open.sort_by(|a, b| presentation_order(a, b));
        open
    }

    /// Closed entries
    pub fn archived(&self) -> impl Iterator<Item = &AuditQueueEntry> {
        self.entries.values().filter(|e| !e.is_open())
    }

    pub fn entries(&self) -> impl Iterator<Item = &AuditQueueEntry> {
        self.entries.values()
    }

    pub fn entry(&self, entry_id: Uuid) -> Option<&AuditQueueEntry> {
        self.entries.get(&entry_id)
    }

    pub fn labels(&self) -> impl Iterator<Item = &LabelRecord> {
        self.labels.values()
    }

    pub fn label(&self, label_id: Uuid) -> Option<&LabelRecord> {
        self.labels.get(&label_id)
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    /// Point labels, entries and history of a folded paper at its new key.
    ///
    /// Returns how many labels moved.
    pub fn rename_paper(&mut self, from: &CanonicalKey, to: &CanonicalKey) -> usize {
        let mut moved = 0;
        for label in self.labels.values_mut().filter(|l| &l.paper_key == from) {
            label.paper_key = to.clone();
            moved += 1;
        }
        for entry in self.entries.values_mut().filter(|e| &e.paper_key == from) {
            entry.paper_key = to.clone();
        }
        for event in self.events.iter_mut().filter(|e| &e.paper_key == from) {
            event.paper_key = to.clone();
        }
        if moved > 0 {
            debug!(from = %from, to = %to, moved, "Labels moved to folded key");
        }
        moved
    }

    /// True when the paper has an active label or an open entry
    pub fn covers(&self, key: &CanonicalKey) -> bool {
        self.active_label_for(key).is_some()
            || self.entries.values().any(|e| e.is_open() && &e.paper_key == key)
    }

    /// The label that speaks for a paper: verified first, then human over
    /// rule over automated, then the newest
    pub fn active_label_for(&self, key: &CanonicalKey) -> Option<&LabelRecord> {
        self.labels
            .values()
            .filter(|l| l.is_active() && &l.paper_key == key)
            .max_by(|a, b| {
                (a.status == AuditStatus::Verified)
                    .cmp(&(b.status == AuditStatus::Verified))
                    .then_with(|| a.method.cmp(&b.method))
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.label_id.cmp(&b.label_id))
            })
    }

    /// Paper categories for the labeled metrics pass
    pub fn flow_labels(&self, policy: FlowLabelPolicy) -> BTreeMap<CanonicalKey, IntentCategory> {
        let mut keys: Vec<&CanonicalKey> = self.labels.values().map(|l| &l.paper_key).collect();
        keys.sort();
        keys.dedup();

        keys.into_iter()
            .filter_map(|key| self.active_label_for(key))
            .filter(|label| match policy {
                FlowLabelPolicy::Active => true,
                FlowLabelPolicy::VerifiedOnly => label.status == AuditStatus::Verified,
            })
            .map(|label| (label.paper_key.clone(), label.category))
            .collect()
    }

    /// Open entries per band, every band present
    pub fn band_counts(&self) -> BTreeMap<PriorityBand, usize> {
        let mut counts: BTreeMap<PriorityBand, usize> =
            PriorityBand::ALL.iter().map(|b| (*b, 0)).collect();
        for entry in self.entries.values().filter(|e| e.is_open()) {
            *counts.entry(entry.band).or_default() += 1;
        }
        counts
    }

    /// Push current band depths to the metrics recorder
    pub fn publish_depths(&self) {
        for (band, depth) in self.band_counts() {
            metrics::record_queue_depth(band.as_str(), depth);
        }
    }

    /// Apply one human decision to an open entry.
    ///
    /// Returns the outcome when the entry closes; a dispute leaves it open
    /// and returns `None`.
    pub fn adjudicate(
        &mut self,
        entry_id: Uuid,
        adjudication: Adjudication,
    ) -> Result<Option<AdjudicationOutcome>> {
        let entry = self.entries.get(&entry_id).ok_or_else(|| AppError::NotFound {
            resource_type: "audit entry".into(),
            id: entry_id.to_string(),
        })?;
        if !entry.is_open() {
            return Err(AppError::InvalidTransition {
                from: "closed".into(),
                action: adjudication.decision.as_str().into(),
            });
        }
        let paper_key = entry.paper_key.clone();
        let subject = entry.subject.clone();

        let outcome = match subject {
            AuditSubject::Label { label_id } => {
                self.adjudicate_label(entry_id, label_id, &adjudication)?
            }
            AuditSubject::Unlabeled { .. } => {
                Some(self.adjudicate_unlabeled(entry_id, paper_key, &adjudication)?)
            }
        };

        if let Some(outcome) = &outcome {
            if let Some(entry) = self.entries.get_mut(&entry_id) {
                entry.outcome = Some(outcome.clone());
            }
        }
        metrics::record_adjudication(adjudication.decision.as_str());
        self.publish_depths();
        info!(
            entry_id = %entry_id,
            decision = adjudication.decision.as_str(),
            reviewer = %adjudication.reviewer,
            closed = outcome.is_some(),
            "Adjudication applied"
        );
        Ok(outcome)
    }

    fn adjudicate_label(
        &mut self,
        entry_id: Uuid,
        label_id: Uuid,
        adjudication: &Adjudication,
    ) -> Result<Option<AdjudicationOutcome>> {
        let label = self
            .labels
            .get(&label_id)
            .cloned()
            .ok_or_else(|| AppError::GraphConsistency {
                message: format!("entry {} references missing label {}", entry_id, label_id),
            })?;
        let from = label.status;
        let reviewer = adjudication.reviewer.as_str();

        match adjudication.decision {
            Decision::Approve => {
                self.set_status(label_id, AuditStatus::Verified)?;
                let updated = self.labels[&label_id].clone();
                self.record(
                    &updated,
                    Some(from),
                    reviewer,
                    Some(entry_id),
                    Some(Decision::Approve),
                    adjudication.note.clone(),
                );
                Ok(Some(self.outcome(adjudication, label_id)))
            }
            Decision::Reject => {
                let corrected = adjudication.corrected_category.ok_or_else(|| {
                    AppError::invalid_field(
                        "corrected_category",
                        "a rejection must carry the corrected category",
                    )
                })?;

                if from != AuditStatus::Disputed {
                    self.set_status(label_id, AuditStatus::Disputed)?;
                    let updated = self.labels[&label_id].clone();
                    self.record(
                        &updated,
                        Some(from),
                        reviewer,
                        Some(entry_id),
                        Some(Decision::Reject),
                        adjudication.note.clone(),
                    );
                }

                let replacement =
                    self.human_label(&label.paper_key, corrected, adjudication, Some(label_id));
                if let Some(old) = self.labels.get_mut(&label_id) {
                    old.superseded_by = Some(replacement.label_id);
                }
                let resolved = replacement.label_id;
                self.record(
                    &replacement,
                    None,
                    reviewer,
                    Some(entry_id),
                    Some(Decision::Reject),
                    Some(format!("supersedes {}", label_id)),
                );
                self.labels.insert(resolved, replacement);
                Ok(Some(self.outcome(adjudication, resolved)))
            }
            Decision::Dispute => {
                self.set_status(label_id, AuditStatus::Disputed)?;
                let updated = self.labels[&label_id].clone();
                self.record(
                    &updated,
                    Some(from),
                    reviewer,
                    Some(entry_id),
                    Some(Decision::Dispute),
                    adjudication.note.clone(),
                );
                Ok(None)
            }
        }
    }

    fn adjudicate_unlabeled(
        &mut self,
        entry_id: Uuid,
        key: CanonicalKey,
        adjudication: &Adjudication,
    ) -> Result<AdjudicationOutcome> {
        if adjudication.decision == Decision::Dispute {
            return Err(AppError::InvalidTransition {
                from: "unlabeled".into(),
                action: Decision::Dispute.as_str().into(),
            });
        }
        let category = adjudication.corrected_category.ok_or_else(|| {
            AppError::invalid_field("corrected_category", "an unlabeled entry needs a category")
        })?;

        let label = self.human_label(&key, category, adjudication, None);
        let resolved = label.label_id;
        self.record(
            &label,
            None,
            &adjudication.reviewer,
            Some(entry_id),
            Some(adjudication.decision),
            adjudication.note.clone(),
        );
        self.labels.insert(resolved, label);
        Ok(self.outcome(adjudication, resolved))
    }

    fn set_status(&mut self, label_id: Uuid, to: AuditStatus) -> Result<()> {
        let label = self.labels.get_mut(&label_id).ok_or_else(|| AppError::NotFound {
            resource_type: "label".into(),
            id: label_id.to_string(),
        })?;
        if !is_allowed_transition(Some(label.status), to) {
            return Err(AppError::InvalidTransition {
                from: label.status.to_string(),
                action: to.to_string(),
            });
        }
        label.status = to;
        Ok(())
    }

    fn human_label(
        &self,
        key: &CanonicalKey,
        category: IntentCategory,
        adjudication: &Adjudication,
        supersedes: Option<Uuid>,
    ) -> LabelRecord {
        let snippet = adjudication
            .note
            .clone()
            .unwrap_or_else(|| format!("assigned {} on review", category));
        let mut label = LabelRecord::new(
            key.clone(),
            category,
            1.0,
            vec![EvidenceSpan::new(snippet).with_note(format!("reviewer {}", adjudication.reviewer))],
            LabelMethod::Human,
            adjudication.reviewer.clone(),
        );
        label.status = AuditStatus::Verified;
        label.supersedes = supersedes;
        label
    }

    fn outcome(&self, adjudication: &Adjudication, resolved_label: Uuid) -> AdjudicationOutcome {
        AdjudicationOutcome {
            decision: adjudication.decision,
            corrected_category: adjudication.corrected_category,
            resolved_label,
            reviewer: adjudication.reviewer.clone(),
            decided_at: Utc::now(),
        }
    }

    /// Every active label that is not verified sits in exactly one open entry,
    /// and every open entry points at such a label or at nothing.
    pub fn verify_completeness(&self) -> Result<()> {
        let mut open_per_label: BTreeMap<Uuid, usize> = BTreeMap::new();
        for entry in self.entries.values().filter(|e| e.is_open()) {
            if let Some(label_id) = entry.label_id() {
                let label = self.labels.get(&label_id).ok_or_else(|| AppError::GraphConsistency {
                    message: format!("open entry {} references missing label {}", entry.entry_id, label_id),
                })?;
                if label.status == AuditStatus::Verified || !label.is_active() {
                    return Err(AppError::GraphConsistency {
                        message: format!("open entry {} references settled label {}", entry.entry_id, label_id),
                    });
                }
                *open_per_label.entry(label_id).or_default() += 1;
            }
        }

        for label in self.labels.values() {
            if !label.is_active() || label.status == AuditStatus::Verified {
                continue;
            }
            let open = open_per_label.get(&label.label_id).copied().unwrap_or(0);
            if open != 1 {
                warn!(label_id = %label.label_id, open, "Queue completeness violated");
                return Err(AppError::GraphConsistency {
                    message: format!(
                        "label {} for {} has {} open entries, expected 1",
                        label.label_id, label.paper_key, open
                    ),
                });
            }
        }
        Ok(())
    }

    /// Replay the history and compare it with the stored statuses
    pub fn verify_history(&self) -> Result<()> {
        let replayed = replay(&self.events)?;
        for label in self.labels.values() {
            match replayed.get(&label.label_id) {
                Some(status) if *status == label.status => {}
                other => {
                    return Err(AppError::GraphConsistency {
                        message: format!(
                            "label {} is {} but its history ends at {}",
                            label.label_id,
                            label.status,
                            other.map_or("nothing", |s| s.as_str())
                        ),
                    })
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(key: &str, confidence: f64, method: LabelMethod) -> LabelRecord {
        LabelRecord::new(
            CanonicalKey::from_canonical(key),
            IntentCategory::CapabilityUse,
            confidence,
            vec![EvidenceSpan::new("beats the baseline")],
            method,
            "test",
        )
    }

    #[test]
    fn test_low_confidence_is_pending_with_priority() {
        let mut queue = AuditQueue::new(0.7);
        let entry_id = queue
            .submit(label("doi:10.1/d", 0.4, LabelMethod::Automated), 0.5)
            .unwrap();

        let entry = queue.entry(entry_id).unwrap();
        assert_eq!(entry.band, PriorityBand::LowConfidence);
        assert!((entry.priority - 0.5 * 0.6).abs() < 1e-12);
        assert_eq!(queue.labels().next().unwrap().status, AuditStatus::Pending);
        assert!(queue.verify_completeness().is_ok());
    }

    #[test]
    fn test_verified_labels_skip_the_queue() {
        let mut queue = AuditQueue::new(0.7);
        let mut rule = label("doi:10.1/a", 1.0, LabelMethod::Rule);
        rule.status = AuditStatus::Verified;

        assert!(queue.submit(rule, 0.9).is_none());
        assert!(queue.ordered().is_empty());
        assert!(queue.verify_completeness().is_ok());
    }

    #[test]
    fn test_presentation_order() {
        let mut queue = AuditQueue::new(0.7);
        queue.submit(label("doi:10.1/c", 0.9, LabelMethod::Automated), 0.2);
        queue.submit(label("doi:10.1/b", 0.9, LabelMethod::Automated), 0.8);
        queue.submit(label("doi:10.1/a", 0.5, LabelMethod::Automated), 0.8);
        queue.submit(label("doi:10.1/z", 0.5, LabelMethod::Automated), 0.8);
        queue.submit_unlabeled(CanonicalKey::from_canonical("doi:10.1/y"), 0.2, "timeout");

        let keys: Vec<&str> = queue.ordered().iter().map(|e| e.paper_key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["doi:10.1/a", "doi:10.1/z", "doi:10.1/b", "doi:10.1/y", "doi:10.1/c"]
        );
    }

    #[test]
    fn test_approve_verifies_and_closes() {
        let mut queue = AuditQueue::new(0.7);
        let lbl = label("doi:10.1/a", 0.8, LabelMethod::Automated);
        let label_id = lbl.label_id;
        let entry_id = queue.submit(lbl, 0.3).unwrap();

        let outcome = queue
            .adjudicate(entry_id, Adjudication::approve("ada"))
            .unwrap()
            .unwrap();

        assert_eq!(outcome.resolved_label, label_id);
        assert_eq!(queue.label(label_id).unwrap().status, AuditStatus::Verified);
        assert!(queue.ordered().is_empty());
        assert_eq!(queue.archived().count(), 1);
        assert!(queue.verify_completeness().is_ok());
        assert!(queue.verify_history().is_ok());
    }

    #[test]
    fn test_reject_supersedes_with_human_label() {
        let mut queue = AuditQueue::new(0.7);
        let lbl = label("doi:10.1/a", 0.6, LabelMethod::Automated);
        let old_id = lbl.label_id;
        let entry_id = queue.submit(lbl, 0.3).unwrap();

        let outcome = queue
            .adjudicate(entry_id, Adjudication::reject("ada", IntentCategory::SafetyUse))
            .unwrap()
            .unwrap();

        let old = queue.label(old_id).unwrap();
        let new = queue.label(outcome.resolved_label).unwrap();
        assert_eq!(old.status, AuditStatus::Disputed);
        assert_eq!(old.superseded_by, Some(new.label_id));
        assert_eq!(new.supersedes, Some(old_id));
        assert_eq!(new.method, LabelMethod::Human);
        assert_eq!(new.status, AuditStatus::Verified);

        let key = CanonicalKey::from_canonical("doi:10.1/a");
        assert_eq!(queue.active_label_for(&key).unwrap().label_id, new.label_id);
        assert_eq!(
            queue.flow_labels(FlowLabelPolicy::VerifiedOnly).get(&key),
            Some(&IntentCategory::SafetyUse)
        );
        assert!(queue.verify_completeness().is_ok());
        assert!(queue.verify_history().is_ok());
    }

    #[test]
    fn test_reject_requires_category() {
        let mut queue = AuditQueue::new(0.7);
        let entry_id = queue.submit(label("doi:10.1/a", 0.6, LabelMethod::Automated), 0.3).unwrap();
        let bad = Adjudication {
            corrected_category: None,
            ..Adjudication::reject("ada", IntentCategory::Mixed)
        };

        assert!(matches!(
            queue.adjudicate(entry_id, bad),
            Err(AppError::Validation { .. })
        ));
        assert_eq!(queue.ordered().len(), 1);
    }

    #[test]
    fn test_dispute_then_resolve() {
        let mut queue = AuditQueue::new(0.7);
        let lbl = label("doi:10.1/a", 0.9, LabelMethod::Automated);
        let label_id = lbl.label_id;
        let entry_id = queue.submit(lbl, 0.3).unwrap();

        assert!(queue
            .adjudicate(entry_id, Adjudication::dispute("ada", "not sure"))
            .unwrap()
            .is_none());
        assert_eq!(queue.label(label_id).unwrap().status, AuditStatus::Disputed);
        assert_eq!(queue.ordered().len(), 1);
        assert!(queue.verify_completeness().is_ok());

        assert!(matches!(
            queue.adjudicate(entry_id, Adjudication::dispute("bob", "still unsure")),
            Err(AppError::InvalidTransition { .. })
        ));

        queue.adjudicate(entry_id, Adjudication::approve("bob")).unwrap();
        assert_eq!(queue.label(label_id).unwrap().status, AuditStatus::Verified);
        assert!(queue.verify_history().is_ok());

        assert!(matches!(
            queue.adjudicate(entry_id, Adjudication::approve("bob")),
            Err(AppError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_unlabeled_needs_a_category() {
        let mut queue = AuditQueue::new(0.7);
        let key = CanonicalKey::from_canonical("doi:10.1/u");
        let entry_id = queue.submit_unlabeled(key.clone(), 0.4, "schema violation");
        assert_eq!(queue.submit_unlabeled(key.clone(), 0.4, "again"), entry_id);
        assert_eq!(queue.band_counts()[&PriorityBand::NeedsHuman], 1);

        assert!(queue.adjudicate(entry_id, Adjudication::approve("ada")).is_err());
        assert!(queue
            .adjudicate(entry_id, Adjudication::dispute("ada", "?"))
            .is_err());

        let outcome = queue
            .adjudicate(entry_id, Adjudication::reject("ada", IntentCategory::Mixed))
            .unwrap()
            .unwrap();
        assert_eq!(queue.label(outcome.resolved_label).unwrap().category, IntentCategory::Mixed);
        assert!(queue.covers(&key));
        assert_eq!(queue.band_counts()[&PriorityBand::NeedsHuman], 0);
    }

    #[test]
    fn test_rename_paper_moves_labels_and_entries() {
        let mut queue = AuditQueue::new(0.7);
        let old = CanonicalKey::from_canonical("openalex:W77");
        let new = CanonicalKey::from_canonical("doi:10.1/z");
        let entry_id = queue
            .submit(label("openalex:W77", 0.4, LabelMethod::Automated), 0.5)
            .unwrap();

        assert_eq!(queue.rename_paper(&old, &new), 1);

        assert!(queue.covers(&new));
        assert!(!queue.covers(&old));
        assert_eq!(queue.entry(entry_id).unwrap().paper_key, new);
        assert!(queue.events().iter().all(|e| e.paper_key == new));
        assert!(queue.verify_completeness().is_ok());
        assert!(queue.verify_history().is_ok());
    }

    #[test]
    fn test_completeness_detects_orphan_label() {
        let lbl = label("doi:10.1/a", 0.5, LabelMethod::Automated);
        let queue = AuditQueue::from_parts(0.7, vec![lbl], vec![], vec![]);

        assert!(matches!(
            queue.verify_completeness(),
            Err(AppError::GraphConsistency { .. })
        ));
    }

    #[test]
    fn test_replay_rejects_broken_chain() {
        let lbl = label("doi:10.1/a", 0.5, LabelMethod::Automated);
        let event = AuditEvent {
            at: Utc::now(),
            actor: "ada".into(),
            entry_id: None,
            label_id: lbl.label_id,
            paper_key: lbl.paper_key.clone(),
            from: Some(AuditStatus::Verified),
            to: AuditStatus::Disputed,
            decision: Some(Decision::Dispute),
            note: None,
        };

        assert!(replay(&[event]).is_err());
        assert!(!is_allowed_transition(Some(AuditStatus::Verified), AuditStatus::Pending));
    }
}
