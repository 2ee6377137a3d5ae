//! Vellum Consensus - Derives section approval status from decisions
//!
//! Section status is a pure function of the current decision set and the
//! currently assigned reviewer set. It is recomputed on every read, never
//! cached, so concurrent reads are safe without locking and nothing can
//! drift from the decision set.
//!
//! Tie-break order when computing status:
//! 1. Zero assigned reviewers → `Unassigned`
//! 2. Force-approve override present → `Approved`
//! 3. Any changes-requested decision → `ChangesRequested` (rejections
//!    veto, regardless of approval count)
//! 4. Approvals at or above threshold → `Approved`
//! 5. Any approvals below threshold → `Partial`
//! 6. Otherwise → `Pending`

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use vellum_registry::{RegistryError, ReviewerRegistry};
use vellum_types::{
    ActorRef, ConsensusPolicy, Decision, DecisionValue, ReviewerId, SectionId, SectionStatus,
};

/// Aggregate consensus for one section
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionConsensus {
    pub section_id: SectionId,
    pub assigned: usize,
    pub approvals: usize,
    pub rejections: usize,
    pub pending: usize,
    pub threshold: usize,
    pub status: SectionStatus,
    /// Approvals over assigned reviewers, percent, one decimal
    pub percentage: f64,
    /// Set when the status comes from a force-approve override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
}

/// Owner-issued override marking a section approved despite the decision
/// set. Consumed by status computation; mirrored into the ledger by the
/// service layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForceApproveRecord {
    pub section_id: SectionId,
    pub actor: ActorRef,
    pub reason: String,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// Aggregate consensus across all sections of a file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileConsensusOverview {
    pub total_sections: usize,
    pub approved_sections: usize,
    pub pending_sections: usize,
    pub changes_requested_sections: usize,
    pub sections: BTreeMap<SectionId, SectionConsensus>,
    /// True when every required section has reached `Approved`
    pub all_required_approved: bool,
}

/// The consensus engine. Owns the decision set and override records;
/// reads the reviewer denominator from the registry.
pub struct ConsensusEngine {
    registry: Arc<ReviewerRegistry>,
    decisions: RwLock<HashMap<SectionId, HashMap<ReviewerId, Decision>>>,
    overrides: RwLock<HashMap<SectionId, ForceApproveRecord>>,
    policies: RwLock<HashMap<SectionId, ConsensusPolicy>>,
}

impl ConsensusEngine {
    pub fn new(registry: Arc<ReviewerRegistry>) -> Self {
        Self {
            registry,
            decisions: RwLock::new(HashMap::new()),
            overrides: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
        }
    }

    /// Register the consensus policy a section inherits from its project.
    /// Sections without one fall back to the default ratio.
    pub fn set_policy(&self, section: SectionId, policy: ConsensusPolicy) {
        if let Ok(mut policies) = self.policies.write() {
            policies.insert(section, policy);
        }
    }

    /// Record a reviewer's decision on a section.
    ///
    /// The write is a single-key upsert keyed by (section, reviewer) under
    /// optimistic concurrency: `expected_version` must match the stored
    /// decision's version (`None` for a first submission). A losing writer
    /// gets `DecisionConflict` and retries its read-modify-write.
    pub fn submit_decision(
        &self,
        section: &SectionId,
        reviewer: &ReviewerId,
        value: DecisionValue,
        note: Option<String>,
        score: Option<u8>,
        expected_version: Option<u64>,
    ) -> Result<Decision, ConsensusError> {
        if !self.registry.is_assigned(reviewer, section)? {
            return Err(ConsensusError::NotAssigned {
                reviewer: reviewer.clone(),
                section: section.clone(),
            });
        }

        let mut decisions = self.decisions.write().map_err(|_| ConsensusError::LockError)?;
        let section_decisions = decisions.entry(section.clone()).or_default();

        let current_version = section_decisions.get(reviewer).map(|d| d.version);
        if current_version != expected_version {
            return Err(ConsensusError::DecisionConflict {
                section: section.clone(),
                reviewer: reviewer.clone(),
                expected: expected_version,
                actual: current_version,
            });
        }

        let decision = Decision {
            section_id: section.clone(),
            reviewer_id: reviewer.clone(),
            value,
            submitted_at: chrono::Utc::now(),
            note,
            score,
            version: current_version.unwrap_or(0) + 1,
        };
        section_decisions.insert(reviewer.clone(), decision.clone());

        tracing::debug!(
            section = %section,
            reviewer = %reviewer,
            value = ?value,
            version = decision.version,
            "decision recorded"
        );
        Ok(decision)
    }

    /// Compute a section's aggregate status.
    ///
    /// Pure with respect to engine state: calling it twice against an
    /// unchanged decision set yields identical output. Decisions from
    /// reviewers no longer assigned are retained but not counted.
    pub fn compute_status(&self, section: &SectionId) -> Result<SectionConsensus, ConsensusError> {
        let assigned = self.registry.reviewers_for_section(section)?;
        let policy = self.policy_for(section);
        let threshold = policy.threshold(assigned.len());

        if assigned.is_empty() {
            return Ok(SectionConsensus {
                section_id: section.clone(),
                assigned: 0,
                approvals: 0,
                rejections: 0,
                pending: 0,
                threshold: 0,
                status: SectionStatus::Unassigned,
                percentage: 0.0,
                override_reason: None,
            });
        }

        let decisions = self.decisions.read().map_err(|_| ConsensusError::LockError)?;
        let section_decisions = decisions.get(section);

        let mut approvals = 0;
        let mut rejections = 0;
        for reviewer in &assigned {
            match section_decisions.and_then(|m| m.get(reviewer)).map(|d| d.value) {
                Some(DecisionValue::Approved) => approvals += 1,
                Some(DecisionValue::ChangesRequested) => rejections += 1,
                Some(DecisionValue::Pending) | None => {}
            }
        }
        let pending = assigned.len() - approvals - rejections;

        let overrides = self.overrides.read().map_err(|_| ConsensusError::LockError)?;
        let override_record = overrides.get(section);

        let status = if override_record.is_some() {
            SectionStatus::Approved
        } else if rejections > 0 {
            SectionStatus::ChangesRequested
        } else if approvals >= threshold {
            SectionStatus::Approved
        } else if approvals > 0 {
            SectionStatus::Partial
        } else {
            SectionStatus::Pending
        };

        let percentage = (approvals as f64 / assigned.len() as f64 * 1000.0).round() / 10.0;

        Ok(SectionConsensus {
            section_id: section.clone(),
            assigned: assigned.len(),
            approvals,
            rejections,
            pending,
            threshold,
            status,
            percentage,
            override_reason: override_record.map(|r| r.reason.clone()),
        })
    }

    /// Mark a section approved despite the decision set.
    ///
    /// Owner-only, and blocked while any rejection from a currently
    /// assigned reviewer is outstanding: an owner cannot force-approve
    /// over an active objection.
    pub fn force_approve(
        &self,
        section: &SectionId,
        actor: &ActorRef,
    ) -> Result<ForceApproveRecord, ConsensusError> {
        if !actor.is_owner() {
            return Err(ConsensusError::InsufficientPermission {
                actor: actor.clone(),
                action: "force-approve".to_string(),
            });
        }

        let current = self.compute_status(section)?;
        if current.rejections > 0 {
            return Err(ConsensusError::ObjectionOutstanding {
                section: section.clone(),
                rejections: current.rejections,
            });
        }

        let record = ForceApproveRecord {
            section_id: section.clone(),
            actor: actor.clone(),
            reason: format!("force-approved by {actor}"),
            recorded_at: chrono::Utc::now(),
        };

        let mut overrides = self.overrides.write().map_err(|_| ConsensusError::LockError)?;
        overrides.insert(section.clone(), record.clone());

        tracing::info!(section = %section, actor = %actor, "section force-approved");
        Ok(record)
    }

    /// Current decisions on a section, including retained decisions from
    /// reviewers no longer assigned. Audit view.
    pub fn decisions_for_section(
        &self,
        section: &SectionId,
    ) -> Result<Vec<Decision>, ConsensusError> {
        let decisions = self.decisions.read().map_err(|_| ConsensusError::LockError)?;
        let mut all: Vec<Decision> = decisions
            .get(section)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by(|a, b| a.reviewer_id.cmp(&b.reviewer_id));
        Ok(all)
    }

    /// Aggregate consensus for a file's sections.
    ///
    /// `sections` is the file's ordered (section, required) list; the
    /// caller owns the section catalog.
    pub fn file_overview(
        &self,
        sections: &[(SectionId, bool)],
    ) -> Result<FileConsensusOverview, ConsensusError> {
        let mut per_section = BTreeMap::new();
        let mut approved = 0;
        let mut pending = 0;
        let mut changes_requested = 0;
        let mut all_required_approved = true;

        for (section_id, required) in sections {
            let consensus = self.compute_status(section_id)?;
            match consensus.status {
                SectionStatus::Approved => approved += 1,
                SectionStatus::ChangesRequested => changes_requested += 1,
                SectionStatus::Unassigned | SectionStatus::Pending | SectionStatus::Partial => {
                    pending += 1
                }
            }
            if *required && consensus.status != SectionStatus::Approved {
                all_required_approved = false;
            }
            per_section.insert(section_id.clone(), consensus);
        }

        Ok(FileConsensusOverview {
            total_sections: sections.len(),
            approved_sections: approved,
            pending_sections: pending,
            changes_requested_sections: changes_requested,
            sections: per_section,
            all_required_approved: all_required_approved && !sections.is_empty(),
        })
    }

    fn policy_for(&self, section: &SectionId) -> ConsensusPolicy {
        self.policies
            .read()
            .ok()
            .and_then(|policies| policies.get(section).copied())
            .unwrap_or_default()
    }
}

/// Consensus-related errors
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Reviewer {reviewer} is not assigned to section {section}")]
    NotAssigned {
        reviewer: ReviewerId,
        section: SectionId,
    },

    #[error("Stale decision write on section {section} by {reviewer}: expected version {expected:?}, found {actual:?}")]
    DecisionConflict {
        section: SectionId,
        reviewer: ReviewerId,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("{actor} may not {action}")]
    InsufficientPermission { actor: ActorRef, action: String },

    #[error("Section {section} has {rejections} outstanding rejection(s); force-approve is blocked")]
    ObjectionOutstanding {
        section: SectionId,
        rejections: usize,
    },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Lock error")]
    LockError,
}
