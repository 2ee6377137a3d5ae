//! Vellum Registry - Reviewer assignment tracking
//!
//! Tracks which reviewers are assigned to which projects and sections, and
//! in what role. Assignment is idempotent: assigning a reviewer twice to
//! the same target is a no-op, never a duplicate and never a hard error.
//!
//! The registry is the denominator of consensus: section status is always
//! computed against *currently assigned* reviewers, so unassigning a
//! reviewer changes the section's consensus on the next read even though
//! their past decision is retained for audit.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use vellum_types::{AssignmentTarget, ReviewerAssignment, ReviewerId, ReviewerRole, SectionId};

/// Outcome of an assign call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned,
    /// The reviewer was already assigned to this target; nothing changed
    AlreadyAssigned,
}

/// Reviewer assignment registry
pub struct ReviewerRegistry {
    by_target: RwLock<HashMap<AssignmentTarget, Vec<ReviewerAssignment>>>,
    by_reviewer: RwLock<HashMap<ReviewerId, Vec<AssignmentTarget>>>,
}

impl ReviewerRegistry {
    pub fn new() -> Self {
        Self {
            by_target: RwLock::new(HashMap::new()),
            by_reviewer: RwLock::new(HashMap::new()),
        }
    }

    /// Assign a reviewer to a target. Idempotent.
    pub fn assign(
        &self,
        reviewer: ReviewerId,
        target: AssignmentTarget,
        role: ReviewerRole,
    ) -> Result<AssignOutcome, RegistryError> {
        let mut by_target = self.by_target.write().map_err(|_| RegistryError::LockError)?;

        let assignments = by_target.entry(target.clone()).or_default();
        if assignments.iter().any(|a| a.reviewer_id == reviewer) {
            return Ok(AssignOutcome::AlreadyAssigned);
        }

        assignments.push(ReviewerAssignment {
            target: target.clone(),
            reviewer_id: reviewer.clone(),
            role,
            assigned_at: chrono::Utc::now(),
        });

        let mut by_reviewer = self
            .by_reviewer
            .write()
            .map_err(|_| RegistryError::LockError)?;
        by_reviewer.entry(reviewer.clone()).or_default().push(target.clone());

        tracing::debug!(reviewer = %reviewer, target = %target, "reviewer assigned");
        Ok(AssignOutcome::Assigned)
    }

    /// Remove a reviewer from a target.
    ///
    /// Any decision the reviewer already submitted stays in the decision
    /// set for audit; it simply stops counting because this registry no
    /// longer lists the reviewer for the target.
    pub fn unassign(
        &self,
        reviewer: &ReviewerId,
        target: &AssignmentTarget,
    ) -> Result<(), RegistryError> {
        let mut by_target = self.by_target.write().map_err(|_| RegistryError::LockError)?;

        let assignments = by_target
            .get_mut(target)
            .ok_or_else(|| RegistryError::NotAssigned {
                reviewer: reviewer.clone(),
                target: target.clone(),
            })?;

        let before = assignments.len();
        assignments.retain(|a| a.reviewer_id != *reviewer);
        if assignments.len() == before {
            return Err(RegistryError::NotAssigned {
                reviewer: reviewer.clone(),
                target: target.clone(),
            });
        }

        let mut by_reviewer = self
            .by_reviewer
            .write()
            .map_err(|_| RegistryError::LockError)?;
        if let Some(targets) = by_reviewer.get_mut(reviewer) {
            targets.retain(|t| t != target);
        }

        tracing::debug!(reviewer = %reviewer, target = %target, "reviewer unassigned");
        Ok(())
    }

    /// All assignments for a target
    pub fn assignments_for(
        &self,
        target: &AssignmentTarget,
    ) -> Result<Vec<ReviewerAssignment>, RegistryError> {
        let by_target = self.by_target.read().map_err(|_| RegistryError::LockError)?;
        Ok(by_target.get(target).cloned().unwrap_or_default())
    }

    /// All targets a reviewer is assigned to
    pub fn assignments_for_reviewer(
        &self,
        reviewer: &ReviewerId,
    ) -> Result<Vec<AssignmentTarget>, RegistryError> {
        let by_reviewer = self
            .by_reviewer
            .read()
            .map_err(|_| RegistryError::LockError)?;
        Ok(by_reviewer.get(reviewer).cloned().unwrap_or_default())
    }

    /// Currently assigned reviewer ids for a section, in assignment order.
    /// This is the consensus denominator.
    pub fn reviewers_for_section(
        &self,
        section: &SectionId,
    ) -> Result<Vec<ReviewerId>, RegistryError> {
        let target = AssignmentTarget::Section(section.clone());
        let by_target = self.by_target.read().map_err(|_| RegistryError::LockError)?;
        Ok(by_target
            .get(&target)
            .map(|assignments| assignments.iter().map(|a| a.reviewer_id.clone()).collect())
            .unwrap_or_default())
    }

    /// Whether a reviewer is currently assigned to a section
    pub fn is_assigned(
        &self,
        reviewer: &ReviewerId,
        section: &SectionId,
    ) -> Result<bool, RegistryError> {
        Ok(self
            .reviewers_for_section(section)?
            .iter()
            .any(|r| r == reviewer))
    }
}

impl Default for ReviewerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry-related errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Reviewer {reviewer} is not assigned to {target}")]
    NotAssigned {
        reviewer: ReviewerId,
        target: AssignmentTarget,
    },

    #[error("Lock error")]
    LockError,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section_target(id: &str) -> AssignmentTarget {
        AssignmentTarget::Section(SectionId::new(id))
    }

    #[test]
    fn assign_is_idempotent() {
        let registry = ReviewerRegistry::new();
        let reviewer = ReviewerId::new("r1");
        let target = section_target("s1");

        let first = registry
            .assign(reviewer.clone(), target.clone(), ReviewerRole::Reviewer)
            .unwrap();
        assert_eq!(first, AssignOutcome::Assigned);

        let second = registry
            .assign(reviewer.clone(), target.clone(), ReviewerRole::Approver)
            .unwrap();
        assert_eq!(second, AssignOutcome::AlreadyAssigned);

        let assignments = registry.assignments_for(&target).unwrap();
        assert_eq!(assignments.len(), 1);
        // The original role wins; the duplicate did not overwrite it
        assert_eq!(assignments[0].role, ReviewerRole::Reviewer);
    }

    #[test]
    fn unassign_shrinks_denominator() {
        let registry = ReviewerRegistry::new();
        let section = SectionId::new("s1");
        let target = AssignmentTarget::Section(section.clone());

        for name in ["r1", "r2", "r3"] {
            registry
                .assign(ReviewerId::new(name), target.clone(), ReviewerRole::Reviewer)
                .unwrap();
        }
        assert_eq!(registry.reviewers_for_section(&section).unwrap().len(), 3);

        registry.unassign(&ReviewerId::new("r2"), &target).unwrap();
        let remaining = registry.reviewers_for_section(&section).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(!remaining.contains(&ReviewerId::new("r2")));
    }

    #[test]
    fn unassign_unknown_reviewer_fails() {
        let registry = ReviewerRegistry::new();
        let target = section_target("s1");

        let err = registry
            .unassign(&ReviewerId::new("ghost"), &target)
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotAssigned { .. }));
    }

    #[test]
    fn reviewer_index_tracks_targets() {
        let registry = ReviewerRegistry::new();
        let reviewer = ReviewerId::new("r1");

        registry
            .assign(reviewer.clone(), section_target("s1"), ReviewerRole::Reviewer)
            .unwrap();
        registry
            .assign(reviewer.clone(), section_target("s2"), ReviewerRole::Reviewer)
            .unwrap();

        let targets = registry.assignments_for_reviewer(&reviewer).unwrap();
        assert_eq!(targets.len(), 2);

        registry.unassign(&reviewer, &section_target("s1")).unwrap();
        assert_eq!(registry.assignments_for_reviewer(&reviewer).unwrap().len(), 1);
    }
}
