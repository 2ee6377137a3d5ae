//! Vellum Workflow - Document lifecycle state machine
//!
//! Governs the five-state file lifecycle against a closed edge table.
//! A successful transition atomically validates the edge, appends exactly
//! one ledger entry with an incremented version number, and updates the
//! file's current state. The ledger entry is the single point of truth for
//! what happened and why.
//!
//! Transitions on the same file run under per-file mutual exclusion:
//! validity check and write are one critical section, so two concurrent
//! transitions from the same source state cannot both succeed.
//!
//! Transitions are either manual (an actor asks for a target state) or
//! derived: when every required section of an under-review file reaches
//! approved consensus, the machine *proposes* `under_review -> approved`.
//! A proposal is applied through an explicit acceptance step with the
//! system actor of record, never silently.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use vellum_ledger::{LedgerError, SectionContent, VersionHistoryLedger};
use vellum_types::{ActorRef, FileId, FileRecord, Priority, WorkflowState, WorkflowStateEntry};

/// Whether `from -> to` is an edge in the lifecycle table
pub fn allowed_transition(from: WorkflowState, to: WorkflowState) -> bool {
    use WorkflowState::*;
    matches!(
        (from, to),
        (Draft, UnderReview)
            | (Draft, Delivered)
            | (UnderReview, ChangesRequested)
            | (UnderReview, Approved)
            | (UnderReview, Draft)
            | (ChangesRequested, UnderReview)
            | (ChangesRequested, Draft)
            | (Approved, Delivered)
            | (Approved, UnderReview)
            | (Delivered, UnderReview)
    )
}

/// A derived transition awaiting explicit acceptance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProposedTransition {
    pub file_id: FileId,
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub reason: String,
}

/// The workflow state machine. Owns the file records and their per-file
/// transition locks; writes history through the ledger.
pub struct WorkflowStateMachine {
    files: RwLock<HashMap<FileId, FileRecord>>,
    locks: Mutex<HashMap<FileId, Arc<Mutex<()>>>>,
    ledger: Arc<VersionHistoryLedger>,
}

impl WorkflowStateMachine {
    pub fn new(ledger: Arc<VersionHistoryLedger>) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            ledger,
        }
    }

    /// Register a file and open its history stream with a creation entry.
    pub fn register_file(
        &self,
        file: FileRecord,
        sections: SectionContent,
        actor: &ActorRef,
    ) -> Result<WorkflowStateEntry, WorkflowError> {
        let entry = self
            .ledger
            .open_stream(&file.id, file.state, actor, sections)?;

        let mut files = self.files.write().map_err(|_| WorkflowError::LockError)?;
        files.insert(file.id.clone(), file);
        Ok(entry)
    }

    /// Current lifecycle state of a file
    pub fn current_state(&self, file_id: &FileId) -> Result<WorkflowState, WorkflowError> {
        Ok(self.file(file_id)?.state)
    }

    /// A copy of the file record
    pub fn file(&self, file_id: &FileId) -> Result<FileRecord, WorkflowError> {
        let files = self.files.read().map_err(|_| WorkflowError::LockError)?;
        files
            .get(file_id)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownFile(file_id.clone()))
    }

    /// Apply a transition.
    ///
    /// Fails with `InvalidTransition` if `current -> target` is not in the
    /// edge table. On success the ledger entry and the state update happen
    /// inside one per-file critical section.
    pub fn transition(
        &self,
        file_id: &FileId,
        target: WorkflowState,
        reason: &str,
        actor: &ActorRef,
        sections: Option<SectionContent>,
    ) -> Result<WorkflowStateEntry, WorkflowError> {
        let file_lock = self.lock_for(file_id)?;
        let _guard = file_lock.lock().map_err(|_| WorkflowError::LockError)?;

        let current = self.current_state(file_id)?;
        if !allowed_transition(current, target) {
            tracing::debug!(
                file = %file_id,
                from = %current,
                to = %target,
                "transition rejected"
            );
            return Err(WorkflowError::InvalidTransition {
                file: file_id.clone(),
                from: current,
                to: target,
            });
        }

        let entry =
            self.ledger
                .append_transition(file_id, current, target, reason, actor, sections)?;

        let mut files = self.files.write().map_err(|_| WorkflowError::LockError)?;
        if let Some(file) = files.get_mut(file_id) {
            file.state = target;
        }

        tracing::info!(
            file = %file_id,
            from = %current,
            to = %target,
            actor = %actor,
            version = entry.version,
            "file transitioned"
        );
        Ok(entry)
    }

    /// Update a file's priority. Priority rides alongside transitions and
    /// is last-writer-wins; it is not part of the edge table.
    pub fn set_priority(&self, file_id: &FileId, priority: Priority) -> Result<(), WorkflowError> {
        let mut files = self.files.write().map_err(|_| WorkflowError::LockError)?;
        let file = files
            .get_mut(file_id)
            .ok_or_else(|| WorkflowError::UnknownFile(file_id.clone()))?;
        file.priority = priority;
        Ok(())
    }

    /// Propose `under_review -> approved` when every required section has
    /// reached approved consensus. Returns `None` when the file is not
    /// under review or consensus is not there yet.
    pub fn propose_derived(
        &self,
        file_id: &FileId,
        all_required_approved: bool,
    ) -> Result<Option<ProposedTransition>, WorkflowError> {
        let current = self.current_state(file_id)?;
        if current != WorkflowState::UnderReview || !all_required_approved {
            return Ok(None);
        }
        Ok(Some(ProposedTransition {
            file_id: file_id.clone(),
            from: WorkflowState::UnderReview,
            to: WorkflowState::Approved,
            reason: "all required sections reached approved consensus".to_string(),
        }))
    }

    /// Accept a derived transition, recording the system actor.
    /// Still subject to the edge table: if the file moved since the
    /// proposal was made, this fails like any other transition.
    pub fn accept_proposal(
        &self,
        proposal: &ProposedTransition,
        sections: Option<SectionContent>,
    ) -> Result<WorkflowStateEntry, WorkflowError> {
        self.transition(
            &proposal.file_id,
            proposal.to,
            &proposal.reason,
            &ActorRef::System,
            sections,
        )
    }

    fn lock_for(&self, file_id: &FileId) -> Result<Arc<Mutex<()>>, WorkflowError> {
        let mut locks = self.locks.lock().map_err(|_| WorkflowError::LockError)?;
        Ok(locks.entry(file_id.clone()).or_default().clone())
    }
}

/// Workflow-related errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Unknown file: {0}")]
    UnknownFile(FileId),

    #[error("Invalid transition for file {file}: {from} -> {to}")]
    InvalidTransition {
        file: FileId,
        from: WorkflowState,
        to: WorkflowState,
    },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Lock error")]
    LockError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_types::{LedgerEventKind, ProjectId};

    const ALL_STATES: [WorkflowState; 5] = [
        WorkflowState::Draft,
        WorkflowState::UnderReview,
        WorkflowState::ChangesRequested,
        WorkflowState::Approved,
        WorkflowState::Delivered,
    ];

    fn machine() -> WorkflowStateMachine {
        WorkflowStateMachine::new(Arc::new(VersionHistoryLedger::new()))
    }

    fn register(machine: &WorkflowStateMachine, state: WorkflowState) -> FileId {
        let mut file = FileRecord::new(ProjectId::new("p"), "doc.pdf");
        file.state = state;
        let id = file.id.clone();
        machine
            .register_file(file, SectionContent::new(), &ActorRef::System)
            .unwrap();
        id
    }

    #[test]
    fn edge_table_is_exhaustive() {
        let legal = [
            (WorkflowState::Draft, WorkflowState::UnderReview),
            (WorkflowState::Draft, WorkflowState::Delivered),
            (WorkflowState::UnderReview, WorkflowState::ChangesRequested),
            (WorkflowState::UnderReview, WorkflowState::Approved),
            (WorkflowState::UnderReview, WorkflowState::Draft),
            (WorkflowState::ChangesRequested, WorkflowState::UnderReview),
            (WorkflowState::ChangesRequested, WorkflowState::Draft),
            (WorkflowState::Approved, WorkflowState::Delivered),
            (WorkflowState::Approved, WorkflowState::UnderReview),
            (WorkflowState::Delivered, WorkflowState::UnderReview),
        ];

        for from in ALL_STATES {
            for to in ALL_STATES {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    allowed_transition(from, to),
                    expected,
                    "edge {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn every_non_edge_fails_with_invalid_transition() {
        for from in ALL_STATES {
            for to in ALL_STATES {
                let machine = machine();
                let file = register(&machine, from);
                let result = machine.transition(&file, to, "test", &ActorRef::System, None);
                if allowed_transition(from, to) {
                    assert!(result.is_ok(), "edge {from} -> {to} should succeed");
                } else {
                    assert!(
                        matches!(result, Err(WorkflowError::InvalidTransition { .. })),
                        "non-edge {from} -> {to} should fail"
                    );
                }
            }
        }
    }

    #[test]
    fn transition_writes_one_versioned_entry_and_updates_state() {
        let ledger = Arc::new(VersionHistoryLedger::new());
        let machine = WorkflowStateMachine::new(ledger.clone());
        let file = register(&machine, WorkflowState::Draft);

        let entry = machine
            .transition(
                &file,
                WorkflowState::UnderReview,
                "sent to reviewers",
                &ActorRef::Owner(vellum_types::ReviewerId::new("owner")),
                None,
            )
            .unwrap();

        assert_eq!(entry.version, 2); // creation entry is version 1
        assert_eq!(entry.kind, LedgerEventKind::Transition);
        assert_eq!(entry.previous_state, WorkflowState::Draft);
        assert_eq!(entry.new_state, WorkflowState::UnderReview);
        assert_eq!(
            machine.current_state(&file).unwrap(),
            WorkflowState::UnderReview
        );
        assert_eq!(ledger.list_for_file(&file).unwrap().len(), 2);
    }

    #[test]
    fn concurrent_transitions_from_same_state_cannot_both_succeed() {
        let machine = Arc::new(machine());
        let file = register(&machine, WorkflowState::Draft);

        let mut handles = Vec::new();
        for _ in 0..2 {
            let machine = Arc::clone(&machine);
            let file = file.clone();
            handles.push(std::thread::spawn(move || {
                machine.transition(
                    &file,
                    WorkflowState::UnderReview,
                    "race",
                    &ActorRef::System,
                    None,
                )
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1, "exactly one writer wins");
        assert!(results.iter().any(|r| matches!(
            r,
            Err(WorkflowError::InvalidTransition { .. })
        )));
    }

    #[test]
    fn derived_proposal_only_when_under_review_and_consensus() {
        let machine = machine();
        let file = register(&machine, WorkflowState::Draft);

        // Draft file: no proposal even with full consensus
        assert!(machine.propose_derived(&file, true).unwrap().is_none());

        machine
            .transition(&file, WorkflowState::UnderReview, "submit", &ActorRef::System, None)
            .unwrap();
        assert!(machine.propose_derived(&file, false).unwrap().is_none());

        let proposal = machine.propose_derived(&file, true).unwrap().unwrap();
        assert_eq!(proposal.to, WorkflowState::Approved);

        let entry = machine.accept_proposal(&proposal, None).unwrap();
        assert_eq!(entry.actor, ActorRef::System);
        assert_eq!(
            machine.current_state(&file).unwrap(),
            WorkflowState::Approved
        );
    }

    #[test]
    fn stale_proposal_is_rejected_by_edge_table() {
        let machine = machine();
        let file = register(&machine, WorkflowState::UnderReview);

        let proposal = machine.propose_derived(&file, true).unwrap().unwrap();

        // File moves before the proposal is accepted
        machine
            .transition(&file, WorkflowState::Draft, "pulled back", &ActorRef::System, None)
            .unwrap();

        let err = machine.accept_proposal(&proposal, None).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[test]
    fn delivered_file_never_rederives() {
        let machine = machine();
        let file = register(&machine, WorkflowState::Delivered);

        // A late rejection cannot silently revert a delivered file: status
        // re-derivation proposes nothing outside under_review.
        assert!(machine.propose_derived(&file, true).unwrap().is_none());
        assert!(machine.propose_derived(&file, false).unwrap().is_none());
    }
}
