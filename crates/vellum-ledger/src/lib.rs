//! Vellum Ledger - Append-only version history
//!
//! Every state-changing event on a file lands here as an immutable
//! `WorkflowStateEntry`, totally ordered per file by version number.
//! Snapshots capture section content at the moment an entry is written.
//!
//! Restore is forward-only audit: it appends a new `Restored` entry
//! pointing at the target snapshot and hands the snapshot content back to
//! the caller to reapply. It never deletes or rewrites prior entries.

#![deny(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use thiserror::Error;
use vellum_types::{
    ActorRef, FileId, LedgerEntryId, LedgerEventKind, SectionId, SnapshotId, VersionSnapshot,
    WorkflowState, WorkflowStateEntry,
};

/// Section content captured into a snapshot
pub type SectionContent = BTreeMap<SectionId, serde_json::Value>;

/// The version history ledger. Append is reserved for the workflow state
/// machine and the force-approve path; no other component writes history.
pub struct VersionHistoryLedger {
    streams: RwLock<HashMap<FileId, Vec<WorkflowStateEntry>>>,
    snapshots: RwLock<HashMap<SnapshotId, VersionSnapshot>>,
}

impl VersionHistoryLedger {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Open a file's history stream with its creation entry (version 1)
    /// and an initial content snapshot.
    pub fn open_stream(
        &self,
        file_id: &FileId,
        state: WorkflowState,
        actor: &ActorRef,
        sections: SectionContent,
    ) -> Result<WorkflowStateEntry, LedgerError> {
        let mut streams = self.streams.write().map_err(|_| LedgerError::LockError)?;
        if streams.contains_key(file_id) {
            return Err(LedgerError::StreamExists(file_id.clone()));
        }

        let snapshot_id =
            self.store_snapshot(file_id, 1, sections)?;
        let entry = WorkflowStateEntry {
            id: LedgerEntryId::generate(),
            file_id: file_id.clone(),
            kind: LedgerEventKind::Created,
            previous_state: state,
            new_state: state,
            reason: "file initialized".to_string(),
            actor: actor.clone(),
            recorded_at: chrono::Utc::now(),
            version: 1,
            snapshot_id: Some(snapshot_id),
        };
        streams.insert(file_id.clone(), vec![entry.clone()]);

        tracing::debug!(file = %file_id, "history stream opened");
        Ok(entry)
    }

    /// Append a transition entry. Caller is the workflow state machine.
    pub fn append_transition(
        &self,
        file_id: &FileId,
        previous_state: WorkflowState,
        new_state: WorkflowState,
        reason: &str,
        actor: &ActorRef,
        sections: Option<SectionContent>,
    ) -> Result<WorkflowStateEntry, LedgerError> {
        self.append(
            file_id,
            LedgerEventKind::Transition,
            previous_state,
            new_state,
            reason,
            actor,
            sections,
        )
    }

    /// Append a force-approve audit entry. The file state is unchanged;
    /// the entry records that a section override was issued.
    pub fn append_force_approve(
        &self,
        file_id: &FileId,
        state: WorkflowState,
        reason: &str,
        actor: &ActorRef,
    ) -> Result<WorkflowStateEntry, LedgerError> {
        self.append(
            file_id,
            LedgerEventKind::ForceApproved,
            state,
            state,
            reason,
            actor,
            None,
        )
    }

    /// All entries for a file, ordered by version
    pub fn list_for_file(&self, file_id: &FileId) -> Result<Vec<WorkflowStateEntry>, LedgerError> {
        let streams = self.streams.read().map_err(|_| LedgerError::LockError)?;
        streams
            .get(file_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownFile(file_id.clone()))
    }

    /// The entry at a specific version
    pub fn entry_at(
        &self,
        file_id: &FileId,
        version: u64,
    ) -> Result<WorkflowStateEntry, LedgerError> {
        let streams = self.streams.read().map_err(|_| LedgerError::LockError)?;
        streams
            .get(file_id)
            .and_then(|entries| entries.iter().find(|e| e.version == version))
            .cloned()
            .ok_or(LedgerError::VersionNotFound {
                file: file_id.clone(),
                version,
            })
    }

    /// Latest version number for a file, 0 if the stream is unopened
    pub fn latest_version(&self, file_id: &FileId) -> Result<u64, LedgerError> {
        let streams = self.streams.read().map_err(|_| LedgerError::LockError)?;
        Ok(streams.get(file_id).map(|e| e.len() as u64).unwrap_or(0))
    }

    /// Fetch a snapshot by id
    pub fn snapshot(&self, snapshot_id: &SnapshotId) -> Result<VersionSnapshot, LedgerError> {
        let snapshots = self.snapshots.read().map_err(|_| LedgerError::LockError)?;
        snapshots
            .get(snapshot_id)
            .cloned()
            .ok_or_else(|| LedgerError::SnapshotMissing(snapshot_id.clone()))
    }

    /// Restore a file to the content captured at `version`.
    ///
    /// Appends a new `Restored` entry linked to the target snapshot and
    /// returns it together with the snapshot, whose content the caller
    /// reapplies as current. Prior entries are untouched.
    pub fn restore(
        &self,
        file_id: &FileId,
        version: u64,
        current_state: WorkflowState,
        actor: &ActorRef,
    ) -> Result<(WorkflowStateEntry, VersionSnapshot), LedgerError> {
        let target = self.entry_at(file_id, version)?;
        let snapshot_id = target
            .snapshot_id
            .clone()
            .ok_or(LedgerError::NoSnapshotForVersion {
                file: file_id.clone(),
                version,
            })?;
        let snapshot = self.snapshot(&snapshot_id)?;

        let mut streams = self.streams.write().map_err(|_| LedgerError::LockError)?;
        let entries = streams
            .get_mut(file_id)
            .ok_or_else(|| LedgerError::UnknownFile(file_id.clone()))?;

        let entry = WorkflowStateEntry {
            id: LedgerEntryId::generate(),
            file_id: file_id.clone(),
            kind: LedgerEventKind::Restored,
            previous_state: current_state,
            new_state: current_state,
            reason: format!("restored to version {version}"),
            actor: actor.clone(),
            recorded_at: chrono::Utc::now(),
            version: entries.len() as u64 + 1,
            snapshot_id: Some(snapshot_id),
        };
        entries.push(entry.clone());

        tracing::info!(file = %file_id, version, "version restored");
        Ok((entry, snapshot))
    }

    #[allow(clippy::too_many_arguments)]
    fn append(
        &self,
        file_id: &FileId,
        kind: LedgerEventKind,
        previous_state: WorkflowState,
        new_state: WorkflowState,
        reason: &str,
        actor: &ActorRef,
        sections: Option<SectionContent>,
    ) -> Result<WorkflowStateEntry, LedgerError> {
        let mut streams = self.streams.write().map_err(|_| LedgerError::LockError)?;
        let entries = streams
            .get_mut(file_id)
            .ok_or_else(|| LedgerError::UnknownFile(file_id.clone()))?;
        let version = entries.len() as u64 + 1;

        let snapshot_id = match sections {
            Some(content) => Some(self.store_snapshot(file_id, version, content)?),
            None => None,
        };

        let entry = WorkflowStateEntry {
            id: LedgerEntryId::generate(),
            file_id: file_id.clone(),
            kind,
            previous_state,
            new_state,
            reason: reason.to_string(),
            actor: actor.clone(),
            recorded_at: chrono::Utc::now(),
            version,
            snapshot_id,
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    fn store_snapshot(
        &self,
        file_id: &FileId,
        ledger_version: u64,
        sections: SectionContent,
    ) -> Result<SnapshotId, LedgerError> {
        let snapshot = VersionSnapshot {
            id: SnapshotId::generate(),
            file_id: file_id.clone(),
            ledger_version,
            sections,
            captured_at: chrono::Utc::now(),
        };
        let id = snapshot.id.clone();
        let mut snapshots = self.snapshots.write().map_err(|_| LedgerError::LockError)?;
        snapshots.insert(id.clone(), snapshot);
        Ok(id)
    }
}

impl Default for VersionHistoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Ledger-related errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("No history stream for file {0}")]
    UnknownFile(FileId),

    #[error("History stream already open for file {0}")]
    StreamExists(FileId),

    #[error("Version {version} not found for file {file}")]
    VersionNotFound { file: FileId, version: u64 },

    #[error("Version {version} of file {file} carries no snapshot")]
    NoSnapshotForVersion { file: FileId, version: u64 },

    #[error("Snapshot missing: {0}")]
    SnapshotMissing(SnapshotId),

    #[error("Lock error")]
    LockError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(text: &str) -> SectionContent {
        let mut sections = BTreeMap::new();
        sections.insert(SectionId::new("s1"), json!({ "body": text }));
        sections
    }

    fn open(ledger: &VersionHistoryLedger, file: &FileId) {
        ledger
            .open_stream(file, WorkflowState::Draft, &ActorRef::System, content("v1"))
            .unwrap();
    }

    #[test]
    fn versions_are_contiguous_from_one() {
        let ledger = VersionHistoryLedger::new();
        let file = FileId::new("f");
        open(&ledger, &file);

        ledger
            .append_transition(
                &file,
                WorkflowState::Draft,
                WorkflowState::UnderReview,
                "submitted",
                &ActorRef::System,
                Some(content("v2")),
            )
            .unwrap();
        ledger
            .append_force_approve(
                &file,
                WorkflowState::UnderReview,
                "owner override on s1",
                &ActorRef::Owner(vellum_types::ReviewerId::new("owner")),
            )
            .unwrap();

        let entries = ledger.list_for_file(&file).unwrap();
        let versions: Vec<u64> = entries.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(entries[0].kind, LedgerEventKind::Created);
        assert_eq!(entries[2].kind, LedgerEventKind::ForceApproved);
    }

    #[test]
    fn restore_appends_without_rewriting() {
        let ledger = VersionHistoryLedger::new();
        let file = FileId::new("f");
        open(&ledger, &file);
        ledger
            .append_transition(
                &file,
                WorkflowState::Draft,
                WorkflowState::UnderReview,
                "submitted",
                &ActorRef::System,
                Some(content("v2")),
            )
            .unwrap();

        let before = ledger.list_for_file(&file).unwrap();
        let (entry, snapshot) = ledger
            .restore(&file, 1, WorkflowState::UnderReview, &ActorRef::System)
            .unwrap();

        assert_eq!(entry.kind, LedgerEventKind::Restored);
        assert_eq!(entry.version, 3);
        assert_eq!(
            snapshot.sections.get(&SectionId::new("s1")).unwrap(),
            &json!({ "body": "v1" })
        );

        // Prior entries unchanged, in order
        let after = ledger.list_for_file(&file).unwrap();
        assert_eq!(after.len(), 3);
        for (prior, current) in before.iter().zip(after.iter()) {
            assert_eq!(prior.id, current.id);
            assert_eq!(prior.version, current.version);
        }
    }

    #[test]
    fn restore_unknown_version_fails() {
        let ledger = VersionHistoryLedger::new();
        let file = FileId::new("f");
        open(&ledger, &file);

        let err = ledger
            .restore(&file, 9, WorkflowState::Draft, &ActorRef::System)
            .unwrap_err();
        assert!(matches!(err, LedgerError::VersionNotFound { version: 9, .. }));
    }

    #[test]
    fn double_open_fails() {
        let ledger = VersionHistoryLedger::new();
        let file = FileId::new("f");
        open(&ledger, &file);
        let err = ledger
            .open_stream(&file, WorkflowState::Draft, &ActorRef::System, content("v1"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::StreamExists(_)));
    }

    #[test]
    fn unopened_stream_is_an_error() {
        let ledger = VersionHistoryLedger::new();
        let err = ledger.list_for_file(&FileId::new("missing")).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownFile(_)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// However many entries are appended, versions stay a
            /// contiguous 1..=n sequence.
            #[test]
            fn versions_stay_contiguous(appends in 0usize..32) {
                let ledger = VersionHistoryLedger::new();
                let file = FileId::new("f");
                open(&ledger, &file);

                for i in 0..appends {
                    ledger
                        .append_force_approve(
                            &file,
                            WorkflowState::UnderReview,
                            &format!("override {i}"),
                            &ActorRef::System,
                        )
                        .unwrap();
                }

                let entries = ledger.list_for_file(&file).unwrap();
                for (idx, entry) in entries.iter().enumerate() {
                    prop_assert_eq!(entry.version, idx as u64 + 1);
                }
                prop_assert_eq!(
                    ledger.latest_version(&file).unwrap(),
                    appends as u64 + 1
                );
            }
        }
    }
}
