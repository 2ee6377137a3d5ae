//! Persisted record types
//!
//! Every record here is a distinct durable type. `WorkflowStateEntry` and
//! `VersionSnapshot` are never updated or deleted once written.

use crate::{
    AccessCapability, DecisionValue, FileId, LedgerEntryId, LedgerEventKind, Priority, ProjectId,
    ReviewerId, ReviewerRole, SectionId, SnapshotId, TokenId, Visibility, WorkflowState,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A project owning zero or more files
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub title: String,
    pub visibility: Visibility,
    pub consensus_policy: crate::ConsensusPolicy,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Project {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: ProjectId::generate(),
            title: title.into(),
            visibility: Visibility::default(),
            consensus_policy: crate::ConsensusPolicy::default(),
            created_at: chrono::Utc::now(),
        }
    }
}

/// A reviewed document. Owns an ordered sequence of sections and a ledger
/// stream; `state` is the current lifecycle state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub project_id: ProjectId,
    pub name: String,
    pub state: WorkflowState,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,
    pub section_order: Vec<SectionId>,
}

impl FileRecord {
    pub fn new(project_id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id: FileId::generate(),
            project_id,
            name: name.into(),
            state: WorkflowState::Draft,
            priority: Priority::default(),
            deadline: None,
            section_order: Vec::new(),
        }
    }
}

/// A section of a file. Status is derived from decisions, never stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub file_id: FileId,
    pub name: String,
    pub kind: String,
    pub is_required_for_approval: bool,
    /// Opaque content blob owned by the file/content store
    pub content: serde_json::Value,
}

impl Section {
    pub fn new(file_id: FileId, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: SectionId::generate(),
            file_id,
            name: name.into(),
            kind: kind.into(),
            is_required_for_approval: true,
            content: serde_json::Value::Null,
        }
    }

    pub fn optional(mut self) -> Self {
        self.is_required_for_approval = false;
        self
    }

    pub fn with_content(mut self, content: serde_json::Value) -> Self {
        self.content = content;
        self
    }
}

/// One reviewer's current decision on a section.
///
/// At most one per (section, reviewer). A resubmission replaces the prior
/// decision under a compare-and-swap on `version`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub section_id: SectionId,
    pub reviewer_id: ReviewerId,
    pub value: DecisionValue,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    /// Optimistic-concurrency stamp, incremented on every accepted write
    pub version: u64,
}

/// Where a reviewer is assigned
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentTarget {
    Project(ProjectId),
    Section(SectionId),
}

impl fmt::Display for AssignmentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentTarget::Project(id) => write!(f, "project/{id}"),
            AssignmentTarget::Section(id) => write!(f, "section/{id}"),
        }
    }
}

/// A reviewer's assignment to a project or section
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReviewerAssignment {
    pub target: AssignmentTarget,
    pub reviewer_id: ReviewerId,
    pub role: ReviewerRole,
    pub assigned_at: chrono::DateTime<chrono::Utc>,
}

/// Request-scoped caller identity. Passed into every engine call; the
/// engine holds no ambient identity state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRef {
    /// A signed-in member acting as a reviewer
    Reviewer(ReviewerId),
    /// A signed-in member who owns the project
    Owner(ReviewerId),
    /// An external collaborator acting through an access token
    External(TokenId),
    /// The engine itself, for derived transitions
    System,
}

impl ActorRef {
    pub fn is_owner(&self) -> bool {
        matches!(self, ActorRef::Owner(_))
    }
}

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorRef::Reviewer(id) => write!(f, "reviewer:{id}"),
            ActorRef::Owner(id) => write!(f, "owner:{id}"),
            ActorRef::External(id) => write!(f, "external:{id}"),
            ActorRef::System => f.write_str("system"),
        }
    }
}

/// Immutable history entry. Totally ordered per file by `version`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowStateEntry {
    pub id: LedgerEntryId,
    pub file_id: FileId,
    pub kind: LedgerEventKind,
    pub previous_state: WorkflowState,
    pub new_state: WorkflowState,
    pub reason: String,
    pub actor: ActorRef,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
    pub version: u64,
    /// Snapshot captured alongside this entry, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<SnapshotId>,
}

/// Immutable point-in-time capture of a file's section content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionSnapshot {
    pub id: SnapshotId,
    pub file_id: FileId,
    /// Ledger version of the entry this snapshot is linked to
    pub ledger_version: u64,
    pub sections: BTreeMap<SectionId, serde_json::Value>,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

/// The named non-member a token is issued to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorIdentity {
    pub email: String,
    pub name: String,
}

/// What a token grants access to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessScope {
    Project(ProjectId),
    File(FileId),
    Section(SectionId),
}

impl fmt::Display for AccessScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessScope::Project(id) => write!(f, "project/{id}"),
            AccessScope::File(id) => write!(f, "file/{id}"),
            AccessScope::Section(id) => write!(f, "section/{id}"),
        }
    }
}

/// The full resource path of a request, used for scope containment:
/// a project-scoped token authorizes any file/section within the project,
/// a section-scoped token authorizes only that section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopePath {
    pub project_id: ProjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<SectionId>,
}

impl ScopePath {
    pub fn project(project_id: ProjectId) -> Self {
        Self {
            project_id,
            file_id: None,
            section_id: None,
        }
    }

    pub fn file(project_id: ProjectId, file_id: FileId) -> Self {
        Self {
            project_id,
            file_id: Some(file_id),
            section_id: None,
        }
    }

    pub fn section(project_id: ProjectId, file_id: FileId, section_id: SectionId) -> Self {
        Self {
            project_id,
            file_id: Some(file_id),
            section_id: Some(section_id),
        }
    }
}

/// Scoped, expiring credential for a non-member collaborator.
///
/// Valid iff not revoked and `now < expires_at`. Transitions only
/// active → expired (time) or active → revoked (explicit), never back.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExternalAccessToken {
    pub id: TokenId,
    pub scope: AccessScope,
    pub capability: AccessCapability,
    pub collaborator: CollaboratorIdentity,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub revoked: bool,
    /// Opaque bearer secret embedded in the access URL
    pub secret: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_display_forms() {
        assert_eq!(ActorRef::System.to_string(), "system");
        assert_eq!(
            ActorRef::Reviewer(ReviewerId::new("r1")).to_string(),
            "reviewer:r1"
        );
    }

    #[test]
    fn section_defaults_to_required() {
        let section = Section::new(FileId::new("f"), "Intro", "text");
        assert!(section.is_required_for_approval);
        assert!(!section.optional().is_required_for_approval);
    }
}
