//! Notification events
//!
//! Events provide a unified stream of review activity for the delivery
//! channel. The engine publishes; how humans are told is the channel's
//! concern.

use crate::{
    ActorRef, FileId, ProjectId, ReviewerId, SectionId, SectionStatus, TokenId, WorkflowState,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all review events
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReviewEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Which component produced the event
    pub source: EventSource,

    /// Event severity
    pub severity: EventSeverity,

    /// Actor who triggered the event
    pub actor: ActorRef,

    /// The actual event
    pub event: ReviewEvent,
}

impl ReviewEventEnvelope {
    pub fn new(source: EventSource, actor: ActorRef, event: ReviewEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            source,
            severity: EventSeverity::Info,
            actor,
            event,
        }
    }
}

/// Event sources
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Registry,
    Consensus,
    Workflow,
    Ledger,
    Access,
}

/// Event severity levels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
}

/// Review activity worth telling humans about
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ReviewEvent {
    DecisionRecorded {
        section_id: SectionId,
        reviewer_id: ReviewerId,
        status: SectionStatus,
    },
    SectionForceApproved {
        section_id: SectionId,
    },
    FileTransitioned {
        file_id: FileId,
        from: WorkflowState,
        to: WorkflowState,
    },
    VersionRestored {
        file_id: FileId,
        restored_version: u64,
    },
    AccessGranted {
        token_id: TokenId,
        project_id: ProjectId,
    },
    AccessRevoked {
        token_id: TokenId,
    },
}
