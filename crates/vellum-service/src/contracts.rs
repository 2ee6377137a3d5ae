//! Request/response contracts
//!
//! Transport-agnostic shapes for the engine's resource operations. An
//! HTTP or RPC adapter maps its payloads onto these; the engine never
//! sees the transport.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vellum_consensus::SectionConsensus;
use vellum_types::{
    AccessCapability, DecisionValue, ExternalAccessToken, FileId, Priority, ProjectId, SectionId,
    WorkflowState, WorkflowStateEntry,
};

/// Body of `POST section/{id}/review`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitReviewRequest {
    pub status: DecisionValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    /// The reviewer's explicit final sign-off. When set, the recorded
    /// decision is `Approved` regardless of `status`.
    #[serde(default)]
    pub is_final_approval: bool,
    /// Version stamp of the decision this submission replaces; `None`
    /// for a first submission. Stale stamps get `DecisionConflict` and
    /// the caller retries its read-modify-write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<u64>,
}

impl SubmitReviewRequest {
    pub fn approve() -> Self {
        Self {
            status: DecisionValue::Approved,
            notes: None,
            score: None,
            is_final_approval: false,
            expected_version: None,
        }
    }

    pub fn request_changes(notes: impl Into<String>) -> Self {
        Self {
            status: DecisionValue::ChangesRequested,
            notes: Some(notes.into()),
            score: None,
            is_final_approval: false,
            expected_version: None,
        }
    }

    pub fn with_expected_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// The decision value this request resolves to
    pub fn effective_value(&self) -> DecisionValue {
        if self.is_final_approval {
            DecisionValue::Approved
        } else {
            self.status
        }
    }
}

/// Body of `POST file/{id}/state`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub new_state: WorkflowState,
    pub change_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_level: Option<Priority>,
}

/// A section to create when registering a file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SectionDraft {
    pub name: String,
    pub kind: String,
    pub is_required_for_approval: bool,
    pub content: serde_json::Value,
}

impl SectionDraft {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
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

/// Body of `POST external-access`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GrantAccessRequest {
    pub project_id: ProjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_id: Option<SectionId>,
    pub collaborator_email: String,
    pub collaborator_name: String,
    pub access_level: AccessCapability,
    pub expires_in_days: u32,
}

/// Response of `POST external-access`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExternalAccessGrant {
    /// Shareable URL embedding the opaque token secret
    pub access_url: String,
    pub access_info: ExternalAccessToken,
}

/// Aggregate counts across the sections in view
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OverallCounts {
    pub total_sections: usize,
    pub approved_sections: usize,
    pub pending_sections: usize,
    pub changes_requested_sections: usize,
}

/// Response of `GET project/{id}/approval-tracking`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalTrackingView {
    pub overall: OverallCounts,
    pub sections: BTreeMap<SectionId, SectionConsensus>,
    /// Ledger entries across the files in view, oldest first
    pub timeline: Vec<WorkflowStateEntry>,
}
