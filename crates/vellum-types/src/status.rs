//! Lifecycle and status enums
//!
//! All of these are closed sets matched exhaustively at every consumption
//! point. Wire names are snake_case.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Document-level lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Draft,
    UnderReview,
    ChangesRequested,
    Approved,
    Delivered,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Draft => "draft",
            WorkflowState::UnderReview => "under_review",
            WorkflowState::ChangesRequested => "changes_requested",
            WorkflowState::Approved => "approved",
            WorkflowState::Delivered => "delivered",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived section-level status. Never stored; always recomputed from the
/// current decision set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Unassigned,
    Pending,
    Partial,
    Approved,
    ChangesRequested,
}

impl SectionStatus {
    /// Human-readable label for callers rendering status chips
    pub fn label(&self) -> &'static str {
        match self {
            SectionStatus::Unassigned => "Unassigned",
            SectionStatus::Pending => "Pending review",
            SectionStatus::Partial => "Partially approved",
            SectionStatus::Approved => "Approved",
            SectionStatus::ChangesRequested => "Changes requested",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            SectionStatus::Unassigned => "gray",
            SectionStatus::Pending => "yellow",
            SectionStatus::Partial => "blue",
            SectionStatus::Approved => "green",
            SectionStatus::ChangesRequested => "red",
        }
    }
}

impl fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single reviewer's standing decision on a section
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionValue {
    Pending,
    Approved,
    ChangesRequested,
}

/// Role a reviewer holds on an assignment target
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerRole {
    Reviewer,
    Approver,
    Stakeholder,
}

/// Capability granted by an external access token.
///
/// The derived ordering is the authorization ordering:
/// `ViewOnly < ViewComment < Review`. A token authorizes any capability
/// check at or below its granted level.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AccessCapability {
    ViewOnly,
    ViewComment,
    Review,
}

impl AccessCapability {
    /// Whether a token at this level satisfies a check for `requested`
    pub fn permits(&self, requested: AccessCapability) -> bool {
        *self >= requested
    }
}

impl fmt::Display for AccessCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessCapability::ViewOnly => "view_only",
            AccessCapability::ViewComment => "view_comment",
            AccessCapability::Review => "review",
        };
        f.write_str(s)
    }
}

/// File priority, settable alongside a transition
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Project visibility
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Private,
    Team,
    Public,
}

/// What kind of event a ledger entry records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventKind {
    Created,
    Transition,
    ForceApproved,
    Restored,
}
