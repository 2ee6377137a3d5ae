//! Vellum Domain Types
//!
//! Shared types for the review-workflow and approval-consensus engine.
//!
//! # Key Concepts
//!
//! - **Project / FileRecord / Section**: the reviewed artifact hierarchy.
//!   A file owns an ordered sequence of sections; each section carries its
//!   assigned reviewers' decisions.
//! - **Decision**: one per (section, reviewer) pair. A resubmission
//!   replaces the reviewer's prior decision under optimistic concurrency,
//!   it never appends.
//! - **WorkflowState**: the five-state document lifecycle. Transitions are
//!   validated against a closed edge table and recorded in the ledger.
//! - **SectionStatus**: always derived from the current decision set,
//!   never stored as independent mutable truth.
//! - **ExternalAccessToken**: a scoped, expiring, revocable credential for
//!   non-member collaborators. Its capability level is a ceiling, never an
//!   addition.
//! - **ActorRef**: request-scoped caller identity passed into every engine
//!   call. There is no ambient identity singleton.
//!
//! # Design Principles
//!
//! 1. Section status is recomputed on every read. No cached aggregate can
//!    drift from the decision set.
//! 2. History entries are immutable once written. Restore appends, it
//!    never rewrites.
//! 3. Every status enum is closed and matched exhaustively. There is no
//!    "unknown status falls through to a default" path.

#![deny(unsafe_code)]

mod config;
mod entities;
mod events;
mod ids;
mod status;

pub use config::*;
pub use entities::*;
pub use events::*;
pub use ids::*;
pub use status::*;
