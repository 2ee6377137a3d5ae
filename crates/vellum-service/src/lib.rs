//! Vellum Service - The unified review engine entry point
//!
//! Wires the five engine components together and exposes the resource
//! operations callers use. This is the only place where authorization,
//! consensus, workflow, history, and notifications meet:
//!
//! 1. External actors are validated at the request boundary, before a
//!    decision reaches the consensus engine.
//! 2. Decision writes recompute section status; when every required
//!    section of an under-review file is approved, the derived
//!    `under_review -> approved` transition is applied with the system
//!    actor of record.
//! 3. Every accepted state change lands in the ledger and is published to
//!    the notification sink.

#![deny(unsafe_code)]

mod contracts;

pub use contracts::*;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use vellum_access::{access_url, AccessError, ExternalAccessIssuer};
use vellum_consensus::{ConsensusEngine, ConsensusError, SectionConsensus};
use vellum_ledger::{LedgerError, SectionContent, VersionHistoryLedger};
use vellum_registry::{RegistryError, ReviewerRegistry};
use vellum_types::{
    AccessCapability, AccessScope, ActorRef, CollaboratorIdentity, EnginePolicy, EventSource,
    FileId, FileRecord, Project, ProjectId, ReviewEvent, ReviewEventEnvelope, ReviewerId,
    ScopePath, Section, SectionId, TokenId, WorkflowStateEntry,
};
use vellum_workflow::{ProposedTransition, WorkflowError, WorkflowStateMachine};

/// Where review events are delivered. The engine publishes; how humans
/// are told is the channel's concern.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: &ReviewEventEnvelope);
}

/// Default sink: structured log records only
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn publish(&self, event: &ReviewEventEnvelope) {
        tracing::info!(
            source = ?event.source,
            actor = %event.actor,
            event = ?event.event,
            "review event"
        );
    }
}

/// The review engine facade
pub struct ReviewService {
    policy: EnginePolicy,
    base_url: String,
    registry: Arc<ReviewerRegistry>,
    consensus: Arc<ConsensusEngine>,
    ledger: Arc<VersionHistoryLedger>,
    workflow: Arc<WorkflowStateMachine>,
    access: Arc<ExternalAccessIssuer>,
    projects: RwLock<HashMap<ProjectId, Project>>,
    sections: RwLock<HashMap<SectionId, Section>>,
    project_files: RwLock<HashMap<ProjectId, Vec<FileId>>>,
    sink: Arc<dyn NotificationSink>,
}

impl ReviewService {
    pub fn new() -> Self {
        Self::with_policy(EnginePolicy::default())
    }

    pub fn with_policy(policy: EnginePolicy) -> Self {
        let registry = Arc::new(ReviewerRegistry::new());
        let ledger = Arc::new(VersionHistoryLedger::new());
        Self {
            base_url: "https://vellum.local".to_string(),
            registry: registry.clone(),
            consensus: Arc::new(ConsensusEngine::new(registry)),
            workflow: Arc::new(WorkflowStateMachine::new(ledger.clone())),
            ledger,
            access: Arc::new(ExternalAccessIssuer::new(policy.max_token_ttl_days)),
            projects: RwLock::new(HashMap::new()),
            sections: RwLock::new(HashMap::new()),
            project_files: RwLock::new(HashMap::new()),
            sink: Arc::new(TracingSink),
            policy,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    // ============ Project and file setup ============

    /// Create a project carrying the engine's default consensus policy
    pub fn create_project(&self, title: impl Into<String>) -> Result<Project, ServiceError> {
        let mut project = Project::new(title);
        project.consensus_policy = self.policy.consensus;

        let mut projects = self.projects.write().map_err(|_| ServiceError::LockError)?;
        projects.insert(project.id.clone(), project.clone());
        Ok(project)
    }

    /// Register a file with its sections and open its history stream
    pub fn register_file(
        &self,
        project_id: &ProjectId,
        name: impl Into<String>,
        drafts: Vec<SectionDraft>,
        actor: &ActorRef,
    ) -> Result<FileRecord, ServiceError> {
        let consensus_policy = {
            let projects = self.projects.read().map_err(|_| ServiceError::LockError)?;
            projects
                .get(project_id)
                .ok_or_else(|| ServiceError::UnknownProject(project_id.clone()))?
                .consensus_policy
        };

        let mut file = FileRecord::new(project_id.clone(), name);
        let mut content = SectionContent::new();
        {
            let mut sections = self.sections.write().map_err(|_| ServiceError::LockError)?;
            for draft in drafts {
                let mut section = Section::new(file.id.clone(), draft.name, draft.kind)
                    .with_content(draft.content);
                section.is_required_for_approval = draft.is_required_for_approval;

                self.consensus.set_policy(section.id.clone(), consensus_policy);
                content.insert(section.id.clone(), section.content.clone());
                file.section_order.push(section.id.clone());
                sections.insert(section.id.clone(), section);
            }
        }

        self.workflow.register_file(file.clone(), content, actor)?;

        let mut project_files = self
            .project_files
            .write()
            .map_err(|_| ServiceError::LockError)?;
        project_files
            .entry(project_id.clone())
            .or_default()
            .push(file.id.clone());

        Ok(file)
    }

    /// Replace a section's current content. Edits arrive from the content
    /// store; they are captured into history by the snapshot taken at the
    /// next transition.
    pub fn update_section_content(
        &self,
        section_id: &SectionId,
        content: serde_json::Value,
    ) -> Result<(), ServiceError> {
        let mut sections = self.sections.write().map_err(|_| ServiceError::LockError)?;
        let section = sections
            .get_mut(section_id)
            .ok_or_else(|| ServiceError::UnknownSection(section_id.clone()))?;
        section.content = content;
        Ok(())
    }

    // ============ Review submission ============

    /// `POST section/{id}/review` for signed-in members
    pub fn submit_review(
        &self,
        section_id: &SectionId,
        request: &SubmitReviewRequest,
        actor: &ActorRef,
    ) -> Result<SectionConsensus, ServiceError> {
        let reviewer = match actor {
            ActorRef::Reviewer(id) | ActorRef::Owner(id) => id.clone(),
            ActorRef::External(_) | ActorRef::System => {
                return Err(ServiceError::Consensus(
                    ConsensusError::InsufficientPermission {
                        actor: actor.clone(),
                        action: "submit a review directly".to_string(),
                    },
                ))
            }
        };
        self.record_decision(section_id, &reviewer, request, actor)
    }

    /// `POST section/{id}/review` for external collaborators.
    ///
    /// The token is validated here, at the request boundary, before the
    /// decision reaches the consensus engine. Submitting a review needs
    /// the `review` capability; the collaborator must also hold a reviewer
    /// assignment like any signed-in reviewer — the token is a ceiling,
    /// not an addition.
    pub fn submit_external_review(
        &self,
        token_id: &TokenId,
        secret: &str,
        section_id: &SectionId,
        request: &SubmitReviewRequest,
    ) -> Result<SectionConsensus, ServiceError> {
        let path = self.scope_path(section_id)?;
        let auth = self
            .access
            .validate(token_id, secret, AccessCapability::Review, &path)?;

        let reviewer = external_reviewer_id(&auth.collaborator.email);
        let actor = ActorRef::External(token_id.clone());
        self.record_decision(section_id, &reviewer, request, &actor)
    }

    /// `POST section/{id}/force-approve`, owner-only
    pub fn force_approve_section(
        &self,
        section_id: &SectionId,
        actor: &ActorRef,
    ) -> Result<SectionConsensus, ServiceError> {
        let file_id = self.file_of(section_id)?;
        let record = self.consensus.force_approve(section_id, actor)?;

        // Mirror the override into the file's history
        let state = self.workflow.current_state(&file_id)?;
        self.ledger.append_force_approve(
            &file_id,
            state,
            &format!("section {section_id}: {}", record.reason),
            actor,
        )?;

        self.publish(
            EventSource::Consensus,
            actor.clone(),
            ReviewEvent::SectionForceApproved {
                section_id: section_id.clone(),
            },
        );

        self.apply_derived_transitions(&file_id)?;
        Ok(self.consensus.compute_status(section_id)?)
    }

    // ============ Workflow operations ============

    /// `POST file/{id}/state`
    pub fn transition_file(
        &self,
        file_id: &FileId,
        request: &TransitionRequest,
        actor: &ActorRef,
    ) -> Result<WorkflowStateEntry, ServiceError> {
        let snapshot = self.snapshot_of(file_id)?;
        let entry = self.workflow.transition(
            file_id,
            request.new_state,
            &request.change_reason,
            actor,
            Some(snapshot),
        )?;

        // Priority rides along only once the transition has committed; a
        // rejected transition must leave the file untouched.
        if let Some(priority) = request.priority_level {
            self.workflow.set_priority(file_id, priority)?;
        }

        self.publish(
            EventSource::Workflow,
            actor.clone(),
            ReviewEvent::FileTransitioned {
                file_id: file_id.clone(),
                from: entry.previous_state,
                to: entry.new_state,
            },
        );
        Ok(entry)
    }

    /// `GET file/{id}/state-history`
    pub fn state_history(&self, file_id: &FileId) -> Result<Vec<WorkflowStateEntry>, ServiceError> {
        Ok(self.ledger.list_for_file(file_id)?)
    }

    /// `POST file/{id}/versions/{versionId}/restore`
    pub fn restore_version(
        &self,
        file_id: &FileId,
        version: u64,
        actor: &ActorRef,
    ) -> Result<WorkflowStateEntry, ServiceError> {
        let state = self.workflow.current_state(file_id)?;
        let (entry, snapshot) = self.ledger.restore(file_id, version, state, actor)?;

        // Reapply the snapshot's content as current
        let mut sections = self.sections.write().map_err(|_| ServiceError::LockError)?;
        for (section_id, content) in snapshot.sections {
            if let Some(section) = sections.get_mut(&section_id) {
                section.content = content;
            }
        }

        self.publish(
            EventSource::Ledger,
            actor.clone(),
            ReviewEvent::VersionRestored {
                file_id: file_id.clone(),
                restored_version: version,
            },
        );
        Ok(entry)
    }

    // ============ Aggregate views ============

    /// `GET project/{id}/approval-tracking[?fileId=]`
    pub fn approval_tracking(
        &self,
        project_id: &ProjectId,
        file_filter: Option<&FileId>,
    ) -> Result<ApprovalTrackingView, ServiceError> {
        {
            let projects = self.projects.read().map_err(|_| ServiceError::LockError)?;
            if !projects.contains_key(project_id) {
                return Err(ServiceError::UnknownProject(project_id.clone()));
            }
        }

        let file_ids: Vec<FileId> = {
            let project_files = self
                .project_files
                .read()
                .map_err(|_| ServiceError::LockError)?;
            project_files
                .get(project_id)
                .map(|files| {
                    files
                        .iter()
                        .filter(|f| file_filter.map_or(true, |wanted| *f == wanted))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut view = ApprovalTrackingView {
            overall: OverallCounts::default(),
            sections: Default::default(),
            timeline: Vec::new(),
        };

        for file_id in &file_ids {
            let overview = self
                .consensus
                .file_overview(&self.section_list(file_id)?)?;
            view.overall.total_sections += overview.total_sections;
            view.overall.approved_sections += overview.approved_sections;
            view.overall.pending_sections += overview.pending_sections;
            view.overall.changes_requested_sections += overview.changes_requested_sections;
            view.sections.extend(overview.sections);
            view.timeline.extend(self.ledger.list_for_file(file_id)?);
        }

        view.timeline
            .sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at).then(a.version.cmp(&b.version)));
        Ok(view)
    }

    // ============ External access ============

    /// `POST external-access`
    pub fn grant_external_access(
        &self,
        request: &GrantAccessRequest,
        actor: &ActorRef,
    ) -> Result<ExternalAccessGrant, ServiceError> {
        {
            let projects = self.projects.read().map_err(|_| ServiceError::LockError)?;
            if !projects.contains_key(&request.project_id) {
                return Err(ServiceError::UnknownProject(request.project_id.clone()));
            }
        }

        // Narrowest requested scope wins. The chosen resource must sit
        // inside the named project; a token cannot be minted against one
        // project for a resource owned by another.
        let scope = if let Some(section_id) = &request.section_id {
            let file = self.workflow.file(&self.file_of(section_id)?)?;
            if file.project_id != request.project_id {
                return Err(ServiceError::ScopeOutsideProject {
                    resource: format!("section/{section_id}"),
                    project: request.project_id.clone(),
                });
            }
            AccessScope::Section(section_id.clone())
        } else if let Some(file_id) = &request.file_id {
            let file = self.workflow.file(file_id)?;
            if file.project_id != request.project_id {
                return Err(ServiceError::ScopeOutsideProject {
                    resource: format!("file/{file_id}"),
                    project: request.project_id.clone(),
                });
            }
            AccessScope::File(file_id.clone())
        } else {
            AccessScope::Project(request.project_id.clone())
        };

        let token = self.access.issue(
            scope,
            request.access_level,
            CollaboratorIdentity {
                email: request.collaborator_email.clone(),
                name: request.collaborator_name.clone(),
            },
            request.expires_in_days,
        )?;

        self.publish(
            EventSource::Access,
            actor.clone(),
            ReviewEvent::AccessGranted {
                token_id: token.id.clone(),
                project_id: request.project_id.clone(),
            },
        );

        Ok(ExternalAccessGrant {
            access_url: access_url(&self.base_url, &token),
            access_info: token,
        })
    }

    /// Revoke an external token. Irreversible.
    pub fn revoke_external_access(
        &self,
        token_id: &TokenId,
        actor: &ActorRef,
    ) -> Result<(), ServiceError> {
        self.access.revoke(token_id)?;
        self.publish(
            EventSource::Access,
            actor.clone(),
            ReviewEvent::AccessRevoked {
                token_id: token_id.clone(),
            },
        );
        Ok(())
    }

    // ============ Component access ============

    pub fn registry(&self) -> &ReviewerRegistry {
        &self.registry
    }

    pub fn consensus(&self) -> &ConsensusEngine {
        &self.consensus
    }

    pub fn workflow(&self) -> &WorkflowStateMachine {
        &self.workflow
    }

    pub fn ledger(&self) -> &VersionHistoryLedger {
        &self.ledger
    }

    pub fn access(&self) -> &ExternalAccessIssuer {
        &self.access
    }

    // ============ Internal helpers ============

    fn record_decision(
        &self,
        section_id: &SectionId,
        reviewer: &ReviewerId,
        request: &SubmitReviewRequest,
        actor: &ActorRef,
    ) -> Result<SectionConsensus, ServiceError> {
        let file_id = self.file_of(section_id)?;

        self.consensus.submit_decision(
            section_id,
            reviewer,
            request.effective_value(),
            request.notes.clone(),
            request.score,
            request.expected_version,
        )?;

        let consensus = self.consensus.compute_status(section_id)?;
        self.publish(
            EventSource::Consensus,
            actor.clone(),
            ReviewEvent::DecisionRecorded {
                section_id: section_id.clone(),
                reviewer_id: reviewer.clone(),
                status: consensus.status,
            },
        );

        self.apply_derived_transitions(&file_id)?;
        Ok(consensus)
    }

    /// Accept the derived `under_review -> approved` transition when every
    /// required section has reached approved consensus.
    fn apply_derived_transitions(&self, file_id: &FileId) -> Result<(), ServiceError> {
        let overview = self
            .consensus
            .file_overview(&self.section_list(file_id)?)?;

        if let Some(proposal) = self
            .workflow
            .propose_derived(file_id, overview.all_required_approved)?
        {
            self.accept_derived(&proposal)?;
        }
        Ok(())
    }

    /// Accept a derived proposal. Two submitters can both see full
    /// consensus and hold a proposal before either accepts; the loser's
    /// acceptance fails the edge table because the file already moved.
    /// That is not an error for the caller whose decision was committed:
    /// the state the proposal wanted is the state the file is in.
    fn accept_derived(&self, proposal: &ProposedTransition) -> Result<(), ServiceError> {
        let snapshot = self.snapshot_of(&proposal.file_id)?;
        match self.workflow.accept_proposal(proposal, Some(snapshot)) {
            Ok(entry) => {
                self.publish(
                    EventSource::Workflow,
                    ActorRef::System,
                    ReviewEvent::FileTransitioned {
                        file_id: proposal.file_id.clone(),
                        from: entry.previous_state,
                        to: entry.new_state,
                    },
                );
                Ok(())
            }
            Err(WorkflowError::InvalidTransition { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn file_of(&self, section_id: &SectionId) -> Result<FileId, ServiceError> {
        let sections = self.sections.read().map_err(|_| ServiceError::LockError)?;
        sections
            .get(section_id)
            .map(|s| s.file_id.clone())
            .ok_or_else(|| ServiceError::UnknownSection(section_id.clone()))
    }

    fn scope_path(&self, section_id: &SectionId) -> Result<ScopePath, ServiceError> {
        let file_id = self.file_of(section_id)?;
        let file = self.workflow.file(&file_id)?;
        Ok(ScopePath::section(file.project_id, file_id, section_id.clone()))
    }

    /// (section, required) pairs for a file, in section order
    fn section_list(&self, file_id: &FileId) -> Result<Vec<(SectionId, bool)>, ServiceError> {
        let file = self.workflow.file(file_id)?;
        let sections = self.sections.read().map_err(|_| ServiceError::LockError)?;
        Ok(file
            .section_order
            .iter()
            .filter_map(|id| {
                sections
                    .get(id)
                    .map(|s| (id.clone(), s.is_required_for_approval))
            })
            .collect())
    }

    fn snapshot_of(&self, file_id: &FileId) -> Result<SectionContent, ServiceError> {
        let file = self.workflow.file(file_id)?;
        let sections = self.sections.read().map_err(|_| ServiceError::LockError)?;
        Ok(file
            .section_order
            .iter()
            .filter_map(|id| sections.get(id).map(|s| (id.clone(), s.content.clone())))
            .collect())
    }

    fn publish(&self, source: EventSource, actor: ActorRef, event: ReviewEvent) {
        self.sink
            .publish(&ReviewEventEnvelope::new(source, actor, event));
    }
}

impl Default for ReviewService {
    fn default() -> Self {
        Self::new()
    }
}

/// Reviewer identity an external collaborator acts under. Assignments for
/// external collaborators are made against this derived id.
pub fn external_reviewer_id(email: &str) -> ReviewerId {
    ReviewerId::new(format!("ext:{email}"))
}

/// Service errors, composed from the component error families
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unknown project: {0}")]
    UnknownProject(ProjectId),

    #[error("Unknown section: {0}")]
    UnknownSection(SectionId),

    #[error("{resource} does not belong to project {project}")]
    ScopeOutsideProject { resource: String, project: ProjectId },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    #[error("Lock error")]
    LockError,
}
