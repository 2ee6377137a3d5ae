//! Vellum Access - External collaborator credentials
//!
//! Mints and validates scoped, expiring tokens that let a named
//! non-member participate in a review without an account in the member
//! identity system. A token's capability level is a ceiling on what the
//! bearer may do, never an addition to it.
//!
//! Validation checks in order: existence → revoked flag → expiry → scope
//! containment → capability ordering. A project-scoped token authorizes
//! any file or section within the project; a section-scoped token
//! authorizes only that section.

#![deny(unsafe_code)]

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use vellum_types::{
    AccessCapability, AccessScope, CollaboratorIdentity, ExternalAccessToken, ScopePath, TokenId,
};

/// Successful validation result
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessAuthorization {
    pub token_id: TokenId,
    pub capability: AccessCapability,
    pub collaborator: CollaboratorIdentity,
}

/// Issues and validates external access tokens
pub struct ExternalAccessIssuer {
    tokens: RwLock<HashMap<TokenId, ExternalAccessToken>>,
    max_ttl_days: u32,
}

impl ExternalAccessIssuer {
    pub fn new(max_ttl_days: u32) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            max_ttl_days,
        }
    }

    /// Mint a token. `ttl_days` must be a positive integer within the
    /// configured maximum.
    pub fn issue(
        &self,
        scope: AccessScope,
        capability: AccessCapability,
        collaborator: CollaboratorIdentity,
        ttl_days: u32,
    ) -> Result<ExternalAccessToken, AccessError> {
        if ttl_days == 0 || ttl_days > self.max_ttl_days {
            return Err(AccessError::InvalidTtl {
                requested: ttl_days,
                max: self.max_ttl_days,
            });
        }

        let now = chrono::Utc::now();
        let token = ExternalAccessToken {
            id: TokenId::generate(),
            scope,
            capability,
            collaborator,
            issued_at: now,
            expires_at: now + chrono::Duration::days(i64::from(ttl_days)),
            revoked: false,
            secret: generate_secret(),
        };

        let mut tokens = self.tokens.write().map_err(|_| AccessError::LockError)?;
        tokens.insert(token.id.clone(), token.clone());

        tracing::info!(
            token = %token.id,
            scope = %token.scope,
            capability = %token.capability,
            ttl_days,
            "external access token issued"
        );
        Ok(token)
    }

    /// Validate a presented token against a requested capability and the
    /// resource path being accessed.
    pub fn validate(
        &self,
        token_id: &TokenId,
        secret: &str,
        requested: AccessCapability,
        path: &ScopePath,
    ) -> Result<AccessAuthorization, AccessError> {
        self.validate_at(token_id, secret, requested, path, chrono::Utc::now())
    }

    /// `validate` with an explicit clock, used to pin expiry boundaries.
    pub fn validate_at(
        &self,
        token_id: &TokenId,
        secret: &str,
        requested: AccessCapability,
        path: &ScopePath,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<AccessAuthorization, AccessError> {
        let tokens = self.tokens.read().map_err(|_| AccessError::LockError)?;
        let token = tokens
            .get(token_id)
            .filter(|t| t.secret == secret)
            .ok_or_else(|| AccessError::TokenNotFound(token_id.clone()))?;

        if token.revoked {
            return Err(AccessError::TokenRevoked(token_id.clone()));
        }
        if now >= token.expires_at {
            return Err(AccessError::TokenExpired {
                token: token_id.clone(),
                expired_at: token.expires_at,
            });
        }

        let contained = match &token.scope {
            AccessScope::Project(id) => path.project_id == *id,
            AccessScope::File(id) => path.file_id.as_ref() == Some(id),
            AccessScope::Section(id) => path.section_id.as_ref() == Some(id),
        };
        if !contained {
            return Err(AccessError::ScopeMismatch {
                token: token_id.clone(),
                granted: token.scope.clone(),
            });
        }

        if !token.capability.permits(requested) {
            return Err(AccessError::InsufficientCapability {
                token: token_id.clone(),
                granted: token.capability,
                requested,
            });
        }

        Ok(AccessAuthorization {
            token_id: token.id.clone(),
            capability: token.capability,
            collaborator: token.collaborator.clone(),
        })
    }

    /// Revoke a token. Irreversible; revoking twice is a no-op.
    pub fn revoke(&self, token_id: &TokenId) -> Result<(), AccessError> {
        let mut tokens = self.tokens.write().map_err(|_| AccessError::LockError)?;
        let token = tokens
            .get_mut(token_id)
            .ok_or_else(|| AccessError::TokenNotFound(token_id.clone()))?;
        if !token.revoked {
            token.revoked = true;
            tracing::info!(token = %token_id, "external access token revoked");
        }
        Ok(())
    }

    /// All tokens issued for a scope, for administration
    pub fn list_for_scope(&self, scope: &AccessScope) -> Result<Vec<ExternalAccessToken>, AccessError> {
        let tokens = self.tokens.read().map_err(|_| AccessError::LockError)?;
        Ok(tokens.values().filter(|t| t.scope == *scope).cloned().collect())
    }

    /// Fetch a token by id
    pub fn token(&self, token_id: &TokenId) -> Result<ExternalAccessToken, AccessError> {
        let tokens = self.tokens.read().map_err(|_| AccessError::LockError)?;
        tokens
            .get(token_id)
            .cloned()
            .ok_or_else(|| AccessError::TokenNotFound(token_id.clone()))
    }
}

impl Default for ExternalAccessIssuer {
    fn default() -> Self {
        Self::new(30)
    }
}

/// The shareable URL a collaborator opens, embedding the opaque secret
pub fn access_url(base: &str, token: &ExternalAccessToken) -> String {
    format!("{}/external/{}?key={}", base.trim_end_matches('/'), token.id, token.secret)
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Access-related errors
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("Token lifetime of {requested} day(s) is outside 1..={max}")]
    InvalidTtl { requested: u32, max: u32 },

    #[error("Token not found: {0}")]
    TokenNotFound(TokenId),

    #[error("Token revoked: {0}")]
    TokenRevoked(TokenId),

    #[error("Token {token} expired at {expired_at}")]
    TokenExpired {
        token: TokenId,
        expired_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("Token {token} is scoped to {granted} and does not cover the requested resource")]
    ScopeMismatch { token: TokenId, granted: AccessScope },

    #[error("Token {token} grants {granted}, which does not permit {requested}")]
    InsufficientCapability {
        token: TokenId,
        granted: AccessCapability,
        requested: AccessCapability,
    },

    #[error("Lock error")]
    LockError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_types::{FileId, ProjectId, SectionId};

    fn collaborator() -> CollaboratorIdentity {
        CollaboratorIdentity {
            email: "reviewer@example.com".to_string(),
            name: "Outside Reviewer".to_string(),
        }
    }

    fn path() -> ScopePath {
        ScopePath::section(
            ProjectId::new("p1"),
            FileId::new("f1"),
            SectionId::new("s1"),
        )
    }

    #[test]
    fn issue_and_validate_happy_path() {
        let issuer = ExternalAccessIssuer::default();
        let token = issuer
            .issue(
                AccessScope::Project(ProjectId::new("p1")),
                AccessCapability::Review,
                collaborator(),
                7,
            )
            .unwrap();

        let auth = issuer
            .validate(&token.id, &token.secret, AccessCapability::Review, &path())
            .unwrap();
        assert_eq!(auth.capability, AccessCapability::Review);
    }

    #[test]
    fn ttl_bounds_are_enforced() {
        let issuer = ExternalAccessIssuer::new(30);
        let scope = AccessScope::Project(ProjectId::new("p1"));

        for ttl in [0, 31] {
            let err = issuer
                .issue(scope.clone(), AccessCapability::ViewOnly, collaborator(), ttl)
                .unwrap_err();
            assert!(matches!(err, AccessError::InvalidTtl { .. }));
        }
        assert!(issuer
            .issue(scope, AccessCapability::ViewOnly, collaborator(), 30)
            .is_ok());
    }

    #[test]
    fn expiry_boundary() {
        let issuer = ExternalAccessIssuer::default();
        let token = issuer
            .issue(
                AccessScope::Project(ProjectId::new("p1")),
                AccessCapability::ViewOnly,
                collaborator(),
                1,
            )
            .unwrap();

        let just_before = token.expires_at - chrono::Duration::seconds(1);
        assert!(issuer
            .validate_at(&token.id, &token.secret, AccessCapability::ViewOnly, &path(), just_before)
            .is_ok());

        let just_after = token.expires_at + chrono::Duration::seconds(1);
        let err = issuer
            .validate_at(&token.id, &token.secret, AccessCapability::ViewOnly, &path(), just_after)
            .unwrap_err();
        assert!(matches!(err, AccessError::TokenExpired { .. }));
    }

    #[test]
    fn revocation_is_irreversible_and_idempotent() {
        let issuer = ExternalAccessIssuer::default();
        let token = issuer
            .issue(
                AccessScope::Project(ProjectId::new("p1")),
                AccessCapability::Review,
                collaborator(),
                7,
            )
            .unwrap();

        issuer.revoke(&token.id).unwrap();
        issuer.revoke(&token.id).unwrap(); // no-op, not an error

        let err = issuer
            .validate(&token.id, &token.secret, AccessCapability::ViewOnly, &path())
            .unwrap_err();
        assert!(matches!(err, AccessError::TokenRevoked(_)));
    }

    #[test]
    fn project_scope_contains_sections_within() {
        let issuer = ExternalAccessIssuer::default();
        let token = issuer
            .issue(
                AccessScope::Project(ProjectId::new("p1")),
                AccessCapability::ViewComment,
                collaborator(),
                7,
            )
            .unwrap();

        // Any section under p1 is covered
        assert!(issuer
            .validate(&token.id, &token.secret, AccessCapability::ViewComment, &path())
            .is_ok());

        // A resource in another project is not
        let other = ScopePath::project(ProjectId::new("p2"));
        let err = issuer
            .validate(&token.id, &token.secret, AccessCapability::ViewOnly, &other)
            .unwrap_err();
        assert!(matches!(err, AccessError::ScopeMismatch { .. }));
    }

    #[test]
    fn section_scope_covers_only_that_section() {
        let issuer = ExternalAccessIssuer::default();
        let token = issuer
            .issue(
                AccessScope::Section(SectionId::new("s1")),
                AccessCapability::Review,
                collaborator(),
                7,
            )
            .unwrap();

        assert!(issuer
            .validate(&token.id, &token.secret, AccessCapability::Review, &path())
            .is_ok());

        let sibling = ScopePath::section(
            ProjectId::new("p1"),
            FileId::new("f1"),
            SectionId::new("s2"),
        );
        let err = issuer
            .validate(&token.id, &token.secret, AccessCapability::Review, &sibling)
            .unwrap_err();
        assert!(matches!(err, AccessError::ScopeMismatch { .. }));
    }

    #[test]
    fn capability_is_a_ceiling() {
        let issuer = ExternalAccessIssuer::default();
        let token = issuer
            .issue(
                AccessScope::Project(ProjectId::new("p1")),
                AccessCapability::ViewComment,
                collaborator(),
                7,
            )
            .unwrap();

        assert!(issuer
            .validate(&token.id, &token.secret, AccessCapability::ViewOnly, &path())
            .is_ok());
        let err = issuer
            .validate(&token.id, &token.secret, AccessCapability::Review, &path())
            .unwrap_err();
        assert!(matches!(err, AccessError::InsufficientCapability { .. }));
    }

    #[test]
    fn wrong_secret_is_not_found() {
        let issuer = ExternalAccessIssuer::default();
        let token = issuer
            .issue(
                AccessScope::Project(ProjectId::new("p1")),
                AccessCapability::Review,
                collaborator(),
                7,
            )
            .unwrap();

        let err = issuer
            .validate(&token.id, "not-the-secret", AccessCapability::ViewOnly, &path())
            .unwrap_err();
        assert!(matches!(err, AccessError::TokenNotFound(_)));
    }

    #[test]
    fn access_url_embeds_token_and_secret() {
        let issuer = ExternalAccessIssuer::default();
        let token = issuer
            .issue(
                AccessScope::Project(ProjectId::new("p1")),
                AccessCapability::Review,
                collaborator(),
                7,
            )
            .unwrap();

        let url = access_url("https://vellum.example/", &token);
        assert!(url.starts_with("https://vellum.example/external/"));
        assert!(url.contains(token.id.as_str()));
        assert!(url.ends_with(&token.secret));
    }
}
