//! Outbound ports: the credential store and the identity-provider verifier.
//!
//! Both are external collaborators; adapters live in `natsgate-infra`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use natsgate_core::{AuthenticationFailure, CalloutError, GroupId, UserId};

use crate::{Permission, StoredIdentity};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected record shape: {0}")]
    Corrupt(String),
}

impl From<StoreError> for CalloutError {
    fn from(value: StoreError) -> Self {
        CalloutError::Upstream(value.to_string())
    }
}

/// Read side of the credential store, as consumed by the authorization path.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_login(&self, login: &str) -> Result<Option<StoredIdentity>, StoreError>;

    /// Individually granted permissions of a user.
    async fn permissions_for(&self, user_id: &UserId) -> Result<Vec<Permission>, StoreError>;

    /// Groups the user belongs to, in membership order.
    async fn groups_for(&self, user_id: &UserId) -> Result<Vec<GroupId>, StoreError>;

    /// Permission sets of the given groups, one entry per known group.
    async fn permissions_for_groups(
        &self,
        group_ids: &[GroupId],
    ) -> Result<Vec<Vec<Permission>>, StoreError>;
}

/// Write side of the credential store. Never used while authorizing.
#[async_trait]
pub trait CredentialAdmin: Send + Sync {
    /// Register a login record, replacing any previous login of the user.
    async fn register_login(
        &self,
        user_id: &UserId,
        login: &str,
        password_hash: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Replace the individual permissions of a user.
    async fn set_user_permissions(
        &self,
        user_id: &UserId,
        permissions: &[Permission],
    ) -> Result<(), StoreError>;

    /// Replace the permissions granted by a group.
    async fn set_group_permissions(
        &self,
        group_id: &GroupId,
        permissions: &[Permission],
    ) -> Result<(), StoreError>;

    async fn add_user_to_group(
        &self,
        user_id: &UserId,
        group_id: &GroupId,
    ) -> Result<(), StoreError>;

    async fn remove_user_from_group(
        &self,
        user_id: &UserId,
        group_id: &GroupId,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("signing key '{0}' is not in the provider key set")]
    UnknownKeyId(String),

    #[error("token verification failed: {0}")]
    Rejected(String),

    /// The provider key set could not be fetched.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

impl From<TokenError> for CalloutError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::Unavailable(msg) => CalloutError::Upstream(msg),
            other => AuthenticationFailure::InvalidToken(other.to_string()).into(),
        }
    }
}

/// Claims of a bearer token whose signature and expiry were verified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifiedClaims(Map<String, Value>);

impl VerifiedClaims {
    pub fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// Non-blank string value of a claim.
    pub fn text(&self, claim: &str) -> Option<&str> {
        self.0
            .get(claim)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Verifies externally issued bearer tokens.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedClaims, TokenError>;
}
