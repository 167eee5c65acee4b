//! Issues the user credential and the response envelope.

use std::sync::Arc;

use natsgate_core::{CalloutError, CalloutResult};

use crate::acl::AccessControlList;
use crate::claims::{
    AuthorizationResponse, NatsClaims, SubjectPermission, USER_CLAIM_TYPE, UserPermissions,
};
use crate::jwt;
use crate::signing::SigningIdentity;

/// Audience of the nested user credential.
pub const USER_AUDIENCE: &str = "AUTH";

/// The user credential is a bootstrap token the server exchanges right away.
pub const USER_TTL_SECS: i64 = 30;

pub const ENVELOPE_TTL_SECS: i64 = 3600;

/// Maximum message payload granted to callout-authorized users (1 MiB).
pub const PAYLOAD_LIMIT: i64 = 1024 * 1024;

const UNLIMITED: i64 = -1;
const ALL_SUBJECTS: &str = ">";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerSettings {
    /// Attach `deny: [">"]` to both permission blocks.
    pub deny_catch_all: bool,
}

impl Default for IssuerSettings {
    fn default() -> Self {
        Self {
            deny_catch_all: true,
        }
    }
}

/// Builds and signs the artifacts returned to the NATS server.
#[derive(Debug, Clone)]
pub struct ClaimsIssuer {
    identity: Arc<SigningIdentity>,
    settings: IssuerSettings,
}

impl ClaimsIssuer {
    pub fn new(identity: Arc<SigningIdentity>, settings: IssuerSettings) -> Self {
        Self { identity, settings }
    }

    pub fn account_public_key(&self) -> &str {
        self.identity.public_key()
    }

    /// Unsigned user credential claims scoped to `acl`.
    pub fn user_claims(
        &self,
        user_nkey: &str,
        name: &str,
        acl: &AccessControlList,
        now: i64,
    ) -> NatsClaims<UserPermissions> {
        NatsClaims {
            jti: correlation_id(),
            iat: now,
            exp: Some(now + USER_TTL_SECS),
            iss: self.identity.public_key().to_string(),
            sub: user_nkey.to_string(),
            name: name.to_string(),
            aud: USER_AUDIENCE.to_string(),
            nats: UserPermissions {
                publish: self.subject_permission(&acl.publish_allow),
                subscribe: self.subject_permission(&acl.subscribe_allow),
                subs: UNLIMITED,
                data: UNLIMITED,
                payload: PAYLOAD_LIMIT,
                kind: USER_CLAIM_TYPE.to_string(),
                version: 2,
            },
        }
    }

    /// Signed user credential (type `user`) scoped to `acl`.
    pub fn issue_user(
        &self,
        user_nkey: &str,
        name: &str,
        acl: &AccessControlList,
        now: i64,
    ) -> CalloutResult<String> {
        let claims = self.user_claims(user_nkey, name, acl, now);
        jwt::encode(&claims, &self.identity).map_err(|e| CalloutError::signing(e.to_string()))
    }

    /// Signed success envelope carrying the user credential.
    pub fn issue_grant(
        &self,
        server_id: &str,
        user_nkey: &str,
        user_jwt: String,
        now: i64,
    ) -> CalloutResult<String> {
        self.envelope(
            "authorization_response",
            server_id,
            user_nkey,
            AuthorizationResponse::granted(user_jwt),
            now,
        )
    }

    /// Signed error envelope carrying `message`.
    pub fn issue_denial(
        &self,
        server_id: &str,
        user_nkey: &str,
        message: &str,
        now: i64,
    ) -> CalloutResult<String> {
        self.envelope(
            "error_response",
            server_id,
            user_nkey,
            AuthorizationResponse::denied(message),
            now,
        )
    }

    fn envelope(
        &self,
        name: &str,
        server_id: &str,
        user_nkey: &str,
        body: AuthorizationResponse,
        now: i64,
    ) -> CalloutResult<String> {
        let claims = NatsClaims {
            jti: correlation_id(),
            iat: now,
            exp: Some(now + ENVELOPE_TTL_SECS),
            iss: self.identity.public_key().to_string(),
            sub: user_nkey.to_string(),
            name: name.to_string(),
            aud: server_id.to_string(),
            nats: body,
        };
        jwt::encode(&claims, &self.identity).map_err(|e| CalloutError::signing(e.to_string()))
    }

    fn subject_permission(&self, allow: &[String]) -> SubjectPermission {
        // An empty allow-list without a deny would leave the client unrestricted.
        let deny = if self.settings.deny_catch_all || allow.is_empty() {
            vec![ALL_SUBJECTS.to_string()]
        } else {
            Vec::new()
        };
        SubjectPermission {
            allow: allow.to_vec(),
            deny,
        }
    }
}

fn correlation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
