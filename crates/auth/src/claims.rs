//! NATS claim structures exchanged with the server during auth callout.

use serde::{Deserialize, Serialize};

pub const AUTHORIZATION_RESPONSE_TYPE: &str = "authorization_response";
pub const USER_CLAIM_TYPE: &str = "user";

/// Registered claims shared by every NATS JWT, with a type-specific `nats`
/// section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NatsClaims<T> {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jti: String,

    #[serde(default)]
    pub iat: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    #[serde(default)]
    pub iss: String,

    #[serde(default)]
    pub sub: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aud: String,

    pub nats: T,
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound request
// ─────────────────────────────────────────────────────────────────────────────

/// Claims of the inbound authorization request.
///
/// Every field is optional on the wire: absent pieces decode to their
/// defaults so the orchestrator can decide what is missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequestClaims {
    #[serde(default)]
    pub iss: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    #[serde(default)]
    pub nats: AuthorizationRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<ServerId>,

    #[serde(default)]
    pub user_nkey: Option<String>,

    #[serde(default)]
    pub connect_opts: Option<ConnectOptions>,

    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default)]
    pub version: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerId {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Options the client sent in its CONNECT.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl core::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("user", &self.user)
            .field("pass", &self.pass.as_ref().map(|_| "<redacted>"))
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl AuthorizationRequest {
    /// Server identity, used as the response audience. Empty when absent.
    pub fn server_id(&self) -> &str {
        self.server_id
            .as_ref()
            .and_then(|s| s.id.as_deref())
            .unwrap_or_default()
    }

    /// Public nkey of the connecting client. Empty when absent.
    pub fn user_nkey(&self) -> &str {
        self.user_nkey.as_deref().unwrap_or_default()
    }

    /// Login and password, when both are present and non-empty.
    pub fn password_credentials(&self) -> Option<(&str, &str)> {
        let opts = self.connect_opts.as_ref()?;
        Some((non_empty(&opts.user)?, non_empty(&opts.pass)?))
    }

    pub fn bearer_token(&self) -> Option<&str> {
        non_empty(&self.connect_opts.as_ref()?.auth_token)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User credential
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPermission {
    #[serde(default)]
    pub allow: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,
}

/// `nats` section of a user JWT (type `user`, version 2, flattened limits).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPermissions {
    #[serde(rename = "pub")]
    pub publish: SubjectPermission,

    #[serde(rename = "sub")]
    pub subscribe: SubjectPermission,

    /// Maximum subscriptions, `-1` for unlimited.
    pub subs: i64,

    /// Maximum bytes in flight, `-1` for unlimited.
    pub data: i64,

    /// Maximum message payload in bytes.
    pub payload: i64,

    #[serde(rename = "type")]
    pub kind: String,

    pub version: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Response envelope
// ─────────────────────────────────────────────────────────────────────────────

/// `nats` section of the authorization response.
///
/// Exactly one of `jwt` and `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(rename = "type")]
    pub kind: String,

    pub version: u32,
}

impl AuthorizationResponse {
    pub fn granted(user_jwt: String) -> Self {
        Self {
            jwt: Some(user_jwt),
            error: None,
            kind: AUTHORIZATION_RESPONSE_TYPE.to_string(),
            version: 1,
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            jwt: None,
            error: Some(message.into()),
            kind: AUTHORIZATION_RESPONSE_TYPE.to_string(),
            version: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_decodes_from_server_payload() {
        let claims: AuthorizationRequestClaims = serde_json::from_value(json!({
            "iss": "NSERVER",
            "nats": {
                "server_id": { "id": "NSRV1", "name": "n1", "host": "0.0.0.0" },
                "user_nkey": "UCLIENT",
                "client_info": { "host": "10.1.1.1", "kind": "Client" },
                "connect_opts": { "user": "alice", "pass": "s3cret", "lang": "go" },
                "type": "authorization_request",
                "version": 2
            }
        }))
        .unwrap();

        assert_eq!(claims.nats.server_id(), "NSRV1");
        assert_eq!(claims.nats.user_nkey(), "UCLIENT");
        assert_eq!(claims.nats.password_credentials(), Some(("alice", "s3cret")));
        assert_eq!(claims.nats.bearer_token(), None);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let claims: AuthorizationRequestClaims =
            serde_json::from_value(json!({ "nats": { "server_id": null } })).unwrap();
        assert_eq!(claims.nats.server_id(), "");
        assert_eq!(claims.nats.user_nkey(), "");
        assert_eq!(claims.nats.password_credentials(), None);

        let claims: AuthorizationRequestClaims = serde_json::from_value(json!({})).unwrap();
        assert_eq!(claims.nats, AuthorizationRequest::default());
    }

    #[test]
    fn empty_credentials_count_as_absent() {
        let request = AuthorizationRequest {
            connect_opts: Some(ConnectOptions {
                user: Some("alice".into()),
                pass: Some(String::new()),
                auth_token: Some(String::new()),
            }),
            ..Default::default()
        };
        assert_eq!(request.password_credentials(), None);
        assert_eq!(request.bearer_token(), None);
    }

    #[test]
    fn connect_options_debug_redacts_secrets() {
        let opts = ConnectOptions {
            user: Some("alice".into()),
            pass: Some("hunter2".into()),
            auth_token: Some("eyJ...".into()),
        };
        let rendered = format!("{opts:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("eyJ"));
    }

    #[test]
    fn response_serializes_only_the_populated_body() {
        let value = serde_json::to_value(AuthorizationResponse::denied("invalid token")).unwrap();
        assert_eq!(
            value,
            json!({ "error": "invalid token", "type": "authorization_response", "version": 1 })
        );
    }
}
