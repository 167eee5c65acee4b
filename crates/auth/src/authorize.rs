//! Authorization orchestrator for the NATS auth callout.
//!
//! Every call ends in exactly one signed response envelope. Failures of any
//! kind, including deadline expiry and panics in an adapter, become error
//! envelopes; nothing escapes `authorize`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tracing::Instrument;

use natsgate_core::{AuthenticationFailure, CalloutError, CalloutResult, ErrorKind, UserId};

use crate::acl::{AccessControlList, translate};
use crate::claims::{AuthorizationRequest, AuthorizationRequestClaims};
use crate::issuer::ClaimsIssuer;
use crate::jwt;
use crate::ports::{CredentialStore, IdentityVerifier};
use crate::principal::{CredentialPath, Identity};
use crate::resolve::PermissionResolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizerSettings {
    /// Budget for credential store and identity provider round trips.
    pub deadline: Duration,

    /// Token claim holding the stable user identifier.
    pub identity_claim: String,

    /// Verify that the request was signed by a server nkey and is unexpired.
    pub verify_request_signature: bool,
}

impl Default for AuthorizerSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(2),
            identity_claim: "user_id".to_string(),
            verify_request_signature: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Granted {
        identity: Identity,
        /// Signed user credential scoped to `acl`.
        user_jwt: String,
        acl: AccessControlList,
    },
    Denied(CalloutError),
}

impl AuthorizationOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, AuthorizationOutcome::Granted { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            AuthorizationOutcome::Granted { .. } => None,
            AuthorizationOutcome::Denied(err) => Some(err.kind()),
        }
    }
}

/// Outcome of one request together with the addressing of its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub server_id: String,
    pub user_nkey: String,
    pub outcome: AuthorizationOutcome,
}

/// Decides auth-callout requests.
///
/// Holds no per-call state; one instance serves any number of concurrent
/// calls.
pub struct Authorizer {
    store: Arc<dyn CredentialStore>,
    verifier: Arc<dyn IdentityVerifier>,
    resolver: PermissionResolver,
    issuer: ClaimsIssuer,
    settings: AuthorizerSettings,
}

impl Authorizer {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        verifier: Arc<dyn IdentityVerifier>,
        issuer: ClaimsIssuer,
        settings: AuthorizerSettings,
    ) -> Self {
        Self {
            resolver: PermissionResolver::new(store.clone()),
            store,
            verifier,
            issuer,
            settings,
        }
    }

    /// Decide `raw` and return the signed response envelope.
    pub async fn authorize(&self, raw: &[u8]) -> Vec<u8> {
        self.authorize_within(raw, self.settings.deadline).await
    }

    pub async fn authorize_within(&self, raw: &[u8], deadline: Duration) -> Vec<u8> {
        let decision = self.decide_within(raw, deadline).await;
        self.seal(&decision)
    }

    pub async fn decide(&self, raw: &[u8]) -> Decision {
        self.decide_within(raw, self.settings.deadline).await
    }

    /// Decide `raw` without building the outer envelope.
    pub async fn decide_within(&self, raw: &[u8], deadline: Duration) -> Decision {
        let request = match self.decode_request(raw) {
            Ok(request) => request,
            Err(err) => {
                tracing::info!(error = %err, "rejecting undecodable authorization request");
                return Decision {
                    server_id: String::new(),
                    user_nkey: String::new(),
                    outcome: AuthorizationOutcome::Denied(err),
                };
            }
        };

        let server_id = request.server_id().to_string();
        let user_nkey = request.user_nkey().to_string();
        let span = tracing::info_span!(
            "authorize",
            server_id = %server_id,
            user_nkey = %user_nkey,
            path = tracing::field::Empty,
        );

        let outcome = async {
            let admitted = AssertUnwindSafe(tokio::time::timeout(deadline, self.admit(&request)))
                .catch_unwind()
                .await;
            let admitted = match admitted {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(CalloutError::upstream(format!(
                    "no answer from upstream within {deadline:?}"
                ))),
                Err(_) => Err(CalloutError::upstream("authorization task panicked")),
            };

            let outcome = match admitted.and_then(|(identity, acl)| {
                let user_jwt =
                    self.issuer
                        .issue_user(&user_nkey, identity.user_id.as_str(), &acl, now())?;
                Ok(AuthorizationOutcome::Granted {
                    identity,
                    user_jwt,
                    acl,
                })
            }) {
                Ok(granted) => granted,
                Err(err) => AuthorizationOutcome::Denied(err),
            };
            log_outcome(&outcome);
            outcome
        }
        .instrument(span)
        .await;

        Decision {
            server_id,
            user_nkey,
            outcome,
        }
    }

    /// Wrap a decision into the signed envelope sent back to the server.
    ///
    /// Falls back to an error envelope when the success envelope cannot be
    /// signed, and to an empty reply only if even that fails.
    pub fn seal(&self, decision: &Decision) -> Vec<u8> {
        let now = now();
        let sealed = match &decision.outcome {
            AuthorizationOutcome::Granted { user_jwt, .. } => self.issuer.issue_grant(
                &decision.server_id,
                &decision.user_nkey,
                user_jwt.clone(),
                now,
            ),
            AuthorizationOutcome::Denied(err) => self.issuer.issue_denial(
                &decision.server_id,
                &decision.user_nkey,
                err.public_message(),
                now,
            ),
        };

        let sealed = sealed.or_else(|err| {
            tracing::error!(error = %err, "failed to sign authorization response");
            self.issuer.issue_denial(
                &decision.server_id,
                &decision.user_nkey,
                err.public_message(),
                now,
            )
        });

        match sealed {
            Ok(token) => token.into_bytes(),
            Err(err) => {
                tracing::error!(error = %err, "unable to sign error envelope; replying empty");
                Vec::new()
            }
        }
    }

    fn decode_request(&self, raw: &[u8]) -> CalloutResult<AuthorizationRequest> {
        let token = std::str::from_utf8(raw)
            .map_err(|_| CalloutError::decode("request is not valid utf-8"))?;

        let claims: AuthorizationRequestClaims = if self.settings.verify_request_signature {
            let claims: AuthorizationRequestClaims = jwt::decode_verified(token, None, now())
                .map_err(|e| CalloutError::decode(e.to_string()))?;
            if !claims.iss.starts_with('N') {
                return Err(CalloutError::decode(format!(
                    "request issuer '{}' is not a server key",
                    claims.iss
                )));
            }
            claims
        } else {
            jwt::decode_unverified(token).map_err(|e| CalloutError::decode(e.to_string()))?
        };

        Ok(claims.nats)
    }

    async fn admit(
        &self,
        request: &AuthorizationRequest,
    ) -> CalloutResult<(Identity, AccessControlList)> {
        let identity = if let Some((login, password)) = request.password_credentials() {
            tracing::Span::current().record("path", CredentialPath::Password.as_str());
            self.authenticate_password(login, password).await?
        } else if let Some(token) = request.bearer_token() {
            tracing::Span::current().record("path", CredentialPath::Token.as_str());
            self.authenticate_token(token).await?
        } else {
            return Err(AuthenticationFailure::MissingCredentials.into());
        };

        let effective = self.resolver.resolve(&identity.user_id).await?;
        if effective.is_empty() {
            return Err(CalloutError::no_permissions());
        }

        Ok((identity, translate(&effective)))
    }

    async fn authenticate_password(&self, login: &str, password: &str) -> CalloutResult<Identity> {
        let stored = self
            .store
            .find_by_login(login)
            .await?
            .ok_or(AuthenticationFailure::UnknownLogin)?;

        let hash = stored
            .password_hash
            .filter(|h| !h.trim().is_empty())
            .ok_or(AuthenticationFailure::MissingStoredHash)?;

        let password = password.to_owned();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| CalloutError::upstream(format!("password check aborted: {e}")))?
            .map_err(|e| AuthenticationFailure::UnreadableHash(e.to_string()))?;

        if !matches {
            return Err(AuthenticationFailure::PasswordMismatch.into());
        }

        Ok(Identity {
            user_id: stored.user_id,
            path: CredentialPath::Password,
        })
    }

    async fn authenticate_token(&self, token: &str) -> CalloutResult<Identity> {
        let claims = self.verifier.verify(token).await?;

        let user_id = claims
            .text(&self.settings.identity_claim)
            .and_then(|raw| UserId::parse(raw).ok())
            .ok_or(AuthenticationFailure::NoIdentityInToken)?;

        Ok(Identity {
            user_id,
            path: CredentialPath::Token,
        })
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

fn log_outcome(outcome: &AuthorizationOutcome) {
    match outcome {
        AuthorizationOutcome::Granted { identity, acl, .. } => tracing::info!(
            user_id = %identity.user_id,
            path = identity.path.as_str(),
            publish = acl.publish_allow.len(),
            subscribe = acl.subscribe_allow.len(),
            "authorization granted"
        ),
        AuthorizationOutcome::Denied(err) => match err.kind() {
            ErrorKind::Upstream | ErrorKind::Signing => {
                tracing::error!(kind = %err.kind(), error = %err, "authorization failed")
            }
            _ => tracing::info!(kind = %err.kind(), reason = %err, "authorization denied"),
        },
    }
}
