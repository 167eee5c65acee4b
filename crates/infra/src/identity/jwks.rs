//! Bearer-token verification against an OpenID Connect key set.
//!
//! The provider's JWKS is cached behind an `Arc` that is swapped whole on
//! refresh, so verifications never observe a half-updated set. A token whose
//! `kid` is not cached triggers one on-demand refresh, at most once per
//! [`MIN_REFRESH_GAP`].

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use natsgate_auth::{IdentityVerifier, TokenError, VerifiedClaims};

use crate::config::OidcConfig;

/// Minimum spacing between two key-set fetches triggered by unknown `kid`s.
pub const MIN_REFRESH_GAP: Duration = Duration::from_secs(10);

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct JwksVerifier {
    client: reqwest::Client,
    jwks_uri: String,
    issuer: Option<String>,
    audience: Option<String>,
    refresh_interval: Duration,
    keys: RwLock<Arc<JwkSet>>,
    /// Time of the last successful fetch; also serializes fetches.
    last_refresh: Mutex<Option<Instant>>,
}

impl JwksVerifier {
    /// Build a verifier with an empty key set. Call [`refresh`](Self::refresh)
    /// or [`spawn_refresh`](Self::spawn_refresh) to load keys.
    pub fn new(config: &OidcConfig) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| TokenError::Unavailable(format!("http client: {e}")))?;

        Ok(Self {
            client,
            jwks_uri: config.jwks_uri.clone(),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            refresh_interval: config.refresh_interval,
            keys: RwLock::new(Arc::new(JwkSet { keys: Vec::new() })),
            last_refresh: Mutex::new(None),
        })
    }

    /// Seed the cache with a known key set.
    pub fn with_keys(self, keys: JwkSet) -> Self {
        Self {
            keys: RwLock::new(Arc::new(keys)),
            ..self
        }
    }

    /// Number of cached keys.
    pub fn key_count(&self) -> usize {
        self.snapshot().map(|set| set.keys.len()).unwrap_or(0)
    }

    /// Fetch the key set and swap it into the cache.
    pub async fn refresh(&self) -> Result<usize, TokenError> {
        let mut last = self.last_refresh.lock().await;
        let count = self.fetch_and_swap().await?;
        *last = Some(Instant::now());
        Ok(count)
    }

    /// Refresh every `refresh_interval`, starting immediately.
    ///
    /// Failures are logged and the previous key set stays in use.
    pub fn spawn_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let verifier = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(verifier.refresh_interval);
            loop {
                ticker.tick().await;
                if let Err(err) = verifier.refresh().await {
                    tracing::warn!(
                        error = %err,
                        jwks_uri = %verifier.jwks_uri,
                        "jwks refresh failed; keeping cached keys"
                    );
                }
            }
        })
    }

    async fn fetch_and_swap(&self) -> Result<usize, TokenError> {
        let set: JwkSet = self
            .client
            .get(&self.jwks_uri)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| TokenError::Unavailable(format!("fetching {}: {e}", self.jwks_uri)))?
            .json()
            .await
            .map_err(|e| TokenError::Unavailable(format!("decoding {}: {e}", self.jwks_uri)))?;

        let count = set.keys.len();
        let mut keys = self
            .keys
            .write()
            .map_err(|_| TokenError::Unavailable("jwks cache lock poisoned".to_string()))?;
        *keys = Arc::new(set);
        drop(keys);

        tracing::info!(keys = count, jwks_uri = %self.jwks_uri, "jwks refreshed");
        Ok(count)
    }

    /// Refresh for an unseen `kid` unless a fetch happened recently.
    ///
    /// Callers queued behind a concurrent fetch skip their own and reuse its
    /// result, so the cache must be consulted again afterwards either way.
    async fn refresh_for_unknown_kid(&self) -> Result<(), TokenError> {
        let mut last = self.last_refresh.lock().await;
        if last.is_some_and(|at| at.elapsed() < MIN_REFRESH_GAP) {
            return Ok(());
        }
        self.fetch_and_swap().await?;
        *last = Some(Instant::now());
        Ok(())
    }

    fn snapshot(&self) -> Result<Arc<JwkSet>, TokenError> {
        self.keys
            .read()
            .map(|keys| Arc::clone(&keys))
            .map_err(|_| TokenError::Unavailable("jwks cache lock poisoned".to_string()))
    }

    /// Key for `kid`; without a `kid` only an unambiguous single key matches.
    fn key_for(&self, kid: Option<&str>) -> Result<Option<Jwk>, TokenError> {
        let set = self.snapshot()?;
        Ok(match kid {
            Some(kid) => set.find(kid).cloned(),
            None if set.keys.len() == 1 => set.keys.first().cloned(),
            None => None,
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_required_spec_claims(&["exp"]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation
    }
}

#[async_trait]
impl IdentityVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(TokenError::Rejected(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }

        let kid = header.kid.as_deref();
        let jwk = match self.key_for(kid)? {
            Some(jwk) => jwk,
            None => {
                self.refresh_for_unknown_kid().await?;
                self.key_for(kid)?.ok_or_else(|| {
                    TokenError::UnknownKeyId(kid.unwrap_or("<none>").to_string())
                })?
            }
        };

        let key = DecodingKey::from_jwk(&jwk).map_err(|e| TokenError::Rejected(e.to_string()))?;
        let data = jsonwebtoken::decode::<Map<String, Value>>(token, &key, &self.validation())
            .map_err(|e| match e.kind() {
                JwtErrorKind::ExpiredSignature => TokenError::Rejected("token expired".to_string()),
                JwtErrorKind::InvalidAudience => {
                    TokenError::Rejected("audience mismatch".to_string())
                }
                JwtErrorKind::InvalidIssuer => TokenError::Rejected("issuer mismatch".to_string()),
                JwtErrorKind::InvalidSignature => TokenError::Rejected("bad signature".to_string()),
                JwtErrorKind::Base64(_) | JwtErrorKind::Json(_) | JwtErrorKind::Utf8(_) => {
                    TokenError::Malformed(e.to_string())
                }
                _ => TokenError::Rejected(e.to_string()),
            })?;

        Ok(VerifiedClaims::new(data.claims))
    }
}
