use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower::ServiceBuilder;

use natsgate_auth::{
    Authorizer, AuthorizerSettings, ClaimsIssuer, CredentialStore, IdentityVerifier,
    IssuerSettings, SigningError, SigningIdentity, StoreError,
};
use natsgate_infra::{AppConfig, InMemoryCredentialStore, PostgresCredentialStore};

/// Postgres when `DATABASE_URL` is set, otherwise an empty in-memory store.
pub async fn build_store(config: &AppConfig) -> Result<Arc<dyn CredentialStore>, StoreError> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresCredentialStore::connect(url.expose()).await?;
            tracing::info!("using postgres credential store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using an empty in-memory credential store");
            Ok(Arc::new(InMemoryCredentialStore::new()))
        }
    }
}

/// Fails when the signing seed does not belong to the configured account.
pub fn build_authorizer(
    config: &AppConfig,
    store: Arc<dyn CredentialStore>,
    verifier: Arc<dyn IdentityVerifier>,
) -> Result<Authorizer, SigningError> {
    let identity = SigningIdentity::from_secrets(
        &config.signing.account_public_key,
        config.signing.seed.expose(),
    )?;
    let issuer = ClaimsIssuer::new(
        Arc::new(identity),
        IssuerSettings {
            deny_catch_all: config.callout.deny_catch_all,
        },
    );
    let settings = AuthorizerSettings {
        deadline: config.callout.timeout,
        identity_claim: config.oidc.identity_claim.clone(),
        verify_request_signature: config.callout.verify_request_signature,
    };

    Ok(Authorizer::new(store, verifier, issuer, settings))
}

pub fn build_router() -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .layer(ServiceBuilder::new())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
