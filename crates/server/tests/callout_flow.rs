use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use nkeys::KeyPair;
use serde_json::{Value, json};

use natsgate_auth::claims::{AuthorizationResponse, NatsClaims, UserPermissions};
use natsgate_auth::jwt;
use natsgate_auth::{
    Authorizer, CredentialAdmin, CredentialStore, IdentityVerifier, Permission, StoreError,
    StoredIdentity, TokenError, VerifiedClaims,
};
use natsgate_core::{GroupId, UserId};
use natsgate_infra::{AppConfig, InMemoryCredentialStore};
use natsgate_server::app;

const PASSWORD: &str = "s3cret-pass";

struct Fixture {
    account: KeyPair,
    store: Arc<InMemoryCredentialStore>,
    authorizer: Authorizer,
}

/// Token verifier that knows a fixed set of already-"verified" tokens.
struct StaticVerifier(HashMap<&'static str, Value>);

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        match self.0.get(token) {
            Some(Value::Object(claims)) => Ok(VerifiedClaims::new(claims.clone())),
            _ => Err(TokenError::Rejected("bad signature".to_string())),
        }
    }
}

/// Store whose backend is down.
struct DownStore;

#[async_trait]
impl CredentialStore for DownStore {
    async fn find_by_login(&self, _login: &str) -> Result<Option<StoredIdentity>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn permissions_for(&self, _user_id: &UserId) -> Result<Vec<Permission>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn groups_for(&self, _user_id: &UserId) -> Result<Vec<GroupId>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn permissions_for_groups(
        &self,
        _group_ids: &[GroupId],
    ) -> Result<Vec<Vec<Permission>>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

fn config(account: &KeyPair, overrides: &[(&'static str, &'static str)]) -> AppConfig {
    let mut vars: HashMap<&str, String> = HashMap::from([
        ("NATS_ACCOUNT_PUBLIC_KEY", account.public_key()),
        ("NATS_AUTH_NKEY_SEED", account.seed().unwrap()),
        ("OIDC_JWKS_URI", "http://127.0.0.1:9/certs".to_string()),
    ]);
    for (k, v) in overrides {
        vars.insert(k, v.to_string());
    }
    AppConfig::from_lookup(|k| vars.get(k).cloned()).unwrap()
}

fn verifier() -> Arc<StaticVerifier> {
    Arc::new(StaticVerifier(HashMap::from([
        ("token-kc-42", json!({ "user_id": "kc-42", "sub": "f00" })),
        ("token-no-identity", json!({ "sub": "f00" })),
    ])))
}

fn uid(raw: &str) -> UserId {
    UserId::parse(raw).unwrap()
}

fn gid(raw: &str) -> GroupId {
    GroupId::parse(raw).unwrap()
}

async fn fixture_with(overrides: &[(&'static str, &'static str)]) -> Fixture {
    let account = KeyPair::new_account();
    let store = Arc::new(InMemoryCredentialStore::new());
    let hash = bcrypt::hash(PASSWORD, 4).unwrap();

    store.insert_user(uid("u-1"), "alice", Some(hash.clone())).unwrap();
    store
        .set_user_permissions(
            &uid("u-1"),
            &[Permission::new("publish:a.b"), Permission::new("subscribe:c.>")],
        )
        .await
        .unwrap();

    store.insert_user(uid("u-2"), "bob", Some(hash)).unwrap();

    store
        .set_user_permissions(&uid("kc-42"), &[Permission::new("publish:orders.new")])
        .await
        .unwrap();
    store
        .set_group_permissions(
            &gid("readers"),
            &[Permission::new("subscribe:orders.>"), Permission::new("publish:orders.new")],
        )
        .await
        .unwrap();
    store.add_user_to_group(&uid("kc-42"), &gid("readers")).await.unwrap();

    let cfg = config(&account, overrides);
    let authorizer = app::build_authorizer(&cfg, store.clone(), verifier()).unwrap();

    Fixture {
        account,
        store,
        authorizer,
    }
}

async fn fixture() -> Fixture {
    fixture_with(&[]).await
}

fn request(user_nkey: &str, connect_opts: Value) -> Vec<u8> {
    let claims = json!({
        "iss": "NSERVERKEY",
        "nats": {
            "server_id": { "id": "NSRV1", "name": "nats-1" },
            "user_nkey": user_nkey,
            "connect_opts": connect_opts,
            "type": "authorization_request",
            "version": 2
        }
    });
    format!(
        "{}.{}.c2ln",
        URL_SAFE_NO_PAD.encode(r#"{"typ":"JWT","alg":"ed25519-nkey"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
    .into_bytes()
}

fn password(user: &str, pass: &str) -> Value {
    json!({ "user": user, "pass": pass })
}

fn token(auth_token: &str) -> Value {
    json!({ "auth_token": auth_token })
}

fn open_envelope(fx: &Fixture, raw: &[u8]) -> NatsClaims<AuthorizationResponse> {
    jwt::decode_verified(
        std::str::from_utf8(raw).unwrap(),
        Some(&fx.account.public_key()),
        Utc::now().timestamp(),
    )
    .unwrap()
}

fn open_user(
    fx: &Fixture,
    envelope: &NatsClaims<AuthorizationResponse>,
) -> NatsClaims<UserPermissions> {
    let user_jwt = envelope.nats.jwt.as_deref().expect("envelope carries no user jwt");
    jwt::decode_verified(user_jwt, Some(&fx.account.public_key()), Utc::now().timestamp()).unwrap()
}

#[tokio::test]
async fn password_grant_translates_permissions_into_subject_lists() {
    let fx = fixture().await;
    let nkey = KeyPair::new_user().public_key();

    let raw = fx.authorizer.authorize(&request(&nkey, password("alice", PASSWORD))).await;
    let envelope = open_envelope(&fx, &raw);

    assert_eq!(envelope.aud, "NSRV1");
    assert_eq!(envelope.sub, nkey);
    assert_eq!(envelope.name, "authorization_response");
    assert_eq!(envelope.nats.kind, "authorization_response");
    assert_eq!(envelope.nats.version, 1);
    assert_eq!(envelope.nats.error, None);

    let user = open_user(&fx, &envelope);
    assert_eq!(user.sub, nkey);
    assert_eq!(user.aud, "AUTH");
    assert_eq!(user.name, "u-1");
    assert_eq!(user.exp.unwrap() - user.iat, 30);
    assert_eq!(user.nats.publish.allow, vec!["a.b"]);
    assert_eq!(user.nats.subscribe.allow, vec!["c.>"]);
    assert_eq!(user.nats.publish.deny, vec![">"]);
    assert_eq!(user.nats.subscribe.deny, vec![">"]);
    assert_eq!(user.nats.subs, -1);
    assert_eq!(user.nats.data, -1);
    assert_eq!(user.nats.payload, 1024 * 1024);
    assert_eq!(user.nats.kind, "user");
    assert_eq!(user.nats.version, 2);
}

#[tokio::test]
async fn catch_all_deny_can_be_disabled_but_not_for_empty_lists() {
    let fx = fixture_with(&[("USER_DENY_CATCH_ALL", "false")]).await;
    let nkey = KeyPair::new_user().public_key();
    fx.store
        .set_user_permissions(&uid("u-1"), &[Permission::new("publish:a.b")])
        .await
        .unwrap();

    let raw = fx.authorizer.authorize(&request(&nkey, password("alice", PASSWORD))).await;
    let user = open_user(&fx, &open_envelope(&fx, &raw));

    assert_eq!(user.nats.publish.allow, vec!["a.b"]);
    assert!(user.nats.publish.deny.is_empty());
    assert!(user.nats.subscribe.allow.is_empty());
    assert_eq!(user.nats.subscribe.deny, vec![">"]);
}

#[tokio::test]
async fn wrong_password_yields_invalid_credentials() {
    let fx = fixture().await;
    let nkey = KeyPair::new_user().public_key();

    for (login, pass) in [("alice", "nope"), ("mallory", PASSWORD)] {
        let raw = fx.authorizer.authorize(&request(&nkey, password(login, pass))).await;
        let envelope = open_envelope(&fx, &raw);
        assert_eq!(envelope.name, "error_response");
        assert_eq!(envelope.nats.jwt, None);
        assert_eq!(envelope.nats.error.as_deref(), Some("invalid credentials"));
        assert_eq!(envelope.aud, "NSRV1");
        assert_eq!(envelope.sub, nkey);
    }
}

#[tokio::test]
async fn authenticated_user_without_permissions_is_refused() {
    let fx = fixture().await;
    let raw = fx
        .authorizer
        .authorize(&request("UBOB", password("bob", PASSWORD)))
        .await;
    let envelope = open_envelope(&fx, &raw);
    assert_eq!(envelope.nats.error.as_deref(), Some("no permissions assigned"));
}

#[tokio::test]
async fn token_grant_merges_individual_and_group_permissions() {
    let fx = fixture().await;
    let raw = fx.authorizer.authorize(&request("UKC", token("token-kc-42"))).await;
    let user = open_user(&fx, &open_envelope(&fx, &raw));

    assert_eq!(user.name, "kc-42");
    assert_eq!(user.nats.publish.allow, vec!["orders.new"]);
    assert_eq!(user.nats.subscribe.allow, vec!["orders.>"]);
}

#[tokio::test]
async fn token_failures_are_reported_by_category() {
    let fx = fixture().await;

    let raw = fx.authorizer.authorize(&request("UX", token("token-no-identity"))).await;
    assert_eq!(
        open_envelope(&fx, &raw).nats.error.as_deref(),
        Some("no identity in token")
    );

    let raw = fx.authorizer.authorize(&request("UX", token("forged"))).await;
    assert_eq!(open_envelope(&fx, &raw).nats.error.as_deref(), Some("invalid token"));

    let raw = fx.authorizer.authorize(&request("UX", json!({}))).await;
    assert_eq!(
        open_envelope(&fx, &raw).nats.error.as_deref(),
        Some("missing credentials")
    );
}

#[tokio::test]
async fn undecodable_request_still_gets_a_signed_answer() {
    let fx = fixture().await;
    for raw in [&b""[..], b"garbage", b"x.y"] {
        let envelope = open_envelope(&fx, &fx.authorizer.authorize(raw).await);
        assert_eq!(envelope.nats.error.as_deref(), Some("malformed request"));
    }
}

#[tokio::test]
async fn store_outage_is_an_internal_error() {
    let account = KeyPair::new_account();
    let cfg = config(&account, &[]);
    let authorizer = app::build_authorizer(&cfg, Arc::new(DownStore), verifier()).unwrap();
    let fx = Fixture {
        account,
        store: Arc::new(InMemoryCredentialStore::new()),
        authorizer,
    };

    let raw = fx
        .authorizer
        .authorize(&request("UA", password("alice", PASSWORD)))
        .await;
    assert_eq!(open_envelope(&fx, &raw).nats.error.as_deref(), Some("internal error"));
}

#[tokio::test]
async fn repeated_requests_grant_the_same_permissions() {
    let fx = fixture().await;
    let req = request("UREPEAT", token("token-kc-42"));

    let first = open_envelope(&fx, &fx.authorizer.authorize(&req).await);
    let second = open_envelope(&fx, &fx.authorizer.authorize(&req).await);
    let (u1, u2) = (open_user(&fx, &first), open_user(&fx, &second));

    assert_eq!(u1.nats, u2.nats);
    assert_eq!(u1.sub, u2.sub);
    assert_ne!(first.jti, second.jti);
}

#[tokio::test]
async fn concurrent_requests_keep_identities_apart() {
    let fx = Arc::new(fixture().await);
    for i in 0..32 {
        let user = uid(&format!("u-load-{i}"));
        fx.store
            .insert_user(
                user.clone(),
                format!("load{i}"),
                Some(bcrypt::hash(PASSWORD, 4).unwrap()),
            )
            .unwrap();
        fx.store
            .set_user_permissions(&user, &[Permission::publish(&format!("load.{i}"))])
            .await
            .unwrap();
    }

    let calls = (0..32).map(|i| {
        let fx = Arc::clone(&fx);
        tokio::spawn(async move {
            let nkey = KeyPair::new_user().public_key();
            let raw = fx
                .authorizer
                .authorize(&request(&nkey, password(&format!("load{i}"), PASSWORD)))
                .await;
            (i, nkey, raw)
        })
    });

    for joined in futures::future::join_all(calls).await {
        let (i, nkey, raw) = joined.unwrap();
        let envelope = open_envelope(&fx, &raw);
        let user = open_user(&fx, &envelope);
        assert_eq!(envelope.sub, nkey);
        assert_eq!(user.sub, nkey);
        assert_eq!(user.name, format!("u-load-{i}"));
        assert_eq!(user.nats.publish.allow, vec![format!("load.{i}")]);
    }
}

#[tokio::test]
async fn mismatched_seed_is_rejected_at_startup() {
    let account = KeyPair::new_account();
    let other = KeyPair::new_account();
    let mut cfg = config(&account, &[]);
    cfg.signing.account_public_key = other.public_key();

    assert!(app::build_authorizer(&cfg, Arc::new(DownStore), verifier()).is_err());
}

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app::build_router()).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let server = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/api/v1/health", server.base_url))
        .await
        .unwrap();

    assert_eq!(res.status(), reqwest::StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}
