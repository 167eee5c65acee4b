//! `natsgate-auth`: the auth-callout decision core.
//!
//! Decodes a NATS authorization request, authenticates the client by
//! password or bearer token, resolves its permissions and answers with a
//! signed credential. Storage and the identity provider are reached through
//! the traits in [`ports`]; this crate has no transport.

pub mod acl;
pub mod authorize;
pub mod claims;
pub mod issuer;
pub mod jwt;
pub mod permissions;
pub mod ports;
pub mod principal;
pub mod resolve;
pub mod signing;

pub use acl::{AccessControlList, translate};
pub use authorize::{AuthorizationOutcome, Authorizer, AuthorizerSettings, Decision};
pub use issuer::{ClaimsIssuer, IssuerSettings};
pub use permissions::{Action, Permission};
pub use ports::{
    CredentialAdmin, CredentialStore, IdentityVerifier, StoreError, TokenError, VerifiedClaims,
};
pub use principal::{CredentialPath, Identity, StoredIdentity};
pub use resolve::{EffectivePermissions, PermissionResolver, merge_permissions};
pub use signing::{SigningError, SigningIdentity};
