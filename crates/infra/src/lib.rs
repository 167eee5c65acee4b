//! Infrastructure layer: configuration, credential storage, the identity
//! provider client and the NATS transport.

pub mod config;
pub mod credential_store;
pub mod identity;
pub mod transport;

pub use config::{AppConfig, ConfigError, Secret};
pub use credential_store::{InMemoryCredentialStore, PostgresCredentialStore};
pub use identity::JwksVerifier;
