//! Identity-provider adapters.

pub mod jwks;

pub use jwks::JwksVerifier;
