//! Credential store adapters.
//!
//! Both adapters implement the read side consumed while authorizing and the
//! administrative write side used by tooling and tests.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryCredentialStore;
pub use postgres::PostgresCredentialStore;
