//! `natsgate-core`: identifiers and the error taxonomy shared by every layer.
//!
//! This crate performs no I/O.

pub mod error;
pub mod id;

pub use error::{AuthenticationFailure, CalloutError, CalloutResult, ErrorKind};
pub use id::{GroupId, UserId};
