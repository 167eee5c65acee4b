//! Message transport for auth-callout requests.

pub mod nats;

pub use nats::{CalloutHandler, TransportError, connect, serve};
