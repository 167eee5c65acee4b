//! natsgate service: wiring of configuration, storage, the identity provider
//! and the authorizer, plus the health endpoint.

pub mod app;
