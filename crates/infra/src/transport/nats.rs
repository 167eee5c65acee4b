//! NATS request/reply loop.
//!
//! One task per inbound message; each task awaits the handler and publishes
//! the returned bytes to the message's reply subject.

use std::future::Future;
use std::sync::Arc;

use async_nats::{Client, ConnectOptions, ServerAddr};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinSet;

use natsgate_auth::Authorizer;

use crate::config::NatsConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("nats connect failed: {0}")]
    Connect(String),

    #[error("subscribe to '{subject}' failed: {reason}")]
    Subscribe { subject: String, reason: String },

    #[error("nats flush failed: {0}")]
    Flush(String),
}

/// Turns one raw request payload into the raw reply payload.
///
/// An empty reply means "no answer"; nothing is published for it.
#[async_trait]
pub trait CalloutHandler: Send + Sync + 'static {
    async fn handle(&self, request: Bytes) -> Vec<u8>;
}

#[async_trait]
impl CalloutHandler for Authorizer {
    async fn handle(&self, request: Bytes) -> Vec<u8> {
        self.authorize(&request).await
    }
}

pub async fn connect(config: &NatsConfig) -> Result<Client, TransportError> {
    let servers = config
        .servers
        .iter()
        .map(|s| s.parse::<ServerAddr>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Connect(format!("invalid server address: {e}")))?;

    let mut options = ConnectOptions::new().name("natsgate");
    if let (Some(user), Some(password)) = (&config.user, &config.password) {
        options = options.user_and_password(user.clone(), password.expose().to_string());
    }

    let client = options
        .connect(servers)
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    tracing::info!(servers = ?config.servers, "connected to nats");
    Ok(client)
}

/// Answer requests on `subject` until the subscription ends or `shutdown`
/// resolves. In-flight requests are finished before returning.
pub async fn serve<S>(
    client: Client,
    subject: &str,
    queue_group: Option<&str>,
    handler: Arc<dyn CalloutHandler>,
    shutdown: S,
) -> Result<(), TransportError>
where
    S: Future<Output = ()>,
{
    let subscribed = match queue_group {
        Some(group) => {
            client
                .queue_subscribe(subject.to_string(), group.to_string())
                .await
        }
        None => client.subscribe(subject.to_string()).await,
    };
    let mut subscription = subscribed.map_err(|e| TransportError::Subscribe {
        subject: subject.to_string(),
        reason: e.to_string(),
    })?;
    tracing::info!(subject, queue_group, "listening for authorization requests");

    let mut in_flight = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown requested; draining in-flight requests");
                break;
            }
            message = subscription.next() => {
                let Some(message) = message else {
                    tracing::warn!(subject, "subscription closed");
                    break;
                };
                let Some(reply) = message.reply.clone() else {
                    tracing::warn!(
                        subject = %message.subject,
                        "dropping request without reply subject"
                    );
                    continue;
                };

                let client = client.clone();
                let handler = Arc::clone(&handler);
                in_flight.spawn(async move {
                    let response = handler.handle(message.payload).await;
                    if response.is_empty() {
                        tracing::error!(
                            reply = %reply,
                            "no response produced; request left unanswered"
                        );
                        return;
                    }
                    if let Err(err) = client.publish(reply, Bytes::from(response)).await {
                        tracing::error!(error = %err, "failed to publish authorization response");
                    }
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                log_join(joined);
            }
        }
    }

    if let Err(err) = subscription.unsubscribe().await {
        tracing::warn!(error = %err, "unsubscribe failed");
    }
    while let Some(joined) = in_flight.join_next().await {
        log_join(joined);
    }

    client
        .flush()
        .await
        .map_err(|e| TransportError::Flush(e.to_string()))
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        tracing::error!(error = %err, "request task failed");
    }
}
