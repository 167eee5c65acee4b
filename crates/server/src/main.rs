use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use natsgate_infra::{AppConfig, JwksVerifier, transport};
use natsgate_server::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    natsgate_observability::init(config.log_format);

    if !config.callout.verify_request_signature {
        tracing::warn!(
            "VERIFY_REQUEST_SIGNATURE is off; authorization requests are trusted \
             without checking the server signature"
        );
    }

    let store = app::build_store(&config)
        .await
        .context("failed to open credential store")?;

    let verifier = Arc::new(JwksVerifier::new(&config.oidc)?);
    let refresher = verifier.spawn_refresh();

    let authorizer = app::build_authorizer(&config, store, verifier)
        .context("signing key configuration rejected")?;
    tracing::info!(
        account = %config.signing.account_public_key,
        subject = %config.nats.auth_subject,
        "authorizer ready"
    );

    let client = transport::connect(&config.nats).await?;

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    tracing::info!("health endpoint listening on {}", listener.local_addr()?);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("ctrl-c received"),
            Err(err) => tracing::error!(error = %err, "failed to listen for ctrl-c"),
        }
        let _ = stop_tx.send(true);
    });

    let http = {
        let stopped = stopped(stop_rx.clone());
        tokio::spawn(async move {
            axum::serve(listener, app::build_router())
                .with_graceful_shutdown(stopped)
                .await
        })
    };

    let served = transport::serve(
        client,
        &config.nats.auth_subject,
        config.nats.queue_group.as_deref(),
        Arc::new(authorizer),
        stopped(stop_rx),
    )
    .await;

    http.abort();
    refresher.abort();
    served?;

    tracing::info!("natsgate stopped");
    Ok(())
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
