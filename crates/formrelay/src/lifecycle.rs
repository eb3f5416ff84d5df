//! Starting and stopping the pipeline's units.
//!
//! Intake and relay share nothing but the datagram socket address. In
//! `serve` mode they run as two tasks in one process, each in its own span;
//! they can equally be started as separate processes.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, Instrument};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::intake::IntakeServer;
use crate::logging::{HTTP_SPAN, RELAY_SPAN};
use crate::persistence::Persistence;
use crate::relay::RelayListener;
use crate::storage::Storage;

/// Resolves once Ctrl-C is received.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!(error = %e, "failed to listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}

/// Run only the HTTP intake endpoint.
///
/// # Errors
///
/// Returns an error if binding or serving fails.
pub async fn run_intake(config: &Config) -> Result<()> {
    let server = IntakeServer::bind(config).await?;
    server
        .run(shutdown_signal())
        .instrument(tracing::info_span!(HTTP_SPAN))
        .await
}

/// Run only the relay listener and its persistence step.
///
/// # Errors
///
/// Returns an error if the store cannot be opened, the socket cannot be
/// bound, or receiving fails irrecoverably.
pub async fn run_relay(config: &Config) -> Result<()> {
    let listener = bind_relay(config).await?;
    listener
        .run(shutdown_signal())
        .instrument(tracing::info_span!(RELAY_SPAN))
        .await
}

/// Run intake and relay side by side until Ctrl-C or until either fails.
///
/// # Errors
///
/// Returns the first error reported by either unit.
pub async fn serve(config: &Config) -> Result<()> {
    let listener = bind_relay(config).await?;
    let server = IntakeServer::bind(config).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let stopped = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    let mut relay = tokio::spawn(
        listener
            .run(stopped(stop_rx.clone()))
            .instrument(tracing::info_span!(RELAY_SPAN)),
    );
    let mut http = tokio::spawn(
        server
            .run(stopped(stop_rx))
            .instrument(tracing::info_span!(HTTP_SPAN)),
    );

    let (first, relay_done, http_done) = tokio::select! {
        () = shutdown_signal() => (Ok(()), false, false),
        joined = &mut relay => (flatten(joined), true, false),
        joined = &mut http => (flatten(joined), false, true),
    };

    let _ = stop_tx.send(true);
    let relay_result = if relay_done { Ok(()) } else { flatten(relay.await) };
    let http_result = if http_done { Ok(()) } else { flatten(http.await) };

    first.and(relay_result).and(http_result)
}

async fn bind_relay(config: &Config) -> Result<RelayListener> {
    let storage = Arc::new(Storage::open(config.store_uri())?);
    RelayListener::bind(
        config.relay_addr(),
        config.relay.chunk_size,
        Persistence::new(storage),
    )
    .await
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.map_err(Error::from).and_then(|r| r)
}
