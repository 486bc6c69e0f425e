//! Acceptor (spec §4.7): accepts connections, constructs sessions, and
//! supervises teardown on shutdown.
//!
//! Grounded on `server/legacy/mod.rs::accept_connections`/
//! `spawn_client_handler`/`await_spawned_tasks`: a `tokio::select!` loop over
//! `listener.accept()` and an OS shutdown signal, tasks tracked in a
//! `JoinSet`, and a bounded grace period before remaining sessions are
//! cancelled outright.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::dispatcher::HandlerRegistry;
use crate::session::Session;

/// Accept connections on `listener`, spawning one session task per
/// connection, until a shutdown signal arrives.
///
/// After the signal, stops accepting and waits up to `shutdown_grace` for
/// live sessions to finish on their own (orderly `quit` or connection loss);
/// any still running after the grace period are aborted.
///
/// # Errors
///
/// This function only returns `Err` if awaiting spawned tasks itself panics
/// in a way that cannot be recovered from; per-connection failures are
/// logged, not propagated.
pub async fn serve(
    listener: TcpListener,
    handlers: HandlerRegistry,
    service_name: String,
    service_version: String,
    shutdown_grace: Duration,
) -> Result<()> {
    let handlers = Arc::new(handlers);
    let mut join_set = JoinSet::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                tracing::info!("shutdown signal received; no longer accepting connections");
                break;
            }
            res = listener.accept() => {
                handle_accept_result(res, &handlers, &service_name, &service_version, &mut join_set);
            }
        }
    }

    await_with_grace(&mut join_set, shutdown_grace).await;
    Ok(())
}

fn handle_accept_result(
    res: io::Result<(TcpStream, SocketAddr)>,
    handlers: &Arc<HandlerRegistry>,
    service_name: &str,
    service_version: &str,
    join_set: &mut JoinSet<()>,
) {
    match res {
        Ok((socket, peer)) => {
            spawn_session(socket, peer, handlers.clone(), service_name.to_owned(), service_version.to_owned(), join_set);
        }
        Err(e) => tracing::error!(error = %e, "accept error"),
    }
}

fn spawn_session(
    socket: TcpStream,
    peer: SocketAddr,
    handlers: Arc<HandlerRegistry>,
    service_name: String,
    service_version: String,
    join_set: &mut JoinSet<()>,
) {
    join_set.spawn(async move {
        let (reader, writer) = tokio::io::split(socket);
        let session = Session::new(peer.to_string(), reader, writer, handlers, service_name, service_version);
        if let Err(e) = session.run().await {
            tracing::warn!(%peer, error = %e, "session ended with error");
        }
    });
}

async fn await_with_grace(join_set: &mut JoinSet<()>, grace: Duration) {
    let drain = async {
        while let Some(res) = join_set.join_next().await {
            if let Err(e) = res {
                tracing::warn!(error = %e, "session task panicked");
            }
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!(?grace, "grace period elapsed; aborting remaining sessions");
        join_set.shutdown().await;
    }
}

/// Waits for an operator-initiated shutdown (`Ctrl-C` or `SIGTERM`).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(e) = res {
                            tracing::error!(error = %e, "failed to listen for ctrl-c");
                        }
                    }
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                wait_for_ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
    }
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
