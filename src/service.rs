//! Service skeleton (spec §9 "Inheritance-based service customisation"): the
//! operator-facing surface for registering procedures and launching the
//! server.
//!
//! Grounded on `server/mod.rs`'s thin composition of configuration + runtime
//! entry point, replacing the teacher's base-class/subclass extension point
//! with a plain value an operator builds up by calling [`Service::register`].

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::net::TcpListener;

use crate::acceptor;
use crate::dispatcher::{HandlerRegistry, ProcedureHandler};

/// A server identity plus its registered procedures.
///
/// Build one with [`Service::new`], call [`Service::register`] for each
/// procedure the operator wants to expose, then hand it to
/// [`Service::launch`].
pub struct Service {
    service_name: String,
    service_version: String,
    handlers: HandlerRegistry,
}

impl Service {
    /// Build a service with no registered procedures.
    #[must_use]
    pub fn new(service_name: impl Into<String>, service_version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            handlers: HandlerRegistry::new(),
        }
    }

    /// Register a handler for `(cd, name)`, replacing any prior registration.
    pub fn register(
        &mut self,
        cd: impl Into<String>,
        name: impl Into<String>,
        handler: impl ProcedureHandler + 'static,
    ) {
        self.handlers.register(cd, name, handler);
    }

    /// Bind `addr` and serve connections until a shutdown signal arrives,
    /// then wait up to `shutdown_grace` for in-flight sessions before
    /// cancelling the stragglers (spec §4.7).
    ///
    /// # Errors
    ///
    /// Returns an error if `addr` cannot be bound.
    pub async fn launch(self, addr: SocketAddr, shutdown_grace: Duration) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        tracing::info!(%addr, service = %self.service_name, version = %self.service_version, "scscp server listening");
        acceptor::serve(
            listener,
            self.handlers,
            self.service_name,
            self.service_version,
            shutdown_grace,
        )
        .await
    }
}
