//! Per-connection session state machine (spec §4.4): framing, version
//! negotiation, transaction assembly, and client-initiated cancellation.
//!
//! Grounded on `server/legacy/mod.rs::handle_client`'s `tokio::select!`
//! read/shutdown loop, generalised from the teacher's fixed-width binary
//! transaction reader to the line-oriented `<?scscp …?>` framing of §4.1 and
//! the incremental OpenMath body of §4.2. All phase transitions happen on
//! this one task (spec §5); handler tasks run alongside it but touch session
//! state only through the [`TaskRegistry`].

use std::process;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::call;
use crate::dispatcher::{self, CallOutcome, Dispatch, HandlerRegistry};
use crate::errors::ScscpError;
use crate::openmath::{self, OmNode, Parser};
use crate::registry::TaskRegistry;

/// Supported SCSCP protocol version (spec §4.4, §6).
const SUPPORTED_VERSION: &str = "1.3";

/// Per-connection protocol phase (spec §3, §4.4).
///
/// The parser field of [`Session`] is non-null iff the phase is
/// `ReceivingTransaction` (spec §3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Awaiting the client's version offer.
    Negotiating,
    /// Between transactions; awaiting `start`, `terminate`, or `quit`.
    Idle,
    /// Accumulating a transaction body between `start` and `end`.
    ReceivingTransaction,
    /// The session is tearing down; no further frames are written.
    Closing,
}

/// Drives one accepted connection through the protocol state machine.
///
/// `R`/`W` are the split halves of the underlying transport, generic so
/// tests can drive a session over an in-memory duplex stream instead of a
/// real socket.
pub struct Session<R, W> {
    peer: String,
    reader: FramedRead<R, LinesCodec>,
    writer: W,
    phase: SessionPhase,
    parser: Option<Parser>,
    registry: TaskRegistry,
    handlers: Arc<HandlerRegistry>,
    join_set: JoinSet<CallOutcome>,
    service_name: String,
    service_version: String,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Build a new session for an accepted connection.
    #[must_use]
    pub fn new(
        peer: String,
        reader: R,
        writer: W,
        handlers: Arc<HandlerRegistry>,
        service_name: String,
        service_version: String,
    ) -> Self {
        Self {
            peer,
            reader: FramedRead::new(reader, LinesCodec::new()),
            writer,
            phase: SessionPhase::Negotiating,
            parser: None,
            registry: TaskRegistry::new(),
            handlers,
            join_set: JoinSet::new(),
            service_name,
            service_version,
        }
    }

    /// The current protocol phase.
    #[must_use]
    pub const fn phase(&self) -> SessionPhase { self.phase }

    /// Drive the session to completion: negotiate, process frames and
    /// transactions, and run until the peer quits or the connection closes.
    ///
    /// # Errors
    ///
    /// Returns an error only for transport failures (spec §7
    /// `ConnectionClosed`/I/O); an orderly `quit` or a failed negotiation is
    /// reported to the client on the wire and yields `Ok(())`.
    pub async fn run(mut self) -> Result<(), ScscpError> {
        let result = self.drive().await;
        self.registry.cancel_all();
        let _ = self.writer.shutdown().await;
        match result {
            Ok(()) | Err(ScscpError::ClientQuit(_) | ScscpError::NegotiationFailed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn drive(&mut self) -> Result<(), ScscpError> {
        self.enter_negotiating().await?;
        loop {
            if self.phase == SessionPhase::Closing {
                return Ok(());
            }
            tokio::select! {
                line = self.reader.next() => {
                    match line {
                        Some(Ok(line)) => self.on_line(&line).await?,
                        Some(Err(e)) => return Err(ScscpError::Io(std::io::Error::other(e))),
                        None => {
                            self.handle_connection_closed();
                            return Err(ScscpError::ConnectionClosed);
                        }
                    }
                }
                Some(joined) = self.join_set.join_next(), if !self.join_set.is_empty() => {
                    self.on_task_complete(joined).await?;
                }
            }
        }
    }

    async fn enter_negotiating(&mut self) -> Result<(), ScscpError> {
        self.phase = SessionPhase::Negotiating;
        let pid = process::id().to_string();
        let frame = crate::frame::encode(&[
            "service_name",
            &self.service_name,
            "service_version",
            &self.service_version,
            "service_id",
            &pid,
            "scscp_versions",
            SUPPORTED_VERSION,
        ]);
        self.write_line(&frame).await
    }

    async fn on_line(&mut self, line: &str) -> Result<(), ScscpError> {
        match self.phase {
            SessionPhase::Negotiating => self.on_negotiating_line(line).await,
            SessionPhase::Idle => self.on_idle_line(line).await,
            SessionPhase::ReceivingTransaction => self.on_receiving_line(line).await,
            SessionPhase::Closing => Ok(()),
        }
    }

    async fn on_negotiating_line(&mut self, line: &str) -> Result<(), ScscpError> {
        let instr = match crate::frame::decode(line) {
            Ok(instr) => instr,
            Err(e) => return self.fail_negotiation(&e.to_string()).await,
        };
        if instr.key.as_deref() == Some("quit") {
            return self.client_quit(instr.attr("reason").map(str::to_owned));
        }
        let Some(offer) = instr.attr("version") else {
            return self
                .fail_negotiation("expected a 'version' offer or 'quit'")
                .await;
        };
        if offer.split_whitespace().any(|v| v == SUPPORTED_VERSION) {
            self.write_line(&crate::frame::encode(&["version", SUPPORTED_VERSION]))
                .await?;
            self.phase = SessionPhase::Idle;
            Ok(())
        } else {
            self.fail_negotiation("not supported version").await
        }
    }

    async fn fail_negotiation(&mut self, reason: &str) -> Result<(), ScscpError> {
        let frame = crate::frame::encode(&["quit", "reason", reason]);
        self.write_line(&frame).await?;
        self.phase = SessionPhase::Closing;
        Err(ScscpError::NegotiationFailed(reason.to_owned()))
    }

    fn client_quit(&mut self, reason: Option<String>) -> Result<(), ScscpError> {
        self.registry.cancel_all();
        self.phase = SessionPhase::Closing;
        Err(ScscpError::ClientQuit(reason))
    }

    async fn on_idle_line(&mut self, line: &str) -> Result<(), ScscpError> {
        let instr = match crate::frame::decode(line) {
            Ok(instr) => instr,
            Err(e) => {
                self.notify(&format!("malformed frame: {e}")).await;
                return Ok(());
            }
        };
        match instr.key.as_deref() {
            Some("start") => {
                self.parser = Some(Parser::new());
                self.phase = SessionPhase::ReceivingTransaction;
                Ok(())
            }
            Some("quit") => self.client_quit(instr.attr("reason").map(str::to_owned)),
            Some("terminate") => {
                self.on_terminate(instr.attr("call_id")).await;
                Ok(())
            }
            Some(key @ ("cancel" | "end")) => {
                self.notify(&format!("protocol error: unexpected '{key}' frame while idle"))
                    .await;
                Ok(())
            }
            _ => {
                if let Some(info) = instr.attr("info") {
                    tracing::info!(peer = %self.peer, %info, "client advisory");
                } else {
                    self.notify("unrecognised frame").await;
                }
                Ok(())
            }
        }
    }

    async fn on_terminate(&mut self, call_id: Option<&str>) {
        match call_id {
            Some(id) => {
                if !self.registry.cancel(id) {
                    tracing::info!(peer = %self.peer, call_id = id, "terminate for unknown or already-completed call_id");
                }
            }
            None => self.notify("terminate missing call_id").await,
        }
    }

    async fn on_receiving_line(&mut self, line: &str) -> Result<(), ScscpError> {
        if let Ok(instr) = crate::frame::decode(line) {
            match instr.key.as_deref() {
                Some("end") => return self.finish_transaction().await,
                Some("cancel") => {
                    self.parser = None;
                    self.phase = SessionPhase::Idle;
                    return Ok(());
                }
                Some("start") => {
                    self.notify("protocol error: 'start' received mid-transaction")
                        .await;
                    self.parser = None;
                    self.phase = SessionPhase::Idle;
                    return Ok(());
                }
                Some("quit") => {
                    // A transaction in progress is discarded silently (spec
                    // §3 "Transaction buffer": discarded on any abort path;
                    // spec §8 scenario 6).
                    self.parser = None;
                    return self.client_quit(instr.attr("reason").map(str::to_owned));
                }
                _ => {}
            }
        }
        if let Some(parser) = &mut self.parser {
            parser.feed(line.as_bytes());
            parser.feed(b"\n");
        }
        Ok(())
    }

    async fn finish_transaction(&mut self) -> Result<(), ScscpError> {
        self.phase = SessionPhase::Idle;
        let Some(parser) = self.parser.take() else {
            return Ok(());
        };
        match parser.close() {
            Ok(tree) => self.handle_transaction(tree).await,
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "malformed OpenMath transaction body");
                Ok(())
            }
        }
    }

    async fn handle_transaction(&mut self, tree: OmNode) -> Result<(), ScscpError> {
        match call::verify(&tree) {
            Ok(decoded) => match dispatcher::dispatch(
                &self.handlers,
                decoded,
                &mut self.registry,
                &mut self.join_set,
            ) {
                Dispatch::Immediate(response) => self.write_response(&response).await,
                Dispatch::Spawned => Ok(()),
            },
            Err(e) => {
                if let Some(call_id) = call::try_extract_call_id(&tree) {
                    let response =
                        dispatcher::build_terminated(&call_id, "error_system_specific", &e.to_string());
                    self.write_response(&response).await
                } else {
                    tracing::warn!(peer = %self.peer, error = %e, "invalid call rejected before dispatch");
                    Ok(())
                }
            }
        }
    }

    async fn on_task_complete(
        &mut self,
        joined: Result<CallOutcome, tokio::task::JoinError>,
    ) -> Result<(), ScscpError> {
        match joined {
            Ok(outcome) => {
                self.registry.remove(&outcome.call_id);
                let response = dispatcher::response_for(outcome);
                self.write_response(&response).await
            }
            Err(e) => {
                tracing::error!(peer = %self.peer, error = %e, "handler task panicked");
                Ok(())
            }
        }
    }

    fn handle_connection_closed(&mut self) {
        tracing::info!(peer = %self.peer, "connection closed");
        self.registry.cancel_all();
        self.phase = SessionPhase::Closing;
    }

    /// Emit an advisory `<?scscp info="…"?>` frame to the peer (spec §6,
    /// SPEC_FULL.md §11.1 — the server-initiated half of the bidirectional
    /// `info` path).
    async fn notify(&mut self, msg: &str) {
        let frame = crate::frame::encode(&["info", msg]);
        if let Err(e) = self.write_line(&frame).await {
            tracing::warn!(peer = %self.peer, error = %e, "failed to write info frame");
        }
    }

    async fn write_response(&mut self, node: &OmNode) -> Result<(), ScscpError> {
        self.write_line(&crate::frame::encode(&["start"])).await?;
        let mut xml = openmath::encode_to_string(node);
        xml.push('\n');
        self.writer.write_all(xml.as_bytes()).await?;
        self.write_line(&crate::frame::encode(&["end"])).await
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ScscpError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
