//! Error taxonomy for the SCSCP core (spec §7).
//!
//! Every failure a session can encounter is one variant of [`ScscpError`].
//! Per-call failures are converted into protocol responses by the
//! dispatcher/session; only [`ScscpError::NegotiationFailed`] and transport
//! errors terminate the session itself (see the module docs on
//! [`crate::session`]).

use thiserror::Error;

/// Errors produced while driving a single SCSCP session.
#[derive(Debug, Error)]
pub enum ScscpError {
    /// A `<?scscp …?>` line did not parse as a well-formed instruction.
    ///
    /// Non-fatal: the offending line is logged and the session stays in its
    /// current phase.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The transaction body was not well-formed XML, or did not match the
    /// OpenMath tag grammar.
    #[error("malformed OpenMath: {0}")]
    MalformedOpenMath(String),

    /// The decoded OpenMath tree did not satisfy the procedure-call
    /// structural contract (spec §4.3).
    #[error("invalid call: {0}")]
    InvalidCall(String),

    /// The client's protocol version offer during negotiation was rejected.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The peer requested an orderly shutdown (`quit`). Not a real error;
    /// carried through the `Result` plumbing so the session loop can unwind
    /// through one `?` path.
    #[error("client requested quit: {0:?}")]
    ClientQuit(Option<String>),

    /// The connection was lost or closed by the peer unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// A registered handler returned an error.
    #[error("handler failed: {0}")]
    HandlerFailure(String),

    /// A task was cancelled, either via `terminate` or session teardown.
    #[error("handler cancelled")]
    HandlerCancelled,

    /// Underlying transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
