//! Handler dispatcher (spec §4.5): resolves `(cd, name)` to a registered
//! procedure, spawns a cancellable task to run it, and builds the eventual
//! `procedure_completed`/`procedure_terminated` response.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::call::{ProcedureCall, ReturnType};
use crate::openmath::OmNode;
use crate::registry::{TaskEntry, TaskRegistry};

const SCSCP1: &str = "scscp1";

/// Result type a [`ProcedureHandler`] resolves to.
pub type HandlerResult = Result<OmNode, Box<dyn std::error::Error + Send + Sync + 'static>>;
/// Boxed future type returned by [`ProcedureHandler::invoke`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// An asynchronous callable implementing one registered procedure.
pub trait ProcedureHandler: Send + Sync {
    /// Invoke the procedure with the call's argument list.
    fn invoke(&self, args: Vec<OmNode>) -> HandlerFuture;
}

impl<F, Fut> ProcedureHandler for F
where
    F: Fn(Vec<OmNode>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn invoke(&self, args: Vec<OmNode>) -> HandlerFuture { Box::pin(self(args)) }
}

/// Maps `(cd, name) -> ProcedureHandler` (spec §4.5).
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(String, String), Arc<dyn ProcedureHandler>>,
}

impl HandlerRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under `(cd, name)`, replacing any prior handler.
    pub fn register(
        &mut self,
        cd: impl Into<String>,
        name: impl Into<String>,
        handler: impl ProcedureHandler + 'static,
    ) {
        self.handlers.insert((cd.into(), name.into()), Arc::new(handler));
    }

    /// Resolve `(cd, name)` to its registered handler, if any.
    #[must_use]
    pub fn resolve(&self, cd: &str, name: &str) -> Option<Arc<dyn ProcedureHandler>> {
        self.handlers.get(&(cd.to_owned(), name.to_owned())).cloned()
    }
}

/// How a dispatched handler task finished.
#[derive(Debug)]
enum HandlerOutcome {
    Success(OmNode),
    Failure(String),
    Cancelled,
}

/// A completed call, ready to be turned into a response frame.
#[derive(Debug)]
pub struct CallOutcome {
    /// The call identifier this outcome belongs to.
    pub call_id: String,
    /// Declared response shape, needed to build the response body.
    pub return_type: ReturnType,
    outcome: HandlerOutcome,
}

/// What the session should do immediately after calling [`dispatch`].
pub enum Dispatch {
    /// A handler was resolved and its task spawned into `join_set`;
    /// the eventual response arrives via [`JoinSet::join_next`].
    Spawned,
    /// No handler was registered for `(cd, name)`; the session should write
    /// this response now without registering a task.
    Immediate(OmNode),
}

/// Resolve and dispatch `call` (spec §4.5).
///
/// On resolution, inserts a [`TaskEntry`] into `registry` and spawns the
/// handler invocation into `join_set`, racing it against the entry's
/// cancellation token. On resolution failure, returns an immediate
/// `procedure_terminated` response and leaves `registry`/`join_set`
/// untouched.
pub fn dispatch(
    handlers: &HandlerRegistry,
    call: ProcedureCall,
    registry: &mut TaskRegistry,
    join_set: &mut JoinSet<CallOutcome>,
) -> Dispatch {
    let Some(handler) = handlers.resolve(&call.cd, &call.name) else {
        let message = format!("Unknown symbol: cd={}, name={}", call.cd, call.name);
        return Dispatch::Immediate(build_terminated(
            &call.call_id,
            "error_system_specific",
            &message,
        ));
    };

    let entry = TaskEntry::new(call.call_id.clone(), call.return_type);
    let token = entry.token.clone();
    if !registry.insert(entry) {
        return Dispatch::Immediate(build_terminated(
            &call.call_id,
            "error_system_specific",
            "duplicate call_id",
        ));
    }

    let call_id = call.call_id;
    let return_type = call.return_type;
    let args = call.args;
    let span = tracing::info_span!("procedure_call", call_id = %call_id);
    join_set.spawn(
        async move {
            let outcome = run_cancellable(handler, args, token).await;
            CallOutcome {
                call_id,
                return_type,
                outcome,
            }
        }
        .instrument(span),
    );
    Dispatch::Spawned
}

async fn run_cancellable(
    handler: Arc<dyn ProcedureHandler>,
    args: Vec<OmNode>,
    token: CancellationToken,
) -> HandlerOutcome {
    tokio::select! {
        result = handler.invoke(args) => match result {
            Ok(value) => HandlerOutcome::Success(value),
            Err(err) => HandlerOutcome::Failure(err.to_string()),
        },
        () = token.cancelled() => HandlerOutcome::Cancelled,
    }
}

/// Turn a finished [`CallOutcome`] into the response frame to write
/// (spec §4.5's completion-callback rules).
#[must_use]
pub fn response_for(outcome: CallOutcome) -> OmNode {
    match outcome.outcome {
        HandlerOutcome::Cancelled => {
            build_terminated(&outcome.call_id, "error_CAS_terminated", "call terminated")
        }
        HandlerOutcome::Failure(message) => {
            build_terminated(&outcome.call_id, "error_system_specific", &message)
        }
        HandlerOutcome::Success(result) => {
            build_completed(&outcome.call_id, outcome.return_type, result)
        }
    }
}

fn call_id_attribution(call_id: &str, body: OmNode) -> OmNode {
    let atp = OmNode::attribute_pairs(vec![(
        OmNode::symbol(SCSCP1, "call_id"),
        OmNode::string(call_id),
    )]);
    OmNode::object(OmNode::attribution(atp, body))
}

/// Build a `procedure_completed` response (spec §4.5, DESIGN.md open
/// question decision).
#[must_use]
pub fn build_completed(call_id: &str, return_type: ReturnType, result: OmNode) -> OmNode {
    let head = OmNode::symbol(SCSCP1, "procedure_completed");
    let body = match return_type {
        ReturnType::Nothing => OmNode::application(head, vec![]),
        ReturnType::Object => OmNode::application(head, vec![result]),
        ReturnType::Cookie => {
            // No persisted cookie store exists in the core (spec §6); the
            // reference is an opaque, process-unique token (DESIGN.md).
            OmNode::application(head, vec![OmNode::string(next_cookie_token())])
        }
    };
    call_id_attribution(call_id, body)
}

/// Build a `procedure_terminated` response carrying an `OMERR` body
/// (spec §4.5/§7, DESIGN.md open question decision).
#[must_use]
pub fn build_terminated(call_id: &str, error_symbol: &str, message: &str) -> OmNode {
    let head = OmNode::symbol(SCSCP1, "procedure_terminated");
    let err = OmNode::error(
        OmNode::symbol(SCSCP1, error_symbol),
        vec![OmNode::string(message)],
    );
    let body = OmNode::application(head, vec![err]);
    call_id_attribution(call_id, body)
}

fn next_cookie_token() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("cookie_{n}")
}
