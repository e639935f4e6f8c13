//! Concurrent dispatch of one request batch.

use crate::context::{Context, PeerInfo};
use crate::router::Router;
use comborpc_protocol::{RequestBatch, Response, NO_METHOD_FOUND};
use std::any::Any;
use std::sync::Arc;
use tokio::task::JoinHandle;

enum Pending {
    Unknown,
    Running(JoinHandle<Response>),
}

/// Dispatches every item of `batch` concurrently and returns one response per item,
/// in request order.
///
/// Unknown methods yield [`NO_METHOD_FOUND`] without entering the chain. A handler
/// panic is contained to its own item and becomes that item's error; siblings
/// are unaffected.
pub async fn process_batch(
    router: &Arc<Router>,
    batch: RequestBatch,
    peer: Option<PeerInfo>,
) -> Vec<Response> {
    let headers = Arc::new(batch.headers);
    let mut pending = Vec::with_capacity(batch.requests.len());

    for request in batch.requests {
        let Some(chain) = router.resolve(&request.method) else {
            tracing::debug!("No method found: {}", request.method);
            pending.push(Pending::Unknown);
            continue;
        };

        let mut ctx = Context::new(request.method, request.data, headers.clone(), chain);
        if let Some(peer) = peer {
            ctx = ctx.with_peer(peer);
        }
        pending.push(Pending::Running(tokio::task::spawn_blocking(move || {
            run_chain(ctx)
        })));
    }

    let mut responses = Vec::with_capacity(pending.len());
    for item in pending {
        let response = match item {
            Pending::Unknown => Response::error(NO_METHOD_FOUND),
            Pending::Running(handle) => match handle.await {
                Ok(response) => response,
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic());
                    tracing::warn!("Handler panicked: {}", message);
                    Response::error(format!("handler panicked: {}", message))
                }
                Err(e) => Response::error(e.to_string()),
            },
        };
        responses.push(response);
    }
    responses
}

fn run_chain(mut ctx: Context) -> Response {
    ctx.next();
    match ctx.finish() {
        (Some(error), _) => Response::error(error),
        (None, output) => Response::ok(output),
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
