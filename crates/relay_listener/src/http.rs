//! HTTP endpoint for pushes.
//!
//! Exposes `POST /push` taking a JSON `PushInput` and answering with a JSON
//! `PushOutput`. A body that does not decode is rejected by axum with a 4xx
//! status; a failed transaction is answered with 500 and the pusher retries.

use crate::adapter::PushAdapter;
use crate::error::{ListenerError, ListenerResult};
use crate::listener::PushListener;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use relay_protocol::{PushInput, PushOutput, PUSH_PATH};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Builds the router serving `POST /push`.
pub fn router<A>(listener: Arc<PushListener<A>>) -> Router
where
    A: PushAdapter + 'static,
{
    Router::new()
        .route(PUSH_PATH, post(handle_push::<A>))
        .with_state(listener)
}

async fn handle_push<A>(
    State(listener): State<Arc<PushListener<A>>>,
    Json(input): Json<PushInput>,
) -> ListenerResult<Json<PushOutput>>
where
    A: PushAdapter + 'static,
{
    // Adapters are synchronous and may block on storage.
    let output = tokio::task::spawn_blocking(move || listener.push(&input))
        .await
        .map_err(|e| ListenerError::Internal(format!("push task failed: {}", e)))??;

    Ok(Json(output))
}

/// Serves pushes on the configured bind address until the process ends.
pub async fn serve<A>(listener: Arc<PushListener<A>>) -> ListenerResult<()>
where
    A: PushAdapter + 'static,
{
    let tcp = TcpListener::bind(listener.config().bind_addr).await?;
    serve_with_shutdown(tcp, listener, std::future::pending()).await
}

/// Serves pushes on an already bound socket until `shutdown` resolves.
pub async fn serve_with_shutdown<A, F>(
    tcp: TcpListener,
    listener: Arc<PushListener<A>>,
    shutdown: F,
) -> ListenerResult<()>
where
    A: PushAdapter + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let addr = tcp.local_addr()?;
    info!(
        address = %addr,
        subscription = listener.subscription_id(),
        "push listener listening"
    );

    axum::serve(tcp, router(listener))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(address = %addr, "push listener stopped");
    Ok(())
}
