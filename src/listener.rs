//! The per-session websocket endpoint.

use std::io;
use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::session::{self, SessionContext};

/// A websocket listener opened for one admitted session. Every accepted
/// connection runs the session state machine against the same context.
#[derive(Debug)]
pub struct SessionListener {
    local_addr: SocketAddr,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionListener {
    /// Bind `addr` and start accepting. The listener stops when `ctx.listener`
    /// is cancelled.
    pub async fn bind(addr: &str, ctx: SessionContext) -> io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let token = ctx.listener.clone();

        let app = Router::new().route("/", get(upgrade)).with_state(ctx);

        let shutdown = token.clone().cancelled_owned();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::error!(error = %e, "session listener failed");
            }
            tracing::debug!(%local_addr, "session listener stopped");
        });

        tracing::info!(%local_addr, "session listener open");
        Ok(Self {
            local_addr,
            token,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Connections still awaiting their start message are
    /// rejected.
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once the listener has been closed and has stopped accepting.
    pub async fn closed(self) {
        self.token.cancelled().await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "session listener task panicked");
        }
    }
}

async fn upgrade(ws: WebSocketUpgrade, State(ctx): State<SessionContext>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::run(socket, ctx))
}
