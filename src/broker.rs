//! The session broker loop: pop an admission request, publish where to
//! connect, open the session listener and wait for it to finish.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::listener::SessionListener;
use crate::protocol::{EndpointInfo, SessionRequest};
use crate::queue::WorkQueue;
use crate::services::Services;
use crate::session::SessionContext;
use crate::state::AgentState;

/// How one broker iteration ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    /// A peer connected and the session ran to completion.
    Served(String),
    /// Nobody connected within the grace period.
    Abandoned(String),
    /// The popped payload was not a valid request.
    Skipped,
    /// The queue or listener failed; the broker backed off.
    Failed,
    Shutdown,
}

pub struct Broker {
    queue: Arc<dyn WorkQueue>,
    state: AgentState,
    services: Services,
    config: Arc<AgentConfig>,
}

impl Broker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        state: AgentState,
        services: Services,
        config: Arc<AgentConfig>,
    ) -> Self {
        Self {
            queue,
            state,
            services,
            config,
        }
    }

    /// Serve requests one at a time until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(queue = %self.config.queue_key, "broker started");
        loop {
            if self.run_once(&shutdown).await == Iteration::Shutdown {
                break;
            }
        }
        tracing::info!("broker stopped");
    }

    pub async fn run_once(&self, shutdown: &CancellationToken) -> Iteration {
        let popped = tokio::select! {
            _ = shutdown.cancelled() => return Iteration::Shutdown,
            r = self.queue.pop_next_session_request() => r,
        };

        let request = match popped {
            Ok(request) => request,
            Err(e) if e.is_infrastructure() => {
                tracing::error!(error = %e, "work queue unavailable");
                return self.backoff(shutdown).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed session request");
                return Iteration::Skipped;
            }
        };

        let id = request.id.clone();
        tracing::info!(id = %request.id, user = %request.user, game = %request.game, "session requested");

        let info = self.endpoint_info(&request);
        if let Err(e) = self.queue.publish_reply(&request.id, &info).await {
            tracing::error!(id = %id, error = %e, "failed to publish session endpoint");
            return self.backoff(shutdown).await;
        }

        // Cleared before the listener exists so a fast peer cannot be missed.
        self.state.clear_connected();

        let ctx = SessionContext {
            request,
            state: self.state.clone(),
            services: self.services.clone(),
            timings: self.config.timings.clone(),
            listener: CancellationToken::new(),
            shutdown: shutdown.clone(),
        };
        let addr = format!("{}:{}", self.config.bind_host, self.config.ws_port);
        let listener = match SessionListener::bind(&addr, ctx).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(id = %id, %addr, error = %e, "failed to open session listener");
                return self.backoff(shutdown).await;
            }
        };

        let grace = self.config.timings.connect_grace();
        let connected = tokio::select! {
            _ = shutdown.cancelled() => false,
            r = tokio::time::timeout(grace, self.state.connected()) => r.is_ok(),
        };

        if !connected && self.abandon_if_unclaimed(&listener).await {
            tracing::info!(id = %id, ?grace, "no peer connected, closing session endpoint");
            listener.closed().await;
            return if shutdown.is_cancelled() {
                Iteration::Shutdown
            } else {
                Iteration::Abandoned(id)
            };
        }

        listener.closed().await;
        tracing::info!(id = %id, "session finished");
        Iteration::Served(id)
    }

    /// Close the listener unless a connection was established. Decided under
    /// the state lock so it cannot interleave with a session's admission.
    async fn abandon_if_unclaimed(&self, listener: &SessionListener) -> bool {
        let _slots = self.state.lock().await;
        if self.state.is_connected() {
            return false;
        }
        listener.close();
        true
    }

    fn endpoint_info(&self, request: &SessionRequest) -> EndpointInfo {
        EndpointInfo {
            ws_endpoint: self.config.ws_endpoint(),
            video_signalling_endpoint: self.config.video_signalling_endpoint(),
            audio_signalling_endpoint: self.config.audio_signalling_endpoint(),
            id: request.id.clone(),
        }
    }

    async fn backoff(&self, shutdown: &CancellationToken) -> Iteration {
        tokio::select! {
            _ = shutdown.cancelled() => Iteration::Shutdown,
            _ = tokio::time::sleep(self.config.timings.queue_backoff()) => Iteration::Failed,
        }
    }
}
