//! Coordinator lifecycle management
//!
//! Wires the coordinator services together, supervises the background tasks
//! (heartbeat sweeper, viewer counter) and tears them down on shutdown. The
//! surrounding platform hands the transport layer an `IngestGate` reference
//! and viewer connections a `FanoutHub`/`ChatRelay` reference; everything
//! here stays process-local.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use livecast_core::repository::{ChatRepository, MemoryChatRepository};
use livecast_core::service::{
    ChatRelay, FanoutHub, IngestGate, RateLimiter, SessionKeyValidator, SessionStateStore,
    StaticKeyValidator, ViewerCounter,
};
use livecast_core::Config;

/// Container for the wired coordinator services.
///
/// `validator` and `chat` are the attach points for the surrounding
/// platform's transport and HTTP layers; the binary itself only drives the
/// background tasks. Ownership keeps them alive for the process lifetime.
#[allow(dead_code)]
#[derive(Clone)]
pub struct Services {
    pub validator: Arc<StaticKeyValidator>,
    pub store: Arc<SessionStateStore>,
    pub hub: Arc<FanoutHub>,
    pub gate: Arc<IngestGate>,
    pub chat: ChatRelay,
    pub viewer_counter: Arc<ViewerCounter>,
}

impl Services {
    fn build(config: &Config) -> Self {
        let validator = Arc::new(StaticKeyValidator::new());
        let store = Arc::new(SessionStateStore::new());
        let hub = Arc::new(FanoutHub::new(
            config.fanout.outbox_capacity,
            config.fanout.subscription_events_capacity,
        ));
        let gate = Arc::new(IngestGate::new(
            Arc::clone(&validator) as Arc<dyn SessionKeyValidator>,
            Arc::clone(&store),
            Arc::clone(&hub),
            config.ingest.heartbeat_grace(),
        ));
        let chat = ChatRelay::new(
            Arc::clone(&store),
            Arc::new(MemoryChatRepository::new()) as Arc<dyn ChatRepository>,
            Arc::clone(&hub),
            RateLimiter::new(),
            config.chat.clone(),
        );
        let viewer_counter = Arc::new(ViewerCounter::new(Arc::clone(&store)));

        Self {
            validator,
            store,
            hub,
            gate,
            chat,
            viewer_counter,
        }
    }
}

/// Livecast coordinator - manages the fan-out process lifecycle
pub struct Coordinator {
    config: Config,
    services: Services,
}

impl Coordinator {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let services = Services::build(&config);
        Self { config, services }
    }

    /// Start background tasks and run until SIGINT
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting livecast coordinator...");

        let sweeper: JoinHandle<()> = tokio::spawn(
            Arc::clone(&self.services.gate).run_sweeper(self.config.ingest.sweep_interval()),
        );

        let counter: JoinHandle<()> = tokio::spawn(
            Arc::clone(&self.services.viewer_counter).run(
                self.services.hub.subscription_events(),
                self.config.viewers.commit_interval(),
            ),
        );

        info!(
            heartbeat_grace_seconds = self.config.ingest.heartbeat_grace_seconds,
            sweep_interval_seconds = self.config.ingest.sweep_interval_seconds,
            viewer_commit_seconds = self.config.viewers.commit_interval_seconds,
            "Coordinator running"
        );

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");

        // Background sweeps hold no state worth draining; abort is clean
        sweeper.abort();
        counter.abort();
        let _ = sweeper.await;
        let _ = counter.await;

        let active = self.services.store.active_sessions();
        if !active.is_empty() {
            warn!(
                count = active.len(),
                "Shutting down with active sessions; viewers will re-sync on restart"
            );
        }
        info!("Livecast coordinator stopped");
        Ok(())
    }
}
