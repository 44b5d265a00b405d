use std::sync::Arc;

use anyhow::{Context, Result};
use common_auth::{RouteDecision, User};
use tokio::sync::watch;
use tracing::debug;

use crate::config::ClientConfig;
use crate::gateway::AuthGateway;
use crate::machine::{Session, SessionStateMachine, SessionStatus};
use crate::metrics::SessionMetrics;
use crate::pipeline::RequestPipeline;
use crate::store::{FileSessionStore, InMemorySessionStore, SessionStore};

/// Everything a client needs for one session, built once and shared by clone.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<ClientConfig>,
    pub store: Arc<dyn SessionStore>,
    pub machine: SessionStateMachine,
    pub pipeline: RequestPipeline,
    pub gateway: AuthGateway,
    pub metrics: SessionMetrics,
}

impl SessionContext {
    /// Uses the file store when `store_path` is configured, memory otherwise.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let store: Arc<dyn SessionStore> = match &config.store_path {
            Some(path) => {
                let store = FileSessionStore::open(path)
                    .with_context(|| format!("Failed to open session store {}", path.display()))?;
                debug!(path = %store.path().display(), "using file session store");
                Arc::new(store)
            }
            None => Arc::new(InMemorySessionStore::new()),
        };
        Self::with_store(config, store)
    }

    pub fn with_store(config: ClientConfig, store: Arc<dyn SessionStore>) -> Result<Self> {
        let metrics = SessionMetrics::new().context("Failed to register session metrics")?;
        let machine = SessionStateMachine::new();
        let pipeline = RequestPipeline::new(&config, store.clone(), machine.clone(), metrics.clone())
            .context("Failed to build request pipeline")?;
        let gateway = AuthGateway::new(
            pipeline.clone(),
            machine.clone(),
            store.clone(),
            metrics.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            machine,
            pipeline,
            gateway,
            metrics,
        })
    }

    pub async fn start(&self) -> SessionStatus {
        self.gateway.start().await
    }

    pub fn session(&self) -> Session {
        self.machine.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.machine.subscribe()
    }

    pub fn user(&self) -> Option<User> {
        self.machine.current().user().cloned()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.machine.current().has_role(role)
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        self.machine.current().has_any_role(roles)
    }

    pub fn can_upload(&self, work_type: &str) -> bool {
        self.machine.current().can_upload(work_type)
    }

    pub fn guard_route(&self, allowed_roles: &[&str]) -> RouteDecision {
        self.machine.current().guard_route(allowed_roles)
    }
}
