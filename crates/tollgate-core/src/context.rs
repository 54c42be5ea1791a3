//! Process-wide shared state, built once at startup and cloned into every
//! transport handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

use crate::breaker::BreakerRegistry;
use crate::collab::{Judgment, OutcomeSink};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::protocol::JsonRpcNotification;
use crate::rate_limit::RateLimiter;
use crate::tools::ToolRegistry;
use crate::tracer::DecisionTracer;
use crate::trust::{MemoryTrustStore, TrustDb, TrustStore};

const NOTIFICATION_BUFFER: usize = 256;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub breakers: Arc<BreakerRegistry>,
    pub transport_limiter: Arc<RateLimiter>,
    pub api_key_limiter: Arc<RateLimiter>,
    pub tracer: Arc<DecisionTracer>,
    pub trust: Arc<dyn TrustStore>,
    pub tools: Arc<ToolRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub dispatcher: Arc<Dispatcher>,
    pub notifications: broadcast::Sender<JsonRpcNotification>,
}

/// Optional collaborators wired into the orchestrator at startup.
#[derive(Default)]
pub struct Collaborators {
    pub judgment: Option<Arc<dyn Judgment>>,
    pub sinks: Vec<Arc<dyn OutcomeSink>>,
}

impl AppContext {
    pub fn from_config(config: Config) -> Result<Self> {
        Self::with_collaborators(config, Collaborators::default())
    }

    pub fn with_collaborators(config: Config, collaborators: Collaborators) -> Result<Self> {
        let trust: Arc<dyn TrustStore> = match &config.trust.db_path {
            Some(path) => {
                info!(path = %path.display(), "opening trust database");
                Arc::new(TrustDb::open(path, config.orchestrator.default_trust)?)
            }
            None => Arc::new(MemoryTrustStore::new(config.orchestrator.default_trust)),
        };

        let breakers = Arc::new(BreakerRegistry::new(config.breakers.clone()));
        let tracer = Arc::new(DecisionTracer::new(config.tracer.capacity));
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);

        let mut orchestrator = Orchestrator::new(
            config.orchestrator.clone(),
            Arc::clone(&breakers),
            Arc::clone(&tracer),
            Arc::clone(&trust),
        )
        .with_notifications(notifications.clone());
        if let Some(judgment) = collaborators.judgment {
            orchestrator = orchestrator.with_judgment(judgment);
        }
        for sink in collaborators.sinks {
            orchestrator = orchestrator.with_sink(sink);
        }
        let orchestrator = Arc::new(orchestrator);

        let tools = Arc::new(ToolRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatcher.clone(),
            Arc::clone(&orchestrator),
            Arc::clone(&tools),
        ));

        Ok(Self {
            transport_limiter: Arc::new(RateLimiter::new(
                "transport",
                config.rate_limit.transport.clone(),
            )),
            api_key_limiter: Arc::new(RateLimiter::new("api_key", config.rate_limit.api_key.clone())),
            config: Arc::new(config),
            breakers,
            tracer,
            trust,
            tools,
            orchestrator,
            dispatcher,
            notifications,
        })
    }

    /// Start periodic sweeps of both rate-limit tables.
    pub fn spawn_sweepers(&self) {
        let every = Duration::from_millis(self.config.rate_limit.sweep_interval_ms.max(1));
        self.transport_limiter.spawn_sweeper(every);
        self.api_key_limiter.spawn_sweeper(every);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JsonRpcNotification> {
        self.notifications.subscribe()
    }
}
