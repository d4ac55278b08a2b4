//! Application state
//!
//! Shared state across all handlers. The engine sits behind a lock so a
//! config reload can swap in a rebuilt one while in-flight requests keep
//! the Arc they already cloned.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use sales_agent_agent::{EngineConfig, SalesEngine};
use sales_agent_config::{load_settings, DomainConfig, LlmSettings, Settings};
use sales_agent_llm::{BackendConfig, CompletionBackend, OpenAiBackend};
use sales_agent_persistence::PersistenceLayer;

use crate::rate_limit::RateLimiter;
use crate::ServerError;

/// Application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration wrapped in RwLock for hot reload
    pub settings: Arc<RwLock<Settings>>,
    /// Store handles, shared with the engine and the outbox worker
    pub stores: PersistenceLayer,
    /// Per-phone rate limiter
    pub limiter: Arc<RateLimiter>,
    engine: Arc<RwLock<Arc<SalesEngine>>>,
    /// Environment name for config reload
    env: Option<String>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        stores: PersistenceLayer,
        engine: SalesEngine,
        env: Option<String>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(&settings.server.rate_limit));
        Self {
            settings: Arc::new(RwLock::new(settings)),
            stores,
            limiter,
            engine: Arc::new(RwLock::new(Arc::new(engine))),
            env,
        }
    }

    /// Current engine. Clones the Arc out so no guard is held across an
    /// await point.
    pub fn engine(&self) -> Arc<SalesEngine> {
        self.engine.read().clone()
    }

    /// Re-read settings and the business catalog from disk and swap in
    /// a rebuilt engine. Transport, persistence and rate-limit settings
    /// only apply at startup.
    pub fn reload(&self) -> Result<(), ServerError> {
        let settings = load_settings(self.env.as_deref())
            .map_err(|e| ServerError::Configuration(format!("settings reload failed: {}", e)))?;
        let domain = DomainConfig::load(&settings.domain_config_path)
            .map_err(|e| ServerError::Configuration(format!("catalog reload failed: {}", e)))?;

        let backend = build_backend(&settings.llm);
        let engine = SalesEngine::new(
            self.stores.clone(),
            domain,
            EngineConfig::from_settings(&settings),
            backend,
        );

        *self.engine.write() = Arc::new(engine);
        *self.settings.write() = settings;

        tracing::info!("Configuration reloaded");
        Ok(())
    }
}

/// Build the completion backend from settings. None when the backend is
/// disabled or misconfigured; the classifier then runs on keyword
/// heuristics alone.
pub fn build_backend(llm: &LlmSettings) -> Option<Arc<dyn CompletionBackend>> {
    if !llm.enabled {
        return None;
    }
    let config = BackendConfig {
        model: llm.model.clone(),
        endpoint: llm.api_base.clone(),
        api_key: llm.api_key.clone(),
        max_tokens: llm.max_tokens,
        temperature: llm.temperature,
        timeout: Duration::from_secs(llm.timeout_seconds),
        max_retries: llm.max_retries,
        ..BackendConfig::default()
    };
    match OpenAiBackend::new(config) {
        Ok(backend) => Some(Arc::new(backend)),
        Err(e) => {
            tracing::warn!(error = %e, "Completion backend unavailable; using keyword heuristics");
            None
        }
    }
}
