//! Application state shared by the CLI commands.

use crate::error::CommandError;
use registra_browser::{
    BrowserEngine, FingerprintConfig, HttpTransport, HttpTransportConfig, PortalTransport,
};
use registra_core::{AppConfig, TransportKind};
use registra_engine::QueryEngine;
use registra_portal::{PortalLoader, PortalRegistry};
use registra_solver::{PollingSolver, TwoCaptchaService};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration plus the loaded portal registry.
pub struct AppState {
    /// Effective configuration (file, then environment overrides)
    pub config: AppConfig,
    /// Portal definitions loaded at startup
    pub registry: Arc<PortalRegistry>,
}

impl AppState {
    /// Load configuration and portal definitions.
    ///
    /// An explicit `config_path` replaces the XDG config file; environment
    /// overrides apply either way.
    pub fn load(config_path: Option<&Path>) -> Result<Self, CommandError> {
        let config = match config_path {
            Some(path) => {
                let mut config = AppConfig::load_from(path)?;
                config.apply_env_overrides();
                config.validate()?;
                config
            }
            None => AppConfig::load_with_env()?,
        };
        Self::with_config(config)
    }

    /// Build state from an already validated configuration.
    pub fn with_config(config: AppConfig) -> Result<Self, CommandError> {
        let loader = PortalLoader::from_config(&config.portals)?;
        let registry = PortalRegistry::load_from(&loader)?;
        info!(
            portals = registry.count(),
            dir = %loader.definitions_dir().display(),
            "Loaded portal definitions"
        );
        Ok(Self {
            config,
            registry: Arc::new(registry),
        })
    }

    /// Solver over the configured service.
    pub fn solver(&self) -> Result<PollingSolver, CommandError> {
        let service = TwoCaptchaService::from_config(&self.config.solver)?;
        Ok(PollingSolver::new(Arc::new(service), &self.config.solver))
    }

    /// Transport selected by `[transport].kind`.
    ///
    /// The browser transport launches Chromium, so it is only built when a
    /// query actually runs.
    pub async fn transport(&self) -> Result<Arc<dyn PortalTransport>, CommandError> {
        let settings = &self.config.transport;
        let transport: Arc<dyn PortalTransport> = match settings.kind {
            TransportKind::Http => Arc::new(HttpTransport::new(HttpTransportConfig {
                timeout: settings.timeout(),
                user_agent: settings.user_agent.clone(),
                accept_invalid_certs: settings.accept_invalid_certs,
                max_redirects: settings.max_redirects,
            })),
            TransportKind::Browser => {
                let fingerprint = FingerprintConfig::from_config(settings.user_agent.as_deref());
                Arc::new(BrowserEngine::launch(settings.headless, fingerprint).await?)
            }
        };
        debug!(transport = transport.name(), "Transport ready");
        Ok(transport)
    }

    /// Query engine wired to the configured transport and solver.
    pub async fn engine(&self) -> Result<QueryEngine, CommandError> {
        let solver = self.solver()?;
        let transport = self.transport().await?;
        Ok(QueryEngine::new(
            Arc::clone(&self.registry),
            transport,
            Arc::new(solver),
            self.config.engine.clone(),
        ))
    }
}
