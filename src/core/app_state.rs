use std::sync::Arc;

use crate::captcha::CachedSolver;
use crate::core::config::HarvestConfig;
use crate::portal::{CasePortal, EcourtsClient, PortalKind};
use crate::sink::{CaseSink, JsonDirSink};

pub struct AppState {
    pub http_client: reqwest::Client,
    pub config: Arc<HarvestConfig>,
    pub portal: Arc<dyn CasePortal>,
    pub solver: Arc<CachedSolver>,
    pub sink: Arc<dyn CaseSink>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("portal", &self.portal.kind().as_str())
            .field("captcha_backend", &self.solver.backend_name())
            .finish()
    }
}

impl AppState {
    pub fn new(config: HarvestConfig) -> anyhow::Result<Self> {
        // Cookie store is load-bearing: the portal ties the app token to the
        // session cookie it sets on the landing page.
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        let kind = PortalKind::parse_str(&config.resolve_portal()).unwrap_or_else(|| {
            tracing::warn!(
                "unknown portal '{}', defaulting to district",
                config.resolve_portal()
            );
            PortalKind::District
        });
        let portal: Arc<dyn CasePortal> = Arc::new(EcourtsClient::new(
            http_client.clone(),
            kind,
            config.resolve_base_url(),
        )?);

        let solver = Arc::new(CachedSolver::new(crate::captcha::solver_from_config(
            &config.captcha,
            http_client.clone(),
        )));

        let sink: Arc<dyn CaseSink> = Arc::new(JsonDirSink::new(config.resolve_output_dir()));

        Ok(Self {
            http_client,
            config: Arc::new(config),
            portal,
            solver,
            sink,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn CaseSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Swap the portal implementation (tests use a scripted fake here).
    pub fn with_portal(mut self, portal: Arc<dyn CasePortal>) -> Self {
        self.portal = portal;
        self
    }

    pub fn with_solver(mut self, solver: Arc<CachedSolver>) -> Self {
        self.solver = solver;
        self
    }
}
