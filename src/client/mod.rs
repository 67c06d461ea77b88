pub mod auth;

use crate::{
    config::ClientConfig,
    error::{Result, StabilityError},
    proto::{
        dashboard_service_client::DashboardServiceClient,
        engines_service_client::EnginesServiceClient,
        generation_service_client::GenerationServiceClient,
        project_service_client::ProjectServiceClient, Answer, EmptyRequest, EngineInfo,
        ListEnginesRequest, ListProjectRequest, Project, Request, User,
    },
};
use once_cell::sync::OnceCell;
use std::fmt;
use tonic::{
    codec::Streaming,
    service::interceptor::InterceptedService,
    transport::{Channel, ClientTlsConfig, Endpoint},
};

pub use auth::BearerAuth;

/// Channel shared by every service stub, with the bearer interceptor applied.
pub type AuthChannel = InterceptedService<Channel, BearerAuth>;

/// Client for the Stability gRPC API.
///
/// Construction only validates the configuration. The channel and each
/// service stub are created on first use and reused afterwards, so the
/// accessors must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct StabilityClient {
    endpoint: Endpoint,
    auth: BearerAuth,
    channel: OnceCell<Channel>,
    dashboard: OnceCell<DashboardServiceClient<AuthChannel>>,
    engines: OnceCell<EnginesServiceClient<AuthChannel>>,
    generation: OnceCell<GenerationServiceClient<AuthChannel>>,
    project: OnceCell<ProjectServiceClient<AuthChannel>>,
}

impl StabilityClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api_key = config.api_key.as_deref().unwrap_or_default();
        if api_key.is_empty() {
            return Err(StabilityError::invalid_argument(format!(
                "API key is not set; pass one in ClientConfig or set {}",
                crate::config::API_KEY_VARIABLE_NAME
            )));
        }

        let host = config.host_or_default();
        let auth = BearerAuth::new(api_key)?;
        let endpoint = build_endpoint(host)?;

        log::info!("Stability client configured for {}", host);

        Ok(Self {
            endpoint,
            auth,
            channel: OnceCell::new(),
            dashboard: OnceCell::new(),
            engines: OnceCell::new(),
            generation: OnceCell::new(),
            project: OnceCell::new(),
        })
    }

    /// Reads the key from `STABILITY_KEY` (and optionally the host from
    /// `STABILITY_HOST`).
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env())
    }

    pub fn dashboard(&self) -> DashboardServiceClient<AuthChannel> {
        self.dashboard
            .get_or_init(|| {
                log::debug!("Creating DashboardService client");
                DashboardServiceClient::with_interceptor(self.channel(), self.auth.clone())
            })
            .clone()
    }

    pub fn engines(&self) -> EnginesServiceClient<AuthChannel> {
        self.engines
            .get_or_init(|| {
                log::debug!("Creating EnginesService client");
                EnginesServiceClient::with_interceptor(self.channel(), self.auth.clone())
            })
            .clone()
    }

    pub fn generation(&self) -> GenerationServiceClient<AuthChannel> {
        self.generation
            .get_or_init(|| {
                log::debug!("Creating GenerationService client");
                GenerationServiceClient::with_interceptor(self.channel(), self.auth.clone())
            })
            .clone()
    }

    pub fn project(&self) -> ProjectServiceClient<AuthChannel> {
        self.project
            .get_or_init(|| {
                log::debug!("Creating ProjectService client");
                ProjectServiceClient::with_interceptor(self.channel(), self.auth.clone())
            })
            .clone()
    }

    /// Starts a generation and returns the answer stream, ready to be handed
    /// to [`crate::AnswerStreamExt`].
    pub async fn generate(&self, request: Request) -> Result<Streaming<Answer>> {
        log::info!(
            "Generating with engine {} ({} prompt(s))",
            request.engine_id,
            request.prompt.len()
        );
        let response = self.generation().generate(request).await?;
        Ok(response.into_inner())
    }

    pub async fn list_engines(&self) -> Result<Vec<EngineInfo>> {
        let response = self.engines().list_engines(ListEnginesRequest {}).await?;
        Ok(response.into_inner().engine)
    }

    pub async fn me(&self) -> Result<User> {
        let response = self.dashboard().get_me(EmptyRequest {}).await?;
        Ok(response.into_inner())
    }

    pub async fn list_projects(&self, owner_id: Option<String>) -> Result<Streaming<Project>> {
        let response = self
            .project()
            .list(ListProjectRequest { owner_id })
            .await?;
        Ok(response.into_inner())
    }

    fn channel(&self) -> Channel {
        self.channel
            .get_or_init(|| {
                log::debug!("Opening lazy channel to {}", self.endpoint.uri());
                self.endpoint.connect_lazy()
            })
            .clone()
    }
}

impl fmt::Debug for StabilityClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StabilityClient")
            .field("endpoint", self.endpoint.uri())
            .field("connected", &self.channel.get().is_some())
            .finish_non_exhaustive()
    }
}

fn build_endpoint(host: &str) -> Result<Endpoint> {
    let endpoint = Endpoint::from_shared(host.to_string())?;
    if endpoint.uri().scheme_str() == Some("https") {
        return Ok(endpoint.tls_config(ClientTlsConfig::new().with_webpki_roots())?);
    }
    Ok(endpoint)
}
