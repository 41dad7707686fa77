//! The surface a presentation shell drives: log in, finish a second
//! factor, download everything, cancel.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::auth::endpoints::Endpoints;
use crate::auth::{AuthenticationService, LoginOutcome};
use crate::config::Config;
use crate::context::RequestContext;
use crate::download::{DownloadOrchestrator, DownloadSummary, Downloader, HttpDownloader};
use crate::error::{Error, Result};
use crate::fault;
use crate::icloud::{CatalogService, PhotoCatalog};
use crate::progress::ProgressTracker;
use crate::session::SessionStore;
use crate::store::{ConfigStore, CookieStore, JsonConfigStore, JsonCookieStore};
use crate::types::UserIdentity;

/// Collaborators an [`App`] is assembled from.
pub struct AppParts {
    pub sessions: Arc<SessionStore>,
    pub config_store: Arc<dyn ConfigStore>,
    pub cookie_store: Arc<dyn CookieStore>,
    pub endpoints: Endpoints,
    pub oauth_client_id: String,
    pub catalog: Arc<dyn PhotoCatalog>,
    pub downloader: Arc<dyn Downloader>,
    pub max_parallel: usize,
}

pub struct App {
    auth: AuthenticationService,
    orchestrator: DownloadOrchestrator,
    identity: Mutex<Option<UserIdentity>>,
    cancel: Mutex<CancellationToken>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl App {
    /// Wire the production stack: JSON stores under the data directory,
    /// Apple's endpoints for the configured domain, HTTPS downloader.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let endpoints = Endpoints::for_domain(config.domain);
        let sessions = Arc::new(SessionStore::new(&endpoints.home));
        let config_store: Arc<dyn ConfigStore> = Arc::new(JsonConfigStore::new(&config.data_dir));
        let cookie_store: Arc<dyn CookieStore> = Arc::new(JsonCookieStore::new(&config.data_dir));
        let catalog = Arc::new(CatalogService::new(sessions.clone(), config_store.clone()));
        let downloader = Arc::new(HttpDownloader::new(config.retry.clone())?);

        Ok(Self::from_parts(AppParts {
            sessions,
            config_store,
            cookie_store,
            endpoints,
            oauth_client_id: config.oauth_client_id.clone(),
            catalog,
            downloader,
            max_parallel: config.max_parallel,
        }))
    }

    pub fn from_parts(parts: AppParts) -> Self {
        let auth = AuthenticationService::new(
            parts.sessions,
            parts.config_store,
            parts.cookie_store,
            parts.endpoints,
            &parts.oauth_client_id,
        );
        let orchestrator =
            DownloadOrchestrator::new(parts.catalog, parts.downloader, parts.max_parallel);
        Self {
            auth,
            orchestrator,
            identity: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    fn identity_slot(&self) -> MutexGuard<'_, Option<UserIdentity>> {
        self.identity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The token for a new call. A token that was cancelled is replaced, so
    /// `cancel()` only stops calls already running.
    fn token(&self) -> CancellationToken {
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
        token.clone()
    }

    fn context(&self, identity: UserIdentity) -> RequestContext {
        RequestContext::new(identity, self.token())
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome> {
        let identity = UserIdentity::from_credentials(username, password);
        *self.identity_slot() = Some(identity.clone());

        let ctx = self.context(identity);
        let span = tracing::info_span!("login", request_id = %ctx.request_id);
        let outcome = self
            .auth
            .login(&ctx, username, password)
            .instrument(span)
            .await;
        if let Err(e) = &outcome {
            tracing::error!("Login failed: {}", e);
        }
        outcome
    }

    pub async fn submit_second_factor(&self, code: &str) -> Result<()> {
        let identity = self.identity_slot().clone().ok_or(Error::NoPendingSignin)?;
        let ctx = self.context(identity);
        let span = tracing::info_span!("second_factor", request_id = %ctx.request_id);
        let result = self
            .auth
            .submit_second_factor(&ctx, code)
            .instrument(span)
            .await;
        if let Err(e) = &result {
            tracing::error!("Verification failed: {}", e);
        }
        result
    }

    /// Download the logged-in account's whole library into `dir`. Runs
    /// behind the fault barrier; `progress`, when given, is closed when
    /// this returns.
    pub async fn download_all(
        &self,
        dir: &Path,
        progress: Option<ProgressTracker>,
    ) -> Result<DownloadSummary> {
        let identity = self.identity_slot().clone().ok_or(Error::NotLoggedIn)?;
        let mut ctx = self.context(identity);
        if let Some(progress) = &progress {
            ctx = ctx.with_progress(progress.clone());
        }
        let span = tracing::info_span!("download_all", request_id = %ctx.request_id);

        let orchestrator = self.orchestrator.clone();
        let dir = dir.to_path_buf();
        let result = fault::run_guarded(
            async move { orchestrator.run(&ctx, &dir).await }.instrument(span),
        )
        .await;

        if let Some(progress) = &progress {
            progress.close().await;
        }
        if let Err(e) = &result {
            if e.is_cancelled() {
                tracing::info!("Download cancelled");
            } else {
                tracing::error!("Download failed: {}", e);
            }
        }
        result
    }

    /// Stop whatever call is running. In-flight requests observe it and
    /// return [`Error::Cancelled`] or an equivalent.
    pub fn cancel(&self) {
        let token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if !token.is_cancelled() {
            tracing::info!("Cancelling current operation");
            token.cancel();
        }
    }
}
