//! iCloud web login: signin → optional 2FA → trust → account-login.
//!
//! A persisted cookie set that still validates short-circuits the whole
//! flow. Only cookies and the [`AccountContext`](crate::store::AccountContext)
//! are persisted; signin tickets and trust certificates stay in memory.

pub mod endpoints;
pub mod error;
pub mod responses;
pub mod signin;
pub mod twofa;

use std::sync::Arc;

use self::endpoints::Endpoints;
use self::error::AuthError;
use self::responses::AccountLogin;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::session::{Session, SessionStore};
use crate::store::{ConfigStore, CookieStore};
use crate::types::UserIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginOutcome {
    pub requires_2fa: bool,
}

pub struct AuthenticationService {
    sessions: Arc<SessionStore>,
    config: Arc<dyn ConfigStore>,
    cookies: Arc<dyn CookieStore>,
    endpoints: Endpoints,
    oauth_client_id: String,
}

impl AuthenticationService {
    pub fn new(
        sessions: Arc<SessionStore>,
        config: Arc<dyn ConfigStore>,
        cookies: Arc<dyn CookieStore>,
        endpoints: Endpoints,
        oauth_client_id: &str,
    ) -> Self {
        Self {
            sessions,
            config,
            cookies,
            endpoints,
            oauth_client_id: oauth_client_id.to_string(),
        }
    }

    fn session(&self, identity: &UserIdentity) -> Result<Arc<Session>> {
        Ok(self.sessions.get(identity).map_err(AuthError::from)?)
    }

    /// Log in, reusing persisted cookies when they still validate.
    pub async fn login(
        &self,
        ctx: &RequestContext,
        username: &str,
        password: &str,
    ) -> Result<LoginOutcome> {
        let identity = &ctx.identity;

        if self.try_cookie_login(ctx).await? {
            tracing::info!("Existing session is still valid");
            return Ok(LoginOutcome {
                requires_2fa: false,
            });
        }

        let session = self.session(identity)?;
        tracing::info!("Authenticating {}...", username);
        let ticket = signin::signin(
            ctx,
            &session,
            &self.endpoints,
            &self.oauth_client_id,
            username,
            password,
        )
        .await?;
        self.sessions
            .set_ticket(identity, ticket.clone())
            .map_err(AuthError::from)?;

        let login = signin::account_login(ctx, &session, &self.endpoints, &ticket, None).await?;
        self.record_account(identity, Some(username), &login).await?;

        if login.requires_2fa {
            tracing::info!("Two-factor authentication is required");
        } else {
            self.persist_cookies(identity, &session).await?;
            self.sessions.clear_ticket(identity);
            tracing::info!("Authentication completed successfully");
        }

        Ok(LoginOutcome {
            requires_2fa: login.requires_2fa,
        })
    }

    /// Complete a login that asked for a second factor.
    pub async fn submit_second_factor(&self, ctx: &RequestContext, code: &str) -> Result<()> {
        let identity = &ctx.identity;
        let ticket = self
            .sessions
            .ticket(identity)
            .ok_or(Error::NoPendingSignin)?;

        let code = code.trim();
        if !twofa::is_valid_code(code) {
            tracing::error!(
                "Invalid 2FA code: must be exactly {} digits",
                twofa::TWO_FA_CODE_LENGTH
            );
            return Err(AuthError::InvalidTwoFactorCode.into());
        }

        let session = self.session(identity)?;
        twofa::verify_code(
            ctx,
            &session,
            &self.endpoints,
            &self.oauth_client_id,
            &ticket,
            code,
        )
        .await?;
        let trust = twofa::trust_session(
            ctx,
            &session,
            &self.endpoints,
            &self.oauth_client_id,
            &ticket,
        )
        .await?;
        let login =
            signin::account_login(ctx, &session, &self.endpoints, &ticket, Some(&trust)).await?;
        if login.requires_2fa {
            tracing::warn!("Account still reports a pending 2FA challenge after trust");
        }

        self.record_account(identity, None, &login).await?;
        self.persist_cookies(identity, &session).await?;
        self.sessions.clear_ticket(identity);
        tracing::info!("Two-factor authentication completed");
        Ok(())
    }

    /// Probe the session's cookies with a lightweight authenticated request.
    pub async fn validate_cookie(&self, ctx: &RequestContext) -> Result<bool> {
        let session = self.session(&ctx.identity)?;
        Ok(signin::validate(ctx, &session, &self.endpoints).await?)
    }

    /// Fast path: replay persisted cookies and check them. Anything short of
    /// a validated cookie set with a known catalog endpoint clears the
    /// persisted cookies and starts over from a fresh session.
    async fn try_cookie_login(&self, ctx: &RequestContext) -> Result<bool> {
        let identity = &ctx.identity;
        let Some(cookies) = self.cookies.get(identity).await? else {
            return Ok(false);
        };

        let account = self.config.get(identity).await?;
        if account.is_valid() {
            let session = self.session(identity)?;
            let loaded = session.jar().load(&cookies);
            tracing::debug!("Loaded {} persisted cookies", loaded);
            if loaded > 0 && self.validate_cookie(ctx).await? {
                return Ok(true);
            }
        }

        tracing::info!("Persisted session is no longer valid, logging in again");
        self.cookies.clear(identity).await?;
        self.sessions.reset(identity);
        Ok(false)
    }

    async fn record_account(
        &self,
        identity: &UserIdentity,
        apple_id: Option<&str>,
        login: &AccountLogin,
    ) -> Result<()> {
        if let Some(dsid) = &login.dsid {
            tracing::debug!("Account dsid {}", dsid);
        }
        let apple_id = apple_id.map(str::to_string);
        let catalog_url = login.catalog_url.clone();
        let requires_2fa = login.requires_2fa;
        self.config
            .update(
                identity,
                Box::new(move |account| {
                    if let Some(apple_id) = apple_id {
                        account.apple_id = apple_id;
                    }
                    account.catalog_url = catalog_url;
                    account.requires_2fa = requires_2fa;
                }),
            )
            .await?;
        Ok(())
    }

    async fn persist_cookies(&self, identity: &UserIdentity, session: &Session) -> Result<()> {
        let cookies = session.jar().snapshot();
        self.cookies.put(identity, cookies).await?;
        Ok(())
    }
}
