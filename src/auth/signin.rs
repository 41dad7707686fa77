use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};

use super::endpoints::Endpoints;
use super::error::AuthError;
use super::responses::AccountLogin;
use super::twofa::TrustCertificate;
use crate::context::RequestContext;
use crate::session::{Session, SigninTicket};

/// Response headers that make up a [`SigninTicket`].
const SESSION_ID_HEADER: &str = "X-Apple-ID-Session-Id";
const SESSION_TOKEN_HEADER: &str = "X-Apple-Session-Token";
const SCNT_HEADER: &str = "scnt";
const ACCOUNT_COUNTRY_HEADER: &str = "X-Apple-ID-Account-Country";

/// The OAuth headers Apple's idmsa endpoints require on every call. The
/// 2FA and trust steps additionally carry the ticket's `scnt` and session id.
pub(crate) fn auth_headers(
    oauth_client_id: &str,
    client_id: &str,
    redirect_uri: &str,
    ticket: Option<&SigninTicket>,
) -> Result<HeaderMap, AuthError> {
    let mut headers = HeaderMap::new();
    headers.insert("Accept", HeaderValue::from_static("*/*"));
    headers.insert("Content-Type", HeaderValue::from_static("application/json"));
    headers.insert("X-Apple-OAuth-Client-Id", HeaderValue::from_str(oauth_client_id)?);
    headers.insert(
        "X-Apple-OAuth-Client-Type",
        HeaderValue::from_static("firstPartyAuth"),
    );
    headers.insert(
        "X-Apple-OAuth-Redirect-URI",
        HeaderValue::from_str(redirect_uri)?,
    );
    headers.insert(
        "X-Apple-OAuth-Require-Grant-Code",
        HeaderValue::from_static("true"),
    );
    headers.insert(
        "X-Apple-OAuth-Response-Mode",
        HeaderValue::from_static("web_message"),
    );
    headers.insert(
        "X-Apple-OAuth-Response-Type",
        HeaderValue::from_static("code"),
    );
    headers.insert("X-Apple-OAuth-State", HeaderValue::from_str(client_id)?);
    headers.insert("X-Apple-Widget-Key", HeaderValue::from_str(oauth_client_id)?);

    if let Some(ticket) = ticket {
        if !ticket.scnt.is_empty() {
            headers.insert(SCNT_HEADER, HeaderValue::from_str(&ticket.scnt)?);
        }
        headers.insert(SESSION_ID_HEADER, HeaderValue::from_str(&ticket.session_id)?);
    }

    Ok(headers)
}

fn header_str(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub(crate) fn required_header(response: &Response, name: &str) -> Result<String, AuthError> {
    header_str(response, name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::missing(&format!("header {}", name)))
}

/// Collapse a non-success response into an [`AuthError::ApiError`].
pub(crate) async fn api_error(response: Response) -> AuthError {
    let code = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    AuthError::ApiError { code, message }
}

fn ticket_from(response: &Response) -> Result<SigninTicket, AuthError> {
    Ok(SigninTicket {
        session_id: required_header(response, SESSION_ID_HEADER)?,
        session_token: required_header(response, SESSION_TOKEN_HEADER)?,
        scnt: header_str(response, SCNT_HEADER).unwrap_or_default(),
        account_country: header_str(response, ACCOUNT_COUNTRY_HEADER).unwrap_or_default(),
    })
}

/// Submit the credentials. 409 is Apple's "credentials OK, second factor
/// follows" and still carries the ticket headers.
pub(crate) async fn signin(
    ctx: &RequestContext,
    session: &Session,
    endpoints: &Endpoints,
    oauth_client_id: &str,
    username: &str,
    password: &str,
) -> Result<SigninTicket, AuthError> {
    let url = endpoints.signin();
    let headers = auth_headers(oauth_client_id, session.client_id(), &endpoints.home, None)?;
    let body = serde_json::json!({
        "accountName": username,
        "password": password,
        "rememberMe": true,
        "trustTokens": [],
    });

    tracing::debug!("POST {}", url);
    let response = ctx
        .guard(session.client().post(&url).headers(headers).json(&body).send())
        .await
        .ok_or(AuthError::Cancelled)??;

    match response.status() {
        s if s.is_success() || s == StatusCode::CONFLICT => {
            let ticket = ticket_from(&response)?;
            tracing::debug!("Signin accepted (HTTP {})", s.as_u16());
            Ok(ticket)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::FailedLogin(
            "Invalid email/password combination.".to_string(),
        )),
        _ => Err(api_error(response).await),
    }
}

/// Exchange the ticket (or, after 2FA, the trust certificate) for web
/// session cookies and the account's service map.
pub(crate) async fn account_login(
    ctx: &RequestContext,
    session: &Session,
    endpoints: &Endpoints,
    ticket: &SigninTicket,
    trust: Option<&TrustCertificate>,
) -> Result<AccountLogin, AuthError> {
    let url = endpoints.account_login();
    let (token, trust_token) = match trust {
        Some(t) => (t.session_token.as_str(), t.trust_token.as_str()),
        None => (ticket.session_token.as_str(), ""),
    };
    let body = serde_json::json!({
        "accountCountryCode": ticket.account_country,
        "dsWebAuthToken": token,
        "extended_login": true,
        "trustToken": trust_token,
    });

    tracing::debug!("POST {}", url);
    let response = ctx
        .guard(session.client().post(&url).json(&body).send())
        .await
        .ok_or(AuthError::Cancelled)??;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    let text = ctx
        .guard(response.text())
        .await
        .ok_or(AuthError::Cancelled)??;
    AccountLogin::parse(&text)
}

/// Whether the session's cookies are still accepted. Any failure other than
/// cancellation just means "log in again".
pub(crate) async fn validate(
    ctx: &RequestContext,
    session: &Session,
    endpoints: &Endpoints,
) -> Result<bool, AuthError> {
    let url = endpoints.validate();
    tracing::debug!("GET {}", url);
    match ctx.guard(session.client().get(&url).send()).await {
        None => Err(AuthError::Cancelled),
        Some(Ok(response)) => {
            let ok = response.status().is_success();
            if !ok {
                tracing::debug!("Session validation returned HTTP {}", response.status());
            }
            Ok(ok)
        }
        Some(Err(e)) => {
            tracing::warn!("Session validation failed: {}", e);
            Ok(false)
        }
    }
}
