use std::fmt;

use super::endpoints::Endpoints;
use super::error::AuthError;
use super::signin::{api_error, auth_headers, required_header};
use crate::context::RequestContext;
use crate::session::{Session, SigninTicket};

pub const TWO_FA_CODE_LENGTH: usize = 6;

/// Apple error code for an incorrect verification code.
const WRONG_CODE_MARKER: &str = "-21669";

/// Proof that the session was trusted after a second factor. Its session
/// token replaces the ticket's for the final account-login.
#[derive(Clone, PartialEq, Eq)]
pub struct TrustCertificate {
    pub trust_token: String,
    pub session_token: String,
}

impl fmt::Debug for TrustCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrustCertificate(<redacted>)")
    }
}

pub fn is_valid_code(code: &str) -> bool {
    code.len() == TWO_FA_CODE_LENGTH && code.chars().all(|c| c.is_ascii_digit())
}

/// Send the code from a trusted device to `/verify/trusteddevice/securitycode`.
pub(crate) async fn verify_code(
    ctx: &RequestContext,
    session: &Session,
    endpoints: &Endpoints,
    oauth_client_id: &str,
    ticket: &SigninTicket,
    code: &str,
) -> Result<(), AuthError> {
    let url = endpoints.verify_code();
    let mut headers = auth_headers(
        oauth_client_id,
        session.client_id(),
        &endpoints.home,
        Some(ticket),
    )?;
    headers.insert("Accept", reqwest::header::HeaderValue::from_static("application/json"));
    let body = serde_json::json!({
        "securityCode": {
            "code": code,
        }
    });

    tracing::debug!("POST {}", url);
    let response = ctx
        .guard(session.client().post(&url).headers(headers).json(&body).send())
        .await
        .ok_or(AuthError::Cancelled)??;

    if response.status().is_success() {
        tracing::debug!("Code verification successful");
        return Ok(());
    }
    match api_error(response).await {
        AuthError::ApiError { message, .. } if message.contains(WRONG_CODE_MARKER) => {
            tracing::error!("Code verification failed: wrong code");
            Err(AuthError::InvalidTwoFactorCode)
        }
        other => Err(other),
    }
}

/// Ask Apple to trust this session, yielding the tokens for the final
/// account-login.
pub(crate) async fn trust_session(
    ctx: &RequestContext,
    session: &Session,
    endpoints: &Endpoints,
    oauth_client_id: &str,
    ticket: &SigninTicket,
) -> Result<TrustCertificate, AuthError> {
    let url = endpoints.trust();
    let headers = auth_headers(
        oauth_client_id,
        session.client_id(),
        &endpoints.home,
        Some(ticket),
    )?;

    tracing::debug!("GET {}", url);
    let response = ctx
        .guard(session.client().get(&url).headers(headers).send())
        .await
        .ok_or(AuthError::Cancelled)??;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    Ok(TrustCertificate {
        trust_token: required_header(&response, "X-Apple-TwoSV-Trust-Token")?,
        session_token: required_header(&response, "X-Apple-Session-Token")?,
    })
}
