use serde::Deserialize;

use super::error::AuthError;

/// Wire shape of `/accountLogin`. Every field is optional here so that
/// absence can be reported by name in [`AccountLogin::parse`] rather than as
/// a serde position.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountLoginResponse {
    #[serde(default)]
    ds_info: Option<DsInfo>,
    #[serde(default)]
    webservices: Option<Webservices>,
    #[serde(default)]
    hsa_challenge_required: Option<bool>,
    #[serde(default)]
    domain_to_use: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DsInfo {
    #[serde(default)]
    dsid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Webservices {
    #[serde(default)]
    ckdatabasews: Option<WebserviceEndpoint>,
}

#[derive(Debug, Deserialize)]
struct WebserviceEndpoint {
    #[serde(default)]
    url: Option<String>,
}

/// Validated `/accountLogin` result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLogin {
    pub requires_2fa: bool,
    /// `webservices.ckdatabasews.url`
    pub catalog_url: String,
    pub dsid: Option<String>,
}

impl AccountLogin {
    pub fn parse(body: &str) -> Result<Self, AuthError> {
        let raw: AccountLoginResponse = serde_json::from_str(body)?;

        if let Some(domain) = raw.domain_to_use {
            return Err(AuthError::WrongDomain(domain));
        }

        let requires_2fa = raw
            .hsa_challenge_required
            .ok_or_else(|| AuthError::missing("hsaChallengeRequired"))?;

        let catalog_url = raw
            .webservices
            .ok_or_else(|| AuthError::missing("webservices"))?
            .ckdatabasews
            .ok_or_else(|| AuthError::missing("webservices.ckdatabasews"))?
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AuthError::missing("webservices.ckdatabasews.url"))?;

        Ok(Self {
            requires_2fa,
            catalog_url,
            dsid: raw.ds_info.and_then(|d| d.dsid),
        })
    }
}
