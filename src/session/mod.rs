//! Per-identity HTTP sessions.
//!
//! A [`Session`] owns the HTTP client and its cookie jar for one account and
//! lives for the rest of the process once created. The only mutable
//! per-session state, the pending [`SigninTicket`], is kept next to it in
//! the store's map so that a single mutex covers both. The mutex is only held
//! for map lookups and updates, never across a request.

pub mod jar;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use reqwest::Client;
use uuid::Uuid;

use self::jar::RecordingJar;
use crate::types::UserIdentity;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers captured from a successful signin, consumed by the 2FA, trust and
/// account-login steps. Never persisted.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SigninTicket {
    pub session_id: String,
    pub session_token: String,
    pub scnt: String,
    pub account_country: String,
}

impl fmt::Debug for SigninTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigninTicket")
            .field("session_id", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("scnt", &"<redacted>")
            .field("account_country", &self.account_country)
            .finish()
    }
}

/// HTTP client plus cookie jar for one account.
pub struct Session {
    client: Client,
    jar: Arc<RecordingJar>,
    client_id: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("cookies", &"<redacted>")
            .finish()
    }
}

impl Session {
    fn new(home_endpoint: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let jar = Arc::new(RecordingJar::new());

        // Origin/Referer are checked by Apple's CORS filters
        let mut default_headers = HeaderMap::new();
        if let Ok(origin) = HeaderValue::from_str(home_endpoint) {
            default_headers.insert(ORIGIN, origin);
        }
        if let Ok(referer) = HeaderValue::from_str(&format!("{}/", home_endpoint)) {
            default_headers.insert(REFERER, referer);
        }
        default_headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let client = Client::builder()
            .cookie_provider(jar.clone())
            .default_headers(default_headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            jar,
            client_id: format!("auth-{}", Uuid::new_v4()),
        })
    }

    /// The underlying client. `reqwest::Client` is an `Arc` internally, so
    /// borrowing it from a shared session is all callers need.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn jar(&self) -> &RecordingJar {
        &self.jar
    }

    /// Client-correlation id sent as the OAuth state on every auth call.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

struct Entry {
    session: Arc<Session>,
    ticket: Option<SigninTicket>,
}

/// Holds one [`Session`] per [`UserIdentity`].
pub struct SessionStore {
    home_endpoint: String,
    timeout: Duration,
    entries: Mutex<HashMap<UserIdentity, Entry>>,
}

impl SessionStore {
    pub fn new(home_endpoint: &str) -> Self {
        Self::with_timeout(home_endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(home_endpoint: &str, timeout: Duration) -> Self {
        Self {
            home_endpoint: home_endpoint.to_string(),
            timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserIdentity, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The session for `identity`, created on first use.
    pub fn get(&self, identity: &UserIdentity) -> Result<Arc<Session>, reqwest::Error> {
        let mut entries = self.lock();
        if let Some(entry) = entries.get(identity) {
            return Ok(entry.session.clone());
        }
        let session = Arc::new(Session::new(&self.home_endpoint, self.timeout)?);
        tracing::debug!(
            "Created session {} for {}",
            session.client_id(),
            identity
        );
        entries.insert(
            identity.clone(),
            Entry {
                session: session.clone(),
                ticket: None,
            },
        );
        Ok(session)
    }

    /// Replace the pending signin ticket. Creates the session if needed.
    pub fn set_ticket(
        &self,
        identity: &UserIdentity,
        ticket: SigninTicket,
    ) -> Result<(), reqwest::Error> {
        self.get(identity)?;
        if let Some(entry) = self.lock().get_mut(identity) {
            entry.ticket = Some(ticket);
        }
        Ok(())
    }

    pub fn ticket(&self, identity: &UserIdentity) -> Option<SigninTicket> {
        self.lock().get(identity).and_then(|e| e.ticket.clone())
    }

    pub fn clear_ticket(&self, identity: &UserIdentity) {
        if let Some(entry) = self.lock().get_mut(identity) {
            entry.ticket = None;
        }
    }

    /// Drop the session so the next [`get`](Self::get) starts with a fresh
    /// client and an empty jar.
    pub fn reset(&self, identity: &UserIdentity) {
        if self.lock().remove(identity).is_some() {
            tracing::debug!("Reset session for {}", identity);
        }
    }
}
