use std::sync::{Mutex, PoisonError};

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use url::Url;

use crate::store::cookies::cookie_name;
use crate::store::{CookieEntry, CookieSet};

/// Whether a raw `Set-Cookie` value has an `Expires`/`Max-Age` in the past.
pub(crate) fn is_cookie_expired(cookie_str: &str, now: &chrono::DateTime<chrono::Utc>) -> bool {
    let Ok(parsed) = cookie::Cookie::parse(cookie_str) else {
        return false;
    };
    if let Some(max_age) = parsed.max_age() {
        if max_age.is_zero() || max_age.is_negative() {
            return true;
        }
    }
    if let Some(expires) = parsed.expires_datetime() {
        let expires_utc = chrono::DateTime::<chrono::Utc>::from(std::time::SystemTime::from(expires));
        return expires_utc < *now;
    }
    false
}

/// Cookie jar that delegates to `reqwest`'s [`Jar`] for request handling and
/// additionally records every `Set-Cookie` it sees, so the jar contents can
/// be persisted and replayed into a new process.
#[derive(Debug, Default)]
pub struct RecordingJar {
    inner: Jar,
    entries: Mutex<Vec<CookieEntry>>,
}

impl RecordingJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay persisted cookies, skipping expired or unparsable entries.
    /// Returns how many were loaded.
    pub fn load(&self, cookies: &[CookieEntry]) -> usize {
        let now = chrono::Utc::now();
        let mut loaded = 0;
        for entry in cookies {
            if is_cookie_expired(&entry.cookie, &now) {
                tracing::debug!("Pruning expired cookie from {}", entry.url);
                continue;
            }
            let Ok(url) = entry.url.parse::<Url>() else {
                tracing::debug!("Skipping cookie with invalid URL {}", entry.url);
                continue;
            };
            self.inner.add_cookie_str(&entry.cookie, &url);
            self.record(entry.clone());
            loaded += 1;
        }
        loaded
    }

    /// Current contents in persistable form.
    pub fn snapshot(&self) -> CookieSet {
        let now = chrono::Utc::now();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| !is_cookie_expired(&e.cookie, &now))
            .cloned()
            .collect()
    }

    fn record(&self, entry: CookieEntry) {
        let name = entry.name();
        if name.is_empty() {
            return;
        }
        let host = host_of(&entry.url);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        // Newest value for a cookie name on a host wins
        entries.retain(|e| !(e.name() == name && host_of(&e.url) == host));
        entries.push(entry);
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

impl CookieStore for RecordingJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let headers: Vec<&HeaderValue> = cookie_headers.collect();
        let now = chrono::Utc::now();
        for value in &headers {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            if is_cookie_expired(raw, &now) {
                let name = cookie_name(raw);
                tracing::debug!("Dropping expired Set-Cookie: {}", name);
                let host = url.host_str().map(str::to_string);
                self.entries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|e| !(e.name() == name && host_of(&e.url) == host));
                continue;
            }
            self.record(CookieEntry {
                url: url.to_string(),
                cookie: raw.to_string(),
            });
        }
        self.inner.set_cookies(&mut headers.into_iter(), url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.inner.cookies(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;

    fn url(s: &str) -> Url {
        s.parse().unwrap()
    }

    #[test]
    fn test_is_cookie_expired() {
        let now = chrono::Utc::now();
        assert!(is_cookie_expired(
            "a=b; Expires=Wed, 21 Oct 2015 07:28:00 GMT",
            &now
        ));
        assert!(!is_cookie_expired(
            "a=b; Expires=Wed, 21 Oct 2099 07:28:00 GMT",
            &now
        ));
        assert!(is_cookie_expired("a=b; Max-Age=0", &now));
        assert!(!is_cookie_expired("a=b", &now));
        assert!(!is_cookie_expired("not a cookie", &now));
    }

    #[test]
    fn test_set_cookies_records_and_serves() {
        let jar = RecordingJar::new();
        let u = url("https://setup.icloud.com/setup/ws/1/accountLogin");
        let v1 = HeaderValue::from_static("X-APPLE-WEBAUTH-USER=abc; Path=/; Secure");
        let v2 = HeaderValue::from_static("X-APPLE-DS-WEB-SESSION-TOKEN=tok; Path=/; Secure");
        jar.set_cookies(&mut [&v1, &v2].into_iter(), &u);

        let snap = jar.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].url, u.to_string());

        let header = jar
            .cookies(&url("https://setup.icloud.com/setup/ws/1/validate"))
            .unwrap();
        let header = header.to_str().unwrap();
        assert!(header.contains("X-APPLE-WEBAUTH-USER=abc"));
        assert!(header.contains("X-APPLE-DS-WEB-SESSION-TOKEN=tok"));
    }

    #[test]
    fn test_same_name_same_host_replaced() {
        let jar = RecordingJar::new();
        let a = url("https://setup.icloud.com/setup/ws/1/accountLogin");
        let b = url("https://setup.icloud.com/setup/ws/1/validate");
        let v1 = HeaderValue::from_static("tok=1; Path=/");
        let v2 = HeaderValue::from_static("tok=2; Path=/");
        jar.set_cookies(&mut [&v1].into_iter(), &a);
        jar.set_cookies(&mut [&v2].into_iter(), &b);
        let snap = jar.snapshot();
        assert_eq!(snap.len(), 1);
        assert!(snap[0].cookie.starts_with("tok=2"));
    }

    #[test]
    fn test_expired_set_cookie_removes_entry() {
        let jar = RecordingJar::new();
        let u = url("https://setup.icloud.com/");
        let set = HeaderValue::from_static("tok=1; Path=/");
        let expire = HeaderValue::from_static("tok=; Path=/; Max-Age=0");
        jar.set_cookies(&mut [&set].into_iter(), &u);
        jar.set_cookies(&mut [&expire].into_iter(), &u);
        assert!(jar.snapshot().is_empty());
    }

    #[test]
    fn test_load_prunes_expired() {
        let jar = RecordingJar::new();
        let loaded = jar.load(&[
            CookieEntry {
                url: "https://setup.icloud.com/".into(),
                cookie: "fresh=1; Path=/; Expires=Wed, 21 Oct 2099 07:28:00 GMT".into(),
            },
            CookieEntry {
                url: "https://setup.icloud.com/".into(),
                cookie: "stale=1; Path=/; Expires=Wed, 21 Oct 2015 07:28:00 GMT".into(),
            },
            CookieEntry {
                url: "not a url".into(),
                cookie: "bad=1".into(),
            },
        ]);
        assert_eq!(loaded, 1);
        assert_eq!(jar.snapshot().len(), 1);
        let header = jar.cookies(&url("https://setup.icloud.com/x")).unwrap();
        assert_eq!(header.to_str().unwrap(), "fresh=1");
    }
}
