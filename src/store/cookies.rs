use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{JsonFile, StoreError};
use crate::types::UserIdentity;

pub const COOKIE_FILE_NAME: &str = "cookies.json";

/// A single persisted cookie: the request URL it was set for plus the raw
/// `Set-Cookie` header value. `reqwest`'s jar cannot be iterated, so cookies
/// are kept in this form and replayed into a fresh jar on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieEntry {
    pub url: String,
    pub cookie: String,
}

/// Name of a raw `Set-Cookie` value; empty when it does not parse.
pub fn cookie_name(raw: &str) -> String {
    cookie::Cookie::parse(raw)
        .map(|c| c.name().to_string())
        .unwrap_or_default()
}

impl CookieEntry {
    pub fn name(&self) -> String {
        cookie_name(&self.cookie)
    }
}

pub type CookieSet = Vec<CookieEntry>;

#[async_trait::async_trait]
pub trait CookieStore: Send + Sync {
    async fn get(&self, identity: &UserIdentity) -> Result<Option<CookieSet>, StoreError>;
    async fn put(&self, identity: &UserIdentity, cookies: CookieSet) -> Result<(), StoreError>;
    async fn clear(&self, identity: &UserIdentity) -> Result<(), StoreError>;
}

type CookieFile = BTreeMap<String, CookieSet>;

#[derive(Debug, Clone)]
pub struct JsonCookieStore {
    file: JsonFile,
}

impl JsonCookieStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            file: JsonFile::new(dir, COOKIE_FILE_NAME).discard_corrupt(),
        }
    }
}

#[async_trait::async_trait]
impl CookieStore for JsonCookieStore {
    async fn get(&self, identity: &UserIdentity) -> Result<Option<CookieSet>, StoreError> {
        let doc: CookieFile = self.file.load().await?;
        Ok(doc
            .get(identity.as_str())
            .filter(|set| !set.is_empty())
            .cloned())
    }

    async fn put(&self, identity: &UserIdentity, cookies: CookieSet) -> Result<(), StoreError> {
        let key = identity.as_str().to_string();
        let count = cookies.len();
        self.file
            .update(move |doc: &mut CookieFile| {
                doc.insert(key, cookies);
            })
            .await?;
        tracing::debug!("Saved {} cookies for {}", count, identity);
        Ok(())
    }

    async fn clear(&self, identity: &UserIdentity) -> Result<(), StoreError> {
        let key = identity.as_str().to_string();
        let removed = self
            .file
            .update(move |doc: &mut CookieFile| doc.remove(&key).is_some())
            .await?;
        if removed {
            tracing::debug!("Cleared persisted cookies for {}", identity);
        }
        Ok(())
    }
}
