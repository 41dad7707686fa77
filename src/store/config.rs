use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{JsonFile, StoreError};
use crate::types::UserIdentity;

pub const CONFIG_FILE_NAME: &str = "app_config.json";
pub const DEFAULT_MAX_PARALLEL: usize = 3;

/// Public OAuth client id (widget key) of the iCloud web app.
pub const DEFAULT_OAUTH_CLIENT_ID: &str =
    "d39ba9916b7251055b22c7f910e2ea796ee65e98b2ddecea8f5dde8d9d1a815d";

/// Durable per-account state learned during login.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccountContext {
    pub apple_id: String,
    pub requires_2fa: bool,
    /// Base URL of the `ckdatabasews` web service.
    pub catalog_url: String,
}

impl AccountContext {
    /// Unusable until login has recorded a catalog endpoint.
    pub fn is_valid(&self) -> bool {
        !self.catalog_url.is_empty()
    }
}

/// On-disk shape of `app_config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigFile {
    pub max_parallel: usize,
    pub oauth_client_id: String,
    pub accounts: BTreeMap<String, AccountContext>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            oauth_client_id: DEFAULT_OAUTH_CLIENT_ID.to_string(),
            accounts: BTreeMap::new(),
        }
    }
}

pub type AccountMutator = Box<dyn FnOnce(&mut AccountContext) + Send>;

#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    /// The stored context, or an empty (invalid) one for unknown identities.
    async fn get(&self, identity: &UserIdentity) -> Result<AccountContext, StoreError>;

    async fn update(
        &self,
        identity: &UserIdentity,
        mutator: AccountMutator,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    file: JsonFile,
}

impl JsonConfigStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            file: JsonFile::new(dir, CONFIG_FILE_NAME),
        }
    }

    /// The whole file, used at startup for the global settings.
    pub async fn load(&self) -> Result<ConfigFile, StoreError> {
        self.file.load().await
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

#[async_trait::async_trait]
impl ConfigStore for JsonConfigStore {
    async fn get(&self, identity: &UserIdentity) -> Result<AccountContext, StoreError> {
        let doc: ConfigFile = self.file.load().await?;
        Ok(doc
            .accounts
            .get(identity.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn update(
        &self,
        identity: &UserIdentity,
        mutator: AccountMutator,
    ) -> Result<(), StoreError> {
        let key = identity.as_str().to_string();
        self.file
            .update(move |doc: &mut ConfigFile| {
                mutator(doc.accounts.entry(key).or_default());
            })
            .await?;
        tracing::debug!("Updated account context for {}", identity);
        Ok(())
    }
}
