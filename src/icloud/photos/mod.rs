//! Photo catalog: paginated listing of the account's library and
//! server-side archive preparation, both against the CloudKit database
//! endpoint recorded at account-login.

pub mod cloudkit;
pub mod queries;
pub mod record;

pub use record::{Page, PhotoRecord};

use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use self::cloudkit::{QueryResponse, ZipPrepareResponse, ZoneId};
use self::queries::MAX_BATCH_RECORDS;
use crate::context::RequestContext;
use crate::icloud::error::CatalogError;
use crate::session::{Session, SessionStore};
use crate::store::ConfigStore;

/// Key the catalog scan reports its running record count under.
pub const PHOTOS_COUNT_KEY: &str = "photos_count";

/// The catalog operations the download pipeline depends on.
#[async_trait::async_trait]
pub trait PhotoCatalog: Send + Sync {
    /// Every joinable record in the library, in rank order.
    async fn list_all(&self, ctx: &RequestContext) -> Result<Vec<PhotoRecord>, CatalogError>;

    /// A time-limited URL for a server-built zip of `records`.
    async fn make_batch_download_url(
        &self,
        ctx: &RequestContext,
        records: &[PhotoRecord],
    ) -> Result<String, CatalogError>;
}

pub struct CatalogService {
    sessions: Arc<SessionStore>,
    config: Arc<dyn ConfigStore>,
}

impl std::fmt::Debug for CatalogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogService").finish_non_exhaustive()
    }
}

impl CatalogService {
    pub fn new(sessions: Arc<SessionStore>, config: Arc<dyn ConfigStore>) -> Self {
        Self { sessions, config }
    }

    async fn catalog_url(&self, ctx: &RequestContext) -> Result<String, CatalogError> {
        let account = self.config.get(&ctx.identity).await?;
        if !account.is_valid() {
            return Err(CatalogError::NotLoggedIn);
        }
        Ok(account.catalog_url)
    }

    async fn post(
        &self,
        ctx: &RequestContext,
        session: &Session,
        url: &str,
        body: &Value,
    ) -> Result<String, CatalogError> {
        tracing::debug!("POST {}", url);
        let request = session
            .client()
            .post(url)
            .header(CONTENT_TYPE, "text/plain")
            .body(body.to_string());
        let response = ctx
            .guard(request.send())
            .await
            .ok_or(CatalogError::Cancelled)??;

        let status = response.status();
        let text = ctx
            .guard(response.text())
            .await
            .ok_or(CatalogError::Cancelled)??;
        if !status.is_success() {
            return Err(CatalogError::ApiError {
                code: status.as_u16(),
                message: text,
            });
        }
        Ok(text)
    }

    /// Fetch and reconcile the page starting at rank `offset`.
    pub async fn list_page(
        &self,
        ctx: &RequestContext,
        offset: u64,
    ) -> Result<Page, CatalogError> {
        let catalog_url = self.catalog_url(ctx).await?;
        let session = self.sessions.get(&ctx.identity)?;
        let body = queries::list_query(offset);
        let text = self
            .post(ctx, &session, &queries::query_url(&catalog_url), &body)
            .await?;
        let response: QueryResponse = serde_json::from_str(&text)?;
        let fetched = response.records.len();
        let page = record::join_page(response.records);
        tracing::debug!(
            "Page at {}: {} records, {} masters, {} photos",
            offset,
            fetched,
            page.masters,
            page.records.len()
        );
        Ok(page)
    }
}

#[async_trait::async_trait]
impl PhotoCatalog for CatalogService {
    async fn list_all(&self, ctx: &RequestContext) -> Result<Vec<PhotoRecord>, CatalogError> {
        let mut photos = Vec::new();
        let mut offset = 0u64;
        loop {
            let page = self.list_page(ctx, offset).await?;
            if page.masters == 0 {
                break;
            }
            // Ranks count joined pairs; a page with masters but no pairs
            // still moves forward.
            let step = if page.joined > 0 { page.joined } else { page.masters };
            offset += step as u64;
            photos.extend(page.records);
            ctx.count(PHOTOS_COUNT_KEY, photos.len() as f64).await;
        }
        tracing::info!("Catalog holds {} photos", photos.len());
        Ok(photos)
    }

    async fn make_batch_download_url(
        &self,
        ctx: &RequestContext,
        records: &[PhotoRecord],
    ) -> Result<String, CatalogError> {
        if records.is_empty() || records.len() > MAX_BATCH_RECORDS {
            return Err(CatalogError::InvalidBatch {
                len: records.len(),
                max: MAX_BATCH_RECORDS,
            });
        }

        let catalog_url = self.catalog_url(ctx).await?;
        let session = self.sessions.get(&ctx.identity)?;

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let zone = records
            .iter()
            .find_map(|r| r.zone.clone())
            .unwrap_or_else(ZoneId::primary);
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let name = queries::archive_name(&ids, nanos);
        let body = queries::zip_prepare(&ids, &name, &zone);

        let text = self
            .post(ctx, &session, &queries::zip_prepare_url(&catalog_url), &body)
            .await?;
        let response: ZipPrepareResponse = serde_json::from_str(&text)?;
        let url = response
            .download_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| CatalogError::MissingField {
                record: name.clone(),
                path: "downloadURL".to_string(),
            })?;
        tracing::debug!("Prepared archive {} for {} records", name, records.len());
        Ok(url)
    }
}
