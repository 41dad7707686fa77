use std::collections::HashMap;

use base64::Engine;
use serde::Deserialize;

use super::cloudkit::{Field, Record, Reference, Resource, ZoneId};
use crate::icloud::error::CatalogError;

pub(crate) const ASSET_RECORD_TYPE: &str = "CPLAsset";
pub(crate) const MASTER_RECORD_TYPE: &str = "CPLMaster";

/// One downloadable original, joined from a `CPLAsset` and its `CPLMaster`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRecord {
    /// Asset record name; what archive preparation expects.
    pub id: String,
    pub master_id: String,
    /// Content fingerprint; the only deduplication key.
    pub checksum: String,
    pub url: String,
    pub filename: String,
    pub size: u64,
    pub zone: Option<ZoneId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetFields {
    #[serde(default)]
    master_ref: Option<Field<Reference>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterFields {
    #[serde(default)]
    filename_enc: Option<Field<String>>,
    #[serde(default)]
    res_original_res: Option<Field<Resource>>,
}

fn missing(record: &Record, path: &str) -> CatalogError {
    CatalogError::MissingField {
        record: record.record_name.clone(),
        path: path.to_string(),
    }
}

fn malformed(record: &Record, source: serde_json::Error) -> CatalogError {
    CatalogError::Malformed {
        record: record.record_name.clone(),
        source,
    }
}

/// Master id an asset points at (`fields.masterRef.value.recordName`).
fn master_ref(asset: &Record) -> Result<String, CatalogError> {
    let fields = AssetFields::deserialize(&asset.fields).map_err(|e| malformed(asset, e))?;
    fields
        .master_ref
        .and_then(|f| f.value)
        .map(|r| r.record_name)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| missing(asset, "fields.masterRef.value.recordName"))
}

/// Decode `filenameEnc`: `ENCRYPTED_BYTES` is base64 of the UTF-8 name,
/// `STRING` (or no type) is the name itself.
pub(crate) fn decode_filename(field: &Field<String>) -> Result<String, String> {
    let value = field.value.as_deref().ok_or("missing value")?;
    match field.kind.as_deref().unwrap_or("STRING") {
        "STRING" => Ok(value.to_string()),
        "ENCRYPTED_BYTES" => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(value)
                .map_err(|e| format!("invalid base64: {}", e))?;
            String::from_utf8(bytes).map_err(|e| format!("invalid UTF-8: {}", e))
        }
        other => Err(format!("unsupported encoding {}", other)),
    }
}

impl PhotoRecord {
    fn join(asset: &Record, master: &Record) -> Result<Self, CatalogError> {
        let fields = MasterFields::deserialize(&master.fields).map_err(|e| malformed(master, e))?;

        let filename_field = fields
            .filename_enc
            .ok_or_else(|| missing(master, "fields.filenameEnc"))?;
        let filename = decode_filename(&filename_field).map_err(|reason| {
            CatalogError::InvalidFilename {
                record: master.record_name.clone(),
                reason,
            }
        })?;

        let resource = fields
            .res_original_res
            .and_then(|f| f.value)
            .ok_or_else(|| missing(master, "fields.resOriginalRes.value"))?;
        let checksum = resource
            .file_checksum
            .filter(|c| !c.is_empty())
            .ok_or_else(|| missing(master, "fields.resOriginalRes.value.fileChecksum"))?;
        let url = resource
            .download_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| missing(master, "fields.resOriginalRes.value.downloadURL"))?;
        let size = resource.size.unwrap_or(0);

        Ok(Self {
            id: asset.record_name.clone(),
            master_id: master.record_name.clone(),
            checksum,
            url,
            filename,
            size,
            zone: asset.zone_id.clone().or_else(|| master.zone_id.clone()),
        })
    }
}

/// Result of reconciling one query page.
#[derive(Debug, Default)]
pub struct Page {
    pub records: Vec<PhotoRecord>,
    /// Master records seen, joined or not. Zero means end of catalog.
    pub masters: usize,
    /// Asset/master pairs found, counted before field decoding. The next
    /// page starts this many ranks further on.
    pub joined: usize,
}

/// Join the page's assets to its masters. Halves without a partner in the
/// same page are dropped, and so are masters whose fields cannot be decoded.
pub(crate) fn join_page(records: Vec<Record>) -> Page {
    let mut assets: HashMap<String, Record> = HashMap::new();
    let mut masters: Vec<Record> = Vec::new();

    for record in records {
        match record.record_type.as_str() {
            ASSET_RECORD_TYPE => match master_ref(&record) {
                Ok(master_id) => {
                    assets.insert(master_id, record);
                }
                Err(e) => tracing::warn!("Skipping asset: {}", e),
            },
            MASTER_RECORD_TYPE => masters.push(record),
            _ => {}
        }
    }

    let mut page = Page {
        records: Vec::with_capacity(masters.len()),
        masters: masters.len(),
        joined: 0,
    };
    for master in &masters {
        let Some(asset) = assets.get(&master.record_name) else {
            tracing::debug!("Master {} has no asset in this page", master.record_name);
            continue;
        };
        page.joined += 1;
        match PhotoRecord::join(asset, master) {
            Ok(photo) => page.records.push(photo),
            Err(e) => tracing::warn!("Skipping photo: {}", e),
        }
    }
    page
}
