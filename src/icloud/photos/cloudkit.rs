use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Zone a record lives in. Echoed back when asking for an archive of those
/// records.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneId {
    pub zone_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_record_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_type: Option<String>,
}

impl ZoneId {
    pub fn primary() -> Self {
        Self {
            zone_name: "PrimarySync".to_string(),
            owner_record_name: None,
            zone_type: None,
        }
    }
}

/// Response from `/records/query`.
#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub records: Vec<Record>,
}

/// A CloudKit record. `fields` stays dynamic here and is decoded per record
/// kind in [`super::record`], so one odd record cannot fail a whole page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(default)]
    pub record_name: String,
    #[serde(default)]
    pub record_type: String,
    #[serde(default)]
    pub fields: Value,
    #[serde(default, rename = "zoneID")]
    pub zone_id: Option<ZoneId>,
}

/// `{ "value": ..., "type": ... }` wrapper CloudKit puts around every field.
#[derive(Debug, Deserialize)]
pub struct Field<T> {
    pub value: Option<T>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub record_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default)]
    pub file_checksum: Option<String>,
    #[serde(default, rename = "downloadURL")]
    pub download_url: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Response from `/records/zip/prepare`.
#[derive(Debug, Deserialize)]
pub struct ZipPrepareResponse {
    #[serde(default, rename = "downloadURL")]
    pub download_url: Option<String>,
}
