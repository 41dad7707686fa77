use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use super::cloudkit::ZoneId;
use crate::types::hex_lower;

pub const PAGE_SIZE: u64 = 200;

/// Largest record set one archive preparation accepts.
pub const MAX_BATCH_RECORDS: usize = 1000;

const LIST_RECORD_TYPE: &str = "CPLAssetAndMasterByAssetDateWithoutHiddenOrDeleted";

/// Query string both database calls carry.
pub(crate) const DATABASE_QUERY: &str = "remapEnums=True&getCurrentSyncToken=True";

/// CloudKit field names requested in every listing query.
pub(crate) const DESIRED_KEYS: &[&str] = &[
    "resJPEGFullWidth",
    "resJPEGFullHeight",
    "resJPEGFullFileType",
    "resJPEGFullFingerprint",
    "resJPEGFullRes",
    "resJPEGLargeWidth",
    "resJPEGLargeHeight",
    "resJPEGLargeFileType",
    "resJPEGLargeFingerprint",
    "resJPEGLargeRes",
    "resJPEGMedWidth",
    "resJPEGMedHeight",
    "resJPEGMedFileType",
    "resJPEGMedFingerprint",
    "resJPEGMedRes",
    "resJPEGThumbWidth",
    "resJPEGThumbHeight",
    "resJPEGThumbFileType",
    "resJPEGThumbFingerprint",
    "resJPEGThumbRes",
    "resVidFullWidth",
    "resVidFullHeight",
    "resVidFullFileType",
    "resVidFullFingerprint",
    "resVidFullRes",
    "resVidMedWidth",
    "resVidMedHeight",
    "resVidMedFileType",
    "resVidMedFingerprint",
    "resVidMedRes",
    "resVidSmallWidth",
    "resVidSmallHeight",
    "resVidSmallFileType",
    "resVidSmallFingerprint",
    "resVidSmallRes",
    "resSidecarWidth",
    "resSidecarHeight",
    "resSidecarFileType",
    "resSidecarFingerprint",
    "resSidecarRes",
    "itemType",
    "dataClassType",
    "filenameEnc",
    "originalOrientation",
    "resOriginalWidth",
    "resOriginalHeight",
    "resOriginalFileType",
    "resOriginalFingerprint",
    "resOriginalRes",
    "resOriginalAltWidth",
    "resOriginalAltHeight",
    "resOriginalAltFileType",
    "resOriginalAltFingerprint",
    "resOriginalAltRes",
    "resOriginalVidComplWidth",
    "resOriginalVidComplHeight",
    "resOriginalVidComplFileType",
    "resOriginalVidComplFingerprint",
    "resOriginalVidComplRes",
    "isDeleted",
    "isExpunged",
    "dateExpunged",
    "remappedRef",
    "recordName",
    "recordType",
    "recordChangeTag",
    "masterRef",
    "adjustmentRenderType",
    "assetDate",
    "addedDate",
    "isFavorite",
    "isHidden",
    "orientation",
    "duration",
    "assetSubtype",
    "assetSubtypeV2",
    "assetHDRType",
    "burstFlags",
    "burstFlagsExt",
    "burstId",
    "captionEnc",
    "locationEnc",
    "locationV2Enc",
    "locationLatitude",
    "locationLongitude",
    "adjustmentType",
    "timeZoneOffset",
    "vidComplDurValue",
    "vidComplDurScale",
    "vidComplDispValue",
    "vidComplDispScale",
    "vidComplVisibilityState",
    "customRenderedValue",
    "containerId",
    "itemId",
    "position",
    "isKeyAsset",
];

/// Item types an archive may contain.
const ARCHIVE_ITEM_TYPES: &[&str] = &[
    "public.heic",
    "public.jpeg",
    "public.png",
    "com.compuserve.gif",
    "com.apple.m4v-video",
    "com.apple.quicktime-movie",
    "public.mpeg-4",
];

const ARCHIVE_CODECS: &[&str] = &["HEVC", "H.264"];

pub(crate) fn query_url(catalog_url: &str) -> String {
    format!(
        "{}/database/1/com.apple.photos.cloud/production/private/records/query?{}",
        catalog_url.trim_end_matches('/'),
        DATABASE_QUERY
    )
}

pub(crate) fn zip_prepare_url(catalog_url: &str) -> String {
    format!(
        "{}/database/1/com.apple.photos.cloud/production/private/records/zip/prepare?{}",
        catalog_url.trim_end_matches('/'),
        DATABASE_QUERY
    )
}

/// Body for one page of the full-library listing, ascending by rank.
pub(crate) fn list_query(offset: u64) -> Value {
    json!({
        "query": {
            "filterBy": [
                {
                    "fieldName": "startRank",
                    "fieldValue": {"type": "INT64", "value": offset},
                    "comparator": "EQUALS",
                },
                {
                    "fieldName": "direction",
                    "fieldValue": {"type": "STRING", "value": "ASCENDING"},
                    "comparator": "EQUALS",
                },
            ],
            "recordType": LIST_RECORD_TYPE,
        },
        "resultsLimit": PAGE_SIZE,
        "desiredKeys": DESIRED_KEYS,
        "zoneID": {"zoneName": "PrimarySync"},
    })
}

/// Hex SHA-256 of the sorted ids joined by `,`. Order-insensitive so the
/// same record set always hashes the same.
pub(crate) fn archive_hash(ids: &[&str]) -> String {
    let mut sorted: Vec<&str> = ids.to_vec();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(sorted.join(",").as_bytes());
    hex_lower(&hasher.finalize())
}

pub(crate) fn archive_name(ids: &[&str], unix_nanos: i64) -> String {
    format!("icloud{}_{}.zip", unix_nanos, archive_hash(ids))
}

/// Body for server-side archive preparation of original-quality files.
pub(crate) fn zip_prepare(ids: &[&str], archive_name: &str, zone: &ZoneId) -> Value {
    json!({
        "includeRecords": ids,
        "archiveName": archive_name,
        "zoneID": zone,
        "pluginFields": {
            "originalsOnly": {"value": 1, "type": "INT64"},
            "codecs": {"value": ARCHIVE_CODECS, "type": "STRING_LIST"},
            "itemTypes": {"value": ARCHIVE_ITEM_TYPES, "type": "STRING_LIST"},
        },
    })
}
