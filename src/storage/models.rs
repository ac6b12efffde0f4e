use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for one processed upload, stored in redb.
///
/// Records are immutable once written; the only transition is deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    /// Blob key of the untouched upload.
    pub original_path: String,
    /// Blob key of the background-removed, mirrored PNG.
    pub processed_path: String,
    #[serde(default)]
    pub scope_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Position in the newest-first listing: the last (created_at, id) already returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl PageCursor {
    pub fn for_record(record: &ImageRecord) -> Self {
        Self {
            created_at: record.created_at,
            id: record.id.clone(),
        }
    }

    /// Opaque URL-safe token.
    pub fn encode(&self) -> String {
        let raw = format!("{}|{}", self.created_at.timestamp_micros(), self.id);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
    }

    /// Returns `None` for anything that was not produced by [`PageCursor::encode`].
    pub fn decode(token: &str) -> Option<Self> {
        let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .ok()?;
        let raw = String::from_utf8(raw).ok()?;
        let (micros, id) = raw.split_once('|')?;
        if id.is_empty() {
            return None;
        }
        let created_at = Utc.timestamp_micros(micros.parse().ok()?).single()?;
        Some(Self {
            created_at,
            id: id.to_string(),
        })
    }
}
