use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime};

use crate::http_client;

use super::OfflineError;

/// Upper bound for `update.json`.
const MAX_METADATA_BYTES: usize = 256 * 1024;
/// How long a fetched release record is trusted, measured from its publish date.
pub const UPDATE_CACHE_TTL: Duration = Duration::DAY;

/// Latest known remote release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateInfo {
    pub published: OffsetDateTime,
    /// Publish date exactly as the endpoint sent it.
    pub date: String,
    pub latest: String,
    /// Versions that can move to `latest` with an incremental package.
    pub updates: Vec<String>,
}

impl UpdateInfo {
    pub fn is_fresh(&self, now: OffsetDateTime) -> bool {
        self.published > now - UPDATE_CACHE_TTL
    }

    /// Whether `version` can be upgraded incrementally.
    pub fn accepts_incremental_from(&self, version: &str) -> bool {
        self.updates.iter().any(|candidate| candidate == version)
    }
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    latest: String,
    date: String,
    #[serde(default)]
    updates: Vec<String>,
}

/// Parse the body of `update.json`.
pub fn parse_update_json(bytes: &[u8]) -> Result<UpdateInfo, OfflineError> {
    let raw: RawUpdate = serde_json::from_slice(bytes)?;
    let published = parse_publish_date(&raw.date)?;
    Ok(UpdateInfo {
        published,
        date: raw.date,
        latest: raw.latest,
        updates: raw.updates,
    })
}

/// Accepts RFC 3339 timestamps and bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_publish_date(text: &str) -> Result<OffsetDateTime, OfflineError> {
    let text = text.trim();
    if let Ok(parsed) = OffsetDateTime::parse(text, &Rfc3339) {
        return Ok(parsed);
    }
    Date::parse(text, format_description!("[year]-[month]-[day]"))
        .map(|date| date.midnight().assume_utc())
        .map_err(|err| OfflineError::InvalidMetadata(format!("Bad publish date '{text}': {err}")))
}

/// Where the coordinator learns about new releases.
pub trait UpdateSource {
    fn fetch_latest(&self) -> Result<UpdateInfo, OfflineError>;
}

/// Fetches `{base}/update.json` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpUpdateSource {
    base_url: String,
}

impl HttpUpdateSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn metadata_url(&self) -> String {
        format!("{}/update.json", self.base_url.trim_end_matches('/'))
    }
}

impl UpdateSource for HttpUpdateSource {
    fn fetch_latest(&self) -> Result<UpdateInfo, OfflineError> {
        let url = self.metadata_url();
        tracing::debug!("Fetching update metadata from {url}");
        let response = http_client::agent()
            .get(&url)
            .set("Accept", "application/json")
            .call()
            .map_err(|err| OfflineError::Http(http_client::describe_error(&err)))?;
        let bytes = http_client::read_response_bytes(response, MAX_METADATA_BYTES)?;
        parse_update_json(&bytes)
    }
}
