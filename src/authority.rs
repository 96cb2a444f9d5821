// HTTP client for the external metadata authority
//
// The authority answers `GET <base_url>?appids=<id>&l=<language>&key=<key>`
// with an object keyed by the requested id:
//
//   { "400": { "success": true, "data": { "developers": [..], "publishers": [..],
//              "genres": [{ "description": ".." }], "recommendations": { "total": n },
//              "release_date": { "date": "10 Oct, 2007" } } } }

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::contracts::{AuthorityError, AuthorityResponse, MetadataAuthority};
use crate::types::{ExternalId, ReleaseDate};

/// Release date layouts the authority is known to use
const RELEASE_DATE_FORMATS: &[&str] = &[
    "%d %b, %Y",
    "%b %d, %Y",
    "%Y-%m-%d",
    "%Y년 %m월 %d일",
    "%Y. %m. %d.",
];

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Option<AppData>,
}

#[derive(Debug, Default, Deserialize)]
struct AppData {
    developers: Option<Vec<String>>,
    publishers: Option<Vec<String>>,
    genres: Option<Vec<Genre>>,
    recommendations: Option<Recommendations>,
    release_date: Option<ReleaseInfo>,
}

#[derive(Debug, Deserialize)]
struct Genre {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Recommendations {
    total: u64,
}

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    #[serde(default)]
    date: String,
}

/// Turn a raw authority body into a typed response for `external_id`
pub fn parse_response(external_id: ExternalId, body: &str) -> Result<AuthorityResponse, AuthorityError> {
    let mut envelopes: HashMap<String, Envelope> =
        serde_json::from_str(body).map_err(|e| AuthorityError::Malformed(e.to_string()))?;

    let envelope = envelopes
        .remove(&external_id.to_string())
        .ok_or_else(|| AuthorityError::Malformed(format!("no entry for {external_id}")))?;
    if !envelope.success {
        return Err(AuthorityError::Unsuccessful(external_id));
    }

    let data = envelope.data.unwrap_or_default();
    Ok(AuthorityResponse {
        success: true,
        developers: data.developers,
        publishers: data.publishers,
        genres: data
            .genres
            .map(|genres| genres.into_iter().filter_map(|g| g.description).collect()),
        release_date: data.release_date.and_then(|r| parse_release_date(&r.date)),
        recommendation_total: data.recommendations.map(|r| r.total),
    })
}

/// Parse a human-readable release date into the 8-digit encoding
pub fn parse_release_date(raw: &str) -> Option<ReleaseDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    RELEASE_DATE_FORMATS
        .iter()
        .find_map(|fmt| chrono::NaiveDate::parse_from_str(raw, fmt).ok())
        .map(ReleaseDate::from_date)
}

/// Connection settings for [`HttpMetadataAuthority`]
#[derive(Debug, Clone)]
pub struct HttpAuthorityConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub language: String,
    pub timeout: Duration,
}

pub struct HttpMetadataAuthority {
    client: reqwest::Client,
    config: HttpAuthorityConfig,
}

impl HttpMetadataAuthority {
    pub fn new(config: HttpAuthorityConfig) -> Result<Self, AuthorityError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AuthorityError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn query_params(&self, external_id: ExternalId) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("appids", external_id.to_string()),
            ("l", self.config.language.clone()),
        ];
        if let Some(key) = self.config.api_key.as_ref().filter(|k| !k.is_empty()) {
            params.push(("key", key.clone()));
        }
        params
    }
}

#[async_trait]
impl MetadataAuthority for HttpMetadataAuthority {
    async fn fetch(&self, external_id: ExternalId) -> Result<AuthorityResponse, AuthorityError> {
        debug!(external_id = %external_id, "Querying metadata authority");

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&self.query_params(external_id))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthorityError::Timeout(self.config.timeout)
                } else {
                    AuthorityError::Transport(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| AuthorityError::Transport(e.to_string()))?;

        let body = response
            .text()
            .await
            .map_err(|e| AuthorityError::Transport(e.to_string()))?;

        parse_response(external_id, &body)
    }
}
