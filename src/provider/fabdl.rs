#![forbid(unsafe_code)]

//! JSON API downloader: metadata lookup, conversion task, then progress polls
//! until the task reports a download link.

use std::time::Duration;

use serde_json::{Value, json};
use url::Url;

use super::{ConversionRequest, Provider, ProviderKind};
use crate::discovery::DiscoveredSecrets;
use crate::error::{GrabError, GrabResult};
use crate::normalize::{TrackRecord, normalize_payload};
use crate::poller::ConversionJob;
use crate::requester::{get_json, get_json_within};
use crate::session::Session;

const ACCEPT: &str = "application/json, text/plain, */*";
const ORIGIN: &str = "https://spodownloader.com";

#[derive(Debug, Clone)]
pub struct Fabdl {
    base: String,
}

impl Fabdl {
    pub fn new(base_url: &str) -> GrabResult<Self> {
        let base = base_url.trim().trim_end_matches('/').to_string();
        Url::parse(&base)
            .map_err(|err| GrabError::Discovery(format!("invalid base URL {base_url:?}: {err}")))?;
        Ok(Self { base })
    }

    fn headers() -> [(&'static str, &'static str); 2] {
        [("Accept", ACCEPT), ("Origin", ORIGIN)]
    }

    fn absolute(&self, link: &str) -> String {
        if link.starts_with('/') {
            format!("{}{link}", self.base)
        } else {
            link.to_string()
        }
    }
}

/// The API wraps every answer in `{"result": ...}`.
fn get_result(body: Value, status: u16, what: &str) -> GrabResult<Value> {
    match body {
        Value::Object(mut map) => map.remove("result").ok_or_else(|| {
            GrabError::upstream(Some(status), format!("{what} response has no 'result'"))
        }),
        _ => Err(GrabError::upstream(
            Some(status),
            format!("{what} response is not a JSON object"),
        )),
    }
}

/// Ids arrive as numbers or strings depending on the endpoint.
fn id_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

impl Provider for Fabdl {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Fabdl
    }

    fn discover(&self, _session: &Session) -> GrabResult<DiscoveredSecrets> {
        Ok(DiscoveredSecrets::endpoint_only(self.base.clone()))
    }

    fn request_conversion(
        &self,
        session: &Session,
        secrets: &DiscoveredSecrets,
        track_url: &str,
    ) -> GrabResult<ConversionRequest> {
        let api = secrets.ajax_url.trim_end_matches('/');

        let response = get_json(
            session,
            &format!("{api}/spotify/get"),
            &Self::headers(),
            &[("url", track_url)],
        )?;
        let status = response.status;
        let metadata = get_result(response.body, status, "metadata")?;
        let (Some(gid), Some(track_id)) = (
            id_field(&metadata, &["gid"]),
            id_field(&metadata, &["id", "track_id"]),
        ) else {
            return Err(GrabError::upstream(
                Some(status),
                "Missing gid or track_id in metadata response",
            ));
        };

        let response = get_json(
            session,
            &format!("{api}/spotify/mp3-convert-task/{gid}/{track_id}"),
            &Self::headers(),
            &[],
        )?;
        let task = get_result(response.body, response.status, "conversion task")?;
        let Some(tid) = id_field(&task, &["tid"]) else {
            return Err(GrabError::upstream(
                Some(response.status),
                "Conversion task response did not include a 'tid'",
            ));
        };

        Ok(ConversionRequest {
            status,
            job: Some(ConversionJob::from_payload(tid, &task)),
            payload: metadata,
        })
    }

    fn poll_status(
        &self,
        session: &Session,
        secrets: &DiscoveredSecrets,
        job: &ConversionJob,
        budget: Duration,
    ) -> GrabResult<ConversionJob> {
        let api = secrets.ajax_url.trim_end_matches('/');
        let response = get_json_within(
            session,
            &format!("{api}/spotify/mp3-convert-progress/{}", job.id),
            &Self::headers(),
            &[],
            budget.min(session.config().request_timeout),
        )?;
        let progress = get_result(response.body, response.status, "progress")?;
        Ok(ConversionJob::from_payload(job.id.clone(), &progress))
    }

    fn normalize(
        &self,
        conversion: &ConversionRequest,
        job: Option<&ConversionJob>,
    ) -> GrabResult<TrackRecord> {
        let metadata = &conversion.payload;
        let media_url = job
            .and_then(|job| job.download_url.as_deref())
            .map(|link| self.absolute(link))
            .unwrap_or_default();
        let shaped = json!({
            "title": metadata.get("name").cloned().unwrap_or(Value::Null),
            "artists": metadata.get("artists").cloned().unwrap_or(Value::Null),
            "thumbnail": metadata.get("image").cloned().unwrap_or(Value::Null),
            "medias": [{"url": media_url}],
        });
        normalize_payload(&shaped)
    }

    fn download_headers(&self) -> Vec<(String, String)> {
        Self::headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }
}
