#![forbid(unsafe_code)]

//! Upstream adapters and the resolution pipeline that drives them.
//!
//! Every upstream goes through the same steps in the same order:
//! discover → request conversion → poll (only when a job is pending) →
//! normalize. Adapters only supply the upstream-specific endpoints and field
//! names.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;
use tracing::info;

use crate::discovery::{DiscoveredSecrets, SecretOverrides};
use crate::error::{GrabError, GrabResult};
use crate::normalize::TrackRecord;
use crate::poller::{ConversionJob, PollOptions, poll_until_ready};
use crate::session::Session;

mod downloaderize;
mod fabdl;

pub use downloaderize::Downloaderize;
pub use fabdl::Fabdl;

/// What the conversion request returned.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub status: u16,
    /// Track payload as the upstream sent it.
    pub payload: Value,
    /// Present when the upstream converts asynchronously.
    pub job: Option<ConversionJob>,
}

/// One upstream downloader site.
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn discover(&self, session: &Session) -> GrabResult<DiscoveredSecrets>;

    fn request_conversion(
        &self,
        session: &Session,
        secrets: &DiscoveredSecrets,
        track_url: &str,
    ) -> GrabResult<ConversionRequest>;

    /// One status read, bounded by `budget`. Upstreams without asynchronous
    /// jobs keep the default, which just hands the snapshot back.
    fn poll_status(
        &self,
        _session: &Session,
        _secrets: &DiscoveredSecrets,
        job: &ConversionJob,
        _budget: Duration,
    ) -> GrabResult<ConversionJob> {
        Ok(job.clone())
    }

    fn normalize(
        &self,
        conversion: &ConversionRequest,
        job: Option<&ConversionJob>,
    ) -> GrabResult<TrackRecord>;

    /// Extra headers the media host expects on the file download.
    fn download_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProviderKind {
    #[default]
    Downloaderize,
    Fabdl,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Downloaderize => "downloaderize",
            Self::Fabdl => "fabdl",
        }
    }

    pub fn build(self, base_url: &str) -> GrabResult<Box<dyn Provider>> {
        Ok(match self {
            Self::Downloaderize => Box::new(Downloaderize::new(base_url)?),
            Self::Fabdl => Box::new(Fabdl::new(base_url)?),
        })
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "downloaderize" | "wp" => Ok(Self::Downloaderize),
            "fabdl" | "spodownloader" => Ok(Self::Fabdl),
            other => Err(format!(
                "unknown provider {other:?} (expected downloaderize or fabdl)"
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub poll: PollOptions,
    pub overrides: SecretOverrides,
}

/// Runs one full resolution on `session`, strictly in order.
pub fn resolve_track(
    provider: &dyn Provider,
    session: &Session,
    track_url: &str,
    options: &ResolveOptions,
) -> GrabResult<TrackRecord> {
    let kind = provider.kind();
    let secrets = match (&options.overrides.ajax_url, &options.overrides.nonce) {
        (Some(ajax_url), Some(_)) => {
            DiscoveredSecrets::endpoint_only(ajax_url.clone()).with_overrides(&options.overrides)
        }
        _ => provider.discover(session)?.with_overrides(&options.overrides),
    };
    info!(provider = %kind, endpoint = %secrets.ajax_url, "requesting conversion");

    let conversion = provider.request_conversion(session, &secrets, track_url)?;
    let job = match &conversion.job {
        Some(job) if !job.is_ready() => {
            info!(provider = %kind, job = %job.id, "waiting for conversion");
            Some(poll_until_ready(&options.poll, |budget| {
                provider.poll_status(session, &secrets, job, budget)
            })?)
        }
        other => other.clone(),
    };

    let record = provider.normalize(&conversion, job.as_ref())?;
    info!(provider = %kind, title = %record.title, artist = %record.artist, "track resolved");
    Ok(record)
}

/// Object-or-error guard for conversion responses.
pub(crate) fn expect_object(payload: Value, status: u16) -> GrabResult<Value> {
    if payload.is_object() {
        Ok(payload)
    } else {
        Err(GrabError::upstream(
            Some(status),
            "unexpected response type; not a JSON object",
        ))
    }
}
