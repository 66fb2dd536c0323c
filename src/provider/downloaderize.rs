#![forbid(unsafe_code)]

//! WordPress-hosted downloader: one AJAX call returns the finished track
//! payload, authorized by a nonce scraped from the home page and the cookies
//! set alongside it.

use url::Url;

use super::{ConversionRequest, Provider, ProviderKind, expect_object};
use crate::discovery::{self, DiscoveredSecrets, DiscoveryProfile};
use crate::error::GrabResult;
use crate::normalize::{TrackRecord, normalize_payload};
use crate::poller::ConversionJob;
use crate::requester::post_form;
use crate::session::Session;

const INFO_ACTION: &str = "spotify_downloader_get_info";
const ACCEPT_JSON: &str = "application/json, text/javascript, */*; q=0.01";

const PROFILE: DiscoveryProfile = DiscoveryProfile {
    config_objects: &[
        "spotify_downloader",
        "spotifyDownloader",
        "spotify_downloader_vars",
        "sd_vars",
        "sts_vars",
        "stsData",
    ],
    fallback_endpoint: "wp-admin/admin-ajax.php",
    require_csrf: false,
};

#[derive(Debug, Clone)]
pub struct Downloaderize {
    base: Url,
}

impl Downloaderize {
    pub fn new(base_url: &str) -> GrabResult<Self> {
        Ok(Self {
            base: discovery::page_base(base_url)?,
        })
    }

    fn referer(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }
}

impl Provider for Downloaderize {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Downloaderize
    }

    fn discover(&self, session: &Session) -> GrabResult<DiscoveredSecrets> {
        discovery::discover(session, self.base.as_str(), &PROFILE)
    }

    fn request_conversion(
        &self,
        session: &Session,
        secrets: &DiscoveredSecrets,
        track_url: &str,
    ) -> GrabResult<ConversionRequest> {
        let mut form = vec![("action", INFO_ACTION), ("url", track_url)];
        if let Some(nonce) = secrets.nonce.as_deref() {
            form.push(("nonce", nonce));
        }
        let origin = self.base.origin().ascii_serialization();
        let headers = [
            ("Accept", ACCEPT_JSON),
            ("X-Requested-With", "XMLHttpRequest"),
            ("Origin", origin.as_str()),
            ("Referer", self.referer()),
        ];
        let response = post_form(session, &secrets.ajax_url, &headers, &form)?;
        Ok(ConversionRequest {
            status: response.status,
            payload: expect_object(response.body, response.status)?,
            job: None,
        })
    }

    fn normalize(
        &self,
        conversion: &ConversionRequest,
        _job: Option<&ConversionJob>,
    ) -> GrabResult<TrackRecord> {
        normalize_payload(&conversion.payload)
    }

    fn download_headers(&self) -> Vec<(String, String)> {
        vec![("Referer".to_string(), self.base.to_string())]
    }
}
