#![forbid(unsafe_code)]

//! Error taxonomy shared by every stage of a track resolution.

use std::time::Duration;

use thiserror::Error;

/// Everything that can abandon a track resolution.
///
/// The pipeline never recovers from one of these on its own; the only retry
/// loop is the progress poller, which turns into [`GrabError::ConversionTimeout`]
/// once its budget is spent.
#[derive(Debug, Error)]
pub enum GrabError {
    /// The caller handed us something that is not a track link.
    #[error("{0}")]
    InvalidTrackUrl(String),

    /// The host page could not be fetched.
    #[error("failed to discover API: {0}")]
    Discovery(String),

    /// The host page loaded but a token the upstream insists on was missing.
    #[error("{0} token not found")]
    TokenNotFound(&'static str),

    /// Non-success status or an undecodable body from a conversion/info endpoint.
    #[error("upstream API error{}: {message}", status_suffix(.status))]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    /// The conversion job never reached a finished state in time.
    #[error("timed out after {:.1}s waiting for conversion to complete", .elapsed.as_secs_f64())]
    ConversionTimeout { elapsed: Duration },

    /// The payload parsed fine but carried no usable media link.
    #[error("no media found for this track")]
    NoMediaFound,

    /// Transport or filesystem failure while streaming the media file.
    #[error("download failed: {0}")]
    Download(String),
}

pub type GrabResult<T> = Result<T, GrabError>;

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({code})")).unwrap_or_default()
}

impl GrabError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Only a timed-out conversion is worth running the whole flow again for.
    /// "No media" is the upstream's final answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConversionTimeout { .. })
    }

    /// Process exit code for the command-line surface.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidTrackUrl(_) => 2,
            _ => 1,
        }
    }

    /// HTTP status for the web surface.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidTrackUrl(_) => 400,
            Self::NoMediaFound => 404,
            Self::ConversionTimeout { .. } => 504,
            Self::Upstream {
                status: Some(code), ..
            } if (400..600).contains(code) => *code,
            _ => 500,
        }
    }
}

/// Splits a ureq failure into the upstream status (when the server answered)
/// and a printable message.
pub(crate) fn describe_transport(err: ureq::Error) -> (Option<u16>, String) {
    match err {
        ureq::Error::Status(code, response) => {
            let reason = response.status_text().to_string();
            (Some(code), format!("HTTP {code} {reason}"))
        }
        ureq::Error::Transport(transport) => (None, transport.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_are_retryable() {
        let timeout = GrabError::ConversionTimeout {
            elapsed: Duration::from_secs(120),
        };
        assert!(timeout.is_retryable());
        assert!(!GrabError::NoMediaFound.is_retryable());
        assert!(!GrabError::upstream(Some(502), "bad gateway").is_retryable());
    }

    #[test]
    fn invalid_url_exits_with_two() {
        assert_eq!(GrabError::InvalidTrackUrl("nope".into()).exit_code(), 2);
        assert_eq!(GrabError::NoMediaFound.exit_code(), 1);
        assert_eq!(GrabError::Download("reset".into()).exit_code(), 1);
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(GrabError::InvalidTrackUrl("x".into()).http_status(), 400);
        assert_eq!(GrabError::NoMediaFound.http_status(), 404);
        assert_eq!(GrabError::upstream(Some(403), "forbidden").http_status(), 403);
        assert_eq!(GrabError::upstream(None, "garbage body").http_status(), 500);
        assert_eq!(GrabError::Discovery("dns".into()).http_status(), 500);
        assert_eq!(
            GrabError::ConversionTimeout {
                elapsed: Duration::from_secs(1)
            }
            .http_status(),
            504
        );
    }

    #[test]
    fn upstream_message_includes_status() {
        let err = GrabError::upstream(Some(429), "slow down");
        assert_eq!(err.to_string(), "upstream API error (429): slow down");
        let err = GrabError::upstream(None, "not json");
        assert_eq!(err.to_string(), "upstream API error: not json");
    }
}
