#![forbid(unsafe_code)]

//! Spotify track links: validation and short-link resolution.

use tracing::debug;
use url::Url;

use crate::error::{GrabError, GrabResult, describe_transport};
use crate::session::Session;

const TRACK_MARKER: &str = "open.spotify.com/track/";
const CANONICAL_TRACK_PREFIX: &str = "https://open.spotify.com/intl-id/track/";
const SPOTIFY_REFERER: &str = "https://open.spotify.com/";

/// Cleans up a pasted link: JSON-escaped slashes and protocol-relative form.
pub fn normalize_link(raw: &str) -> String {
    let cleaned = raw.trim().replace("\\/", "/");
    match cleaned.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => cleaned,
    }
}

/// The id following a `track` path segment, when it is purely alphanumeric.
pub fn track_id_from_path(path: &str) -> Option<&str> {
    let mut segments = path.split('/').filter(|segment| !segment.is_empty());
    while let Some(segment) = segments.next() {
        if segment == "track" {
            let candidate = segments.next()?;
            let candidate = candidate.split(['?', '#']).next().unwrap_or_default();
            if !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Some(candidate);
            }
            return None;
        }
    }
    None
}

/// Accepts direct `open.spotify.com/track/<id>` links as-is (trimmed).
pub fn validate(raw: &str) -> GrabResult<String> {
    let link = normalize_link(raw);
    if !link.contains(TRACK_MARKER) {
        return Err(GrabError::InvalidTrackUrl("Invalid Spotify URL".into()));
    }
    let path = Url::parse(&link)
        .map(|url| url.path().to_string())
        .map_err(|_| GrabError::InvalidTrackUrl("Invalid Spotify URL".into()))?;
    if track_id_from_path(&path).is_none() {
        return Err(GrabError::InvalidTrackUrl("Invalid Spotify URL".into()));
    }
    Ok(link)
}

pub fn canonical_track_url(track_id: &str) -> String {
    format!("{CANONICAL_TRACK_PREFIX}{track_id}")
}

/// Follows short links (`spotify.link/...` or anything off
/// `open.spotify.com`) and canonicalizes the track link.
pub fn resolve(session: &Session, raw: &str) -> GrabResult<String> {
    let link = normalize_link(raw);
    if link.is_empty() {
        return Err(GrabError::InvalidTrackUrl("empty URL".into()));
    }

    let final_url = if link.contains("spotify.link") || !link.contains("open.spotify.com") {
        debug!(%link, "following short link");
        let response = session
            .get(&link, session.config().discovery_timeout)
            .set("Referer", SPOTIFY_REFERER)
            .call()
            .map_err(|err| {
                let (status, message) = describe_transport(err);
                GrabError::upstream(status, format!("could not follow link {link}: {message}"))
            })?;
        response.get_url().to_string()
    } else {
        link
    };

    let parsed = Url::parse(&final_url)
        .map_err(|_| GrabError::InvalidTrackUrl("link does not point to a Spotify track".into()))?;
    let track_id = track_id_from_path(parsed.path())
        .ok_or_else(|| GrabError::InvalidTrackUrl("link does not point to a Spotify track".into()))?;
    Ok(canonical_track_url(track_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_upstream;
    use axum::{Router, response::Redirect, routing::get};

    #[test]
    fn extracts_track_id() {
        assert_eq!(
            track_id_from_path("/intl-de/track/4cOdK2wGLETKBW3PvgPWqT"),
            Some("4cOdK2wGLETKBW3PvgPWqT")
        );
        assert_eq!(track_id_from_path("/track/abc123/"), Some("abc123"));
        assert_eq!(track_id_from_path("/album/abc123"), None);
        assert_eq!(track_id_from_path("/track/"), None);
        assert_eq!(track_id_from_path("/track/bad-id"), None);
    }

    #[test]
    fn validate_accepts_track_links() {
        let link = validate("  https://open.spotify.com/track/4cOdK2wGLETKBW3PvgPWqT?si=x ").unwrap();
        assert_eq!(link, "https://open.spotify.com/track/4cOdK2wGLETKBW3PvgPWqT?si=x");
    }

    #[test]
    fn validate_rejects_everything_else() {
        for bad in [
            "invalid",
            "https://open.spotify.com/album/1",
            "https://open.spotify.com/track/",
            "",
        ] {
            let err = validate(bad).unwrap_err();
            assert_eq!(err.to_string(), "Invalid Spotify URL");
            assert_eq!(err.exit_code(), 2);
        }
    }

    #[test]
    fn resolve_canonicalizes_direct_links_without_network() {
        let url = resolve(
            &Session::default(),
            "https:\\/\\/open.spotify.com\\/track\\/5WOSNVChcadlsCRiqXE45K",
        )
        .unwrap();
        assert_eq!(url, "https://open.spotify.com/intl-id/track/5WOSNVChcadlsCRiqXE45K");
    }

    #[test]
    fn resolve_follows_redirects() {
        let app = Router::new()
            .route("/s/abc", get(|| async { Redirect::temporary("/track/XyZ123") }))
            .route("/track/{id}", get(|| async { "player" }));
        let base_url = spawn_upstream(app);
        let url = resolve(&Session::default(), &format!("{base_url}/s/abc")).unwrap();
        assert_eq!(url, canonical_track_url("XyZ123"));
    }

    #[test]
    fn unreachable_short_link_is_a_network_failure() {
        let err = resolve(&Session::default(), "http://127.0.0.1:9/s/abc").unwrap_err();
        assert!(matches!(err, GrabError::Upstream { status: None, .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn short_link_error_status_is_kept() {
        let app = Router::new().route(
            "/s/gone",
            get(|| async { (axum::http::StatusCode::NOT_FOUND, "gone") }),
        );
        let base_url = spawn_upstream(app);
        let err = resolve(&Session::default(), &format!("{base_url}/s/gone")).unwrap_err();
        assert!(matches!(err, GrabError::Upstream { status: Some(404), .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn resolve_rejects_non_track_destinations() {
        let app = Router::new().route("/s/abc", get(|| async { "landing page" }));
        let base_url = spawn_upstream(app);
        let err = resolve(&Session::default(), &format!("{base_url}/s/abc")).unwrap_err();
        assert!(matches!(err, GrabError::InvalidTrackUrl(_)));
    }
}
