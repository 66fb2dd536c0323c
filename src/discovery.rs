#![forbid(unsafe_code)]

//! Pulls the AJAX endpoint and anti-forgery tokens out of an upstream's host
//! page.
//!
//! Extraction is an ordered chain of [`Extractor`]s run over the raw markup.
//! Each one may find any subset of the fields; a field keeps the value from
//! the first extractor that produced it. Whatever is still missing at the end
//! stays `None`, except the endpoint, which falls back to the profile's fixed
//! path.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use url::Url;

use crate::error::{GrabError, GrabResult, describe_transport};
use crate::session::Session;

static GLOBAL_AJAXURL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:window\.)?ajaxurl\s*=\s*['"]([^'"]+)['"]"#).expect("ajaxurl assignment")
});
static OBJECT_AJAXURL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"ajaxurl['"]?\s*:\s*['"]([^'"]+)['"]"#).expect("object ajaxurl")
});
static OBJECT_NONCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"nonce['"]?\s*:\s*['"]([0-9a-zA-Z]{8,})['"]"#).expect("object nonce")
});
static OBJECT_CSRF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)csrf(?:_?token)?['"]?\s*:\s*['"]([^'"]+)['"]"#).expect("object csrf")
});
static DATA_NONCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"data-nonce=["']([0-9a-zA-Z]+)["']"#).expect("data-nonce attribute")
});
static META_CSRF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta\s+name=["']csrf-token["']\s+content=["']([^"']+)["']"#)
        .expect("csrf meta tag")
});
static INPUT_CSRF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)name=["'](?:_token|csrf_token|csrfmiddlewaretoken)["']\s+value=["']([^"']+)["']"#,
    )
    .expect("csrf hidden input")
});
static BROAD_AJAXURL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)ajaxurl['"]?\s*[:=]\s*['"]([^'"]+)['"]"#).expect("broad ajaxurl")
});

/// Secrets scraped from one host page. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredSecrets {
    pub ajax_url: String,
    pub nonce: Option<String>,
    pub csrf_token: Option<String>,
}

impl DiscoveredSecrets {
    /// Secrets for upstreams that need no page visit at all.
    pub fn endpoint_only(ajax_url: impl Into<String>) -> Self {
        Self {
            ajax_url: ajax_url.into(),
            nonce: None,
            csrf_token: None,
        }
    }

    /// Caller-supplied values win over scraped ones.
    pub fn with_overrides(mut self, overrides: &SecretOverrides) -> Self {
        if let Some(ajax_url) = &overrides.ajax_url {
            self.ajax_url = ajax_url.clone();
        }
        if let Some(nonce) = &overrides.nonce {
            self.nonce = Some(nonce.clone());
        }
        self
    }
}

/// Values a caller already knows, e.g. from `--ajax-url`/`--nonce`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretOverrides {
    pub ajax_url: Option<String>,
    pub nonce: Option<String>,
}

impl SecretOverrides {
    /// True when the host page has nothing left to tell us.
    pub fn is_complete(&self) -> bool {
        self.ajax_url.is_some() && self.nonce.is_some()
    }
}

/// What a particular upstream page looks like.
#[derive(Debug, Clone)]
pub struct DiscoveryProfile {
    /// Names of localized script objects that may carry `ajaxurl`/`nonce`.
    pub config_objects: &'static [&'static str],
    /// Path joined onto the base URL when no endpoint is found.
    pub fallback_endpoint: &'static str,
    pub require_csrf: bool,
}

/// Fields found so far; `None` means "not yet".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSecrets {
    pub endpoint: Option<String>,
    pub nonce: Option<String>,
    pub csrf_token: Option<String>,
}

impl PageSecrets {
    fn fill_missing(&mut self, found: PageSecrets) {
        if self.endpoint.is_none() {
            self.endpoint = found.endpoint;
        }
        if self.nonce.is_none() {
            self.nonce = found.nonce;
        }
        if self.csrf_token.is_none() {
            self.csrf_token = found.csrf_token;
        }
    }

    fn is_empty(&self) -> bool {
        self.endpoint.is_none() && self.nonce.is_none() && self.csrf_token.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    /// `window.ajaxurl = '...'` / `ajaxurl = "..."`.
    GlobalAssignment,
    /// `var sd_vars = { ajaxurl: ..., nonce: ... }`.
    ConfigObject,
    /// `data-nonce="..."`, csrf `<meta>` tags and hidden inputs.
    TokenAttribute,
    /// Any `ajaxurl: '...'` or `ajaxurl = '...'` anywhere.
    BroadSearch,
}

/// Priority order; earlier entries win per field.
pub const EXTRACTOR_CHAIN: [Extractor; 4] = [
    Extractor::GlobalAssignment,
    Extractor::ConfigObject,
    Extractor::TokenAttribute,
    Extractor::BroadSearch,
];

impl Extractor {
    pub fn extract(self, html: &str, profile: &DiscoveryProfile) -> PageSecrets {
        match self {
            Self::GlobalAssignment => PageSecrets {
                endpoint: first_capture(&GLOBAL_AJAXURL, html),
                ..PageSecrets::default()
            },
            Self::ConfigObject => extract_config_objects(html, profile.config_objects),
            Self::TokenAttribute => PageSecrets {
                nonce: first_capture(&DATA_NONCE, html),
                csrf_token: first_capture(&META_CSRF, html)
                    .or_else(|| first_capture(&INPUT_CSRF, html)),
                ..PageSecrets::default()
            },
            Self::BroadSearch => PageSecrets {
                endpoint: first_capture(&BROAD_AJAXURL, html),
                ..PageSecrets::default()
            },
        }
    }
}

fn first_capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn extract_config_objects(html: &str, names: &[&str]) -> PageSecrets {
    let mut found = PageSecrets::default();
    for name in names {
        let Ok(pattern) = Regex::new(&format!(r"(?is){}\s*=\s*\{{(.*?)\}}", regex::escape(name)))
        else {
            continue;
        };
        let Some(blob) = pattern.captures(html).and_then(|caps| caps.get(1)) else {
            continue;
        };
        let blob = blob.as_str();
        found.fill_missing(PageSecrets {
            endpoint: first_capture(&OBJECT_AJAXURL, blob),
            nonce: first_capture(&OBJECT_NONCE, blob),
            csrf_token: first_capture(&OBJECT_CSRF, blob),
        });
        if found.endpoint.is_some() && found.nonce.is_some() {
            break;
        }
    }
    found
}

/// Cleans up an endpoint as it appears in page source: JSON-escaped slashes,
/// protocol-relative and site-relative forms.
pub fn normalize_endpoint(raw: &str, base: &Url) -> String {
    let cleaned = raw.trim().replace("\\/", "/");
    let cleaned = match cleaned.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => cleaned,
    };
    base.join(&cleaned)
        .map(|url| url.to_string())
        .unwrap_or(cleaned)
}

/// Runs the extractor chain over already-fetched markup.
pub fn extract_secrets(
    html: &str,
    base: &Url,
    profile: &DiscoveryProfile,
) -> GrabResult<DiscoveredSecrets> {
    let mut found = PageSecrets::default();
    for extractor in EXTRACTOR_CHAIN {
        let hit = extractor.extract(html, profile);
        if !hit.is_empty() {
            debug!(?extractor, ?hit, "discovery extractor matched");
        }
        found.fill_missing(hit);
    }

    if profile.require_csrf && found.csrf_token.is_none() {
        return Err(GrabError::TokenNotFound("CSRF"));
    }

    let ajax_url = match found.endpoint {
        Some(raw) => normalize_endpoint(&raw, base),
        None => {
            debug!(fallback = profile.fallback_endpoint, "no endpoint in page, using fallback");
            normalize_endpoint(profile.fallback_endpoint, base)
        }
    };

    Ok(DiscoveredSecrets {
        ajax_url,
        nonce: found.nonce,
        csrf_token: found.csrf_token,
    })
}

/// Ensures the base URL ends with a slash so relative joins land under it.
pub fn page_base(base_url: &str) -> GrabResult<Url> {
    let trimmed = base_url.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash)
        .map_err(|err| GrabError::Discovery(format!("invalid base URL {trimmed:?}: {err}")))
}

/// Fetches the host page on `session` and scrapes it.
pub fn discover(
    session: &Session,
    base_url: &str,
    profile: &DiscoveryProfile,
) -> GrabResult<DiscoveredSecrets> {
    let base = page_base(base_url)?;
    debug!(url = %base, "fetching host page");
    let response = session
        .get(base.as_str(), session.config().discovery_timeout)
        .set("Referer", base.as_str())
        .call()
        .map_err(|err| {
            let (_, message) = describe_transport(err);
            GrabError::Discovery(message)
        })?;
    let html = response
        .into_string()
        .map_err(|err| GrabError::Discovery(format!("reading host page: {err}")))?;
    let secrets = extract_secrets(&html, &base, profile)?;
    debug!(
        ajax_url = %secrets.ajax_url,
        nonce = secrets.nonce.is_some(),
        csrf = secrets.csrf_token.is_some(),
        "discovered upstream secrets"
    );
    Ok(secrets)
}
