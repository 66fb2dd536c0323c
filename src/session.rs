#![forbid(unsafe_code)]

//! Per-resolution HTTP context.
//!
//! A [`Session`] owns one cookie-carrying agent. Upstreams bind the conversion
//! request to cookies set while the host page was fetched, so the same session
//! must be threaded through every step of one resolution and never shared
//! between two.

use std::time::Duration;

use ureq::{Agent, AgentBuilder, Request};

/// Mobile Chrome; the upstream pages serve the same markup to it as to desktop.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/137.0.0.0 Mobile Safari/537.36";

/// Explicit request settings, handed to every call instead of living in
/// process-wide client defaults.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub discovery_timeout: Duration,
    pub request_timeout: Duration,
    pub download_timeout: Duration,
    pub max_redirects: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: BROWSER_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(15),
            discovery_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(600),
            max_redirects: 10,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    agent: Agent,
    config: HttpConfig,
}

impl Session {
    pub fn new(config: HttpConfig) -> Self {
        let agent = AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .redirects(config.max_redirects)
            .user_agent(&config.user_agent)
            .build();
        Self { agent, config }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// GET with the session cookies and the given overall timeout.
    pub fn get(&self, url: &str, timeout: Duration) -> Request {
        self.agent.get(url).timeout(timeout)
    }

    pub fn post(&self, url: &str, timeout: Duration) -> Request {
        self.agent.post(url).timeout(timeout)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(HttpConfig::default())
    }
}
