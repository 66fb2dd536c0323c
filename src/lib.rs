#![forbid(unsafe_code)]

//! Resolves Spotify track links into downloadable media by driving
//! third-party downloader sites, then streams the audio to disk.

pub mod config;
pub mod discovery;
pub mod downloader;
pub mod error;
pub mod logging;
pub mod normalize;
pub mod player;
pub mod poller;
pub mod provider;
pub mod requester;
pub mod session;
pub mod track_url;

#[cfg(test)]
mod test_support;

pub use error::{GrabError, GrabResult};
pub use normalize::TrackRecord;
pub use provider::{Provider, ProviderKind, ResolveOptions, resolve_track};
pub use session::{HttpConfig, Session};
