#![forbid(unsafe_code)]

//! Turns loosely-shaped upstream JSON into a [`TrackRecord`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{GrabError, GrabResult};

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Keys that mark an object as the real track payload.
const PAYLOAD_MARKERS: [&str; 4] = ["medias", "title", "author", "artists"];
/// Wrapper keys some upstreams nest the payload under.
const WRAPPER_KEYS: [&str; 2] = ["data", "result"];

/// The normalized result of a resolution. Only exists with a non-empty
/// `media_url`; see [`TrackDetails::into_record`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub title: String,
    pub artist: String,
    pub thumbnail: Option<String>,
    pub media_url: String,
}

/// Everything the normalizer could read, before the media gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDetails {
    pub title: String,
    pub artist: String,
    pub thumbnail: Option<String>,
    pub media_url: Option<String>,
}

impl TrackDetails {
    /// The single gate every upstream funnels through: no link, no record.
    pub fn into_record(self) -> GrabResult<TrackRecord> {
        match self.media_url {
            Some(media_url) if !media_url.trim().is_empty() => Ok(TrackRecord {
                title: self.title,
                artist: self.artist,
                thumbnail: self.thumbnail,
                media_url,
            }),
            _ => Err(GrabError::NoMediaFound),
        }
    }
}

/// Steps into a `data`/`result` wrapper when it holds the track fields.
pub fn unwrap_payload(value: &Value) -> &Value {
    for key in WRAPPER_KEYS {
        if let Some(inner) = value.get(key).filter(|inner| inner.is_object())
            && PAYLOAD_MARKERS.iter().any(|marker| inner.get(marker).is_some())
        {
            return inner;
        }
    }
    value
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn entry_url(entry: &Value) -> Option<&str> {
    entry
        .get("url")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
}

/// Picks a media entry: an mp3 link if any, else the first entry with a link.
pub fn choose_media(payload: &Value) -> Option<&Value> {
    let medias = payload.get("medias")?.as_array()?;
    medias
        .iter()
        .find(|entry| entry_url(entry).is_some_and(|url| url.to_lowercase().contains(".mp3")))
        .or_else(|| medias.iter().find(|entry| entry_url(entry).is_some()))
}

/// Artist names come as a string, a list of strings, or a list of
/// `{name}` objects depending on the upstream.
fn read_artist(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
        Value::Array(entries) => {
            let names: Vec<String> = entries
                .iter()
                .filter_map(|entry| match entry {
                    Value::String(name) => Some(name.trim().to_string()),
                    Value::Object(_) => non_empty_str(entry.get("name")),
                    _ => None,
                })
                .filter(|name| !name.is_empty())
                .collect();
            if names.is_empty() {
                None
            } else {
                Some(names.join(", "))
            }
        }
        Value::Object(_) => non_empty_str(value?.get("name")),
        _ => None,
    }
}

fn read_thumbnail(payload: &Value) -> Option<String> {
    non_empty_str(payload.get("thumbnail"))
        .or_else(|| non_empty_str(payload.get("image")))
        .or_else(|| {
            payload
                .get("album")
                .and_then(|album| album.get("images"))
                .and_then(Value::as_array)
                .and_then(|images| images.iter().find_map(|image| non_empty_str(image.get("url"))))
        })
}

/// Non-blank `name`/`artist` query parameters on the media link.
pub fn tags_from_query(media_url: &str) -> (Option<String>, Option<String>) {
    let Ok(url) = Url::parse(media_url) else {
        return (None, None);
    };
    let mut name = None;
    let mut artist = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            _ if value.trim().is_empty() => {}
            "name" if name.is_none() => name = Some(value.trim().to_string()),
            "artist" if artist.is_none() => artist = Some(value.trim().to_string()),
            _ => {}
        }
    }
    (name, artist)
}

/// Reads title, artist, thumbnail and media link from any supported shape.
///
/// Tags carried on the media link's query string override the payload's own
/// title/artist.
pub fn extract_track_details(raw: &Value) -> TrackDetails {
    let payload = unwrap_payload(raw);
    let mut title = non_empty_str(payload.get("title"))
        .or_else(|| non_empty_str(payload.get("name")))
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string());
    let mut artist = read_artist(payload.get("author"))
        .or_else(|| read_artist(payload.get("artists")))
        .or_else(|| read_artist(payload.get("artist")))
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let thumbnail = read_thumbnail(payload);
    let media_url = choose_media(payload)
        .and_then(entry_url)
        .map(str::to_string);

    if let Some(url) = &media_url {
        let (query_title, query_artist) = tags_from_query(url);
        if let Some(query_title) = query_title {
            title = query_title;
        }
        if let Some(query_artist) = query_artist {
            artist = query_artist;
        }
    }

    TrackDetails {
        title,
        artist,
        thumbnail,
        media_url,
    }
}

/// [`extract_track_details`] followed by the media gate.
pub fn normalize_payload(raw: &Value) -> GrabResult<TrackRecord> {
    extract_track_details(raw).into_record()
}
