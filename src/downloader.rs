#![forbid(unsafe_code)]

//! Streams a resolved media link to disk.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use tracing::{debug, info};
use url::Url;

use crate::error::{GrabError, GrabResult, describe_transport};
use crate::session::Session;

pub const CHUNK_SIZE: usize = 8192;
pub const DEFAULT_EXTENSION: &str = ".mp3";

/// Content-Type fragments and the extension they imply, checked in order.
const CONTENT_TYPE_EXTENSIONS: [(&str, &str); 8] = [
    ("audio/mpeg", ".mp3"),
    ("audio/mp3", ".mp3"),
    ("audio/aac", ".aac"),
    ("audio/m4a", ".m4a"),
    ("audio/x-m4a", ".m4a"),
    ("audio/ogg", ".ogg"),
    ("audio/opus", ".opus"),
    ("audio/webm", ".webm"),
];

static DISPOSITION_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\s*=\s*(?:"([^"]+)"|([^;\s]+))"#).expect("content-disposition regex")
});
static HOSTILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s\-.,()\[\]&]+").expect("filename charset regex"));
static WHITESPACE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

fn dotted(ext: &str) -> String {
    if ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{ext}")
    }
}

fn path_extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(dotted)
}

/// Extension for the output file, in priority order: caller override,
/// Content-Type table, Content-Disposition filename, URL path, `.mp3`.
pub fn resolve_extension(
    forced: Option<&str>,
    content_type: Option<&str>,
    content_disposition: Option<&str>,
    media_url: &str,
) -> String {
    if let Some(forced) = forced.map(str::trim).filter(|ext| !ext.is_empty()) {
        return dotted(forced);
    }

    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    if let Some((_, ext)) = CONTENT_TYPE_EXTENSIONS
        .iter()
        .find(|(fragment, _)| content_type.contains(fragment))
    {
        return (*ext).to_string();
    }

    let from_disposition = content_disposition
        .and_then(|value| DISPOSITION_FILENAME.captures(value))
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .and_then(|name| path_extension(name.as_str()));
    if let Some(ext) = from_disposition {
        return ext;
    }

    let url_path = Url::parse(media_url)
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| media_url.split(['?', '#']).next().unwrap_or_default().to_string());
    path_extension(&url_path).unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Appends `ext` unless the base already ends with it.
pub fn output_path(base: &Path, ext: &str) -> PathBuf {
    let raw = base.as_os_str().to_string_lossy();
    if raw.to_lowercase().ends_with(&ext.to_lowercase()) {
        base.to_path_buf()
    } else {
        PathBuf::from(format!("{raw}{ext}"))
    }
}

/// Makes a display string safe to use as a file name: separators become `-`,
/// anything outside word characters and a little punctuation is dropped,
/// whitespace is collapsed and leading/trailing dots are trimmed. Never empty
/// and stable when applied twice.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = name.trim().replace(['/', '\\'], "-");
    let stripped = HOSTILE_CHARS.replace_all(&replaced, "");
    let collapsed = WHITESPACE_RUNS.replace_all(&stripped, " ");
    let cleaned = collapsed.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if cleaned.is_empty() {
        "output".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Byte counter handed to the progress observer after every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl DownloadProgress {
    pub fn percent(&self) -> Option<f64> {
        self.total
            .filter(|total| *total > 0)
            .map(|total| self.downloaded as f64 / total as f64 * 100.0)
    }
}

/// How to fetch and name one media file.
#[derive(Debug, Clone)]
pub struct DownloadRequest<'a> {
    pub media_url: &'a str,
    /// Output path without extension.
    pub output_base: &'a Path,
    pub forced_extension: Option<&'a str>,
    pub headers: &'a [(String, String)],
}

/// Streams the media body to `<output_base><ext>` in fixed-size chunks,
/// creating parent directories. Existing files are overwritten; callers that
/// care check first.
pub fn download_media(
    session: &Session,
    request: &DownloadRequest<'_>,
    mut on_progress: impl FnMut(DownloadProgress),
) -> GrabResult<PathBuf> {
    let mut http = session.get(request.media_url, session.config().download_timeout);
    for (name, value) in request.headers {
        http = http.set(name, value);
    }
    let response = http.call().map_err(|err| {
        let (_, message) = describe_transport(err);
        GrabError::Download(message)
    })?;

    let ext = resolve_extension(
        request.forced_extension,
        response.header("Content-Type"),
        response.header("Content-Disposition"),
        request.media_url,
    );
    let path = output_path(request.output_base, &ext);
    let total = response
        .header("Content-Length")
        .and_then(|value| value.trim().parse::<u64>().ok());
    debug!(url = request.media_url, path = %path.display(), ?total, "streaming media");

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            GrabError::Download(format!("creating {}: {err}", parent.display()))
        })?;
    }
    let file = File::create(&path)
        .map_err(|err| GrabError::Download(format!("creating {}: {err}", path.display())))?;
    let mut writer = BufWriter::new(file);
    let mut reader = response.into_reader();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut downloaded: u64 = 0;
    let started = Instant::now();

    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|err| GrabError::Download(format!("reading body: {err}")))?;
        if read == 0 {
            break;
        }
        writer
            .write_all(&buffer[..read])
            .map_err(|err| GrabError::Download(format!("writing {}: {err}", path.display())))?;
        downloaded += read as u64;
        on_progress(DownloadProgress { downloaded, total });
    }
    writer
        .flush()
        .map_err(|err| GrabError::Download(format!("writing {}: {err}", path.display())))?;

    info!(
        path = %path.display(),
        bytes = downloaded,
        secs = started.elapsed().as_secs_f64(),
        "download finished"
    );
    Ok(path)
}
