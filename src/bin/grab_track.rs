#![forbid(unsafe_code)]

//! Command-line downloader: resolves one Spotify track through the configured
//! upstream and streams the audio into the current directory.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tunegrab::config::{RuntimeOverrides, RuntimeSettings, resolve_runtime_settings};
use tunegrab::discovery::SecretOverrides;
use tunegrab::downloader::{DownloadProgress, DownloadRequest, download_media, sanitize_filename};
use tunegrab::logging::init_logging;
use tunegrab::{
    GrabError, GrabResult, ProviderKind, ResolveOptions, Session, resolve_track, track_url,
};

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "grab_track")]
#[command(about = "Download a Spotify track through a third-party downloader site")]
#[command(version)]
struct Cli {
    /// Spotify track link; prompted for when omitted
    track_url: Option<String>,

    /// Output path without extension (default: "<artist> - <title>")
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Force the output extension, e.g. mp3
    #[arg(long)]
    ext: Option<String>,

    /// Skip endpoint discovery and post here
    #[arg(long)]
    ajax_url: Option<String>,

    /// Nonce to send instead of the scraped one
    #[arg(long)]
    nonce: Option<String>,

    /// Upstream to use (downloaderize or fabdl)
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// Base URL of the selected upstream
    #[arg(long)]
    base_url: Option<String>,

    /// Verbose logging on stderr
    #[arg(long)]
    debug: bool,

    /// Seconds between conversion status checks
    #[arg(long)]
    poll_interval: Option<f64>,

    /// Seconds to wait for the conversion before giving up
    #[arg(long)]
    timeout: Option<f64>,

    /// Alternate .env file
    #[arg(long)]
    env_file: Option<PathBuf>,
}

/// Everything the blocking pipeline needs, resolved up front.
#[derive(Debug, Clone)]
struct GrabJob {
    raw_url: String,
    output: Option<PathBuf>,
    forced_extension: Option<String>,
    overrides: SecretOverrides,
    settings: RuntimeSettings,
}

impl Cli {
    fn runtime_overrides(&self) -> RuntimeOverrides {
        RuntimeOverrides {
            provider: self.provider,
            base_url: self.base_url.clone(),
            poll_interval: self.poll_interval,
            timeout: self.timeout,
            debug: self.debug.then_some(true),
            env_path: self.env_file.clone(),
            ..RuntimeOverrides::default()
        }
    }

    fn secret_overrides(&self) -> SecretOverrides {
        SecretOverrides {
            ajax_url: non_blank(self.ajax_url.clone()),
            nonce: non_blank(self.nonce.clone()),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn prompt(label: &str) -> Result<Option<String>> {
    print!("{label}");
    io::stdout().flush().context("flushing prompt")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading from stdin")?;
    Ok(non_blank(Some(line)))
}

fn build_job(cli: Cli) -> Result<GrabJob> {
    let settings = resolve_runtime_settings(cli.runtime_overrides())?;
    let overrides = cli.secret_overrides();
    let mut output = cli.output;
    let mut forced_extension = non_blank(cli.ext);

    let raw_url = match non_blank(cli.track_url) {
        Some(url) => url,
        None => {
            let url = prompt("Spotify track URL: ")?.unwrap_or_default();
            if output.is_none() {
                output = prompt("Output name (blank for \"artist - title\"): ")?.map(PathBuf::from);
            }
            if forced_extension.is_none() {
                forced_extension = prompt("Force extension (blank for auto): ")?;
            }
            url
        }
    };

    Ok(GrabJob {
        raw_url,
        output,
        forced_extension,
        overrides,
        settings,
    })
}

fn print_progress(progress: DownloadProgress) {
    match progress.percent() {
        Some(percent) => print!("\rDownloading: {percent:.1}%"),
        None => print!("\rDownloading: {} KiB", progress.downloaded / 1024),
    }
    let _ = io::stdout().flush();
}

fn grab(job: &GrabJob) -> GrabResult<PathBuf> {
    let session = Session::default();
    let track_url = track_url::resolve(&session, &job.raw_url)?;
    let settings = &job.settings;
    let provider = settings.provider.build(settings.provider_base())?;
    let options = ResolveOptions {
        poll: settings.poll_options(),
        overrides: job.overrides.clone(),
    };

    println!("Resolving {track_url} via {}", settings.provider);
    let record = resolve_track(provider.as_ref(), &session, &track_url, &options)?;
    println!();
    println!("Track: {}", record.title);
    println!("Artist: {}", record.artist);
    if let Some(thumbnail) = &record.thumbnail {
        println!("Thumbnail: {thumbnail}");
    }
    println!("Media URL: {}", record.media_url);
    println!();

    let output_base = job.output.clone().unwrap_or_else(|| {
        PathBuf::from(sanitize_filename(&format!(
            "{} - {}",
            record.artist, record.title
        )))
    });
    let headers = provider.download_headers();
    let path = download_media(
        &session,
        &DownloadRequest {
            media_url: &record.media_url,
            output_base: &output_base,
            forced_extension: job.forced_extension.as_deref(),
            headers: &headers,
        },
        print_progress,
    )?;
    println!();
    Ok(path)
}

fn report_failure(err: &GrabError) -> ExitCode {
    eprintln!("Error: {err}");
    if err.is_retryable() {
        eprintln!("The conversion may still finish upstream; try again in a moment.");
    }
    ExitCode::from(err.exit_code())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let job = match build_job(cli) {
        Ok(job) => job,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(job.settings.debug);

    let task = tokio::task::spawn_blocking(move || grab(&job));
    tokio::select! {
        joined = task => match joined {
            Ok(Ok(path)) => {
                println!("Saved to {}", path.display());
                ExitCode::SUCCESS
            }
            Ok(Err(err)) => report_failure(&err),
            Err(err) => {
                eprintln!("Error: download task failed: {err}");
                ExitCode::FAILURE
            }
        },
        _ = signal::ctrl_c() => {
            eprintln!();
            eprintln!("Interrupted");
            // The blocking pipeline cannot be cancelled; leave without
            // waiting for it.
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_flag_set() {
        let cli = Cli::try_parse_from([
            "grab_track",
            "https://open.spotify.com/track/abc123",
            "-o",
            "out/song",
            "--ext",
            "m4a",
            "--ajax-url",
            "https://site/wp-admin/admin-ajax.php",
            "--nonce",
            "abcdef1234",
            "--provider",
            "fabdl",
            "--debug",
            "--poll-interval",
            "0.5",
            "--timeout",
            "30",
        ])
        .unwrap();
        assert_eq!(cli.track_url.as_deref(), Some("https://open.spotify.com/track/abc123"));
        assert_eq!(cli.output, Some(PathBuf::from("out/song")));
        assert_eq!(cli.ext.as_deref(), Some("m4a"));
        assert_eq!(cli.provider, Some(ProviderKind::Fabdl));

        let runtime = cli.runtime_overrides();
        assert_eq!(runtime.poll_interval, Some(0.5));
        assert_eq!(runtime.timeout, Some(30.0));
        assert_eq!(runtime.debug, Some(true));

        let secrets = cli.secret_overrides();
        assert!(secrets.is_complete());
        assert_eq!(secrets.nonce.as_deref(), Some("abcdef1234"));
    }

    #[test]
    fn url_is_optional_and_debug_defaults_off() {
        let cli = Cli::try_parse_from(["grab_track"]).unwrap();
        assert!(cli.track_url.is_none());
        assert_eq!(cli.runtime_overrides().debug, None);
        assert!(!cli.secret_overrides().is_complete());
    }

    #[test]
    fn rejects_unknown_provider() {
        assert!(Cli::try_parse_from(["grab_track", "--provider", "napster"]).is_err());
    }

    #[test]
    fn blank_overrides_are_ignored() {
        let cli = Cli::try_parse_from(["grab_track", "x", "--nonce", "  "]).unwrap();
        assert_eq!(cli.secret_overrides().nonce, None);
    }

    #[test]
    fn invalid_link_exits_with_two() {
        let job = GrabJob {
            raw_url: "https://open.spotify.com/album/1a2b3c".into(),
            output: None,
            forced_extension: None,
            overrides: SecretOverrides::default(),
            settings: resolve_runtime_settings(RuntimeOverrides {
                env_path: Some(PathBuf::from("/nonexistent/.env")),
                ..RuntimeOverrides::default()
            })
            .unwrap(),
        };
        let err = grab(&job).unwrap_err();
        assert!(matches!(err, GrabError::InvalidTrackUrl(_)));
        assert_eq!(err.exit_code(), 2);
    }
}
