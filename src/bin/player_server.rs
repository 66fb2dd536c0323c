#![forbid(unsafe_code)]

//! Small web front for the resolver: an HTML player at `/` and a JSON lookup
//! at `/info`.
//!
//! Every request resolves on its own `Session` inside `spawn_blocking`; the
//! only thing shared between requests is the immutable settings snapshot.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use serde::Deserialize;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tunegrab::config::{RuntimeOverrides, RuntimeSettings, resolve_runtime_settings};
use tunegrab::logging::init_logging;
use tunegrab::player::{render_error, render_home_form, render_player};
use tunegrab::{
    GrabError, GrabResult, ProviderKind, ResolveOptions, Session, TrackRecord, resolve_track,
    track_url,
};

#[derive(Parser, Debug)]
#[command(name = "player_server")]
#[command(about = "Serve the track player and JSON lookup API")]
struct ServerArgs {
    /// Listen address (default from TUNEGRAB_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (default from TUNEGRAB_PORT)
    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    provider: Option<ProviderKind>,

    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    debug: bool,

    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl ServerArgs {
    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            host: self.host,
            port: self.port,
            provider: self.provider,
            base_url: self.base_url,
            debug: self.debug.then_some(true),
            env_path: self.env_file,
            ..RuntimeOverrides::default()
        }
    }
}

#[derive(Clone)]
struct AppState {
    settings: Arc<RuntimeSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackQuery {
    url: Option<String>,
}

impl TrackQuery {
    fn link(self) -> Option<String> {
        self.url.filter(|url| !url.trim().is_empty())
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<GrabError> for ApiError {
    fn from(err: GrabError) -> Self {
        Self {
            status: StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "detail": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = resolve_runtime_settings(ServerArgs::parse().into_overrides())?;
    init_logging(settings.debug);

    let addr = SocketAddr::new(settings.host, settings.port);
    info!(provider = %settings.provider, base = settings.provider_base(), "using upstream");
    let app = router(AppState {
        settings: Arc::new(settings),
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    println!("Player listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running player server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/info", get(track_info))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

/// Validation, then one full resolution on a fresh session.
fn fetch_track(settings: &RuntimeSettings, raw_url: &str) -> GrabResult<TrackRecord> {
    let link = track_url::validate(raw_url)?;
    let provider = settings.provider.build(settings.provider_base())?;
    let options = ResolveOptions {
        poll: settings.poll_options(),
        ..ResolveOptions::default()
    };
    resolve_track(provider.as_ref(), &Session::default(), &link, &options)
}

async fn lookup_track(state: &AppState, raw_url: String) -> ApiResult<TrackRecord> {
    let settings = Arc::clone(&state.settings);
    let outcome = tokio::task::spawn_blocking(move || fetch_track(&settings, &raw_url))
        .await
        .map_err(|err| ApiError::internal(format!("resolver task failed: {err}")))?;
    outcome.map_err(|err| {
        warn!(error = %err, "track lookup failed");
        ApiError::from(err)
    })
}

/// Form without a `url`, player page with one. Failures render inline and
/// keep the 200 status.
async fn home(State(state): State<AppState>, Query(query): Query<TrackQuery>) -> Html<String> {
    let Some(url) = query.link() else {
        return Html(render_home_form());
    };
    match lookup_track(&state, url).await {
        Ok(record) => Html(render_player(&record)),
        Err(err) => Html(render_error(&err.message)),
    }
}

async fn track_info(
    State(state): State<AppState>,
    Query(query): Query<TrackQuery>,
) -> ApiResult<Json<TrackRecord>> {
    let url = query
        .link()
        .ok_or_else(|| ApiError::unprocessable("missing 'url' query parameter"))?;
    lookup_track(&state, url).await.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::extract::Path as AxumPath;
    use serde_json::{Value, json};
    use std::time::Duration;

    const TRACK: &str = "https://open.spotify.com/track/4cOdK2wGLETKBW3PvgPWqT";

    fn state_for(provider: ProviderKind, base: &str) -> AppState {
        AppState {
            settings: Arc::new(RuntimeSettings {
                host: "127.0.0.1".parse().unwrap(),
                port: 0,
                provider,
                downloaderize_base: base.to_string(),
                fabdl_base: base.to_string(),
                poll_interval: Duration::from_millis(10),
                timeout: Duration::from_secs(2),
                debug: false,
            }),
        }
    }

    fn offline_state() -> AppState {
        state_for(ProviderKind::Downloaderize, "http://127.0.0.1:9/")
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Fabdl-shaped upstream whose conversion task is finished on creation.
    async fn spawn_fabdl() -> String {
        let app = Router::new()
            .route(
                "/spotify/get",
                get(|| async {
                    Json(json!({"result": {
                        "gid": 9, "id": "4cOdK2wGLETKBW3PvgPWqT",
                        "name": "Served Song", "artists": "Served Band",
                        "image": "https://img.example/s.jpg"
                    }}))
                }),
            )
            .route(
                "/spotify/mp3-convert-task/{gid}/{id}",
                get(|AxumPath((_gid, id)): AxumPath<(String, String)>| async move {
                    Json(json!({"result": {
                        "tid": "t-9", "status": 3,
                        "download_url": format!("/dl/{id}.ogg")
                    }}))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn home_without_url_renders_form() {
        let Html(page) = home(State(offline_state()), Query(TrackQuery::default())).await;
        assert!(page.contains(r#"<form action="/""#));
        assert!(page.contains("Spotify Player"));
    }

    #[tokio::test]
    async fn home_with_invalid_url_renders_inline_error() {
        let query = TrackQuery {
            url: Some("invalid".into()),
        };
        let Html(page) = home(State(offline_state()), Query(query)).await;
        assert!(page.contains("Error: Invalid Spotify URL"));
    }

    #[tokio::test]
    async fn info_rejects_invalid_url_with_400() {
        let query = TrackQuery {
            url: Some("https://open.spotify.com/album/1".into()),
        };
        let response = track_info(State(offline_state()), Query(query))
            .await
            .unwrap_err()
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await, json!({"detail": "Invalid Spotify URL"}));
    }

    #[tokio::test]
    async fn info_requires_url() {
        let response = track_info(State(offline_state()), Query(TrackQuery::default()))
            .await
            .unwrap_err()
            .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn grab_errors_map_to_statuses() {
        let err = ApiError::from(GrabError::NoMediaFound);
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err = ApiError::from(GrabError::upstream(Some(403), "denied"));
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        let err = ApiError::from(GrabError::ConversionTimeout {
            elapsed: Duration::from_secs(120),
        });
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn info_and_player_resolve_through_upstream() {
        let base = spawn_fabdl().await;
        let state = state_for(ProviderKind::Fabdl, &base);

        let query = TrackQuery {
            url: Some(TRACK.into()),
        };
        let Json(record) = track_info(State(state.clone()), Query(query)).await.unwrap();
        assert_eq!(record.title, "Served Song");
        assert_eq!(record.artist, "Served Band");
        assert_eq!(record.media_url, format!("{base}/dl/4cOdK2wGLETKBW3PvgPWqT.ogg"));

        let query = TrackQuery {
            url: Some(TRACK.into()),
        };
        let Html(page) = home(State(state), Query(query)).await;
        assert!(page.contains("audio controls"));
        assert!(page.contains("player-card"));
        assert!(page.contains(r#"type="audio/ogg""#));
    }
}
