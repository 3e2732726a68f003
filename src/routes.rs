use crate::api::{
    ApiError, ApiResult, ConversionResponse, ConvertPairRequest, ConvertUrlRequest, HealthResponse, supports_flac,
};
use crate::serve::{X_SINGLE_RANGE_ONLY, serve};
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE, USER_AGENT};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::path::PathBuf;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncWriteExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uade_config::ExampleSource;
use uade_fetch::sanitize_for_log;
use uade_pipeline::{Conversion, StagedInput};
use uuid::Uuid;

/// Multipart framing on top of the largest accepted file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;
/// Player reported for two-part TFMX conversions.
const TFMX_LABEL: &str = "TFMX";

pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.server.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE, RANGE])
        .expose_headers([ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, X_SINGLE_RANGE_ONLY]);
    Router::new()
        .route("/upload", post(upload))
        .route("/convert-url", post(convert_url))
        .route("/convert-tfmx", post(convert_tfmx))
        .route("/play-example/{id}", post(play_example))
        .route("/play/{id}", get(play))
        .route("/download/{id}", get(download))
        .route("/health", get(health))
        .route("/examples", get(examples))
        .fallback_service(ServeDir::new(&state.config.server.static_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn wants_flac(headers: &HeaderMap) -> bool {
    headers
        .get(USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .is_some_and(supports_flac)
}

/// How a conversion is reported when the module itself doesn't say.
#[derive(Debug, Default)]
struct Labels {
    filename: Option<String>,
    player_format: Option<&'static str>,
}

impl Labels {
    fn tfmx(filename: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            player_format: Some(TFMX_LABEL),
        }
    }
}

/// Convert what `staged` holds and publish the result under a fresh id.
async fn finish(
    state: &AppState,
    staged: StagedInput,
    want_flac: bool,
    labels: Labels,
) -> ApiResult<Json<ConversionResponse>> {
    let Conversion {
        player_format,
        artifact,
        ..
    } = state.orchestrator.convert(&staged, want_flac).await?;
    let file_id = Uuid::new_v4().to_string();
    let key = PathBuf::from(format!("{file_id}.{}", artifact.format.extension()));
    if let Err(err) = state.published.save_file(&key, &artifact.path).await {
        tracing::error!(error = ?err, "Could not publish conversion");
        return Err(ApiError::internal("could not store converted file"));
    }
    let filename = labels
        .filename
        .unwrap_or_else(|| staged.display_name().unwrap_or("module").to_string());
    tracing::info!(%file_id, %filename, format = %artifact.format, "Published conversion");
    Ok(Json(ConversionResponse {
        success: true,
        play_url: format!("/play/{file_id}"),
        download_url: format!("/download/{file_id}"),
        file_id,
        filename,
        player_format: labels.player_format.map(str::to_string).unwrap_or(player_format),
        audio_format: artifact.format.extension().to_string(),
    }))
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<ConversionResponse>> {
    let mut staged = state.orchestrator.stage()?;
    let limit = state.config.server.max_upload_bytes;
    let mut saved = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::input(err.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(ApiError::input("No file selected"));
        }
        let path = staged.file_path(&name);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|_| ApiError::internal("could not save upload"))?;
        let mut written = 0u64;
        while let Some(chunk) = field.chunk().await.map_err(|err| ApiError::input(err.body_text()))? {
            written += chunk.len() as u64;
            if written > limit {
                return Err(ApiError::input(format!("File exceeds the {limit} byte upload limit")));
            }
            file.write_all(&chunk)
                .await
                .map_err(|_| ApiError::internal("could not save upload"))?;
        }
        file.flush().await.map_err(|_| ApiError::internal("could not save upload"))?;
        tracing::info!(filename = %name, bytes = written, "Received upload");
        saved = Some((path, name));
        break;
    }
    let Some((path, name)) = saved else {
        return Err(ApiError::input("No file provided"));
    };
    state.orchestrator.ingest(&mut staged, &path, Some(name)).await?;
    finish(&state, staged, wants_flac(&headers), Labels::default()).await
}

async fn convert_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ConvertUrlRequest>, JsonRejection>,
) -> ApiResult<Json<ConversionResponse>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let Some(url) = request.url.as_deref().map(str::trim).filter(|url| !url.is_empty()) else {
        return Err(ApiError::input("No URL provided"));
    };
    tracing::info!(url = %sanitize_for_log(url), "Converting from URL");
    let mut staged = state.orchestrator.stage()?;
    match request.sample_url.as_deref().map(str::trim).filter(|url| !url.is_empty()) {
        Some(sample_url) => state.orchestrator.fetch_pair(&mut staged, url, sample_url).await?,
        None => state.orchestrator.fetch(&mut staged, url).await?,
    }
    finish(&state, staged, wants_flac(&headers), Labels::default()).await
}

async fn convert_tfmx(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ConvertPairRequest>, JsonRejection>,
) -> ApiResult<Json<ConversionResponse>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let (Some(mdat_url), Some(smpl_url)) = (request.mdat_url.as_deref(), request.smpl_url.as_deref()) else {
        return Err(ApiError::input("Both mdat_url and smpl_url required"));
    };
    let (mdat_url, smpl_url) = (mdat_url.trim(), smpl_url.trim());
    tracing::info!(mdat = %sanitize_for_log(mdat_url), smpl = %sanitize_for_log(smpl_url), "Converting TFMX pair");
    let mut staged = state.orchestrator.stage()?;
    state.orchestrator.fetch_pair(&mut staged, mdat_url, smpl_url).await?;
    finish(&state, staged, wants_flac(&headers), Labels::tfmx("tfmx_module")).await
}

async fn play_example(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ConversionResponse>> {
    let Some(example) = state.config.example(&id) else {
        return Err(ApiError::not_found("Example not found"));
    };
    tracing::info!(example = %example.id, "Playing example");
    let mut staged = state.orchestrator.stage()?;
    let labels = match &example.source {
        ExampleSource::Pair { mdat_url, smpl_url } => {
            state.orchestrator.fetch_pair(&mut staged, mdat_url, smpl_url).await?;
            Labels::tfmx(example.name.clone())
        },
        ExampleSource::Single { url } => {
            state.orchestrator.fetch(&mut staged, url).await?;
            Labels {
                filename: Some(example.name.clone()),
                player_format: None,
            }
        },
    };
    finish(&state, staged, wants_flac(&headers), labels).await
}

fn range_header(headers: &HeaderMap) -> Option<&str> {
    // An unreadable header is still a Range header, and must be refused
    // rather than ignored.
    headers.get(RANGE).map(|value| value.to_str().unwrap_or("invalid"))
}

async fn play(State(state): State<AppState>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    serve(state.published.as_ref(), &id, range_header(&headers), false, &state.config.serving).await
}

async fn download(State(state): State<AppState>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    serve(state.published.as_ref(), &id, range_header(&headers), true, &state.config.serving).await
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        uade_available: state.uade_available,
    })
}

async fn examples(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(&state.config.examples).unwrap_or_default())
}
