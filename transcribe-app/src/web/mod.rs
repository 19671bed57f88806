//! # Upload Form Server
//!
//! A single page: `GET /` shows the form, `POST /` transcribes the uploaded
//! file and links its artifacts, and `/static/{*path}` serves them back.
//! Every upload gets its own job directory under the upload folder, which
//! is removed again if anything fails.

pub mod page;

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing::{error, info, warn};
use transcribe_core::{RasterOutcome, TranscribeRequest};

use crate::worker::TranscriptionWorker;
use page::JobLinks;

/// Only accept these audio file extensions.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["wav", "mp3", "flac"];

const INVALID_UPLOAD: &str = "Please upload a valid WAV, MP3, or FLAC file.";
const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";
const TOO_LARGE: &str = "The file is too large to upload.";

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub addr: SocketAddr,
    /// Directory where uploaded audio and generated outputs go.
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub render_png: bool,
}

#[derive(Clone)]
struct AppState {
    worker: Arc<TranscriptionWorker>,
    upload_dir: PathBuf,
    render_png: bool,
    max_upload_bytes: usize,
}

/// Runs the server until Ctrl-C.
pub async fn serve(options: ServeOptions, worker: TranscriptionWorker) -> Result<()> {
    tokio::fs::create_dir_all(&options.upload_dir)
        .await
        .with_context(|| format!("cannot create {}", options.upload_dir.display()))?;

    let state = AppState {
        worker: Arc::new(worker),
        upload_dir: options.upload_dir.clone(),
        render_png: options.render_png,
        max_upload_bytes: options.max_upload_bytes,
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(options.addr)
        .await
        .with_context(|| format!("cannot bind {}", options.addr))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("Server stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index).post(upload))
        .route("/static/{*path}", get(static_file))
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn index() -> Html<String> {
    Html(page::render(None, None))
}

/// Lower-cased extension if it is one we accept.
fn allowed_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

async fn upload(State(state): State<AppState>, multipart: Multipart) -> (StatusCode, Html<String>) {
    let upload = match read_audio_field(multipart).await {
        Ok(upload) => upload,
        Err(e) => {
            warn!("Rejected upload: {}", e);
            return rejection(e.status());
        }
    };
    let Some((ext, data)) = upload.and_then(|(name, data)| {
        let ext = allowed_extension(&name)?;
        (!data.is_empty()).then_some((ext, data))
    }) else {
        return rejection(StatusCode::BAD_REQUEST);
    };

    match handle_upload(&state, &ext, &data).await {
        Ok(links) => (StatusCode::OK, Html(page::render(None, Some(&links)))),
        Err(e) => {
            // Full chain goes to the log only
            error!("Unhandled error while transcribing upload: {:#}", e);
            rejection(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Form page with the notice matching a failed request's status.
fn rejection(status: StatusCode) -> (StatusCode, Html<String>) {
    let (status, notice) = if status == StatusCode::PAYLOAD_TOO_LARGE {
        (status, TOO_LARGE)
    } else if status.is_client_error() {
        (StatusCode::BAD_REQUEST, INVALID_UPLOAD)
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE)
    };
    (status, Html(page::render(Some(notice), None)))
}

/// Pulls the `audio` field out of the form.
async fn read_audio_field(
    mut multipart: Multipart,
) -> Result<Option<(String, Bytes)>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("audio") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await?;
        return Ok(Some((filename, data)));
    }
    Ok(None)
}

/// Stores the upload in a fresh job directory and transcribes it there.
///
/// The directory is removed again on every error path; it survives only
/// when the pipeline succeeds.
async fn handle_upload(state: &AppState, ext: &str, data: &[u8]) -> Result<JobLinks> {
    let job_dir = tempfile::Builder::new()
        .prefix("job-")
        .tempdir_in(&state.upload_dir)
        .context("cannot create job directory")?;
    let audio_name = format!("input.{ext}");
    let audio_path = job_dir.path().join(&audio_name);
    tokio::fs::write(&audio_path, data)
        .await
        .with_context(|| format!("cannot save upload to {}", audio_path.display()))?;

    let request = TranscribeRequest::in_dir(&audio_path, job_dir.path(), state.render_png);
    let report = state
        .worker
        .submit(request)?
        .await
        .context("transcription worker dropped the job")??;

    let job_dir = job_dir.keep();
    let job_id = job_dir
        .file_name()
        .and_then(|n| n.to_str())
        .context("job directory has no name")?
        .to_string();
    info!("Job {} finished with {} notes", job_id, report.notes.len());

    let url = |name: &str| format!("/static/{job_id}/{name}");
    Ok(JobLinks {
        audio: url(&audio_name),
        midi: url("output.mid"),
        musicxml: url("output.musicxml"),
        png: match &report.raster {
            RasterOutcome::Rendered(_) => Some(url("output_sheet.png")),
            _ => None,
        },
        note_count: report.notes.len(),
    })
}

/// Relative path under the upload folder, rejecting `..`, roots and prefixes.
fn safe_relative_path(path: &str) -> Option<PathBuf> {
    let rel = Path::new(path);
    let normal = rel
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    (normal && !path.is_empty()).then(|| rel.to_path_buf())
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("mid") => "audio/midi",
        Some("musicxml") => "application/vnd.recordare.musicxml+xml",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

async fn static_file(State(state): State<AppState>, UrlPath(path): UrlPath<String>) -> Response {
    let Some(rel) = safe_relative_path(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let full = state.upload_dir.join(&rel);
    match tokio::fs::read(&full).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type(&full))], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
