use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use chunk_store::storage::BlobStore;
use chunk_store::{ChunkMetadata, ChunkUploadService, FileMetadata, FileStatus, UploadError};
use rocket::data::{Data, ToByteUnit};
use rocket::figment::Figment;
use rocket::http::Status;
use rocket::request::Request;
use rocket::serde::json::Json;
use rocket::tokio::io::{AsyncRead, ReadBuf};
use rocket::{catch, catchers, get, post, routes, Build, Rocket, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{Caller, TokenTable};
use crate::error::{ApiError, ErrorBody};

pub struct AppState {
    pub uploads: Arc<ChunkUploadService>,
    pub blobs: Arc<dyn BlobStore>,
    pub max_chunk_bytes: u64,
}

#[derive(Debug, Deserialize)]
pub struct InitRequest {
    #[serde(default)]
    pub file_id: Option<String>,
    pub filename: String,
    pub total_size: u64,
    pub chunk_count: u32,
    pub chunk_size: u64,
}

#[derive(Debug, Serialize)]
pub struct MergeResponse {
    pub file_id: String,
    pub status: FileStatus,
    pub storage_path: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Passes a request body through until more than `limit` bytes arrive, then
/// fails the read and remembers that it did.
struct CappedBody<R> {
    inner: R,
    limit: u64,
    read: u64,
    exceeded: bool,
}

impl<R> CappedBody<R> {
    fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            read: 0,
            exceeded: false,
        }
    }

    fn exceeded(&self) -> bool {
        self.exceeded
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CappedBody<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        self.read += (buf.filled().len() - before) as u64;
        if self.read > self.limit {
            self.exceeded = true;
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("request body exceeds {} bytes", self.limit),
            )));
        }
        Poll::Ready(Ok(()))
    }
}

fn validate_file_id(file_id: &str) -> Result<(), ApiError> {
    let valid = !file_id.is_empty()
        && file_id.len() <= 128
        && file_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("invalid file id: {:?}", file_id)))
    }
}

#[post("/upload/init", data = "<req>")]
async fn init_upload(
    caller: Caller,
    state: &State<AppState>,
    req: Json<InitRequest>,
) -> Result<Json<FileMetadata>, ApiError> {
    let req = req.into_inner();
    if req.filename.trim().is_empty() {
        return Err(ApiError::BadRequest("filename must not be empty".to_string()));
    }
    if req.chunk_count == 0 {
        return Err(ApiError::BadRequest("chunk_count must be at least 1".to_string()));
    }
    if req.chunk_size == 0 {
        return Err(ApiError::BadRequest("chunk_size must be at least 1".to_string()));
    }
    let file_id = req.file_id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    validate_file_id(&file_id)?;

    let mut file = FileMetadata::new(
        file_id,
        req.filename,
        caller.user_id,
        req.total_size,
        req.chunk_count,
        req.chunk_size,
    );
    state.uploads.metadata().create_file_metadata(&mut file).await?;
    Ok(Json(file))
}

#[post("/upload/<file_id>/chunk/<chunk_id>", data = "<data>")]
async fn upload_chunk(
    caller: Caller,
    state: &State<AppState>,
    file_id: &str,
    chunk_id: u32,
    data: Data<'_>,
) -> Result<Json<ChunkMetadata>, ApiError> {
    // One byte past the cap is enough to tell an oversized body from a full one.
    let stream = data.open(state.max_chunk_bytes.saturating_add(1).bytes());
    let mut body = CappedBody::new(Box::pin(stream), state.max_chunk_bytes);
    let result = state
        .uploads
        .upload_chunk(file_id, chunk_id, &mut body, &caller.user_id)
        .await;
    if body.exceeded() {
        return Err(ApiError::PayloadTooLarge(state.max_chunk_bytes));
    }
    Ok(Json(result?))
}

#[post("/upload/<file_id>/merge")]
async fn merge(
    caller: Caller,
    state: &State<AppState>,
    file_id: &str,
) -> Result<Json<MergeResponse>, ApiError> {
    let merged = state.uploads.merge_chunks(file_id, &caller.user_id).await?;
    Ok(Json(MergeResponse {
        file_id: merged.file_id,
        status: FileStatus::Merged,
        storage_path: merged.storage_path,
        size: merged.size,
    }))
}

#[get("/health")]
async fn health(state: &State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    state.blobs.health_check().await.map_err(UploadError::from)?;
    state.uploads.metadata().health_check().await?;
    Ok(Json(HealthResponse { status: "ok" }))
}

#[catch(401)]
fn unauthorized() -> Json<ErrorBody> {
    Json(ErrorBody {
        error: ApiError::Unauthorized.code().to_string(),
        message: ApiError::Unauthorized.to_string(),
    })
}

#[catch(default)]
fn default_catcher(status: Status, _req: &Request<'_>) -> (Status, Json<ErrorBody>) {
    let body = ErrorBody {
        error: "http_error".to_string(),
        message: status.reason_lossy().to_string(),
    };
    (status, Json(body))
}

pub fn build(figment: Figment, state: AppState, tokens: TokenTable) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(state)
        .manage(tokens)
        .mount("/", routes![init_upload, upload_chunk, merge, health])
        .register("/", catchers![unauthorized, default_catcher])
}
