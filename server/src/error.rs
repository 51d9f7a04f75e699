use chunk_store::error::MetadataError;
use chunk_store::UploadError;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("missing or unknown bearer token")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(u64),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::Upload(e) => match e {
                UploadError::NotFound(_) => Status::NotFound,
                UploadError::PermissionDenied { .. } => Status::Forbidden,
                UploadError::AlreadyMerged(_) => Status::Conflict,
                UploadError::MetadataWriteFailure(MetadataError::Conflict(_)) => Status::Conflict,
                UploadError::ChunkCountMismatch { .. } | UploadError::InvalidChunk { .. } => {
                    Status::BadRequest
                }
                UploadError::ChunkTooLarge { .. } => Status::PayloadTooLarge,
                UploadError::QueueFull => Status::ServiceUnavailable,
                _ => Status::InternalServerError,
            },
            ApiError::Unauthorized => Status::Unauthorized,
            ApiError::BadRequest(_) => Status::BadRequest,
            ApiError::PayloadTooLarge(_) => Status::PayloadTooLarge,
            ApiError::Internal(_) => Status::InternalServerError,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Upload(e) => e.code(),
            ApiError::Unauthorized => "unauthorized",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if status.code >= 500 {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        }
        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).respond_to(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_errors_map_to_http_status() {
        let cases = [
            (UploadError::NotFound("f".into()), Status::NotFound),
            (
                UploadError::PermissionDenied {
                    file_id: "f".into(),
                    user_id: "u".into(),
                },
                Status::Forbidden,
            ),
            (UploadError::AlreadyMerged("f".into()), Status::Conflict),
            (
                UploadError::ChunkCountMismatch {
                    file_id: "f".into(),
                    expected: 3,
                    actual: 2,
                },
                Status::BadRequest,
            ),
            (UploadError::QueueFull, Status::ServiceUnavailable),
            (
                UploadError::WorkerFault {
                    file_id: "f".into(),
                    chunk_id: 0,
                },
                Status::InternalServerError,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_code_passes_through_upload_code() {
        let err = ApiError::from(UploadError::AlreadyMerged("f".into()));
        assert_eq!(err.code(), "already_merged");
        assert_eq!(ApiError::Unauthorized.code(), "unauthorized");
    }
}
