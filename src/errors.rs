use std::io::Cursor;

use rocket::http::{ContentType, Status};
use rocket::response;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DepotError>;

#[derive(Error, Debug)]
pub enum DepotError {
    #[error("database error {0:?}")]
    DbError(#[from] diesel::result::Error),

    #[error("multipart decoding error {0:?}")]
    MultipartError(#[from] multer::Error),

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage backend unavailable: {0}")]
    StorageUnavailable(String),

    /// A cascade stopped after some of its steps already went through. Nothing
    /// is rolled back; re-running the same operation finishes the job.
    #[error("cascade interrupted at step '{step}': {source}")]
    ConsistencyViolation {
        step: &'static str,
        source: Box<DepotError>,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not authenticated")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DepotError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DepotError::NotFound(_) | DepotError::DbError(diesel::result::Error::NotFound)
        )
    }
}

impl<'r> response::Responder<'r, 'static> for DepotError {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> response::Result<'static> {
        let (err_str, status) = match &self {
            err if err.is_not_found() => (format!("{err}"), Status::NotFound),
            DepotError::MultipartError(
                multer::Error::FieldSizeExceeded { .. } | multer::Error::StreamSizeExceeded { .. },
            ) => (format!("{self}"), Status::PayloadTooLarge),
            DepotError::InvalidInput(_) | DepotError::MultipartError(_) => {
                (format!("{self}"), Status::BadRequest)
            }
            DepotError::Unauthorized => (format!("{self}"), Status::Unauthorized),
            DepotError::Forbidden(_) => (format!("{self}"), Status::Forbidden),
            _ => {
                log::error!("got a generic error! {:?}", self);
                (
                    Status::InternalServerError.reason_lossy().to_string(),
                    Status::InternalServerError,
                )
            }
        };
        response::Response::build()
            .sized_body(err_str.len(), Cursor::new(err_str))
            .status(status)
            .header(ContentType::Text)
            .ok()
    }
}
