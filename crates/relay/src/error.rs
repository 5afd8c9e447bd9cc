use persistence::PersistenceError;
use shared::error::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Authorization(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::Authorization(_) => ErrorCode::Forbidden,
            Self::Persistence(PersistenceError::Rejected { status, .. }) => match status {
                401 | 403 => ErrorCode::Forbidden,
                404 => ErrorCode::NotFound,
                400 | 422 => ErrorCode::Validation,
                _ => ErrorCode::Unavailable,
            },
            Self::Persistence(_) => ErrorCode::Unavailable,
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        let message = match self {
            Self::Persistence(PersistenceError::Rejected { message, .. }) => message.clone(),
            other => other.to_string(),
        };
        ApiError::new(self.code(), message)
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        err.to_api_error()
    }
}
