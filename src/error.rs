use thiserror::Error;

use crate::codec::CodecError;
use crate::filter::FilterError;
use crate::store::StoreError;

/// Error kinds surfaced across the RPC boundary.
///
/// Every internal failure is folded into one of these six kinds before it
/// reaches the front-end; the HTTP status mapping lives in `net::api`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("operation cancelled ({context})")]
    Cancelled { context: &'static str },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::AlreadyExists(message.into())
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::FailedPrecondition(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable machine-readable name for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid-argument",
            Self::NotFound(_) => "not-found",
            Self::AlreadyExists(_) => "already-exists",
            Self::FailedPrecondition(_) => "failed-precondition",
            Self::Cancelled { .. } => "cancelled",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { name } => {
                Self::AlreadyExists(format!("record `{name}` already exists"))
            }
            StoreError::PreconditionFailed { name } => {
                Self::FailedPrecondition(format!("etag mismatch for `{name}`"))
            }
            StoreError::Missing { name } => Self::NotFound(format!("no record named `{name}`")),
            other => Self::Internal(format!("store failure: {other}")),
        }
    }
}

impl From<CodecError> for ApiError {
    fn from(err: CodecError) -> Self {
        Self::Internal(format!("record codec failure: {err}"))
    }
}

impl From<crate::page::TokenError> for ApiError {
    fn from(err: crate::page::TokenError) -> Self {
        Self::InvalidArgument(format!("invalid page_token: {err}"))
    }
}

impl From<crate::mask::MaskError> for ApiError {
    fn from(err: crate::mask::MaskError) -> Self {
        match err {
            // Mask validation failures report not-found, matching the wire
            // contract of the original surface.
            crate::mask::MaskError::UnknownPath { .. } | crate::mask::MaskError::EmptyPath => {
                Self::NotFound(err.to_string())
            }
            crate::mask::MaskError::TypeMismatch { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<FilterError> for ApiError {
    fn from(err: FilterError) -> Self {
        match err {
            // A compile failure or a semantically incompatible filter is the
            // caller's to fix; a payload that cannot be bound is ours.
            FilterError::Compile { .. } | FilterError::Eval { .. } => {
                Self::InvalidArgument(err.to_string())
            }
            FilterError::Binding { .. } => Self::Internal(err.to_string()),
        }
    }
}
