// Pipeline error taxonomy shared by the pipeline and its callers.

use std::path::PathBuf;

use thiserror::Error;

use crate::path::IdentifierError;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Every failure the asset pipeline reports back to its caller.
///
/// All variants are returned values. Only [`PipelineError::NeedsPermission`]
/// is resolvable by the user retrying through the grant flow.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("access to `{}` needs a permission grant", .path.display())]
    NeedsPermission { path: PathBuf },

    #[error("access to `{}` was denied", .path.display())]
    Denied { path: PathBuf },

    #[error("`{}` no longer exists", .path.display())]
    NotFound { path: PathBuf },

    #[error("image could not be rasterized: {0}")]
    EncodeFailure(String),

    #[error("{context}: {source}")]
    IoFailure {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid transform: {0}")]
    InvalidTransform(String),

    #[error(transparent)]
    InvalidIdentifier(#[from] IdentifierError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NeedsPermission,
    Denied,
    NotFound,
    EncodeFailure,
    IoFailure,
    InvalidInput,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NeedsPermission => "NEEDS_PERMISSION",
            Self::Denied => "ACCESS_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::EncodeFailure => "ENCODE_FAILURE",
            Self::IoFailure => "IO_FAILURE",
            Self::InvalidInput => "INVALID_INPUT",
        }
    }
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::IoFailure { context: context.into(), source }
    }

    pub fn encode(message: impl std::fmt::Display) -> Self {
        Self::EncodeFailure(message.to_string())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NeedsPermission { .. } => ErrorCode::NeedsPermission,
            Self::Denied { .. } => ErrorCode::Denied,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::EncodeFailure(_) => ErrorCode::EncodeFailure,
            Self::IoFailure { .. } => ErrorCode::IoFailure,
            Self::InvalidTransform(_) | Self::InvalidIdentifier(_) => ErrorCode::InvalidInput,
        }
    }

    /// True when showing a "grant access" affordance can fix the failure.
    pub fn is_user_retriable(&self) -> bool {
        matches!(self, Self::NeedsPermission { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_needs_permission_is_retriable() {
        let path = PathBuf::from("/photos/a.jpg");
        assert!(PipelineError::NeedsPermission { path: path.clone() }.is_user_retriable());
        assert!(!PipelineError::Denied { path: path.clone() }.is_user_retriable());
        assert!(!PipelineError::NotFound { path }.is_user_retriable());
        assert!(!PipelineError::encode("bad header").is_user_retriable());
    }

    #[test]
    fn messages_include_path() {
        let err = PipelineError::NotFound { path: PathBuf::from("/gone.png") };
        assert_eq!(err.to_string(), "`/gone.png` no longer exists");
        assert_eq!(err.code().as_str(), "NOT_FOUND");
    }

    #[test]
    fn io_failure_keeps_source() {
        let err = PipelineError::io(
            "failed to write artifact",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert_eq!(err.code(), ErrorCode::IoFailure);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("failed to write artifact"));
    }

    #[test]
    fn identifier_errors_convert() {
        let err: PipelineError = IdentifierError::Empty.into();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }
}
