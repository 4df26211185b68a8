// Consistent exit codes for the tessera CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   10 = file needs a permission grant
//   11 = permission refused
//   12 = referenced file missing
//   13 = image could not be decoded or encoded

use std::process;

use tessera_common::error::{ErrorCode, PipelineError};

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    NeedsPermission = 10,
    Denied = 11,
    NotFound = 12,
    Encode = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<UsageError>().is_some() {
                return Self::Usage;
            }
            if let Some(pipeline) = cause.downcast_ref::<PipelineError>() {
                return Self::from_pipeline_code(pipeline.code());
            }
        }
        Self::Error
    }

    pub fn from_pipeline_code(code: ErrorCode) -> Self {
        match code {
            ErrorCode::NeedsPermission => Self::NeedsPermission,
            ErrorCode::Denied => Self::Denied,
            ErrorCode::NotFound => Self::NotFound,
            ErrorCode::EncodeFailure => Self::Encode,
            ErrorCode::InvalidInput => Self::Usage,
            ErrorCode::IoFailure => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

/// A bad argument combination or a reference to something the document
/// does not contain.
#[derive(Debug)]
pub struct UsageError {
    pub message: String,
}

impl UsageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for UsageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for UsageError {}
