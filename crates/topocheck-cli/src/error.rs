//! Error types for the CLI

use topocheck_common::telemetry::TelemetryError;
use topocheck_verify::StageFailure;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("verification failed at {0}")]
    Verification(#[from] StageFailure),

    #[error(transparent)]
    Setup(#[from] topocheck_common::Error),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("verification did not finish within {secs}s")]
    Timeout { secs: u64 },
}

/// Process exit code for a passing run
pub const EXIT_PASS: i32 = 0;
/// Process exit code for an invariant violation
pub const EXIT_FAIL: i32 = 1;
/// Process exit code for configuration or collaborator errors
pub const EXIT_ERROR: i32 = 2;

impl Error {
    /// Exit code this error terminates the process with
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Verification(failure) if failure.is_verdict() => EXIT_FAIL,
            _ => EXIT_ERROR,
        }
    }

    /// Stable tag for JSON output
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Verification(failure) => failure.source.kind().as_str(),
            Error::Setup(err) => err.kind().as_str(),
            Error::Telemetry(_) | Error::Json(_) => "internal",
            Error::Timeout { .. } => "timeout",
        }
    }
}
