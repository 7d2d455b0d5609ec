use thiserror::Error;

/// Programmer-error class of the request lifecycle contract: progress must
/// follow a begin, every id begins and ends exactly once.
///
/// The orchestrator treats these as invariant violations: `debug_assert!` in
/// debug builds, a logged warning and no-op in release.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum PendingRequestError {
    #[error("request id {0} already registered")]
    DuplicateRequest(u64),
    #[error("progress reported for unknown request id {0}")]
    UnknownProgress(u64),
    #[error("removal of unknown request id {0}")]
    UnknownRemoval(u64),
}

pub type PendingRequestResult<T> = Result<T, PendingRequestError>;
