use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid ingest credential")]
    InvalidCredential,

    #[error("Publish attempt preempted by a newer attempt")]
    Preempted,

    #[error("Session is not live: {0}")]
    SessionNotLive(String),

    #[error("Rate limit exceeded. Try again in {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Expected control-flow rejections that callers surface to clients,
    /// as opposed to faults worth alarming on.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredential
                | Self::Preempted
                | Self::SessionNotLive(_)
                | Self::RateLimited { .. }
                | Self::InvalidInput(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
