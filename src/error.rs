use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("rate limited by the metadata source")]
    RateLimited,
    #[error("metadata source answered with status {0}")]
    Status(u16),
    #[error("could not decode response: {0}\n{1}")]
    Decode(serde_json::Error, String),
    #[error("gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no snapshot at {}", .0.display())]
    MissingSnapshot(PathBuf),
}

impl Error {
    /// Rate limits and connectivity problems are worth another try, the rest is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimited => true,
            Error::Request(err) => {
                err.is_connect()
                    || err.is_timeout()
                    || err.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS)
            }
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
