use thiserror::Error;

/// A message matched one of the schedule templates but carried values that
/// do not form a real calendar date or clock time.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExtractError {
    #[error("matched schedule has impossible date {year:04}-{month:02}-{day:02}")]
    InvalidDate { year: i32, month: u32, day: u32 },
    #[error("matched schedule has impossible time {hour:02}:{minute:02}")]
    InvalidTime { hour: u32, minute: u32 },
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("reading mailbox state: {0}")]
    Io(#[from] std::io::Error),
    #[error("decoding mailbox state: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("sink rate limit hit")]
    RateLimited,
    #[error("calendar operation failed: {0}")]
    Calendar(String),
}

impl SinkError {
    /// True when retrying the same request later could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Request(_) | SinkError::RateLimited => true,
            SinkError::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            SinkError::Calendar(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("message source failed: {0}")]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("offset store failed: {0}")]
    Offset(std::io::Error),
}
