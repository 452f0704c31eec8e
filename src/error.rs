use thiserror::Error;

#[derive(Error, Debug)]
pub enum DublineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Audio error: {0}")]
    Audio(#[from] hound::Error),

    /// Retryable failure of an external service (rate limit, timeout, 5xx)
    #[error("Transient service error: {0}")]
    TransientService(String),

    /// Failure that dooms a single segment but not the job
    #[error("Permanent segment error: {0}")]
    PermanentSegment(String),

    #[error("Malformed transcript: {0}")]
    MalformedTranscript(String),

    #[error("Overlap detected: {0}")]
    OverlapDetected(String),

    #[error("Job unviable: {failed} of {total} segments failed during {stage}")]
    JobUnviable {
        stage: String,
        failed: usize,
        total: usize,
    },

    #[error("Invalid segment transition for segment {id}: {from} -> {to}")]
    InvalidTransition { id: usize, from: String, to: String },

    #[error("Unknown segment id {0}")]
    UnknownSegment(usize),

    #[error("Segment {0} is not ready for alignment")]
    NotSettled(usize),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Job exceeded its {0}s timeout")]
    JobTimedOut(u64),

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl DublineError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientService(_))
    }

    /// Structural errors that abort the whole job
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedTranscript(_)
                | Self::OverlapDetected(_)
                | Self::JobUnviable { .. }
                | Self::Cancelled
                | Self::JobTimedOut(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DublineError>;
