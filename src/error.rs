use thiserror::Error;

/// Why a symbol's series could not be retrieved.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed payload: {0}")]
    Payload(String),
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// True when the failure happened below HTTP, i.e. the request never got an answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, FetchError::Transport(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeriesError {
    #[error("series is empty")]
    Empty,
    #[error("series arrays differ in length (dates {dates}, prices {prices}, signal {signal})")]
    LengthMismatch {
        dates: usize,
        prices: usize,
        signal: usize,
    },
}

#[derive(Error, Debug)]
pub enum LabError {
    #[error("no usable instruments in the universe")]
    EmptyUniverse,
    #[error("analysis API unreachable: all {batches} batch request(s) failed in transport")]
    Unreachable { batches: usize },
    #[error("invalid range {name}: {reason}")]
    InvalidRange { name: String, reason: String },
}
