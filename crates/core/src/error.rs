use thiserror::Error;

/// Failure to turn bytes into a typed record.
///
/// Both variants are scoped to a single message: the offending frame is
/// discarded and the stream continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("Truncated message: declared {declared} bytes but only {remaining} remain")]
    TruncatedMessage { declared: u64, remaining: usize },
}

impl DecodeError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        DecodeError::MalformedMessage {
            reason: reason.into(),
        }
    }
}

impl From<prost::DecodeError> for DecodeError {
    fn from(err: prost::DecodeError) -> Self {
        DecodeError::malformed(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimelineError {
    #[error("Range of {span_nanos}ns needs {needed} buckets of {width}ns, limit is {limit}")]
    TooManyBuckets {
        span_nanos: u64,
        width: u64,
        needed: u64,
        limit: u64,
    },

    #[error("Bucket width overflows: granularity {granularity} x unit {unit_nanos}ns")]
    WidthOverflow { granularity: u32, unit_nanos: u64 },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Timeline failed: {0}")]
    Timeline(#[from] TimelineError),

    #[error("Granularity {value} is outside of {min}..={max}")]
    InvalidGranularity { value: u32, min: u32, max: u32 },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
