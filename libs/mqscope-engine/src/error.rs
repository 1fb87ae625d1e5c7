#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid buffer limit rule '{pattern}': {reason}")]
    InvalidRule { pattern: String, reason: String },

    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// Context is prepended to the message; `InvalidRule` and `Io` pass through.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
            EngineError::TopicNotFound(msg) => EngineError::TopicNotFound(format!("{ctx}: {msg}")),
            other => other,
        }
    }
}

/// Pre-flight failures of a bulk operation. Raised before any topic is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BulkError {
    #[error("{found} topics matched '{start}', limit is {limit}; confirm to proceed")]
    TopicLimitExceeded {
        start: String,
        found: usize,
        limit: usize,
    },

    #[error("no topics with messages under '{0}'")]
    NothingToClear(String),

    #[error("invalid start pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}
