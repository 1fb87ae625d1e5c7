use std::fmt;

/// Error kind for upstream publish failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Broker refused the publish (ACL). Skip the topic and continue.
    Unauthorized,
    /// Connection to the broker is gone. Abort remaining work.
    Disconnected,
    /// Anything else. Recorded per topic.
    Failed,
}

/// Error returned by `RetainedPublisher` implementations.
#[derive(Debug, Clone)]
pub struct PublishError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PublishError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Unauthorized, message: msg.into() }
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Disconnected, message: msg.into() }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Failed, message: msg.into() }
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.kind == ErrorKind::Disconnected
    }
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for PublishError {}

impl From<std::io::Error> for PublishError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected => Self::disconnected(e.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::unauthorized(e.to_string()),
            _ => Self::failed(e.to_string()),
        }
    }
}
