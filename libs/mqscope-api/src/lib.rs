pub mod error;
pub mod publisher;
pub mod record;

pub use error::{ErrorKind, PublishError};
pub use publisher::RetainedPublisher;
pub use record::{IncomingMessage, MessageId, MessageProperties, MessageRecord, QoS, now_ms};
