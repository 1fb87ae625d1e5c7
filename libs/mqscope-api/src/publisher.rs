use std::future::Future;
use std::pin::Pin;

use crate::error::PublishError;
use crate::record::QoS;

/// Upstream publish path, implemented by the broker connection.
///
/// The store never talks to the broker itself; bulk operations that need to
/// clear retained messages go through this trait.
pub trait RetainedPublisher: Send + Sync {
    /// Publish `payload` to `topic` with the retain flag set.
    fn publish_retained(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>>;

    /// Publish an empty retained payload, which makes the broker drop the
    /// retained message held for `topic`.
    fn clear_retained(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>> {
        self.publish_retained(topic, Vec::new(), QoS::AtMostOnce)
    }
}
