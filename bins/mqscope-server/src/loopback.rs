use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use mqscope_api::{IncomingMessage, PublishError, QoS, RetainedPublisher};
use mqscope_engine::MessageStore;

/// Publisher used when no broker is attached: retained publishes are fed
/// straight back into the store, as a broker would echo them to us.
///
/// An empty payload only deletes the retained message, so nothing comes back.
pub struct LoopbackPublisher {
    store: Arc<MessageStore>,
}

impl LoopbackPublisher {
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self { store }
    }
}

impl RetainedPublisher for LoopbackPublisher {
    fn publish_retained(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            if payload.is_empty() {
                tracing::debug!(topic = %topic, "loopback: retained message cleared");
            } else {
                let msg = IncomingMessage::new(topic, payload).retained(true).with_qos(qos);
                self.store.ingest(msg);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_echoes_non_empty_publishes() {
        let store = Arc::new(MessageStore::default());
        let publisher = LoopbackPublisher::new(store.clone());

        publisher
            .publish_retained("cfg/mode", b"eco".to_vec(), QoS::AtLeastOnce)
            .await
            .unwrap();
        publisher.clear_retained("cfg/other").await.unwrap();

        assert_eq!(store.list_topics(), vec!["cfg/mode"]);
        let stored = store.messages("cfg/mode").last().cloned().unwrap();
        assert!(stored.retained);
        assert_eq!(stored.qos, QoS::AtLeastOnce);
    }
}
