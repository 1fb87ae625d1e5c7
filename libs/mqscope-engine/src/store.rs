use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::broadcast;

use mqscope_api::{IncomingMessage, MessageId, MessageRecord};

use crate::buffer::Messages;
use crate::config::{ScopeConfig, StoreConfig};
use crate::error::EngineError;
use crate::matcher::RuleSet;
use crate::registry::TopicRegistry;
use crate::tree::{NodeSnapshot, TopicTree, TreeNode};

// ═══════════════════════════════════════════════════════════════
//  Events
// ═══════════════════════════════════════════════════════════════

/// Change notification for live views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    TopicAdded {
        topic: String,
    },
    MessageAppended {
        topic: String,
        id: MessageId,
        oversized: bool,
    },
    TopicCleared {
        topic: String,
    },
    Reset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub topics: usize,
    pub messages: usize,
    pub bytes: u64,
    pub tree_nodes: usize,
}

// ═══════════════════════════════════════════════════════════════
//  MessageStore
// ═══════════════════════════════════════════════════════════════

/// In-memory message store: per-topic buffers plus the topic tree.
///
/// Ingestion and queries may run from any number of threads. Rule changes
/// only affect buffers created afterwards.
pub struct MessageStore {
    registry: TopicRegistry,
    tree: TopicTree,
    rules: RwLock<Arc<RuleSet>>,
    next_id: AtomicU64,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(RuleSet::default(), &StoreConfig::default())
    }
}

impl MessageStore {
    pub fn new(rules: RuleSet, config: &StoreConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            registry: TopicRegistry::new(),
            tree: TopicTree::new(),
            rules: RwLock::new(Arc::new(rules)),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    pub fn from_config(config: &ScopeConfig) -> Result<Self, EngineError> {
        Ok(Self::new(config.rule_set()?, &config.store))
    }

    /// Rules consulted when a new topic shows up.
    pub fn rules(&self) -> Arc<RuleSet> {
        match self.rules.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Swap the rules for buffers created from now on.
    pub fn set_rules(&self, rules: RuleSet) {
        let mut guard = match self.rules.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(rules);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    // ── Ingestion ────────────────────────────────────────────────

    /// Store one message and index its topic.
    ///
    /// The tree count moves under the buffer lock, so a concurrent
    /// `clear_topic` sees the message in both places or in neither.
    pub fn ingest(&self, mut msg: IncomingMessage) -> MessageId {
        let topic = msg.topic.clone();
        let (id, outcome, created) = loop {
            let (buffer, created) = self
                .registry
                .get_or_create(&topic, |t| self.rules().limit_for(t));

            let mut id = MessageId(0);
            let appended = buffer.try_append_with(msg, |msg| {
                id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed));
                self.tree.update_or_create_node(&topic, true);
                MessageRecord::from_incoming(id, msg)
            });
            match appended {
                Ok(outcome) => break (id, outcome, created),
                Err(returned) => {
                    tracing::debug!(topic = %topic, "topic cleared during ingest, retrying");
                    msg = returned;
                }
            }
        };

        if created {
            self.emit(StoreEvent::TopicAdded {
                topic: topic.clone(),
            });
        }
        self.emit(StoreEvent::MessageAppended {
            topic,
            id,
            oversized: outcome.oversized,
        });
        id
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Topics with a live buffer, sorted.
    pub fn list_topics(&self) -> Vec<String> {
        self.registry.topic_names()
    }

    /// Oldest-first snapshot; empty for unknown topics.
    pub fn messages(&self, topic: &str) -> Messages {
        self.registry
            .get(topic)
            .map(|b| b.messages())
            .unwrap_or_default()
    }

    pub fn message_by_id(&self, topic: &str, id: MessageId) -> Option<Arc<MessageRecord>> {
        self.registry.get(topic)?.get(id)
    }

    pub fn buffer_byte_usage(&self, topic: &str) -> Option<u64> {
        self.registry.get(topic).map(|b| b.byte_usage())
    }

    /// Budget of the topic's buffer, or the one a new buffer would get.
    pub fn configured_limit(&self, topic: &str) -> u64 {
        match self.registry.get(topic) {
            Some(buffer) => buffer.max_bytes(),
            None => self.rules().limit_for(topic),
        }
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.registry.contains(topic)
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            tree_nodes: self.tree.node_count(),
            ..StoreStats::default()
        };
        for buffer in self.registry.buffers() {
            stats.topics += 1;
            stats.messages += buffer.len();
            stats.bytes += buffer.byte_usage();
        }
        stats
    }

    // ── Tree ─────────────────────────────────────────────────────

    pub fn tree(&self) -> &TopicTree {
        &self.tree
    }

    pub fn tree_snapshot(&self, only_visible: bool) -> Vec<NodeSnapshot> {
        self.tree.snapshot(only_visible)
    }

    pub fn apply_filter(&self, term: Option<&str>) {
        self.tree.apply_filter(term);
    }

    pub fn find_node(&self, path: &str) -> Option<Arc<TreeNode>> {
        self.tree.find_node(path)
    }

    pub fn set_expanded(&self, path: &str, expanded: bool) -> bool {
        self.tree.set_expanded(path, expanded)
    }

    /// Topics with stored messages at or below `path`, in tree order.
    pub fn list_concrete_topics_under(&self, path: &str) -> Vec<String> {
        self.tree
            .list_concrete_topics_under(path, |t| self.registry.contains(t))
    }

    // ── Clearing ─────────────────────────────────────────────────

    /// Drop a topic's messages. Unknown topics are a no-op.
    ///
    /// Returns whether the topic had a buffer. Its tree node stays.
    pub fn clear_topic(&self, topic: &str) -> bool {
        let existed = self
            .registry
            .remove_with(topic, || self.tree.reset_count(topic))
            .is_some();
        if existed {
            tracing::debug!(topic = %topic, "cleared topic");
            self.emit(StoreEvent::TopicCleared {
                topic: topic.to_string(),
            });
        }
        existed
    }

    /// Drop every buffer and the whole tree.
    pub fn reset(&self) {
        let topics = self.registry.clear();
        self.tree.clear();
        tracing::info!(topics, "store reset");
        self.emit(StoreEvent::Reset);
    }

    /// Reset and apply `rules` to everything seen afterwards.
    pub fn reset_with_rules(&self, rules: RuleSet) {
        self.set_rules(rules);
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{BufferLimitRule, DEFAULT_MAX_BYTES};

    const MIB: u64 = 1024 * 1024;

    fn store_with(rules: &[(&str, u64)]) -> MessageStore {
        let rules = rules
            .iter()
            .map(|(p, b)| BufferLimitRule::new(*p, *b))
            .collect();
        MessageStore::new(RuleSet::new(rules).unwrap(), &StoreConfig::default())
    }

    fn msg(topic: &str, size: usize) -> IncomingMessage {
        IncomingMessage::new(topic, vec![b'x'; size])
    }

    #[test]
    fn test_ingest_indexes_and_stores() {
        let store = MessageStore::default();
        let first = store.ingest(msg("a/b", 3));
        let second = store.ingest(msg("a/b", 4));
        store.ingest(msg("a/c", 5));

        assert!(second > first);
        assert_eq!(store.list_topics(), vec!["a/b", "a/c"]);
        assert_eq!(store.messages("a/b").len(), 2);
        assert_eq!(store.buffer_byte_usage("a/b"), Some(7));
        assert_eq!(store.message_by_id("a/b", first).unwrap().payload.len(), 3);
        assert!(store.message_by_id("a/c", first).is_none());
        assert_eq!(store.find_node("a").unwrap().total_count(), 3);
        assert_eq!(
            store.stats(),
            StoreStats { topics: 2, messages: 3, bytes: 12, tree_nodes: 3 }
        );
    }

    #[test]
    fn test_unknown_topic_queries_are_empty() {
        let store = MessageStore::default();
        assert!(store.messages("nope").is_empty());
        assert!(store.message_by_id("nope", MessageId(1)).is_none());
        assert_eq!(store.buffer_byte_usage("nope"), None);
        assert!(!store.clear_topic("nope"));
    }

    #[test]
    fn test_configured_limit_follows_rules() {
        let store = store_with(&[("#", MIB), ("sensors/#", 6 * MIB)]);
        assert_eq!(store.configured_limit("sensors/room/temp"), 6 * MIB);
        assert_eq!(store.configured_limit("other/topic"), MIB);
    }

    #[test]
    fn test_limits_fixed_until_reset() {
        let store = store_with(&[("a/#", 10)]);
        store.ingest(msg("a/b", 1));

        store.set_rules(RuleSet::new(vec![BufferLimitRule::new("a/#", 20)]).unwrap());
        assert_eq!(store.configured_limit("a/b"), 10);
        assert_eq!(store.configured_limit("a/new"), 20);

        store.reset();
        assert!(store.list_topics().is_empty());
        store.ingest(msg("a/b", 1));
        assert_eq!(store.configured_limit("a/b"), 20);

        store.reset_with_rules(RuleSet::default());
        assert_eq!(store.configured_limit("a/b"), DEFAULT_MAX_BYTES);
    }

    #[test]
    fn test_clear_topic_keeps_node_and_resets_count() {
        let store = MessageStore::default();
        store.ingest(msg("a/b", 1));
        store.ingest(msg("a/b", 1));
        store.ingest(msg("a/c", 1));

        assert!(store.clear_topic("a/b"));
        assert!(!store.has_topic("a/b"));
        let node = store.find_node("a/b").unwrap();
        assert_eq!(node.message_count(), 0);
        assert_eq!(store.find_node("a").unwrap().total_count(), 1);
        assert_eq!(store.list_concrete_topics_under("a"), vec!["a/c"]);
    }

    #[test]
    fn test_oversized_message_reported() {
        let store = store_with(&[("big", 4)]);
        let mut events = store.subscribe();
        let id = store.ingest(msg("big", 10));

        assert_eq!(events.try_recv().unwrap(), StoreEvent::TopicAdded { topic: "big".into() });
        assert_eq!(
            events.try_recv().unwrap(),
            StoreEvent::MessageAppended { topic: "big".into(), id, oversized: true }
        );
        let stored = store.message_by_id("big", id).unwrap();
        assert!(stored.oversized);
        assert_eq!(stored.payload_size, 10);
    }

    #[test]
    fn test_events_for_clear_and_reset() {
        let store = MessageStore::default();
        store.ingest(msg("t", 1));
        let mut events = store.subscribe();

        store.clear_topic("t");
        store.clear_topic("t");
        store.reset();

        assert_eq!(events.try_recv().unwrap(), StoreEvent::TopicCleared { topic: "t".into() });
        assert_eq!(events.try_recv().unwrap(), StoreEvent::Reset);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_event_serialization() {
        let event = StoreEvent::MessageAppended {
            topic: "a".into(),
            id: MessageId(7),
            oversized: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "message_appended", "topic": "a", "id": 7, "oversized": false})
        );
    }
}
