use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::TopicBuffer;

/// Concurrent map of concrete topic → its buffer.
///
/// Lookups share a read lock; creation re-checks under the write lock, so
/// racing creators of one new topic all get the same buffer.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    buffers: RwLock<HashMap<String, Arc<TopicBuffer>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<TopicBuffer>>> {
        match self.buffers.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("topic registry read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<TopicBuffer>>> {
        match self.buffers.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("topic registry write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn get(&self, topic: &str) -> Option<Arc<TopicBuffer>> {
        self.read().get(topic).cloned()
    }

    /// Return the topic's buffer, creating it on first sight.
    ///
    /// `limit_for` is called at most once per topic, only by the creating
    /// caller. The returned flag is `true` for that caller.
    pub fn get_or_create(
        &self,
        topic: &str,
        limit_for: impl FnOnce(&str) -> u64,
    ) -> (Arc<TopicBuffer>, bool) {
        if let Some(buffer) = self.get(topic) {
            return (buffer, false);
        }

        let mut guard = self.write();
        if let Some(buffer) = guard.get(topic) {
            return (buffer.clone(), false);
        }
        let max_bytes = limit_for(topic);
        let buffer = Arc::new(TopicBuffer::new(topic, max_bytes));
        guard.insert(topic.to_string(), buffer.clone());
        drop(guard);

        tracing::debug!(topic = %topic, max_bytes, "created topic buffer");
        (buffer, true)
    }

    /// All known topics, sorted.
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.read().contains_key(topic)
    }

    /// Remove a topic's buffer entirely. `None` if it had none.
    pub fn remove(&self, topic: &str) -> Option<Arc<TopicBuffer>> {
        self.remove_with(topic, || {})
    }

    /// Remove and retire a topic's buffer; `on_retire` runs under the
    /// buffer's lock.
    ///
    /// The buffer is retired before the write lock is released, so a writer
    /// still holding the old `Arc` either lands before `on_retire` or is
    /// refused and comes back to find the topic gone.
    pub fn remove_with(&self, topic: &str, on_retire: impl FnOnce()) -> Option<Arc<TopicBuffer>> {
        let mut guard = self.write();
        let removed = guard.remove(topic)?;
        removed.retire(on_retire);
        drop(guard);
        Some(removed)
    }

    /// Drop every buffer. Returns how many there were.
    pub fn clear(&self) -> usize {
        let mut guard = self.write();
        let count = guard.len();
        for (_, buffer) in guard.drain() {
            buffer.retire(|| {});
        }
        count
    }

    pub fn buffers(&self) -> Vec<Arc<TopicBuffer>> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_get_or_create_fixes_limit_once() {
        let registry = TopicRegistry::new();
        let (first, created) = registry.get_or_create("a/b", |_| 10);
        assert!(created);
        let (second, created) = registry.get_or_create("a/b", |_| 99);
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.max_bytes(), 10);
    }

    #[test]
    fn test_concurrent_creation_yields_one_buffer() {
        let registry = TopicRegistry::new();
        registry.get_or_create("existing", |_| 1);
        let calls = AtomicUsize::new(0);

        let buffers: Vec<Arc<TopicBuffer>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..32)
                .map(|_| {
                    s.spawn(|| {
                        registry
                            .get_or_create("brand/new", |_| {
                                calls.fetch_add(1, Ordering::SeqCst);
                                64
                            })
                            .0
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(buffers.iter().all(|b| Arc::ptr_eq(b, &buffers[0])));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = TopicRegistry::new();
        registry.get_or_create("a", |_| 1);
        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.remove("never/seen").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_removed_buffer_is_retired() {
        let registry = TopicRegistry::new();
        let (stale, _) = registry.get_or_create("a", |_| 64);

        let mut hook_ran = false;
        let removed = registry.remove_with("a", || hook_ran = true).unwrap();
        assert!(hook_ran);
        assert!(Arc::ptr_eq(&stale, &removed));
        assert!(stale.is_retired());

        let (fresh, created) = registry.get_or_create("a", |_| 64);
        assert!(created);
        assert!(!fresh.is_retired());
    }

    #[test]
    fn test_topic_names_sorted() {
        let registry = TopicRegistry::new();
        for t in ["b", "a/z", "a", "B"] {
            registry.get_or_create(t, |_| 1);
        }
        assert_eq!(registry.topic_names(), vec!["B", "a", "a/z", "b"]);
        assert_eq!(registry.clear(), 4);
        assert!(registry.topic_names().is_empty());
    }
}
