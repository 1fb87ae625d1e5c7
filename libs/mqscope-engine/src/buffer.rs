use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use mqscope_api::{MessageId, MessageRecord};

/// Byte-budgeted, oldest-first evicting message window for one topic.
///
/// The budget is fixed at creation. All state sits behind the buffer's own
/// mutex, so appends to different topics never contend.
pub struct TopicBuffer {
    topic: String,
    max_bytes: u64,
    state: Mutex<BufferState>,
}

#[derive(Default)]
struct BufferState {
    records: VecDeque<Arc<MessageRecord>>,
    current_bytes: u64,
    evicted_total: u64,
    /// Removed from the registry; refuses further appends.
    retired: bool,
}

/// What an append did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Records dropped from the front to make room.
    pub evicted: usize,
    /// The payload did not fit even into an empty buffer and a placeholder
    /// was stored instead.
    pub oversized: bool,
}

impl std::fmt::Debug for TopicBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicBuffer")
            .field("topic", &self.topic)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

impl TopicBuffer {
    pub fn new(topic: impl Into<String>, max_bytes: u64) -> Self {
        Self {
            topic: topic.into(),
            max_bytes,
            state: Mutex::new(BufferState::default()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!(topic = %self.topic, "topic buffer lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Append a record, evicting the oldest ones until it fits.
    pub fn append(&self, record: MessageRecord) -> AppendOutcome {
        self.append_with(|| record)
    }

    /// Like [`append`](Self::append), but builds the record while holding
    /// the buffer lock, so ids drawn inside `make` follow buffer order.
    pub fn append_with(&self, make: impl FnOnce() -> MessageRecord) -> AppendOutcome {
        let state = self.lock();
        let record = make();
        self.push(state, record)
    }

    /// Append unless the buffer has been retired, in which case `input` is
    /// handed back and `make` never runs.
    pub fn try_append_with<T>(
        &self,
        input: T,
        make: impl FnOnce(T) -> MessageRecord,
    ) -> Result<AppendOutcome, T> {
        let state = self.lock();
        if state.retired {
            return Err(input);
        }
        let record = make(input);
        Ok(self.push(state, record))
    }

    fn push(&self, mut state: MutexGuard<'_, BufferState>, record: MessageRecord) -> AppendOutcome {
        let size = record.stored_size();

        let mut evicted: usize = 0;
        while state.current_bytes + size > self.max_bytes {
            let Some(oldest) = state.records.pop_front() else {
                break;
            };
            let freed = oldest.stored_size();
            debug_assert!(
                state.current_bytes >= freed,
                "byte counter underflow on '{}': {} < {}",
                self.topic,
                state.current_bytes,
                freed
            );
            state.current_bytes = state.current_bytes.saturating_sub(freed);
            evicted += 1;
        }
        state.evicted_total += evicted as u64;

        let oversized = size > self.max_bytes;
        if oversized {
            // Everything was evicted above; only the placeholder remains.
            state.records.push_back(Arc::new(record.oversized_placeholder()));
        } else {
            state.current_bytes += size;
            state.records.push_back(Arc::new(record));
        }
        drop(state);

        if oversized {
            tracing::warn!(
                topic = %self.topic,
                size,
                max_bytes = self.max_bytes,
                "message larger than topic budget, stored placeholder"
            );
        }

        AppendOutcome {
            evicted,
            oversized,
        }
    }

    /// Drop every record and reset the counters.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.records.clear();
        state.current_bytes = 0;
    }

    /// Empty the buffer for good. `on_retire` runs under the buffer lock,
    /// after the last append this buffer will ever accept.
    pub fn retire(&self, on_retire: impl FnOnce()) {
        let mut state = self.lock();
        state.records.clear();
        state.current_bytes = 0;
        state.retired = true;
        on_retire();
    }

    pub fn is_retired(&self) -> bool {
        self.lock().retired
    }

    /// Oldest-first snapshot of the stored records.
    pub fn messages(&self) -> Messages {
        let state = self.lock();
        Messages {
            records: state.records.iter().cloned().collect(),
        }
    }

    pub fn get(&self, id: MessageId) -> Option<Arc<MessageRecord>> {
        let state = self.lock();
        // Recent ids are the common lookup.
        state.records.iter().rev().find(|r| r.id == id).cloned()
    }

    pub fn latest(&self) -> Option<Arc<MessageRecord>> {
        self.lock().records.back().cloned()
    }

    pub fn byte_usage(&self) -> u64 {
        self.lock().current_bytes
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Records evicted over the buffer's lifetime.
    pub fn evicted_total(&self) -> u64 {
        self.lock().evicted_total
    }
}

/// Snapshot of a buffer's records, oldest first.
///
/// Taken under the buffer lock and iterated without it; `iter()` can be
/// called any number of times.
#[derive(Debug, Clone, Default)]
pub struct Messages {
    records: Vec<Arc<MessageRecord>>,
}

impl Messages {
    pub fn iter(&self) -> impl Iterator<Item = &MessageRecord> + '_ {
        self.records.iter().map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&MessageRecord> {
        self.records.last().map(|r| r.as_ref())
    }
}

impl IntoIterator for Messages {
    type Item = Arc<MessageRecord>;
    type IntoIter = std::vec::IntoIter<Arc<MessageRecord>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
