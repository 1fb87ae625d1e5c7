//! Subtree-wide clearing of retained messages and stored history.
//!
//! A bulk clear resolves its target topics up front, refuses to start when
//! there are more than the configured maximum (unless confirmed), then for
//! each topic publishes an empty retained payload upstream and drops the
//! local buffer. Work runs with bounded parallelism and is never rolled
//! back; the summary says what happened to every target.

use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use mqscope_api::{ErrorKind, PublishError, RetainedPublisher};

use crate::config::BulkConfig;
use crate::error::BulkError;
use crate::matcher;
use crate::store::MessageStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkClearOptions {
    /// Proceed even if more topics matched than `max_topics`.
    pub confirmed: bool,
}

impl BulkClearOptions {
    pub fn confirmed() -> Self {
        Self { confirmed: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicFailure {
    pub topic: String,
    pub error: String,
}

/// Outcome of a bulk clear, per target topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkSummary {
    pub start: String,
    pub matched: usize,
    pub succeeded: Vec<String>,
    pub skipped_unauthorized: Vec<String>,
    pub failed: Vec<TopicFailure>,
    /// Targets never tried because the run was aborted.
    pub not_attempted: Vec<String>,
    pub aborted: bool,
}

enum TopicOutcome {
    Cleared,
    Unauthorized,
    Failed(String),
    NotAttempted,
}

pub struct BulkClear {
    store: Arc<MessageStore>,
    publisher: Arc<dyn RetainedPublisher>,
    config: RwLock<BulkConfig>,
}

impl BulkClear {
    pub fn new(
        store: Arc<MessageStore>,
        publisher: Arc<dyn RetainedPublisher>,
        config: BulkConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config: RwLock::new(config),
        }
    }

    pub fn config(&self) -> BulkConfig {
        match self.config.read() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_config(&self, config: BulkConfig) {
        let mut guard = match self.config.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = config;
    }

    /// Live topics selected by `start`, in tree order.
    ///
    /// `start` is either a topic path (its whole subtree is selected, looked
    /// up case-insensitively) or a wildcard pattern matched against every
    /// live topic.
    pub fn resolve_targets(&self, start: &str) -> Result<Vec<String>, BulkError> {
        let start = start.trim();
        let targets = if start.contains(['+', '#']) {
            matcher::validate_pattern(start).map_err(|reason| BulkError::InvalidPattern {
                pattern: start.to_string(),
                reason,
            })?;
            self.store
                .list_concrete_topics_under("")
                .into_iter()
                .filter(|topic| matcher::matches(start, topic))
                .collect()
        } else {
            self.store.list_concrete_topics_under(start)
        };

        if targets.is_empty() {
            return Err(BulkError::NothingToClear(start.to_string()));
        }
        Ok(targets)
    }

    /// Resolve targets and enforce the topic limit. Nothing is touched.
    pub fn plan(&self, start: &str, options: BulkClearOptions) -> Result<Vec<String>, BulkError> {
        let targets = self.resolve_targets(start)?;
        let limit = self.config().max_topics;
        if targets.len() > limit && !options.confirmed {
            return Err(BulkError::TopicLimitExceeded {
                start: start.trim().to_string(),
                found: targets.len(),
                limit,
            });
        }
        Ok(targets)
    }

    /// Clear every topic selected by `start`.
    ///
    /// Unauthorized topics are skipped, other publish failures are recorded,
    /// and a lost connection (or `cancel`) stops all remaining work.
    pub async fn run(
        &self,
        start: &str,
        options: BulkClearOptions,
        cancel: CancellationToken,
    ) -> Result<BulkSummary, BulkError> {
        let targets = self.plan(start, options)?;
        let config = self.config();
        let mut summary = BulkSummary {
            start: start.trim().to_string(),
            matched: targets.len(),
            ..BulkSummary::default()
        };

        tracing::info!(
            start = %summary.start,
            topics = targets.len(),
            parallelism = config.parallelism,
            "bulk clear started"
        );

        let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));
        let abort = cancel.child_token();
        // Dropping `run` drops the set, which aborts every clear still running.
        let mut tasks = JoinSet::new();
        let mut outcomes: Vec<Option<TopicOutcome>> = targets.iter().map(|_| None).collect();

        for (index, topic) in targets.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = abort.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                outcomes[index] = Some(TopicOutcome::NotAttempted);
                continue;
            };

            let store = self.store.clone();
            let publisher = self.publisher.clone();
            let abort = abort.clone();
            let topic = topic.clone();
            tasks.spawn(async move {
                let _permit = permit;
                (index, clear_one(&store, publisher.as_ref(), &topic, &abort).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => tracing::error!(start = %summary.start, error = %e, "bulk clear task failed"),
            }
        }

        for (topic, outcome) in targets.into_iter().zip(outcomes) {
            match outcome.unwrap_or_else(|| TopicOutcome::Failed("clear task failed".to_string())) {
                TopicOutcome::Cleared => summary.succeeded.push(topic),
                TopicOutcome::Unauthorized => summary.skipped_unauthorized.push(topic),
                TopicOutcome::Failed(error) => summary.failed.push(TopicFailure { topic, error }),
                TopicOutcome::NotAttempted => summary.not_attempted.push(topic),
            }
        }
        summary.aborted = abort.is_cancelled();

        if summary.aborted {
            tracing::warn!(
                start = %summary.start,
                not_attempted = summary.not_attempted.len(),
                "bulk clear aborted"
            );
        }
        tracing::info!(
            start = %summary.start,
            succeeded = summary.succeeded.len(),
            skipped = summary.skipped_unauthorized.len(),
            failed = summary.failed.len(),
            not_attempted = summary.not_attempted.len(),
            "bulk clear finished"
        );
        Ok(summary)
    }
}

async fn clear_one(
    store: &MessageStore,
    publisher: &dyn RetainedPublisher,
    topic: &str,
    abort: &CancellationToken,
) -> TopicOutcome {
    let result = tokio::select! {
        biased;
        _ = abort.cancelled() => None,
        r = publisher.clear_retained(topic) => Some(r),
    };
    let Some(result) = result else {
        return TopicOutcome::NotAttempted;
    };

    match result {
        Ok(()) => {
            store.clear_topic(topic);
            TopicOutcome::Cleared
        }
        Err(PublishError { kind: ErrorKind::Unauthorized, message }) => {
            tracing::debug!(topic = %topic, error = %message, "retained clear not authorized, skipping");
            TopicOutcome::Unauthorized
        }
        Err(e) if e.is_disconnected() => {
            tracing::warn!(topic = %topic, error = %e.message, "broker connection lost, aborting bulk clear");
            abort.cancel();
            TopicOutcome::Failed(e.to_string())
        }
        Err(e) => TopicOutcome::Failed(e.to_string()),
    }
}
