pub mod buffer;
pub mod bulk;
pub mod config;
pub mod error;
pub mod matcher;
pub mod registry;
pub mod store;
pub mod tree;

pub use buffer::{AppendOutcome, Messages, TopicBuffer};
pub use bulk::{BulkClear, BulkClearOptions, BulkSummary, TopicFailure};
pub use config::{BulkConfig, ConfigParser, ScopeConfig, StoreConfig, TomlParser};
pub use error::{BulkError, EngineError};
pub use matcher::{BufferLimitRule, RuleSet};
pub use registry::TopicRegistry;
pub use store::{MessageStore, StoreEvent, StoreStats};
pub use tree::{NodeSnapshot, TopicTree, TreeNode};
