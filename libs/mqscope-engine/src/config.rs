use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::error::EngineError;
use crate::matcher::{BufferLimitRule, RuleSet};

/// Root configuration, parsed from TOML or any registered `ConfigParser`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScopeConfig {
    /// HTTP API port.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Ordered buffer limit rules. The `#` catch-all is appended implicitly.
    #[serde(default)]
    pub buffer_limits: Vec<BufferLimitRule>,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub bulk: BulkConfig,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            buffer_limits: Vec::new(),
            store: StoreConfig::default(),
            bulk: BulkConfig::default(),
        }
    }
}

fn default_api_port() -> u16 {
    9300
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Capacity of the store event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_event_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BulkConfig {
    /// Matched topic count above which a bulk clear needs confirmation.
    #[serde(default = "default_max_topics")]
    pub max_topics: usize,
    /// Per-topic operations in flight at once.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_topics: default_max_topics(),
            parallelism: default_parallelism(),
        }
    }
}

fn default_max_topics() -> usize {
    50
}

fn default_parallelism() -> usize {
    4
}

/// Pluggable configuration file format, selected by file extension.
pub trait ConfigParser: Send + Sync {
    fn extensions(&self) -> &[&str];
    fn parse(&self, content: &str) -> Result<ScopeConfig, EngineError>;
}

/// Built-in TOML format.
pub struct TomlParser;

impl ConfigParser for TomlParser {
    fn extensions(&self) -> &[&str] {
        &["toml"]
    }

    fn parse(&self, content: &str) -> Result<ScopeConfig, EngineError> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }
}

impl ScopeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        Self::load_with(path, &[])
    }

    /// Load configuration, picking the parser by file extension.
    ///
    /// `parsers` are consulted before the built-in TOML parser.
    pub fn load_with(path: &str, parsers: &[&dyn ConfigParser]) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("toml");

        let builtin: &dyn ConfigParser = &TomlParser;
        let parser = parsers
            .iter()
            .copied()
            .chain(std::iter::once(builtin))
            .find(|p| p.extensions().contains(&ext))
            .ok_or_else(|| EngineError::Config(format!("{path}: unsupported config format '.{ext}'")))?;

        let config = parser.parse(&content).map_err(|e| e.with_context(path))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config = TomlParser.parse(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject rule and bulk settings that would only fail later.
    pub fn validate(&self) -> Result<(), EngineError> {
        for rule in &self.buffer_limits {
            rule.validate()?;
        }
        if self.bulk.parallelism == 0 {
            return Err(EngineError::Config("bulk.parallelism must be at least 1".into()));
        }
        if self.store.event_capacity == 0 {
            return Err(EngineError::Config("store.event_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn rule_set(&self) -> Result<RuleSet, EngineError> {
        RuleSet::new(self.buffer_limits.clone())
    }
}

// ---------------------------------------------------------------------------
// Byte sizes: `1048576`, `"512KiB"`, `"6 MiB"`, `"1MB"`
// ---------------------------------------------------------------------------

pub fn parse_byte_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid byte size '{s}'"))?;
    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "KB" => 1000,
        "KiB" => 1024,
        "MB" => 1000 * 1000,
        "MiB" => 1024 * 1024,
        "GB" => 1000 * 1000 * 1000,
        "GiB" => 1024 * 1024 * 1024,
        other => return Err(format!("unknown byte size unit '{other}'")),
    };
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("byte size '{s}' overflows"))
}

pub(crate) fn deserialize_byte_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(n),
        Raw::Text(s) => parse_byte_size(&s).map_err(serde::de::Error::custom),
    }
}
