//! Buffer limit rules and the wildcard specificity order that picks one of
//! them for a concrete topic.
//!
//! A rule matches a topic MQTT-style: `+` stands for exactly one segment,
//! a trailing `#` for zero or more. When several rules match, the one with
//! the highest [`Specificity`] wins.

use std::cmp::Ordering;

use serde::Deserialize;

use crate::error::EngineError;

/// Topic level separator.
pub const SEPARATOR: char = '/';

/// Pattern of the catch-all rule that is always present.
pub const DEFAULT_RULE_PATTERN: &str = "#";

/// Budget of the built-in catch-all rule (1 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;

/// Wildcard pattern → byte budget for every topic it governs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BufferLimitRule {
    pub pattern: String,
    #[serde(deserialize_with = "crate::config::deserialize_byte_size")]
    pub max_bytes: u64,
}

impl BufferLimitRule {
    pub fn new(pattern: impl Into<String>, max_bytes: u64) -> Self {
        Self {
            pattern: pattern.into(),
            max_bytes,
        }
    }

    /// Reject patterns the matcher cannot interpret.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_bytes == 0 {
            return Err(self.invalid("max_bytes must be greater than zero"));
        }
        validate_pattern(&self.pattern).map_err(|reason| self.invalid(reason))
    }

    fn invalid(&self, reason: impl Into<String>) -> EngineError {
        EngineError::InvalidRule {
            pattern: self.pattern.clone(),
            reason: reason.into(),
        }
    }
}

/// Check wildcard placement: `+` and `#` must fill a whole segment, `#` only last.
pub fn validate_pattern(pattern: &str) -> Result<(), String> {
    if pattern.is_empty() {
        return Err("pattern is empty".into());
    }
    let segments: Vec<&str> = pattern.split(SEPARATOR).collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        match *segment {
            "#" if i != last => return Err("'#' is only allowed as the last segment".into()),
            "#" | "+" => {}
            s if s.contains(['#', '+']) => {
                return Err(format!("wildcard mixed into segment '{s}'"));
            }
            _ => {}
        }
    }
    Ok(())
}

/// How a single topic segment was matched. Declaration order is rank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Rank {
    MultiLevel,
    SingleLevel,
    Literal,
}

/// Total order over the ways a pattern can match one topic.
///
/// Segment ranks are compared from the root, so a longer literal prefix
/// always outranks a shorter one. On equal ranks a pattern without `#`
/// beats one that ends in it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    ranks: Vec<Rank>,
    exact: bool,
}

/// Score `pattern` against `topic`. `None` if it does not match.
pub fn score(pattern: &str, topic: &str) -> Option<Specificity> {
    let mut ranks = Vec::new();
    let mut topic_segments = topic.split(SEPARATOR);
    let mut pattern_segments = pattern.split(SEPARATOR).peekable();

    while let Some(p) = pattern_segments.next() {
        if p == "#" {
            if pattern_segments.peek().is_some() {
                return None;
            }
            ranks.extend(topic_segments.map(|_| Rank::MultiLevel));
            return Some(Specificity { ranks, exact: false });
        }
        let t = topic_segments.next()?;
        match p {
            "+" => ranks.push(Rank::SingleLevel),
            literal if literal == t => ranks.push(Rank::Literal),
            _ => return None,
        }
    }

    if topic_segments.next().is_some() {
        return None;
    }
    Some(Specificity { ranks, exact: true })
}

pub fn matches(pattern: &str, topic: &str) -> bool {
    score(pattern, topic).is_some()
}

/// Pick the budget of the most specific matching rule.
///
/// Equally specific rules resolve to the earliest one in `rules`.
pub fn resolve_limit(topic: &str, rules: &[BufferLimitRule]) -> Option<u64> {
    let mut best: Option<(Specificity, u64)> = None;
    for rule in rules {
        let Some(candidate) = score(&rule.pattern, topic) else {
            continue;
        };
        let better = match &best {
            None => true,
            Some((current, _)) => candidate.cmp(current) == Ordering::Greater,
        };
        if better {
            best = Some((candidate, rule.max_bytes));
        }
    }
    best.map(|(_, max_bytes)| max_bytes)
}

/// Validated, ordered rule list with the catch-all appended last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<BufferLimitRule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            rules: vec![BufferLimitRule::new(DEFAULT_RULE_PATTERN, DEFAULT_MAX_BYTES)],
        }
    }
}

impl RuleSet {
    pub fn new(rules: Vec<BufferLimitRule>) -> Result<Self, EngineError> {
        for rule in &rules {
            rule.validate()?;
        }
        let mut rules = rules;
        rules.push(BufferLimitRule::new(DEFAULT_RULE_PATTERN, DEFAULT_MAX_BYTES));
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[BufferLimitRule] {
        &self.rules
    }

    /// Budget for a newly observed topic.
    pub fn limit_for(&self, topic: &str) -> u64 {
        resolve_limit(topic, &self.rules).unwrap_or(DEFAULT_MAX_BYTES)
    }
}
