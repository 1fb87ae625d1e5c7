use mqscope_engine::config::{ConfigParser, ScopeConfig};
use mqscope_engine::error::EngineError;

/// HCL configuration format (`.hcl`).
pub struct HclParser;

impl ConfigParser for HclParser {
    fn extensions(&self) -> &[&str] {
        &["hcl"]
    }

    fn parse(&self, content: &str) -> Result<ScopeConfig, EngineError> {
        hcl::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
api_port = 9401

buffer_limits = [
  { pattern = "sensors/#", max_bytes = "6MiB" },
  { pattern = "sensors/+/raw", max_bytes = 4096 },
]

bulk {
  max_topics  = 5
  parallelism = 2
}
"#;

    #[test]
    fn test_parse_hcl() {
        let config = HclParser.parse(SAMPLE).unwrap();
        assert_eq!(config.api_port, 9401);
        assert_eq!(config.buffer_limits.len(), 2);
        assert_eq!(config.buffer_limits[0].max_bytes, 6 * 1024 * 1024);
        assert_eq!(config.bulk.max_topics, 5);
        assert_eq!(config.bulk.parallelism, 2);
        assert_eq!(config.store.event_capacity, 1024);
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scope.hcl");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = ScopeConfig::load_with(path.to_str().unwrap(), &[&HclParser]).unwrap();
        let rules = config.rule_set().unwrap();
        assert_eq!(rules.limit_for("sensors/a/raw"), 4096);
        assert_eq!(rules.limit_for("misc"), 1024 * 1024);
    }

    #[test]
    fn test_invalid_rule_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.hcl");
        std::fs::write(&path, r#"buffer_limits = [{ pattern = "a/#/b", max_bytes = 1 }]"#).unwrap();

        let err = ScopeConfig::load_with(path.to_str().unwrap(), &[&HclParser]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRule { .. }), "{err}");
    }
}
