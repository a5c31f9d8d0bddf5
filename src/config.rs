//! Configuration management for sendlimit.

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SendLimitError};
use crate::ratelimit::{PolicyConfig, PolicyIndex, Topic, ValidationMode};

/// Prefix for environment variable overrides, e.g. `SENDLIMIT_VALIDATION`.
const ENV_PREFIX: &str = "SENDLIMIT";

/// Settings for building the rate limit policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the policy file (YAML, or JSON with a `.json` extension)
    #[serde(default)]
    pub policy_path: Option<String>,

    /// How to treat known topics missing from the policy
    #[serde(default)]
    pub validation: ValidationMode,

    /// Every topic the application sends
    #[serde(default)]
    pub known_topics: Vec<Topic>,
}

impl Settings {
    /// Load settings from an optional file, overridden by `SENDLIMIT_*`
    /// environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("known_topics"),
            )
            .build()
            .map_err(|e| SendLimitError::Config(e.to_string()))?;

        Self::from_config(config)
    }

    /// Load settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .map_err(|e| SendLimitError::Config(e.to_string()))?;

        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self> {
        config
            .try_deserialize()
            .map_err(|e| SendLimitError::Config(format!("Invalid settings: {e}")))
    }

    /// Load the configured policy file and build its index.
    pub fn load_policy(&self) -> Result<PolicyIndex> {
        let path = self
            .policy_path
            .as_deref()
            .ok_or_else(|| SendLimitError::Config("no policy_path configured".to_string()))?;

        let policy = PolicyConfig::from_file(path)?;
        PolicyIndex::build(policy.entries, self.validation, &self.known_topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_POLICY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config/policy.yaml");

    #[test]
    fn test_defaults() {
        let settings = Settings::from_yaml("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.validation, ValidationMode::Lenient);
    }

    #[test]
    fn test_parse_settings() {
        let settings = Settings::from_yaml(
            r#"
policy_path: config/policy.yaml
validation: strict
known_topics: [news, status]
"#,
        )
        .unwrap();

        assert_eq!(settings.policy_path.as_deref(), Some("config/policy.yaml"));
        assert_eq!(settings.validation, ValidationMode::Strict);
        assert_eq!(settings.known_topics, vec![Topic::new("NEWS"), Topic::new("STATUS")]);
    }

    #[test]
    fn test_invalid_validation_mode_rejected() {
        assert!(Settings::from_yaml("validation: sometimes").is_err());
    }

    #[test]
    fn test_load_policy_requires_path() {
        let result = Settings::default().load_policy();
        assert!(matches!(result, Err(SendLimitError::Config(_))));
    }

    #[test]
    fn test_load_default_policy() {
        let settings = Settings {
            policy_path: Some(DEFAULT_POLICY.to_string()),
            validation: ValidationMode::Strict,
            known_topics: ["NEWS", "MARKETING", "STATUS", "SECURITY"]
                .into_iter()
                .map(Topic::from)
                .collect(),
        };

        let index = settings.load_policy().unwrap();
        assert_eq!(index.topics().len(), 4);
    }

    #[test]
    fn test_strict_settings_report_missing_topics() {
        let settings = Settings {
            policy_path: Some(DEFAULT_POLICY.to_string()),
            validation: ValidationMode::Strict,
            known_topics: vec![Topic::new("NEWS"), Topic::new("BILLING")],
        };

        assert!(matches!(
            settings.load_policy(),
            Err(SendLimitError::UnclassifiedTopics(missing)) if missing == vec![Topic::new("BILLING")]
        ));
    }
}
