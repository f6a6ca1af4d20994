// src/config.rs
//! Processor settings and the configuration sources applied at runtime

use crate::ConfigurationError;
use serde::{Deserialize, Serialize};

/// Upper bound for `codegen.max_instructions`
const MAX_INSTRUCTION_LIMIT: usize = 1 << 20;

/// Bytecode generation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
    /// Generate bytecode for rules; when off every rule is interpreted
    pub enabled: bool,
    /// Programs longer than this fall back to the interpreter
    pub max_instructions: usize,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_instructions: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub codegen: CodegenConfig,
    /// Write rule failures into a message field
    pub record_processing_errors: bool,
    pub processing_error_field: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            codegen: CodegenConfig::default(),
            record_processing_errors: true,
            processing_error_field: "processing_error".to_owned(),
        }
    }
}

impl ProcessorConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.codegen.max_instructions == 0 || self.codegen.max_instructions > MAX_INSTRUCTION_LIMIT
        {
            return Err(ConfigurationError::InvalidSetting {
                field: "codegen.max_instructions".to_owned(),
                reason: format!(
                    "must be between 1 and {}, got {}",
                    MAX_INSTRUCTION_LIMIT, self.codegen.max_instructions
                ),
            });
        }

        if self.record_processing_errors && self.processing_error_field.trim().is_empty() {
            return Err(ConfigurationError::InvalidSetting {
                field: "processing_error_field".to_owned(),
                reason: "must not be empty while errors are recorded".to_owned(),
            });
        }

        Ok(())
    }
}

/// Rule source text keyed by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSource {
    pub id: String,
    pub source: String,
}

/// Pipeline source text keyed by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSource {
    pub id: String,
    pub source: String,
}

/// Pipelines that process the messages of one stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConnection {
    pub stream_id: String,
    pub pipeline_ids: Vec<String>,
}

/// Everything needed to build one processor state. Applied as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationSource {
    pub rules: Vec<RuleSource>,
    pub pipelines: Vec<PipelineSource>,
    pub connections: Vec<StreamConnection>,
}

impl ConfigurationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn rule(mut self, id: impl Into<String>, source: impl Into<String>) -> Self {
        self.rules.push(RuleSource {
            id: id.into(),
            source: source.into(),
        });
        self
    }

    pub fn pipeline(mut self, id: impl Into<String>, source: impl Into<String>) -> Self {
        self.pipelines.push(PipelineSource {
            id: id.into(),
            source: source.into(),
        });
        self
    }

    pub fn connect<I, S>(mut self, stream_id: impl Into<String>, pipeline_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.connections.push(StreamConnection {
            stream_id: stream_id.into(),
            pipeline_ids: pipeline_ids.into_iter().map(Into::into).collect(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProcessorConfig::default();
        assert!(config.codegen.enabled);
        assert_eq!(config.codegen.max_instructions, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ProcessorConfig::from_json(r#"{"codegen": {"enabled": false}}"#).unwrap();
        assert!(!config.codegen.enabled);
        assert_eq!(config.codegen.max_instructions, 4096);
        assert_eq!(config.processing_error_field, "processing_error");
    }

    #[test]
    fn test_validate_rejects_zero_instruction_limit() {
        let result = ProcessorConfig::from_json(r#"{"codegen": {"max_instructions": 0}}"#);
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidSetting { ref field, .. }) if field == "codegen.max_instructions"
        ));
    }

    #[test]
    fn test_validate_rejects_empty_error_field() {
        let config = ProcessorConfig {
            processing_error_field: " ".to_owned(),
            ..ProcessorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ConfigurationSource::from_json("{"),
            Err(ConfigurationError::Json(_))
        ));
    }

    #[test]
    fn test_source_from_json() {
        let source = ConfigurationSource::from_json(
            r#"{
                "rules": [{"id": "r1", "source": "rule \"r1\" when true then end"}],
                "connections": [{"stream_id": "s1", "pipeline_ids": ["p1"]}]
            }"#,
        )
        .unwrap();

        assert_eq!(source.rules[0].id, "r1");
        assert!(source.pipelines.is_empty());
        assert_eq!(source.connections[0].pipeline_ids, vec!["p1"]);
    }
}
