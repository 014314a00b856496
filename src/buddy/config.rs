//! Structured configuration (§5.3). Loaded from YAML — unlike the
//! teacher's own TOML-based `SpeechConfig`, the distilled spec's wire
//! format is YAML and that detail is preserved unchanged (see DESIGN.md
//! "Dependency changes"). The `from_file`/`save_to_file`/`default_config_path`
//! shape otherwise follows the teacher's `config::SpeechConfig` exactly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::buddy::dirs::{buddy_config_path, buddy_home};
use crate::buddy::error::{BuddyError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainSchema {
    pub model_id: String,
    pub system_instruction: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    pub archivist_interval: f64,
    #[serde(default = "default_light_off_timeout")]
    pub light_off_timeout: f64,
}

fn default_temperature() -> f64 {
    0.7
}
fn default_light_off_timeout() -> f64 {
    180.0
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueuesSchema {
    #[serde(default = "default_input_maxsize")]
    pub input_maxsize: usize,
    #[serde(default = "default_interrupt_maxsize")]
    pub interrupt_maxsize: usize,
    #[serde(default = "default_output_maxsize")]
    pub output_maxsize: usize,
}

fn default_input_maxsize() -> usize {
    256
}
fn default_interrupt_maxsize() -> usize {
    32
}
fn default_output_maxsize() -> usize {
    128
}

/// One entry in `adapters.input`/`adapters.output`: an implementation
/// class name plus its free-form config block (§4.2 "Adapter factory",
/// §5.3 schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterEntry {
    pub class: String,
    #[serde(default)]
    pub config: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdaptersSchema {
    #[serde(default)]
    pub input: Vec<AdapterEntry>,
    #[serde(default)]
    pub output: Vec<AdapterEntry>,
}

/// Top-level configuration, deserialized from `BUDDY_CONFIG` (§5.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuddyConfig {
    pub brain: BrainSchema,
    #[serde(default)]
    pub queues: QueuesSchema,
    pub adapters: AdaptersSchema,
    /// Injected after load, not read from the file itself — mirrors the
    /// source's `config['buddy_home']` injection so adapters can resolve
    /// their own relative paths consistently (§5.3).
    #[serde(skip)]
    pub buddy_home: PathBuf,
}

impl BuddyConfig {
    /// Load and validate a config file. Fails with `Configuration` if the
    /// file is missing, malformed, or missing any required section
    /// (`brain`, `adapters.input`, `adapters.output`) — this crate treats
    /// an empty `adapters.input`/`output` list as present-but-empty, not
    /// missing; the key itself must be present.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: BuddyConfig = serde_yaml::from_str(&content)
            .map_err(|e| BuddyError::Configuration(format!("invalid config YAML: {e}")))?;
        config.buddy_home = buddy_home();
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)
            .map_err(|e| BuddyError::Configuration(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        buddy_config_path()
    }

    /// Whole-config validation against the adapter factory's registered
    /// class names (§5.3, §8 scenario 9). Per-instance field validation is
    /// the adapter's own job at construction time (§4.2 "Adapter factory").
    pub fn validate(&self) -> Result<()> {
        if self.brain.model_id.is_empty() {
            return Err(BuddyError::Configuration("brain.model_id is required".into()));
        }
        if self.brain.system_instruction.is_empty() {
            return Err(BuddyError::Configuration(
                "brain.system_instruction is required".into(),
            ));
        }

        let known_input = known_input_classes();
        let known_output = known_output_classes();

        for entry in &self.adapters.input {
            if entry.class != "disabled" && !known_input.contains(&entry.class.as_str()) {
                return Err(BuddyError::Configuration(format!(
                    "unknown input adapter class '{}'; registered classes: {:?}",
                    entry.class, known_input
                )));
            }
        }
        for entry in &self.adapters.output {
            if entry.class != "disabled" && !known_output.contains(&entry.class.as_str()) {
                return Err(BuddyError::Configuration(format!(
                    "unknown output adapter class '{}'; registered classes: {:?}",
                    entry.class, known_output
                )));
            }
        }
        Ok(())
    }
}

fn known_input_classes() -> Vec<&'static str> {
    vec!["wakeword", "speech_in", "radar", "temperature", "scheduler", "pipe_in"]
}

fn known_output_classes() -> Vec<&'static str> {
    vec!["tts", "led", "persistence", "distiller", "bulb", "pipe_out", "console"]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
brain:
  model_id: test-model
  system_instruction: be helpful
  archivist_interval: 3600
adapters:
  input: []
  output: []
"#
    }

    #[test]
    fn loads_minimal_config_and_fills_in_defaults() {
        let dir = std::env::temp_dir().join("buddy-test-config-minimal");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(&path, minimal_yaml()).unwrap();

        let config = BuddyConfig::from_file(&path).unwrap();
        assert_eq!(config.brain.model_id, "test-model");
        assert_eq!(config.brain.temperature, 0.7);
        assert_eq!(config.queues.input_maxsize, 256);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_unknown_adapter_class() {
        let yaml = r#"
brain:
  model_id: test-model
  system_instruction: be helpful
  archivist_interval: 3600
adapters:
  input:
    - class: not_a_real_adapter
      config: {}
  output: []
"#;
        let dir = std::env::temp_dir().join("buddy-test-config-unknown-class");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(&path, yaml).unwrap();

        let result = BuddyConfig::from_file(&path);
        assert!(matches!(result, Err(BuddyError::Configuration(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn disabled_sentinel_is_not_an_unknown_class_error() {
        let yaml = r#"
brain:
  model_id: test-model
  system_instruction: be helpful
  archivist_interval: 3600
adapters:
  input:
    - class: disabled
      config: {}
  output: []
"#;
        let dir = std::env::temp_dir().join("buddy-test-config-disabled");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(&path, yaml).unwrap();

        let config = BuddyConfig::from_file(&path).unwrap();
        assert_eq!(config.adapters.input[0].class, "disabled");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = BuddyConfig::from_file(Path::new("/nonexistent/path/config.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn from_file_invalid_yaml_returns_error() {
        let dir = std::env::temp_dir().join("buddy-test-config-invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.yaml");
        std::fs::write(&path, "not: valid: yaml: [[[").unwrap();

        let result = BuddyConfig::from_file(&path);
        assert!(result.is_err());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = std::env::temp_dir().join("buddy-test-config-roundtrip");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(&path, minimal_yaml()).unwrap();
        let config = BuddyConfig::from_file(&path).unwrap();

        let save_path = dir.join("saved.yaml");
        config.save_to_file(&save_path).unwrap();
        let reloaded = BuddyConfig::from_file(&save_path).unwrap();
        assert_eq!(reloaded.brain.model_id, config.brain.model_id);

        std::fs::remove_dir_all(&dir).ok();
    }
}
