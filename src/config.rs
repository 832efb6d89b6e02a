/// Engine configuration, loaded from JSON
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::midi::Channel;
use crate::sequencer::dispatch::DEFAULT_VELOCITY;
use crate::sequencer::{validate_bpm, DEFAULT_BPM};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bpm: f32,
    pub velocity: u8,
    pub channel: Channel,
    /// Connect at startup to the first output whose name contains this.
    pub output_port: Option<String>,
    pub client_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            velocity: DEFAULT_VELOCITY,
            channel: Channel::All,
            output_port: None,
            client_name: "drumsqnc".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!(path = %path.as_ref().display(), "loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_bpm(self.bpm)?;
        if self.velocity > 127 {
            return Err(ConfigError::Velocity(self.velocity));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.bpm, 120.0);
        assert_eq!(config.velocity, 80);
        assert_eq!(config.channel, Channel::All);
        assert!(config.output_port.is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let file = write_config(r#"{ "bpm": 96, "channel": 10, "output_port": "Mbox2" }"#);
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.bpm, 96.0);
        assert_eq!(config.channel, Channel::Single(10));
        assert_eq!(config.output_port.as_deref(), Some("Mbox2"));
        assert_eq!(config.velocity, 80);
    }

    #[test]
    fn test_load_rejects_bad_values() {
        let file = write_config(r#"{ "bpm": 0 }"#);
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));

        let file = write_config(r#"{ "velocity": 200 }"#);
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(ConfigError::Velocity(200))
        ));

        let file = write_config(r#"{ "channel": 17 }"#);
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            EngineConfig::load("/nonexistent/drumsqnc.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
