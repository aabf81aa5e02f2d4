use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tie-break order for conflicting discrete firings, as named in config files.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyName {
    #[default]
    Identifier,
    Priority,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SimulationConfig {
    #[serde(default = "default_dt")]
    pub dt: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_max_steps")]
    pub max_steps: Option<u64>,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub conflict_policy: PolicyName,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dt: default_dt(),
            seed: default_seed(),
            max_steps: default_max_steps(),
            end_time: None,
            conflict_policy: PolicyName::default(),
        }
    }
}

impl SimulationConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: SimulationConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.dt.is_finite() && self.dt > 0.0,
            "dt must be a positive finite number, got {}",
            self.dt
        );
        if let Some(end_time) = self.end_time {
            ensure!(
                end_time.is_finite() && end_time >= 0.0,
                "end_time must be finite and non-negative, got {}",
                end_time
            );
        }
        Ok(())
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

fn default_dt() -> f64 {
    0.1
}

fn default_seed() -> u64 {
    42
}

fn default_max_steps() -> Option<u64> {
    Some(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = SimulationConfig::load_from_file("/nonexistent/hpn.toml").unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config: SimulationConfig =
            toml::from_str("dt = 0.5\nconflict_policy = \"priority\"\nend_time = 10.0\n").unwrap();
        assert_eq!(config.dt, 0.5);
        assert_eq!(config.conflict_policy, PolicyName::Priority);
        assert_eq!(config.end_time, Some(10.0));
        assert_eq!(config.seed, 42);
        assert_eq!(config.max_steps, Some(1000));
    }

    #[test]
    fn non_positive_dt_is_rejected() {
        let config = SimulationConfig {
            dt: 0.0,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_file_reports_its_path() {
        let dir = std::env::temp_dir().join(format!("hpn-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        fs::write(&path, "dt = -1.0\n").unwrap();

        let err = SimulationConfig::load_from_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("bad.toml"));
        fs::remove_dir_all(&dir).ok();
    }
}
