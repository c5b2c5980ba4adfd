//! Environment-driven configuration (spec.md §6). Grounded on the
//! teacher's `SovereignConfig::from_env` pattern: `dotenvy` loads a local
//! `.env` if present, then every setting is read from `std::env` with an
//! explicit default.

use std::path::PathBuf;

use serde::Deserialize;

use crate::validation::{ValidationRegistry, ValidationStrategy};

/// Startup policy for `EvolutionEngine` (spec.md §6, §9). Off by default:
/// the Open Question in spec.md §9 resolves to "do not mutate agent
/// behavior unless an operator explicitly opts in."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvolutionPolicy {
    Off,
    On,
    Emergency,
}

impl EvolutionPolicy {
    fn from_env_value(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "on" => EvolutionPolicy::On,
            "emergency" => EvolutionPolicy::Emergency,
            _ => EvolutionPolicy::Off,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub evolution_policy: EvolutionPolicy,
    pub max_corrective_depth: u32,
    pub queue_capacity: usize,
}

impl Config {
    /// Loads `.env` (if present) then reads recognized variables, falling
    /// back to spec.md's documented defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let home = std::env::var("HEPHAESTUS_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let evolution_policy = std::env::var("HEPHAESTUS_EVOLUTION")
            .map(|v| EvolutionPolicy::from_env_value(&v))
            .unwrap_or(EvolutionPolicy::Off);

        let max_corrective_depth = std::env::var("HEPHAESTUS_MAX_CORRECTIVE_DEPTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let queue_capacity = std::env::var("HEPHAESTUS_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(256);

        Self { home, evolution_policy, max_corrective_depth, queue_capacity }
    }

    pub fn memory_path(&self) -> PathBuf {
        self.home.join("memory.json")
    }

    pub fn evolution_log_path(&self) -> PathBuf {
        self.home.join("evolution_log.csv")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.home.join("config")
    }

    /// Reads `config/strategies.toml` (if present) and registers any
    /// strategy definitions it contains into `registry` (spec.md §6:
    /// "`config/` directory of strategy and model definitions (read at
    /// startup...)"). A missing file is not an error — the registry's
    /// built-in defaults stand alone.
    pub fn load_strategies_into(&self, registry: &ValidationRegistry) -> std::io::Result<()> {
        let path = self.config_dir().join("strategies.toml");
        if !path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&path)?;
        let file: StrategiesFile = toml::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        for def in file.strategy {
            registry.register_strategy(ValidationStrategy { name: def.name, steps: def.steps, sanity_check: def.sanity_check });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct StrategiesFile {
    #[serde(default)]
    strategy: Vec<StrategyDef>,
}

#[derive(Debug, Deserialize)]
struct StrategyDef {
    name: String,
    steps: Vec<String>,
    sanity_check: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evolution_policy_defaults_to_off_on_unrecognized_value() {
        assert_eq!(EvolutionPolicy::from_env_value("bogus"), EvolutionPolicy::Off);
        assert_eq!(EvolutionPolicy::from_env_value("ON"), EvolutionPolicy::On);
        assert_eq!(EvolutionPolicy::from_env_value("emergency"), EvolutionPolicy::Emergency);
    }

    #[test]
    fn load_strategies_registers_toml_defined_strategy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("config")).unwrap();
        std::fs::write(
            dir.path().join("config/strategies.toml"),
            r#"
            [[strategy]]
            name = "CUSTOM"
            steps = ["syntax_check"]
            sanity_check = "skip_sanity_check"
            "#,
        )
        .unwrap();

        let config = Config { home: dir.path().to_path_buf(), evolution_policy: EvolutionPolicy::Off, max_corrective_depth: 3, queue_capacity: 1 };
        let registry = ValidationRegistry::new();
        config.load_strategies_into(&registry).unwrap();
        let (strategy, fell_back) = registry.resolve("CUSTOM");
        assert!(!fell_back);
        assert_eq!(strategy.name, "CUSTOM");
    }

    #[test]
    fn missing_strategies_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config { home: dir.path().to_path_buf(), evolution_policy: EvolutionPolicy::Off, max_corrective_depth: 3, queue_capacity: 1 };
        let registry = ValidationRegistry::new();
        config.load_strategies_into(&registry).unwrap();
    }
}
