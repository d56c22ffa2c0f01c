//! Configuration for the orchestration kernel (spec.md §9.1 of SPEC_FULL.md).

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Extract(#[from] figment::Error),

    #[error("invalid max_agents: {0}, must be between 1 and 32")]
    InvalidMaxAgents(usize),

    #[error("invalid event_bus_capacity: {0}, must be at least 1")]
    InvalidEventBusCapacity(usize),

    #[error("invalid max_retries: {0}, must be at least 1")]
    InvalidMaxRetries(u32),

    #[error("invalid escalation_deadline_secs: {0}, must be at least 1")]
    InvalidEscalationDeadline(u64),
}

fn default_max_agents() -> usize {
    4
}

fn default_event_bus_capacity() -> usize {
    100
}

fn default_merge_queue_capacity() -> usize {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_resolver_attempts() -> u32 {
    5
}

fn default_rebase_retry_limit() -> u32 {
    3
}

fn default_escalation_deadline_secs() -> u64 {
    1800
}

fn default_session_branch_prefix() -> String {
    "session-".to_string()
}

/// Layered configuration for one orchestrator (spec.md §9 ambient addition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Concurrency cap on simultaneously running tasks (spec.md §4.10).
    pub max_agents: usize,
    /// Event Bus broadcast channel capacity (spec.md §4.1).
    pub event_bus_capacity: usize,
    /// Merge Queue buffer size (spec.md §4.8).
    pub merge_queue_capacity: usize,
    /// Per-task retry budget before escalation (spec.md §3).
    pub max_retries: u32,
    /// Merge Resolver Agent attempt budget (spec.md §4.6).
    pub max_resolver_attempts: u32,
    /// Branch Merger rebase-then-retry budget (spec.md §4.4).
    pub rebase_retry_limit: u32,
    /// Escalation wait deadline before defaulting to abort (spec.md §4.9).
    pub escalation_deadline_secs: u64,
    /// Prefix for generated session branch names (spec.md §6).
    pub session_branch_prefix: String,
    /// Selects `main` (true) vs `<prefix><id>` (false) as the session branch.
    pub greenfield: bool,
    /// Project-specific build/test command the Semantic Auto-Merger runs to
    /// validate a resolution before committing it (spec.md §9 Open Question:
    /// parameterized rather than baked-in per language).
    pub validate_command: Option<Vec<String>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            event_bus_capacity: default_event_bus_capacity(),
            merge_queue_capacity: default_merge_queue_capacity(),
            max_retries: default_max_retries(),
            max_resolver_attempts: default_max_resolver_attempts(),
            rebase_retry_limit: default_rebase_retry_limit(),
            escalation_deadline_secs: default_escalation_deadline_secs(),
            session_branch_prefix: default_session_branch_prefix(),
            greenfield: false,
            validate_command: None,
        }
    }
}

impl OrchestratorConfig {
    /// Loads config by layering compiled-in defaults, an optional YAML file,
    /// and `ORCH_`-prefixed environment variables (highest precedence),
    /// mirroring the teacher's `ConfigLoader::load` precedence chain.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("ORCH_").split("__"))
            .extract()?;
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Self) -> Result<(), ConfigError> {
        if config.max_agents == 0 || config.max_agents > 32 {
            return Err(ConfigError::InvalidMaxAgents(config.max_agents));
        }
        if config.event_bus_capacity == 0 {
            return Err(ConfigError::InvalidEventBusCapacity(config.event_bus_capacity));
        }
        if config.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.max_retries));
        }
        if config.escalation_deadline_secs == 0 {
            return Err(ConfigError::InvalidEscalationDeadline(
                config.escalation_deadline_secs,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_agents, 4);
        assert_eq!(config.max_retries, 3);
        OrchestratorConfig::validate(&config).expect("default config should validate");
    }

    #[test]
    fn rejects_zero_max_agents() {
        let config = OrchestratorConfig {
            max_agents: 0,
            ..Default::default()
        };
        assert!(matches!(
            OrchestratorConfig::validate(&config),
            Err(ConfigError::InvalidMaxAgents(0))
        ));
    }

    #[test]
    fn yaml_overrides_layer_over_defaults() {
        let yaml = "max_agents: 8\nescalation_deadline_secs: 60\n";
        let config: OrchestratorConfig = Figment::new()
            .merge(Serialized::defaults(OrchestratorConfig::default()))
            .merge(figment::providers::Yaml::string(yaml))
            .extract()
            .unwrap();
        assert_eq!(config.max_agents, 8);
        assert_eq!(config.escalation_deadline_secs, 60);
        assert_eq!(config.merge_queue_capacity, 100);
    }
}
