use crate::attack::AttackAction;
use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Learning parameters for the Q-learning agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub learning_rate: f64,
    pub discount_factor: f64,
    pub epsilon: f64,
    /// Chance of taking the hinted action outright when a hint is active
    pub hint_follow_probability: f64,
    pub epsilon_decay: f64,
    pub min_epsilon: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.9,
            epsilon: 0.1,
            hint_follow_probability: 0.8,
            epsilon_decay: 0.995,
            min_epsilon: 0.01,
        }
    }
}

/// Static rules of the simulated target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub target: String,
    /// Consecutive failures before the target locks the attacker out
    pub lockout_threshold: u32,
    /// Added to the success probability of the hinted action
    pub hint_probability_bonus: f64,
    pub max_success_probability: f64,
    /// Pinned success probabilities, mostly for tests
    pub success_overrides: BTreeMap<AttackAction, f64>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            target: "target-host".to_string(),
            lockout_threshold: 8,
            hint_probability_bonus: 0.15,
            max_success_probability: 0.95,
            success_overrides: BTreeMap::new(),
        }
    }
}

/// Simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    pub max_iterations: usize,
    pub agent: AgentConfig,
    pub environment: EnvironmentConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            max_iterations: 100,
            agent: AgentConfig::default(),
            environment: EnvironmentConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Apply `ATTACK_SIM_*` environment variables on top of this config
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(seed) = lookup("ATTACK_SIM_SEED") {
            self.seed = parse_var("ATTACK_SIM_SEED", &seed)?;
        }
        if let Some(max) = lookup("ATTACK_SIM_MAX_ITERATIONS") {
            self.max_iterations = parse_var("ATTACK_SIM_MAX_ITERATIONS", &max)?;
        }
        if let Some(epsilon) = lookup("ATTACK_SIM_EPSILON") {
            self.agent.epsilon = parse_var("ATTACK_SIM_EPSILON", &epsilon)?;
        }
        if let Some(target) = lookup("ATTACK_SIM_TARGET") {
            self.environment.target = target;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(SimError::Config(format!("{} must be in [0, 1], got {}", name, value)))
            }
        };

        unit("agent.learning_rate", self.agent.learning_rate)?;
        unit("agent.discount_factor", self.agent.discount_factor)?;
        unit("agent.epsilon", self.agent.epsilon)?;
        unit("agent.hint_follow_probability", self.agent.hint_follow_probability)?;
        unit("agent.epsilon_decay", self.agent.epsilon_decay)?;
        unit("agent.min_epsilon", self.agent.min_epsilon)?;
        unit("environment.hint_probability_bonus", self.environment.hint_probability_bonus)?;
        unit("environment.max_success_probability", self.environment.max_success_probability)?;
        for (action, p) in &self.environment.success_overrides {
            unit(&format!("environment.success_overrides.{}", action), *p)?;
        }

        if self.environment.lockout_threshold == 0 {
            return Err(SimError::Config(
                "environment.lockout_threshold must be at least 1".to_string(),
            ));
        }
        if self.environment.target.trim().is_empty() {
            return Err(SimError::Config("environment.target must not be empty".to_string()));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| SimError::Config(format!("{} has invalid value '{}'", key, raw)))
}
