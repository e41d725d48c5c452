//! # Attack Path Learner
//!
//! A knowledge-augmented reinforcement learning core for simulated
//! privilege escalation. An agent explores an abstract target, picks attack
//! actions, and learns which sequences reach admin fastest, steered by
//! exploit intelligence ("hints") keyed on the services it knows about.
//!
//! Nothing here sends traffic: every attack is an abstract action resolved
//! against probability tables and the current environment state.
//!
//! ## Key Features
//!
//! - **Knowledge Base**: pluggable exploit intelligence with deterministic ranking
//! - **Environment**: seedable outcome resolution, escalation graph, lockout defense
//! - **Agent**: tabular Q-learning with hint-following and epsilon-greedy exploration
//! - **Orchestration**: lazy episode stepping, cancellation, multi-episode training
//! - **Analysis**: path scoring, store statistics, training reports
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use attack_path_learner::{KnowledgeBase, SimulationConfig, Simulator};
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//!
//! let knowledge = Arc::new(KnowledgeBase::with_static_table());
//! let mut simulator = Simulator::new(SimulationConfig::default(), knowledge).unwrap();
//!
//! let seeds: BTreeSet<String> = ["apache-2.4.49".to_string()].into_iter().collect();
//! let path = simulator.run_episode(&seeds, 50);
//! println!("reached {} in {} steps", path.final_access_level, path.iterations());
//! ```

pub mod agent;
pub mod analysis;
pub mod attack;
pub mod config;
pub mod environment;
pub mod error;
pub mod knowledge;
pub mod path;
pub mod recon;
pub mod reward;
pub mod simulation;
pub mod storage;

// Re-export commonly used types
pub use agent::{Decision, QLearningAgent, SharedValueTable, StateSignature, ValueTable, ValueTableSnapshot};
pub use analysis::{Analyzer, LearningReport, TrainingMetrics};
pub use attack::{AccessLevel, AttackAction, Discovery, EscalationGraph};
pub use config::{AgentConfig, EnvironmentConfig, SimulationConfig};
pub use environment::{Environment, EnvironmentState, Resolution};
pub use error::{Result, SimError};
pub use knowledge::{Hint, IntelSource, KnowledgeBase, StaticIntel};
pub use path::{AttackPath, HintOutcome, TerminationReason, Transition};
pub use recon::{seed_services_from_scan, ScanReport, Scanner, StaticScanner};
pub use reward::{reward, RewardBreakdown};
pub use simulation::{CancelHandle, Episode, Simulator, Trainer, TrainingConfig};
pub use storage::{InMemoryPathStore, PathStatistics, PathStore};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Later calls are no-ops.
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
