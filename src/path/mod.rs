use crate::agent::Decision;
use crate::attack::{AccessLevel, AttackAction, Discovery};
use crate::knowledge::Hint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One step of an episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// 1-based step index within the episode
    pub iteration: u32,
    pub action: AttackAction,
    pub decision: Decision,
    pub success: bool,
    pub blocked: bool,
    pub access_level: AccessLevel,
    pub discovered: Vec<Discovery>,
    pub reward: f64,
    pub hint_active: bool,
    pub hint_followed: bool,
}

/// What became of the episode's hint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HintOutcome {
    pub hint: Option<Hint>,
    pub times_followed: u32,
    /// At least one step that followed the hint succeeded
    pub succeeded: bool,
}

impl HintOutcome {
    pub fn suggested_action(&self) -> Option<AttackAction> {
        self.hint.as_ref().map(|h| h.suggested_action)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    AdminReached,
    TargetBlocked,
    BudgetExhausted,
    Cancelled,
}

/// Finalized transition log of one episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackPath {
    pub target: String,
    pub seed_services: BTreeSet<String>,
    pub transitions: Vec<Transition>,
    pub final_access_level: AccessLevel,
    pub successes: u32,
    pub failures: u32,
    pub discovered_vulnerabilities: BTreeSet<String>,
    pub hint: HintOutcome,
    pub termination: TerminationReason,
    pub total_reward: f64,
}

impl AttackPath {
    pub fn iterations(&self) -> usize {
        self.transitions.len()
    }

    pub fn reached_admin(&self) -> bool {
        self.final_access_level == AccessLevel::Admin
    }

    /// Steps taken until the final level was first reached
    pub fn iterations_to_final_level(&self) -> usize {
        self.transitions
            .iter()
            .position(|t| t.access_level == self.final_access_level)
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    pub fn success_ratio(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            0.0
        } else {
            self.successes as f64 / total as f64
        }
    }

    /// Quality score weighting the level reached, hit rate, findings and noise
    pub fn score(&self) -> f64 {
        let weight = match self.final_access_level {
            AccessLevel::None => 0.0,
            AccessLevel::Public => 10.0,
            AccessLevel::Internal => 30.0,
            AccessLevel::Admin => 100.0,
        };

        weight * (1.0 + self.success_ratio()) + 5.0 * self.discovered_vulnerabilities.len() as f64
            - 0.5 * self.failures as f64
    }

    pub fn action_counts(&self) -> BTreeMap<AttackAction, usize> {
        let mut counts = BTreeMap::new();
        for t in &self.transitions {
            *counts.entry(t.action).or_insert(0) += 1;
        }
        counts
    }

    /// Share of steps that took `action`
    pub fn action_fraction(&self, action: AttackAction) -> f64 {
        if self.transitions.is_empty() {
            return 0.0;
        }
        let taken = self.transitions.iter().filter(|t| t.action == action).count();
        taken as f64 / self.transitions.len() as f64
    }

    /// True when access never drops between consecutive steps
    pub fn is_monotonic(&self) -> bool {
        self.transitions
            .windows(2)
            .all(|w| w[0].access_level <= w[1].access_level)
    }
}

/// Accumulates transitions into an [`AttackPath`]
#[derive(Debug, Clone)]
pub struct PathBuilder {
    target: String,
    seed_services: BTreeSet<String>,
    transitions: Vec<Transition>,
    level: AccessLevel,
    successes: u32,
    failures: u32,
    vulnerabilities: BTreeSet<String>,
    hint: HintOutcome,
    total_reward: f64,
}

impl PathBuilder {
    pub fn new(target: &str, seed_services: BTreeSet<String>, hint: Option<Hint>) -> Self {
        Self {
            target: target.to_string(),
            seed_services,
            transitions: Vec::new(),
            level: AccessLevel::None,
            successes: 0,
            failures: 0,
            vulnerabilities: BTreeSet::new(),
            hint: HintOutcome {
                hint,
                ..HintOutcome::default()
            },
            total_reward: 0.0,
        }
    }

    pub fn push(mut self, transition: Transition) -> Self {
        if transition.success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if transition.hint_followed {
            self.hint.times_followed += 1;
            self.hint.succeeded |= transition.success;
        }
        for item in &transition.discovered {
            if let Discovery::Vulnerability(id) = item {
                self.vulnerabilities.insert(id.clone());
            }
        }

        self.level = self.level.max(transition.access_level);
        self.total_reward += transition.reward;
        self.transitions.push(transition);
        self
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn finish(self, termination: TerminationReason) -> AttackPath {
        AttackPath {
            target: self.target,
            seed_services: self.seed_services,
            transitions: self.transitions,
            final_access_level: self.level,
            successes: self.successes,
            failures: self.failures,
            discovered_vulnerabilities: self.vulnerabilities,
            hint: self.hint,
            termination,
            total_reward: self.total_reward,
        }
    }
}
