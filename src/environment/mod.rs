//! Mutable simulation state and the rules that move it.
//!
//! [`Environment`] is the only place outcome randomness is drawn. It never
//! mutates a state in place: `resolve` takes a snapshot and hands back the
//! successor.

use crate::attack::{AccessLevel, AttackAction, Discovery};
use crate::config::EnvironmentConfig;
use crate::knowledge::{Hint, KnowledgeBase};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Snapshot of the target as the attacker currently sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub target: String,
    pub access_level: AccessLevel,
    pub discovered_services: BTreeSet<String>,
    pub discovered_vulnerabilities: BTreeSet<String>,
    /// Component id -> level granted when it was reached
    pub visited_components: BTreeMap<String, AccessLevel>,
    pub blocked_sources: BTreeSet<String>,
    /// Consecutive failures per target since the last success
    pub failure_streaks: BTreeMap<String, u32>,
    pub iteration: u32,
    pub hint: Option<Hint>,
}

impl EnvironmentState {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            access_level: AccessLevel::None,
            discovered_services: BTreeSet::new(),
            discovered_vulnerabilities: BTreeSet::new(),
            visited_components: BTreeMap::new(),
            blocked_sources: BTreeSet::new(),
            failure_streaks: BTreeMap::new(),
            iteration: 0,
            hint: None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked_sources.contains(&self.target)
    }

    pub fn hint_action(&self) -> Option<AttackAction> {
        self.hint.as_ref().map(|h| h.suggested_action)
    }

    pub fn failure_streak(&self) -> u32 {
        self.failure_streaks.get(&self.target).copied().unwrap_or(0)
    }

    /// Highest level recorded among visited components
    pub fn highest_visited_level(&self) -> AccessLevel {
        self.visited_components
            .values()
            .copied()
            .max()
            .unwrap_or(AccessLevel::None)
    }

    /// Access level must agree with the components that granted it
    pub fn is_consistent(&self) -> bool {
        self.access_level == self.highest_visited_level()
    }
}

/// Outcome of resolving one action
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub success: bool,
    pub blocked: bool,
    pub state: EnvironmentState,
    /// Identifiers this step revealed for the first time
    pub discovered: Vec<Discovery>,
}

impl Resolution {
    pub fn escalated_from(&self, prior: AccessLevel) -> bool {
        self.state.access_level > prior
    }

    pub fn new_vulnerability(&self) -> bool {
        self.discovered
            .iter()
            .any(|d| matches!(d, Discovery::Vulnerability(_)))
    }
}

/// Static escalation rules plus the outcome RNG
pub struct Environment {
    config: EnvironmentConfig,
    knowledge: Arc<KnowledgeBase>,
    rng: ChaCha8Rng,
    draws: u64,
}

impl Environment {
    pub fn new(config: EnvironmentConfig, knowledge: Arc<KnowledgeBase>, seed: u64) -> Self {
        Self {
            config,
            knowledge,
            rng: ChaCha8Rng::seed_from_u64(seed),
            draws: 0,
        }
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Random draws consumed so far
    pub fn draws(&self) -> u64 {
        self.draws
    }

    /// Fresh state for a new episode. Consults the knowledge base once with
    /// `seed_services`; the seed services themselves are not marked as
    /// discovered.
    pub fn reset(&self, seed_services: &BTreeSet<String>) -> EnvironmentState {
        let mut state = EnvironmentState::new(&self.config.target);
        state.hint = self.knowledge.get_best_hint(seed_services);

        match &state.hint {
            Some(hint) => tracing::info!(
                "Hint for {}: {} (confidence {:.2}, {})",
                hint.source_service,
                hint.suggested_action,
                hint.confidence,
                hint.cve.as_deref().unwrap_or("no CVE")
            ),
            None => tracing::debug!("No hint for {:?}", seed_services),
        }

        state
    }

    /// Explicitly re-query the knowledge base with everything discovered so
    /// far. Never called implicitly by the step loop.
    pub fn requery_hint(&self, state: &EnvironmentState) -> EnvironmentState {
        let mut next = state.clone();
        next.hint = self.knowledge.get_best_hint(&state.discovered_services);
        next
    }

    /// Success probability of `action` in `state`, hint bonus included
    pub fn success_probability(&self, state: &EnvironmentState, action: AttackAction) -> f64 {
        let base = self
            .config
            .success_overrides
            .get(&action)
            .copied()
            .unwrap_or_else(|| action.base_success_probability());

        if self.config.success_overrides.contains_key(&action) {
            return base;
        }

        let bonus = if state.hint_action() == Some(action) {
            self.config.hint_probability_bonus
        } else {
            0.0
        };
        (base + bonus).min(self.config.max_success_probability)
    }

    fn draw(&mut self) -> f64 {
        self.draws += 1;
        self.rng.gen::<f64>()
    }

    /// Resolve one action against `state`
    pub fn resolve(&mut self, state: &EnvironmentState, action: AttackAction) -> Resolution {
        let mut next = state.clone();
        next.iteration += 1;

        if state.is_blocked() {
            return Resolution {
                success: false,
                blocked: true,
                state: next,
                discovered: Vec::new(),
            };
        }

        let probability = self.success_probability(state, action);
        let success = self.draw() < probability;

        if !success {
            let streak = next.failure_streaks.entry(next.target.clone()).or_insert(0);
            *streak += 1;
            let blocked = *streak >= self.config.lockout_threshold;
            if blocked {
                tracing::info!(
                    "{} locked out after {} consecutive failures",
                    next.target,
                    self.config.lockout_threshold
                );
                next.blocked_sources.insert(next.target.clone());
            }

            return Resolution {
                success: false,
                blocked,
                state: next,
                discovered: Vec::new(),
            };
        }

        next.failure_streaks.remove(&next.target);
        let mut discovered = Vec::new();
        let prior_level = state.access_level;

        if let Some(edge) = action.escalation_from(prior_level) {
            let taken = edge.chance >= 1.0 || self.draw() < edge.chance;
            if taken {
                next.access_level = next.access_level.max(edge.to);
                if !next.visited_components.contains_key(edge.component) {
                    discovered.push(Discovery::Component(edge.component.to_string()));
                }
                let granted = next
                    .visited_components
                    .entry(edge.component.to_string())
                    .or_insert(edge.to);
                *granted = (*granted).max(edge.to);
            }
        }

        if let Some(item) = action.discovery_at(prior_level) {
            let new = match &item {
                Discovery::Service(id) => next.discovered_services.insert(id.clone()),
                Discovery::Vulnerability(id) => next.discovered_vulnerabilities.insert(id.clone()),
                Discovery::Component(id) => !next.visited_components.contains_key(id),
            };
            if new {
                discovered.push(item);
            }
        }

        debug_assert!(next.is_consistent());

        Resolution {
            success: true,
            blocked: false,
            state: next,
            discovered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn environment(config: EnvironmentConfig) -> Environment {
        Environment::new(config, Arc::new(KnowledgeBase::with_static_table()), 7)
    }

    fn seeds(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reset_is_clean() {
        let env = environment(EnvironmentConfig::default());
        let state = env.reset(&seeds(&["apache-2.4.49"]));

        assert_eq!(state.access_level, AccessLevel::None);
        assert!(state.discovered_services.is_empty());
        assert!(state.discovered_vulnerabilities.is_empty());
        assert!(state.visited_components.is_empty());
        assert_eq!(state.iteration, 0);
        assert_eq!(state.hint_action(), Some(AttackAction::PathTraversalAttempt));
    }

    #[test]
    fn test_reset_idempotent() {
        let env = environment(EnvironmentConfig::default());
        let a = env.reset(&seeds(&["mysql-5.7.33", "apache-2.4.49"]));
        let b = env.reset(&seeds(&["mysql-5.7.33", "apache-2.4.49"]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_hint_bonus() {
        let env = environment(EnvironmentConfig::default());
        let state = env.reset(&seeds(&["apache-2.4.49"]));

        let hinted = env.success_probability(&state, AttackAction::PathTraversalAttempt);
        let plain = env.success_probability(&state, AttackAction::XssAttempt);
        assert!((hinted - 0.35).abs() < 1e-12);
        assert!((plain - 0.30).abs() < 1e-12);
    }

    #[test]
    fn test_successful_escalation() {
        let mut config = EnvironmentConfig::default();
        config.success_overrides.insert(AttackAction::PathTraversalAttempt, 1.0);
        let mut env = environment(config);
        let state = env.reset(&BTreeSet::new());

        let first = env.resolve(&state, AttackAction::PathTraversalAttempt);
        assert!(first.success);
        assert_eq!(first.state.access_level, AccessLevel::Public);
        assert_eq!(
            first.discovered,
            vec![
                Discovery::Component("static-files".to_string()),
                Discovery::Vulnerability("path-traversal".to_string()),
            ]
        );

        let second = env.resolve(&first.state, AttackAction::PathTraversalAttempt);
        assert_eq!(second.state.access_level, AccessLevel::Internal);
        // vulnerability already known
        assert_eq!(
            second.discovered,
            vec![Discovery::Component("config-store".to_string())]
        );
        assert!(second.state.is_consistent());
        assert_eq!(second.state.iteration, 2);
    }

    #[test]
    fn test_no_edge_means_no_escalation() {
        let mut config = EnvironmentConfig::default();
        config.success_overrides.insert(AttackAction::PrivilegeEscalationAttempt, 1.0);
        let mut env = environment(config);
        let state = env.reset(&BTreeSet::new());

        let outcome = env.resolve(&state, AttackAction::PrivilegeEscalationAttempt);
        assert!(outcome.success);
        assert_eq!(outcome.state.access_level, AccessLevel::None);
        assert!(outcome.discovered.is_empty());
    }

    #[test]
    fn test_lockout_short_circuits() {
        let mut config = EnvironmentConfig::default();
        config.lockout_threshold = 3;
        config.success_overrides.insert(AttackAction::PrivilegeEscalationAttempt, 0.0);
        config.success_overrides.insert(AttackAction::PublicAccessAttempt, 1.0);
        let mut env = environment(config);
        let mut state = env.reset(&BTreeSet::new());

        for attempt in 1..=3 {
            let outcome = env.resolve(&state, AttackAction::PrivilegeEscalationAttempt);
            assert!(!outcome.success);
            assert_eq!(outcome.blocked, attempt == 3);
            state = outcome.state;
        }
        assert!(state.is_blocked());
        assert_eq!(env.draws(), 3);

        // would succeed with certainty if a draw were taken
        let outcome = env.resolve(&state, AttackAction::PublicAccessAttempt);
        assert!(outcome.blocked);
        assert!(!outcome.success);
        assert_eq!(env.draws(), 3);
        assert_eq!(outcome.state.access_level, AccessLevel::None);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let mut config = EnvironmentConfig::default();
        config.lockout_threshold = 2;
        config.success_overrides.insert(AttackAction::XssAttempt, 0.0);
        config.success_overrides.insert(AttackAction::PublicAccessAttempt, 1.0);
        let mut env = environment(config);
        let state = env.reset(&BTreeSet::new());

        let failed = env.resolve(&state, AttackAction::XssAttempt);
        assert_eq!(failed.state.failure_streak(), 1);
        let ok = env.resolve(&failed.state, AttackAction::PublicAccessAttempt);
        assert_eq!(ok.state.failure_streak(), 0);
        let failed_again = env.resolve(&ok.state, AttackAction::XssAttempt);
        assert!(!failed_again.blocked);
    }

    #[test]
    fn test_requery_hint_uses_discoveries() {
        let env = environment(EnvironmentConfig::default());
        let mut state = env.reset(&BTreeSet::new());
        assert!(state.hint.is_none());

        state.discovered_services.insert("redis-6.0.9".to_string());
        let requeried = env.requery_hint(&state);
        assert_eq!(
            requeried.hint_action(),
            Some(AttackAction::CommandInjectionAttempt)
        );
    }
}
