use crate::agent::{AgentStatistics, Decision, QLearningAgent, SharedValueTable};
use crate::analysis::TrainingMetrics;
use crate::attack::{AccessLevel, AttackAction};
use crate::config::SimulationConfig;
use crate::environment::{Environment, EnvironmentState};
use crate::error::Result;
use crate::knowledge::{Hint, KnowledgeBase};
use crate::path::{AttackPath, PathBuilder, TerminationReason, Transition};
use crate::reward;
use crate::storage::PathStore;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stream used for the agent's selection RNG; the environment keeps stream 0
const POLICY_STREAM: u64 = 1;

/// Requests that a running episode stop at the next step boundary.
///
/// A request made between episodes stops the next one before its first
/// step. A request that arrives once an episode has already ended on its
/// own is discarded when the [`Episode`] is next polled, which
/// [`Simulator::run_episode`] always does.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Consume a pending request
    fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }
}

/// Drives episodes: agent picks, environment resolves, reward scores,
/// agent learns
pub struct Simulator {
    config: SimulationConfig,
    environment: Environment,
    agent: QLearningAgent,
    policy_rng: ChaCha8Rng,
    state: EnvironmentState,
    cancel: CancelHandle,
}

impl Simulator {
    pub fn new(config: SimulationConfig, knowledge: Arc<KnowledgeBase>) -> Result<Self> {
        Self::with_table(config, knowledge, SharedValueTable::new())
    }

    /// Simulator learning into an existing, possibly shared, value table
    pub fn with_table(
        config: SimulationConfig,
        knowledge: Arc<KnowledgeBase>,
        table: SharedValueTable,
    ) -> Result<Self> {
        config.validate()?;

        let environment = Environment::new(config.environment.clone(), knowledge, config.seed);
        let agent = QLearningAgent::with_table(config.agent.clone(), table);
        let mut policy_rng = ChaCha8Rng::seed_from_u64(config.seed);
        policy_rng.set_stream(POLICY_STREAM);
        let state = EnvironmentState::new(&config.environment.target);

        Ok(Self {
            config,
            environment,
            agent,
            policy_rng,
            state,
            cancel: CancelHandle::default(),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn agent(&self) -> &QLearningAgent {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut QLearningAgent {
        &mut self.agent
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn statistics(&self) -> AgentStatistics {
        self.agent.statistics()
    }

    /// Start a fresh episode state. The value table is untouched.
    pub fn reset(&mut self, seed_services: &BTreeSet<String>) -> EnvironmentState {
        self.state = self.environment.reset(seed_services);
        self.state.clone()
    }

    pub fn get_current_state(&self) -> EnvironmentState {
        self.state.clone()
    }

    /// Re-query the knowledge base with the services discovered so far and
    /// make the result the active hint
    pub fn requery_hint(&mut self) -> Option<Hint> {
        self.state = self.environment.requery_hint(&self.state);
        self.state.hint.clone()
    }

    /// Let the agent pick an action for `state`, resolve it, learn from it,
    /// and make the outcome the current state
    pub fn choose_and_resolve_one_step(&mut self, state: &EnvironmentState) -> Transition {
        let (action, decision) = self.agent.decide(state, &mut self.policy_rng);
        self.apply(state, action, decision)
    }

    /// One manual step with a named action against the current state.
    /// An unknown name leaves the state untouched.
    pub fn apply_named_action(&mut self, name: &str) -> Result<Transition> {
        let action: AttackAction = name.parse()?;
        let state = self.state.clone();
        Ok(self.apply(&state, action, Decision::Manual))
    }

    fn apply(&mut self, state: &EnvironmentState, action: AttackAction, decision: Decision) -> Transition {
        let resolution = self.environment.resolve(state, action);
        let hint = state.hint.as_ref();
        let reward = reward::reward(state, action, &resolution, hint);
        self.agent.update(state, action, reward, &resolution.state);

        let transition = Transition {
            iteration: resolution.state.iteration,
            action,
            decision,
            success: resolution.success,
            blocked: resolution.blocked,
            access_level: resolution.state.access_level,
            discovered: resolution.discovered,
            reward,
            hint_active: hint.is_some(),
            hint_followed: hint.map_or(false, |h| h.suggested_action == action),
        };

        tracing::debug!(
            "[{}] {} ({:?}) -> success={} blocked={} level={} reward={:.1}",
            transition.iteration,
            action,
            decision,
            transition.success,
            transition.blocked,
            transition.access_level,
            reward
        );

        self.state = resolution.state;
        transition
    }

    /// Lazy step sequence for one episode, starting from the current state
    pub fn episode(&mut self, max_iterations: usize) -> Episode<'_> {
        Episode {
            simulator: self,
            remaining: max_iterations,
            termination: None,
        }
    }

    /// Reset, then fold steps into a path until admin, lockout, budget
    /// exhaustion or cancellation
    pub fn run_episode(&mut self, seed_services: &BTreeSet<String>, max_iterations: usize) -> AttackPath {
        let start = self.reset(seed_services);
        tracing::info!(
            "Episode start: target={} seeds={} budget={}",
            start.target,
            seed_services.len(),
            max_iterations
        );

        let builder = PathBuilder::new(&start.target, seed_services.clone(), start.hint);
        let mut episode = self.episode(max_iterations);
        let builder = episode.by_ref().fold(builder, PathBuilder::push);
        let termination = episode
            .termination()
            .unwrap_or(TerminationReason::BudgetExhausted);
        let path = builder.finish(termination);

        tracing::info!(
            "Episode end: {:?} after {} steps, level={} reward={:.1}",
            path.termination,
            path.iterations(),
            path.final_access_level,
            path.total_reward
        );
        path
    }
}

/// Produces one transition per `next()` until the episode ends.
///
/// Finite and not restartable: once it returns `None` it stays exhausted.
pub struct Episode<'a> {
    simulator: &'a mut Simulator,
    remaining: usize,
    termination: Option<TerminationReason>,
}

impl Episode<'_> {
    /// Why the episode ended, once it has
    pub fn termination(&self) -> Option<TerminationReason> {
        self.termination
    }

    fn discard_late_cancel(&self) {
        if self.simulator.cancel.take() {
            tracing::debug!("Dropping cancel request that arrived after the episode ended");
        }
    }
}

impl Iterator for Episode<'_> {
    type Item = Transition;

    fn next(&mut self) -> Option<Transition> {
        if self.termination.is_some() {
            self.discard_late_cancel();
            return None;
        }
        if self.remaining == 0 {
            self.termination = Some(TerminationReason::BudgetExhausted);
            self.discard_late_cancel();
            return None;
        }
        if self.simulator.cancel.take() {
            tracing::info!("Episode cancelled at step boundary");
            self.termination = Some(TerminationReason::Cancelled);
            return None;
        }

        let state = self.simulator.get_current_state();
        let transition = self.simulator.choose_and_resolve_one_step(&state);
        self.remaining -= 1;

        if transition.access_level == AccessLevel::Admin {
            self.termination = Some(TerminationReason::AdminReached);
        } else if transition.blocked {
            self.termination = Some(TerminationReason::TargetBlocked);
        }

        Some(transition)
    }
}

/// Episode-level training parameters
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub episodes: usize,
    pub convergence_window: usize,
    pub convergence_threshold: f64,
    pub stop_on_convergence: bool,
    /// Log a progress line every this many episodes
    pub log_every: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            episodes: 200,
            convergence_window: 50,
            convergence_threshold: 1.0,
            stop_on_convergence: true,
            log_every: 50,
        }
    }
}

/// Runs many episodes on one simulator, decaying exploration between them
pub struct Trainer {
    simulator: Simulator,
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(simulator: Simulator, config: TrainingConfig) -> Self {
        Self { simulator, config }
    }

    pub fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    pub fn into_simulator(self) -> Simulator {
        self.simulator
    }

    /// Train against `seed_services`, handing every finished path to `store`
    pub fn run(
        &mut self,
        seed_services: &BTreeSet<String>,
        store: &mut dyn PathStore,
    ) -> Result<TrainingMetrics> {
        let max_iterations = self.simulator.config.max_iterations;
        let mut metrics = TrainingMetrics::new();
        tracing::info!("Starting training with {} episodes", self.config.episodes);

        for episode in 0..self.config.episodes {
            let path = self.simulator.run_episode(seed_services, max_iterations);
            metrics.add_episode(&path, self.simulator.agent.epsilon());
            let cancelled = path.termination == TerminationReason::Cancelled;
            store.save(path)?;

            self.simulator.agent.decay_epsilon();

            if self.config.log_every > 0 && episode % self.config.log_every == 0 {
                tracing::info!(
                    "Episode {}: reward={:.2} admin rate={:.1}% epsilon={:.3}",
                    episode,
                    metrics.last_reward(),
                    metrics.admin_rate() * 100.0,
                    self.simulator.agent.epsilon()
                );
            }

            if cancelled {
                tracing::info!("Training cancelled at episode {}", episode);
                break;
            }

            if metrics.check_convergence(self.config.convergence_window, self.config.convergence_threshold)
                && self.config.stop_on_convergence
            {
                tracing::info!("Converged at episode {}", episode);
                break;
            }
        }

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryPathStore;

    fn simulator(config: SimulationConfig) -> Simulator {
        Simulator::new(config, Arc::new(KnowledgeBase::with_static_table())).unwrap()
    }

    fn seeds(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = SimulationConfig::default();
        config.agent.learning_rate = 2.0;
        assert!(Simulator::new(config, Arc::new(KnowledgeBase::with_static_table())).is_err());
    }

    #[test]
    fn test_episode_respects_budget() {
        let mut config = SimulationConfig::default();
        // nothing ever succeeds and the lockout is out of reach
        config.environment.lockout_threshold = 1000;
        for action in AttackAction::ALL {
            config.environment.success_overrides.insert(action, 0.0);
        }
        let mut sim = simulator(config);

        let path = sim.run_episode(&BTreeSet::new(), 12);
        assert_eq!(path.iterations(), 12);
        assert_eq!(path.termination, TerminationReason::BudgetExhausted);
        assert_eq!(path.final_access_level, AccessLevel::None);
        assert_eq!(path.failures, 12);

        let empty = sim.run_episode(&BTreeSet::new(), 0);
        assert!(empty.transitions.is_empty());
        assert_eq!(empty.termination, TerminationReason::BudgetExhausted);
    }

    #[test]
    fn test_stops_at_admin() {
        let mut config = SimulationConfig::default();
        // explore every step so the walk does not settle on a non-escalating action
        config.agent.epsilon = 1.0;
        for action in AttackAction::ALL {
            config.environment.success_overrides.insert(action, 1.0);
        }
        let mut sim = simulator(config);

        let path = sim.run_episode(&BTreeSet::new(), 100);
        assert_eq!(path.termination, TerminationReason::AdminReached);
        assert_eq!(path.final_access_level, AccessLevel::Admin);
        assert_eq!(path.transitions.last().unwrap().access_level, AccessLevel::Admin);
        assert!(path.iterations() < 100);
        assert!(path.is_monotonic());
    }

    #[test]
    fn test_stops_when_blocked() {
        let mut config = SimulationConfig::default();
        config.environment.lockout_threshold = 4;
        for action in AttackAction::ALL {
            config.environment.success_overrides.insert(action, 0.0);
        }
        let mut sim = simulator(config);

        let path = sim.run_episode(&BTreeSet::new(), 50);
        assert_eq!(path.termination, TerminationReason::TargetBlocked);
        assert_eq!(path.iterations(), 4);
        assert!(path.transitions.last().unwrap().blocked);
        assert!(sim.get_current_state().is_blocked());
    }

    #[test]
    fn test_cancel_before_first_step() {
        let mut sim = simulator(SimulationConfig::default());
        sim.cancel_handle().cancel();

        let path = sim.run_episode(&seeds(&["apache-2.4.49"]), 50);
        assert_eq!(path.termination, TerminationReason::Cancelled);
        assert!(path.transitions.is_empty());
        assert!(path.hint.hint.is_some());

        // the request was consumed
        assert!(!sim.cancel_handle().is_cancelled());
    }

    fn never_succeeds(config: &mut SimulationConfig) {
        config.environment.lockout_threshold = 1000;
        for action in AttackAction::ALL {
            config.environment.success_overrides.insert(action, 0.0);
        }
    }

    #[test]
    fn test_cancel_mid_episode_keeps_partial_path() {
        let mut config = SimulationConfig::default();
        never_succeeds(&mut config);
        let mut sim = simulator(config);
        let handle = sim.cancel_handle();

        let start = sim.reset(&seeds(&["apache-2.4.49"]));
        let builder = PathBuilder::new(&start.target, seeds(&["apache-2.4.49"]), start.hint);
        let mut episode = sim.episode(10);
        let builder = episode.by_ref().take(3).fold(builder, PathBuilder::push);

        handle.cancel();
        assert!(episode.next().is_none());
        let termination = episode.termination();
        assert_eq!(termination, Some(TerminationReason::Cancelled));

        let path = builder.finish(TerminationReason::Cancelled);
        assert_eq!(path.iterations(), 3);
        assert_eq!(path.failures, 3);
        assert_eq!(
            path.transitions.iter().map(|t| t.iteration).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(sim.get_current_state().iteration, 3);
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn test_cancel_after_last_budgeted_step() {
        let mut config = SimulationConfig::default();
        never_succeeds(&mut config);
        let mut sim = simulator(config);
        let handle = sim.cancel_handle();
        sim.reset(&BTreeSet::new());

        let mut episode = sim.episode(2);
        assert!(episode.next().is_some());
        assert!(episode.next().is_some());
        handle.cancel();
        assert!(episode.next().is_none());
        assert_eq!(episode.termination(), Some(TerminationReason::BudgetExhausted));
    }

    #[test]
    fn test_late_cancel_does_not_stop_next_episode() {
        let mut config = SimulationConfig::default();
        config.agent.epsilon = 1.0;
        for action in AttackAction::ALL {
            config.environment.success_overrides.insert(action, 1.0);
        }
        let mut sim = simulator(config);
        let handle = sim.cancel_handle();

        sim.reset(&BTreeSet::new());
        let mut episode = sim.episode(100);
        while episode.termination().is_none() {
            assert!(episode.next().is_some());
        }
        assert_eq!(episode.termination(), Some(TerminationReason::AdminReached));

        handle.cancel();
        assert!(episode.next().is_none());
        assert_eq!(episode.termination(), Some(TerminationReason::AdminReached));
        assert!(!handle.is_cancelled());

        let next = sim.run_episode(&BTreeSet::new(), 100);
        assert_eq!(next.termination, TerminationReason::AdminReached);
        assert!(!next.transitions.is_empty());
    }

    #[test]
    fn test_episode_iterator_is_not_restartable() {
        let mut sim = simulator(SimulationConfig::default());
        sim.reset(&BTreeSet::new());
        let mut episode = sim.episode(3);

        assert_eq!(episode.by_ref().count(), 3);
        assert!(episode.next().is_none());
        assert_eq!(episode.termination(), Some(TerminationReason::BudgetExhausted));
    }

    #[test]
    fn test_reset_keeps_learning() {
        let mut sim = simulator(SimulationConfig::default());
        sim.run_episode(&seeds(&["apache-2.4.49"]), 20);
        let learned = sim.agent().table().read().len();
        assert!(learned > 0);

        let state = sim.reset(&BTreeSet::new());
        assert_eq!(state.access_level, AccessLevel::None);
        assert_eq!(sim.get_current_state(), state);
        assert_eq!(sim.agent().table().read().len(), learned);
    }

    #[test]
    fn test_manual_step() {
        let mut config = SimulationConfig::default();
        config.environment.success_overrides.insert(AttackAction::PublicAccessAttempt, 1.0);
        let mut sim = simulator(config);
        sim.reset(&BTreeSet::new());

        let transition = sim.apply_named_action("public_access_attempt").unwrap();
        assert_eq!(transition.decision, Decision::Manual);
        assert!(transition.success);
        assert_eq!(sim.get_current_state().access_level, AccessLevel::Public);

        let before = sim.get_current_state();
        assert!(sim.apply_named_action("teleport-attempt").is_err());
        assert_eq!(sim.get_current_state(), before);
    }

    #[test]
    fn test_requery_hint() {
        let mut sim = simulator(SimulationConfig::default());
        sim.reset(&BTreeSet::new());
        assert!(sim.requery_hint().is_none());
    }

    #[test]
    fn test_trainer_decays_epsilon() {
        let mut config = SimulationConfig::default();
        config.max_iterations = 30;
        let mut trainer = Trainer::new(
            simulator(config),
            TrainingConfig {
                episodes: 10,
                stop_on_convergence: false,
                ..TrainingConfig::default()
            },
        );
        let mut store = InMemoryPathStore::new();

        let metrics = trainer.run(&seeds(&["apache-2.4.49"]), &mut store).unwrap();
        assert_eq!(metrics.episodes(), 10);
        assert_eq!(store.len(), 10);

        let expected = 0.1 * 0.995f64.powi(10);
        assert!((trainer.simulator().agent().epsilon() - expected).abs() < 1e-12);
    }
}
