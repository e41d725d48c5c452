use attack_path_learner::knowledge::{CachedIntel, FallbackIntel, StaticIntel, UnavailableIntel};
use attack_path_learner::recon::{Scanner, ScanReport};
use attack_path_learner::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn seeds(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn simulator(config: SimulationConfig) -> Simulator {
    Simulator::new(config, Arc::new(KnowledgeBase::with_static_table())).unwrap()
}

#[test]
fn test_end_to_end_hint_biased_episode() {
    let mut sim = simulator(SimulationConfig::default());
    let path = sim.run_episode(&seeds(&["apache-2.4.49"]), 50);

    let hint = path.hint.hint.as_ref().expect("apache should produce a hint");
    assert_eq!(hint.suggested_action, AttackAction::PathTraversalAttempt);
    assert_eq!(hint.confidence, 0.9);
    assert!(path.iterations() > 0 && path.iterations() <= 50);

    let hinted = path.action_fraction(AttackAction::PathTraversalAttempt);
    for action in AttackAction::ALL {
        if action != AttackAction::PathTraversalAttempt {
            assert!(
                hinted > path.action_fraction(action),
                "{} taken as often as the hinted action",
                action
            );
        }
    }
}

#[test]
fn test_determinism_byte_identical() {
    let run = || {
        let mut sim = simulator(SimulationConfig::default());
        let path = sim.run_episode(&seeds(&["apache-2.4.49", "mysql-5.7.33"]), 40);
        serde_json::to_vec(&path).unwrap()
    };

    assert_eq!(run(), run());
}

#[test]
fn test_different_seeds_diverge() {
    let run = |seed| {
        let config = SimulationConfig {
            seed,
            ..SimulationConfig::default()
        };
        let mut sim = simulator(config);
        serde_json::to_vec(&sim.run_episode(&seeds(&["apache-2.4.49"]), 40)).unwrap()
    };

    let baseline = run(1);
    assert!((2..6).any(|seed| run(seed) != baseline));
}

#[test]
fn test_reset_after_history() {
    let mut sim = simulator(SimulationConfig::default());
    for _ in 0..3 {
        sim.run_episode(&seeds(&["apache-2.4.49"]), 30);
    }

    sim.reset(&seeds(&["redis-6.0.9"]));
    let state = sim.get_current_state();
    assert_eq!(state.access_level, AccessLevel::None);
    assert!(state.discovered_services.is_empty());
    assert!(state.discovered_vulnerabilities.is_empty());
    assert!(state.visited_components.is_empty());
    assert!(state.blocked_sources.is_empty());
    assert_eq!(state.iteration, 0);
    assert_eq!(state.hint_action(), Some(AttackAction::CommandInjectionAttempt));
}

#[test]
fn test_access_never_decreases() {
    for seed in 0..10 {
        let config = SimulationConfig {
            seed,
            ..SimulationConfig::default()
        };
        let mut sim = simulator(config);
        let path = sim.run_episode(&seeds(&["apache-2.4.49"]), 60);
        assert!(path.is_monotonic(), "seed {} went backwards", seed);
    }
}

#[test]
fn test_blocked_target_consumes_no_draws() {
    let mut config = SimulationConfig::default();
    config.environment.lockout_threshold = 5;
    for action in AttackAction::ALL {
        config.environment.success_overrides.insert(action, 0.0);
    }
    let mut env = Environment::new(
        config.environment.clone(),
        Arc::new(KnowledgeBase::with_static_table()),
        config.seed,
    );

    let mut state = env.reset(&BTreeSet::new());
    for _ in 0..5 {
        state = env.resolve(&state, AttackAction::XssAttempt).state;
    }
    assert!(state.is_blocked());
    let draws = env.draws();

    // a certain success, if only the target would listen
    let mut lucky = EnvironmentConfig::default();
    lucky.success_overrides.insert(AttackAction::PublicAccessAttempt, 1.0);
    let mut env = Environment::new(lucky, Arc::new(KnowledgeBase::with_static_table()), 99);
    for _ in 0..10 {
        let outcome = env.resolve(&state, AttackAction::PublicAccessAttempt);
        assert!(outcome.blocked);
        assert!(!outcome.success);
        assert_eq!(outcome.state.access_level, AccessLevel::None);
    }
    assert_eq!(env.draws(), 0);
    assert_eq!(draws, 5);
}

#[test]
fn test_episode_ends_on_lockout() {
    let mut config = SimulationConfig::default();
    config.environment.lockout_threshold = 3;
    for action in AttackAction::ALL {
        config.environment.success_overrides.insert(action, 0.0);
    }
    let mut sim = simulator(config);

    let path = sim.run_episode(&seeds(&["apache-2.4.49"]), 50);
    assert_eq!(path.termination, TerminationReason::TargetBlocked);
    assert_eq!(path.failures, 3);
    assert!(!path.hint.succeeded);
}

#[test]
fn test_concurrent_episodes_share_one_table() {
    let table = SharedValueTable::new();
    let knowledge = Arc::new(KnowledgeBase::with_static_table());

    let paths: Vec<AttackPath> = std::thread::scope(|scope| {
        let handles: Vec<_> = ["web-01", "web-02", "db-01"]
            .iter()
            .enumerate()
            .map(|(i, target)| {
                let table = table.clone();
                let knowledge = Arc::clone(&knowledge);
                scope.spawn(move || {
                    let mut config = SimulationConfig::default();
                    config.seed = i as u64;
                    config.environment.target = target.to_string();
                    let mut sim = Simulator::with_table(config, knowledge, table).unwrap();
                    (0..5)
                        .map(|_| sim.run_episode(&seeds(&["apache-2.4.49"]), 30))
                        .last()
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(paths.len(), 3);
    for path in &paths {
        assert!(path.is_monotonic());
    }
    assert!(!table.read().is_empty());
}

#[test]
fn test_value_table_survives_snapshot() {
    let mut sim = simulator(SimulationConfig::default());
    sim.run_episode(&seeds(&["apache-2.4.49"]), 40);

    let json = serde_json::to_string(&sim.agent().table().snapshot()).unwrap();
    let snapshot: ValueTableSnapshot = serde_json::from_str(&json).unwrap();
    let restored = SharedValueTable::from_table(ValueTable::from_snapshot(&snapshot));
    assert_eq!(restored.read().len(), sim.agent().table().read().len());

    let sim = Simulator::with_table(
        SimulationConfig::default(),
        Arc::new(KnowledgeBase::with_static_table()),
        restored,
    )
    .unwrap();
    assert!(!sim.agent().table().read().is_empty());

    sim.agent().table().forget();
    assert!(sim.agent().table().read().is_empty());
}

#[test]
fn test_best_path_in_store() {
    let mut config = SimulationConfig::default();
    config.agent.epsilon = 1.0;
    let mut sim = simulator(config);
    let mut store = InMemoryPathStore::new();

    for _ in 0..8 {
        let path = sim.run_episode(&seeds(&["apache-2.4.49"]), 40);
        store.save(path).unwrap();
    }

    let (_, best) = store.best_path().unwrap();
    for (_, other) in store.paths() {
        assert!(other.final_access_level <= best.final_access_level);
        if other.final_access_level == best.final_access_level {
            assert!(other.iterations_to_final_level() >= best.iterations_to_final_level());
        }
    }
    assert_eq!(store.statistics().total_paths, 8);
}

struct DownScanner;

impl Scanner for DownScanner {
    fn scan(&self, target: &str) -> Result<ScanReport> {
        Err(SimError::ScanFailed {
            target: target.to_string(),
            reason: "host unreachable".to_string(),
        })
    }
}

#[test]
fn test_scanner_failure_still_runs_episode() {
    let seeds = seed_services_from_scan(&DownScanner, "10.0.0.9");
    assert!(seeds.is_empty());

    let mut sim = simulator(SimulationConfig::default());
    let path = sim.run_episode(&seeds, 20);
    assert!(path.hint.hint.is_none());
    assert!(path.transitions.iter().all(|t| !t.hint_active));
}

#[test]
fn test_unavailable_knowledge_degrades_to_no_hint() {
    let knowledge = Arc::new(KnowledgeBase::new(UnavailableIntel::new("exploit db offline")));
    let mut sim = Simulator::new(SimulationConfig::default(), knowledge).unwrap();

    let path = sim.run_episode(&seeds(&["apache-2.4.49"]), 20);
    assert!(path.hint.hint.is_none());
    assert_eq!(path.hint.times_followed, 0);
    assert!(path.iterations() > 0);
}

#[test]
fn test_fallback_and_cached_sources_are_transparent() {
    let fallback = KnowledgeBase::new(FallbackIntel::new(
        UnavailableIntel::new("offline"),
        StaticIntel::default(),
    ));
    let cached = KnowledgeBase::new(CachedIntel::new(StaticIntel::default()));
    let direct = KnowledgeBase::with_static_table();

    let services = seeds(&["apache-2.4.49", "mysql-5.7.33", "unknown-1.0"]);
    let expected = direct.get_best_hint(&services);
    assert!(expected.is_some());
    assert_eq!(fallback.get_best_hint(&services), expected);
    assert_eq!(cached.get_best_hint(&services), expected);
    assert_eq!(cached.get_best_hint(&services), expected);
}

#[test]
fn test_invalid_manual_action() {
    let mut sim = simulator(SimulationConfig::default());
    sim.reset(&BTreeSet::new());

    match sim.apply_named_action("drop-tables-attempt") {
        Err(SimError::InvalidAction(name)) => assert_eq!(name, "drop-tables-attempt"),
        other => panic!("expected InvalidAction, got {:?}", other),
    }
    assert_eq!(sim.get_current_state().iteration, 0);

    // the episode can carry on afterwards
    let t = sim.apply_named_action("authentication-bypass-attempt").unwrap();
    assert_eq!(t.action, AttackAction::AuthBypassAttempt);
    assert_eq!(t.iteration, 1);
}

#[test]
fn test_training_run_reports() {
    let mut config = SimulationConfig::default();
    config.max_iterations = 40;
    let mut trainer = Trainer::new(
        simulator(config),
        TrainingConfig {
            episodes: 30,
            stop_on_convergence: false,
            ..TrainingConfig::default()
        },
    );
    let mut store = InMemoryPathStore::new();

    let metrics = trainer.run(&seeds(&["apache-2.4.49"]), &mut store).unwrap();
    assert_eq!(metrics.episodes(), 30);
    assert_eq!(store.len(), 30);
    assert!(metrics.epsilons.windows(2).all(|w| w[1] <= w[0]));

    let report = Analyzer::new(metrics).generate_report();
    assert!(report.hint_follow_rate > 0.5);
    assert!(!report.display_table().is_empty());
    assert!(serde_json::to_string(&report).is_ok());
}
