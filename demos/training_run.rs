use anyhow::Result;
use attack_path_learner::analysis::Analyzer;
use attack_path_learner::{
    init_tracing, EnvironmentState, InMemoryPathStore, KnowledgeBase, PathStore,
    SimulationConfig, Simulator, Trainer, TrainingConfig,
};
use colored::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn main() -> Result<()> {
    init_tracing("attack_path_learner=info");

    println!("{}", "🤖 Attack Path Learning - Training Run".bright_cyan().bold());
    println!("{}", "=".repeat(80));

    let mut config = SimulationConfig::default().with_env_overrides()?;
    config.max_iterations = 60;

    println!("\n🧠 Agent Configuration:");
    println!("  Learning Rate:   {}", config.agent.learning_rate);
    println!("  Discount Factor: {}", config.agent.discount_factor);
    println!("  Epsilon:         {}", config.agent.epsilon);
    println!("  Hint Follow:     {}", config.agent.hint_follow_probability);
    println!("  Seed:            {}", config.seed);

    let seeds: BTreeSet<String> = ["apache-2.4.49", "mysql-5.7.33"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let knowledge = Arc::new(KnowledgeBase::with_static_table());
    let simulator = Simulator::new(config, knowledge)?;
    let mut trainer = Trainer::new(
        simulator,
        TrainingConfig {
            episodes: 300,
            ..TrainingConfig::default()
        },
    );
    let mut store = InMemoryPathStore::new();

    println!("\n🏋️  Training...\n");
    let metrics = trainer.run(&seeds, &mut store)?;

    let averages = metrics.moving_average(25);
    for (i, avg) in averages.iter().enumerate().step_by(25) {
        println!("  Episodes {:>3}-{:>3}: mean reward {:>8.2}", i, i + 25, avg);
    }

    let stats = trainer.simulator().statistics();
    println!("\n📈 Agent:");
    println!("  Epsilon:          {:.4}", stats.epsilon);
    println!("  Updates:          {}", stats.updates);
    println!("  Cumulative reward {:.1}", stats.cumulative_reward);
    println!("  Table entries:    {}", stats.table_entries);
    println!("  State signatures: {}", stats.state_signatures);

    // what the learned values prefer at the start of an episode
    let start = EnvironmentState::new(&trainer.simulator().config().environment.target);
    let mut policy = trainer.simulator().agent().policy(&start);
    policy.sort_by(|a, b| b.1.total_cmp(&a.1));
    println!("\n🎯 Learned preference at access level none:");
    for (action, p) in policy.iter().take(3) {
        println!("  • {:<30} {:.1}%", action.as_str(), p * 100.0);
    }

    let store_stats = store.statistics();
    println!("\n🗂  Stored Paths:");
    println!("  Paths:         {}", store_stats.total_paths);
    println!("  Admin Paths:   {}", store_stats.admin_paths);
    println!("  Average Score: {:.1}", store_stats.average_score);
    println!("  Max Score:     {:.1}", store_stats.max_score);
    if let Some((id, best)) = store.best_path() {
        println!(
            "  Best:          #{} reached {} in {} steps",
            id,
            best.final_access_level,
            best.iterations_to_final_level()
        );
    }

    let analyzer = Analyzer::new(metrics);
    analyzer.print_summary();

    println!("\n{}", "✅ Training complete".green().bold());
    Ok(())
}
