use anyhow::Result;
use attack_path_learner::{init_tracing, KnowledgeBase, SimError, SimulationConfig, Simulator};
use colored::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn main() -> Result<()> {
    init_tracing("attack_path_learner=debug");

    println!("{}", "🕹️  Manual Attack Session".bright_cyan().bold());
    println!("{}", "=".repeat(80));

    let knowledge = Arc::new(KnowledgeBase::with_static_table());
    let mut simulator = Simulator::new(SimulationConfig::default(), knowledge)?;

    let seeds: BTreeSet<String> = ["redis-6.0.9".to_string()].into_iter().collect();
    let state = simulator.reset(&seeds);
    if let Some(hint) = &state.hint {
        println!("\n💡 Intel suggests {} ({:.2})", hint.suggested_action, hint.confidence);
    }

    let script = [
        "public-access-attempt",
        "path_traversal_attempt",
        "teleport-attempt",
        "authentication-bypass-attempt",
        "command-injection-attempt",
        "privilege-escalation-attempt",
    ];

    println!();
    for name in script {
        match simulator.apply_named_action(name) {
            Ok(t) => println!(
                "  {:<32} {} level={} reward={:.1}",
                name,
                if t.success { "ok".green() } else { "fail".yellow() },
                t.access_level,
                t.reward
            ),
            Err(SimError::InvalidAction(bad)) => {
                println!("  {:<32} {}", name, format!("rejected: {}", bad).red())
            }
            Err(e) => return Err(e.into()),
        }
    }

    // let the agent take it from here
    let state = simulator.get_current_state();
    let t = simulator.choose_and_resolve_one_step(&state);
    println!(
        "\n🤖 Agent step: {} ({:?}) -> {}",
        t.action,
        t.decision,
        if t.success { "ok".green() } else { "fail".yellow() }
    );

    let state = simulator.get_current_state();
    println!("\n📊 State after {} steps:", state.iteration);
    println!("  Access level:    {}", state.access_level);
    println!("  Services:        {:?}", state.discovered_services);
    println!("  Vulnerabilities: {:?}", state.discovered_vulnerabilities);
    println!("  Components:      {:?}", state.visited_components.keys().collect::<Vec<_>>());

    if let Some(hint) = simulator.requery_hint() {
        println!("\n🔁 Re-queried intel now suggests {}", hint.suggested_action);
    }

    Ok(())
}
