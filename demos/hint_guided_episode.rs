use anyhow::Result;
use attack_path_learner::recon::{seed_services_from_scan, Banner, StaticScanner};
use attack_path_learner::{init_tracing, AccessLevel, KnowledgeBase, SimulationConfig, Simulator};
use colored::*;
use std::sync::Arc;

fn level_colored(level: AccessLevel) -> ColoredString {
    match level {
        AccessLevel::None => level.as_str().dimmed(),
        AccessLevel::Public => level.as_str().yellow(),
        AccessLevel::Internal => level.as_str().bright_yellow(),
        AccessLevel::Admin => level.as_str().bright_red().bold(),
    }
}

fn main() -> Result<()> {
    init_tracing("attack_path_learner=info");

    println!("{}", "🎯 Hint-Guided Attack Episode".bright_cyan().bold());
    println!("{}", "=".repeat(80));

    let config = SimulationConfig::default().with_env_overrides()?;
    let target = config.environment.target.clone();

    // Recon feeds the seed services the knowledge base is queried with
    let scanner = StaticScanner::new()
        .with_open_ports(&[22, 80, 3306])
        .with_banner("HTTP", Banner::new("Apache/2.4.49", "apache", "2.4.49"));
    let seeds = seed_services_from_scan(&scanner, &target);

    println!("\n📡 Recon:");
    for service in &seeds {
        println!("  • {}", service);
    }

    let knowledge = Arc::new(KnowledgeBase::with_static_table());
    let mut simulator = Simulator::new(config.clone(), knowledge)?;
    let path = simulator.run_episode(&seeds, config.max_iterations);

    println!("\n💡 Hint:");
    match &path.hint.hint {
        Some(hint) => {
            println!("  Service:    {}", hint.source_service);
            println!("  Action:     {}", hint.suggested_action.to_string().green());
            println!("  Confidence: {:.2}", hint.confidence);
            if let Some(cve) = &hint.cve {
                println!("  CVE:        {}", cve);
            }
            println!("  Followed:   {} times, succeeded: {}", path.hint.times_followed, path.hint.succeeded);
        }
        None => println!("  {}", "no hint for these services".dimmed()),
    }

    println!("\n🧭 Transitions:");
    for t in &path.transitions {
        let outcome = if t.success {
            "ok".green()
        } else if t.blocked {
            "blocked".red()
        } else {
            "fail".yellow()
        };
        let found: Vec<&str> = t.discovered.iter().map(|d| d.id()).collect();
        println!(
            "  {:>3}. {:<30} {:<8} {:<9} {:>7.1}  {}",
            t.iteration,
            t.action.as_str(),
            outcome,
            level_colored(t.access_level),
            t.reward,
            found.join(", ")
        );
    }

    println!("\n📊 Result:");
    println!("  Final level:     {}", level_colored(path.final_access_level));
    println!("  Termination:     {:?}", path.termination);
    println!("  Successes:       {}", path.successes);
    println!("  Failures:        {}", path.failures);
    println!("  Vulnerabilities: {:?}", path.discovered_vulnerabilities);
    println!("  Score:           {:.1}", path.score());

    println!("\n{}", "✅ Episode complete".green().bold());
    Ok(())
}
