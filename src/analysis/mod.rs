use crate::attack::{AccessLevel, AttackAction, EscalationGraph};
use crate::path::AttackPath;
use crate::storage::ActionStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tabled::{Table, Tabled};

/// Per-episode training history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub episode_rewards: Vec<f64>,
    pub iterations: Vec<usize>,
    pub final_levels: Vec<AccessLevel>,
    /// Steps to first reach admin, for episodes that did
    pub iterations_to_admin: Vec<Option<usize>>,
    pub hint_follow_rates: Vec<f64>,
    pub hint_successes: Vec<bool>,
    pub epsilons: Vec<f64>,
    pub action_stats: BTreeMap<AttackAction, ActionStats>,
    pub convergence_episode: Option<usize>,
}

impl TrainingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_episode(&mut self, path: &AttackPath, epsilon: f64) {
        self.episode_rewards.push(path.total_reward);
        self.iterations.push(path.iterations());
        self.final_levels.push(path.final_access_level);
        self.iterations_to_admin
            .push(path.reached_admin().then(|| path.iterations_to_final_level()));

        let follow_rate = if path.transitions.is_empty() {
            0.0
        } else {
            path.hint.times_followed as f64 / path.transitions.len() as f64
        };
        self.hint_follow_rates.push(follow_rate);
        self.hint_successes.push(path.hint.succeeded);
        self.epsilons.push(epsilon);

        for t in &path.transitions {
            let stats = self.action_stats.entry(t.action).or_default();
            stats.attempts += 1;
            if t.success {
                stats.successes += 1;
            } else {
                stats.failures += 1;
            }
        }
    }

    pub fn episodes(&self) -> usize {
        self.episode_rewards.len()
    }

    pub fn last_reward(&self) -> f64 {
        self.episode_rewards.last().copied().unwrap_or(0.0)
    }

    pub fn mean_reward(&self) -> f64 {
        mean(&self.episode_rewards).unwrap_or(0.0)
    }

    pub fn admin_rate(&self) -> f64 {
        if self.final_levels.is_empty() {
            return 0.0;
        }
        let admin = self
            .final_levels
            .iter()
            .filter(|l| **l == AccessLevel::Admin)
            .count();
        admin as f64 / self.final_levels.len() as f64
    }

    pub fn mean_iterations_to_admin(&self) -> Option<f64> {
        let reached: Vec<f64> = self
            .iterations_to_admin
            .iter()
            .flatten()
            .map(|n| *n as f64)
            .collect();
        mean(&reached)
    }

    /// Trailing mean of episode rewards
    pub fn moving_average(&self, window: usize) -> Vec<f64> {
        if window == 0 {
            return Vec::new();
        }
        self.episode_rewards
            .windows(window)
            .map(|w| w.iter().sum::<f64>() / window as f64)
            .collect()
    }

    /// Converged once the reward variance over the last `window` episodes
    /// falls below `threshold`. Sticky once reached.
    pub fn check_convergence(&mut self, window: usize, threshold: f64) -> bool {
        if self.convergence_episode.is_some() {
            return true;
        }

        if window == 0 || self.episode_rewards.len() < window {
            return false;
        }

        let recent = &self.episode_rewards[self.episode_rewards.len() - window..];
        let mean = recent.iter().sum::<f64>() / window as f64;
        let variance = recent.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / window as f64;

        if variance < threshold {
            self.convergence_episode = Some(self.episode_rewards.len());
            true
        } else {
            false
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceAnalysis {
    pub converged: bool,
    pub convergence_episode: Option<usize>,
    pub episodes: usize,
    pub final_reward: f64,
    pub mean_reward: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSummary {
    pub action: AttackAction,
    pub attempts: usize,
    pub success_rate: f64,
}

/// What the training run learned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningReport {
    pub convergence: ConvergenceAnalysis,
    pub admin_rate: f64,
    pub mean_iterations_to_admin: Option<f64>,
    /// Shortest possible route to admin over the mean route taken, in (0, 1]
    pub path_efficiency: Option<f64>,
    pub hint_follow_rate: f64,
    pub hint_success_rate: f64,
    /// Most attempted first
    pub actions: Vec<ActionSummary>,
    pub recommendations: Vec<String>,
}

/// Analyzer for training results
pub struct Analyzer {
    metrics: TrainingMetrics,
    graph: EscalationGraph,
}

impl Analyzer {
    pub fn new(metrics: TrainingMetrics) -> Self {
        Self {
            metrics,
            graph: EscalationGraph::new(),
        }
    }

    pub fn generate_report(&self) -> LearningReport {
        let mean_iterations_to_admin = self.metrics.mean_iterations_to_admin();
        let path_efficiency = match (
            self.graph.min_steps(AccessLevel::None, AccessLevel::Admin),
            mean_iterations_to_admin,
        ) {
            (Some(shortest), Some(taken)) if taken > 0.0 => Some((shortest as f64 / taken).min(1.0)),
            _ => None,
        };

        let mut report = LearningReport {
            convergence: self.analyze_convergence(),
            admin_rate: self.metrics.admin_rate(),
            mean_iterations_to_admin,
            path_efficiency,
            hint_follow_rate: mean(&self.metrics.hint_follow_rates).unwrap_or(0.0),
            hint_success_rate: {
                let hits = self.metrics.hint_successes.iter().filter(|s| **s).count();
                if self.metrics.hint_successes.is_empty() {
                    0.0
                } else {
                    hits as f64 / self.metrics.hint_successes.len() as f64
                }
            },
            actions: self.analyze_actions(),
            recommendations: Vec::new(),
        };
        report.recommendations = recommendations(&report);
        report
    }

    fn analyze_convergence(&self) -> ConvergenceAnalysis {
        ConvergenceAnalysis {
            converged: self.metrics.convergence_episode.is_some(),
            convergence_episode: self.metrics.convergence_episode,
            episodes: self.metrics.episodes(),
            final_reward: self.metrics.last_reward(),
            mean_reward: self.metrics.mean_reward(),
        }
    }

    fn analyze_actions(&self) -> Vec<ActionSummary> {
        let mut actions: Vec<ActionSummary> = self
            .metrics
            .action_stats
            .iter()
            .map(|(action, stats)| ActionSummary {
                action: *action,
                attempts: stats.attempts,
                success_rate: stats.success_rate(),
            })
            .collect();
        // stable sort keeps priority order among equal counts
        actions.sort_by(|a, b| b.attempts.cmp(&a.attempts));
        actions
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        let report = self.generate_report();

        println!("\n{}", "=".repeat(80));
        println!("ATTACK PATH LEARNING - TRAINING REPORT");
        println!("{}", "=".repeat(80));

        println!("\nCONVERGENCE");
        println!("{}", "-".repeat(80));
        println!("Episodes: {}", report.convergence.episodes);
        println!("Converged: {}", if report.convergence.converged { "yes" } else { "no" });
        if let Some(episode) = report.convergence.convergence_episode {
            println!("Convergence Episode: {}", episode);
        }
        println!("Final Episode Reward: {:.2}", report.convergence.final_reward);
        println!("Mean Episode Reward: {:.2}", report.convergence.mean_reward);

        println!("\nACTIONS");
        println!("{}", "-".repeat(80));
        for summary in &report.actions {
            println!(
                "  {:<30} {:>5} attempts, {:>5.1}% success",
                summary.action.as_str(),
                summary.attempts,
                summary.success_rate * 100.0
            );
        }

        println!("\nRECOMMENDATIONS");
        println!("{}", "-".repeat(80));
        for (i, rec) in report.recommendations.iter().enumerate() {
            println!("{}. {}", i + 1, rec);
        }

        println!("\n{}", report.display_table());
    }

    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.generate_report())
    }

    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }
}

fn recommendations(report: &LearningReport) -> Vec<String> {
    let mut recommendations = Vec::new();

    if report.convergence.episodes == 0 {
        recommendations.push("No episodes recorded. Run training before analysing.".to_string());
        return recommendations;
    }

    if report.admin_rate > 0.5 {
        recommendations.push(
            "HIGH PRIORITY: Admin reached in most episodes. Harden the escalation chain starting at the most used action.".to_string(),
        );
    } else if report.admin_rate == 0.0 {
        recommendations.push(
            "Admin was never reached. Raise the iteration budget or the lockout threshold.".to_string(),
        );
    }

    if report.hint_follow_rate > 0.0 && report.hint_success_rate > 0.5 {
        recommendations.push(
            "Exploit intelligence was validated by successful attempts. Patch the hinted service first.".to_string(),
        );
    }

    if let Some(efficiency) = report.path_efficiency {
        if efficiency < 0.25 {
            recommendations.push(
                "Learned routes to admin are far from the shortest. Consider more episodes or a higher learning rate.".to_string(),
            );
        }
    }

    if !report.convergence.converged {
        recommendations.push(
            "Training did not converge. Consider running more episodes or adjusting learning parameters.".to_string(),
        );
    }

    recommendations
}

#[derive(Tabled)]
pub struct MetricsRow {
    #[tabled(rename = "Metric")]
    pub name: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Status")]
    pub status: String,
}

fn optional(value: Option<f64>, fmt: impl Fn(f64) -> String) -> String {
    value.map(fmt).unwrap_or_else(|| "n/a".to_string())
}

impl LearningReport {
    /// Display as formatted table
    pub fn display_table(&self) -> String {
        let rows = vec![
            MetricsRow {
                name: "Episodes".to_string(),
                value: self.convergence.episodes.to_string(),
                status: if self.convergence.converged { "converged" } else { "running" }.to_string(),
            },
            MetricsRow {
                name: "Admin Rate".to_string(),
                value: format!("{:.1}%", self.admin_rate * 100.0),
                status: if self.admin_rate > 0.5 { "✗" } else if self.admin_rate > 0.1 { "⚠" } else { "✓" }
                    .to_string(),
            },
            MetricsRow {
                name: "Mean Steps To Admin".to_string(),
                value: optional(self.mean_iterations_to_admin, |v| format!("{:.1}", v)),
                status: String::new(),
            },
            MetricsRow {
                name: "Path Efficiency".to_string(),
                value: optional(self.path_efficiency, |v| format!("{:.2}", v)),
                status: String::new(),
            },
            MetricsRow {
                name: "Hint Follow Rate".to_string(),
                value: format!("{:.1}%", self.hint_follow_rate * 100.0),
                status: String::new(),
            },
            MetricsRow {
                name: "Hint Success Rate".to_string(),
                value: format!("{:.1}%", self.hint_success_rate * 100.0),
                status: String::new(),
            },
        ];

        Table::new(rows).to_string()
    }
}
