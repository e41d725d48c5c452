use crate::attack::AttackAction;
use crate::error::{Result, SimError};
use crate::path::AttackPath;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub type PathId = u64;

/// Persistence for finished attack paths
pub trait PathStore {
    fn save(&mut self, path: AttackPath) -> Result<PathId>;

    fn get(&self, id: PathId) -> Option<&AttackPath>;

    /// Highest final access level, ties going to the fewest iterations
    fn best_path(&self) -> Option<(PathId, &AttackPath)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn statistics(&self) -> PathStatistics;
}

/// Ordering for "best path so far": `Greater` means `a` is better
pub fn compare_paths(a: &AttackPath, b: &AttackPath) -> Ordering {
    a.final_access_level
        .cmp(&b.final_access_level)
        .then_with(|| b.iterations_to_final_level().cmp(&a.iterations_to_final_level()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionStats {
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
}

impl ActionStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// Aggregate view across every stored path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathStatistics {
    pub total_paths: usize,
    pub admin_paths: usize,
    pub total_transitions: usize,
    pub total_successes: usize,
    pub total_failures: usize,
    pub average_score: f64,
    pub max_score: f64,
    pub per_action: BTreeMap<AttackAction, ActionStats>,
}

impl PathStatistics {
    pub fn from_paths<'a>(paths: impl IntoIterator<Item = &'a AttackPath>) -> Self {
        let mut stats = Self::default();
        let mut score_sum = 0.0;

        for path in paths {
            stats.total_paths += 1;
            if path.reached_admin() {
                stats.admin_paths += 1;
            }
            stats.total_transitions += path.iterations();
            stats.total_successes += path.successes as usize;
            stats.total_failures += path.failures as usize;

            let score = path.score();
            score_sum += score;
            if stats.total_paths == 1 || score > stats.max_score {
                stats.max_score = score;
            }

            for t in &path.transitions {
                let entry = stats.per_action.entry(t.action).or_default();
                entry.attempts += 1;
                if t.success {
                    entry.successes += 1;
                } else {
                    entry.failures += 1;
                }
            }
        }

        if stats.total_paths > 0 {
            stats.average_score = score_sum / stats.total_paths as f64;
        }
        stats
    }
}

/// Process-local path store
#[derive(Debug, Clone, Default)]
pub struct InMemoryPathStore {
    paths: BTreeMap<PathId, AttackPath>,
    next_id: PathId,
}

impl InMemoryPathStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> impl Iterator<Item = (PathId, &AttackPath)> {
        self.paths.iter().map(|(id, path)| (*id, path))
    }

    /// Every stored path as pretty JSON, in save order
    pub fn export_json(&self) -> Result<String> {
        let paths: Vec<&AttackPath> = self.paths.values().collect();
        Ok(serde_json::to_string_pretty(&paths)?)
    }

    pub fn import_json(&mut self, json: &str) -> Result<usize> {
        let paths: Vec<AttackPath> = serde_json::from_str(json)?;
        let count = paths.len();
        for path in paths {
            self.save(path)?;
        }
        Ok(count)
    }
}

impl PathStore for InMemoryPathStore {
    fn save(&mut self, path: AttackPath) -> Result<PathId> {
        let id = self.next_id;
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| SimError::Storage("path id space exhausted".to_string()))?;

        tracing::debug!(
            "Stored path {} ({} steps, final level {})",
            id,
            path.iterations(),
            path.final_access_level
        );
        self.paths.insert(id, path);
        Ok(id)
    }

    fn get(&self, id: PathId) -> Option<&AttackPath> {
        self.paths.get(&id)
    }

    fn best_path(&self) -> Option<(PathId, &AttackPath)> {
        // earliest saved wins a full tie
        self.paths
            .iter()
            .fold(None, |best: Option<(PathId, &AttackPath)>, (id, path)| match best {
                Some((_, current)) if compare_paths(path, current) != Ordering::Greater => best,
                _ => Some((*id, path)),
            })
    }

    fn len(&self) -> usize {
        self.paths.len()
    }

    fn statistics(&self) -> PathStatistics {
        PathStatistics::from_paths(self.paths.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Decision;
    use crate::attack::AccessLevel;
    use crate::path::{PathBuilder, TerminationReason, Transition};
    use std::collections::BTreeSet;

    fn path(levels: &[AccessLevel]) -> AttackPath {
        let mut builder = PathBuilder::new("t", BTreeSet::new(), None);
        let mut previous = AccessLevel::None;
        for (i, level) in levels.iter().enumerate() {
            let success = *level > previous;
            builder = builder.push(Transition {
                iteration: i as u32 + 1,
                action: AttackAction::PublicAccessAttempt,
                decision: Decision::Exploit,
                success,
                blocked: false,
                access_level: *level,
                discovered: Vec::new(),
                reward: 0.0,
                hint_active: false,
                hint_followed: false,
            });
            previous = *level;
        }
        builder.finish(TerminationReason::BudgetExhausted)
    }

    #[test]
    fn test_best_path_prefers_level_then_speed() {
        use AccessLevel::{Admin, Internal, Public};
        let mut store = InMemoryPathStore::new();
        assert!(store.best_path().is_none());

        store.save(path(&[Public, Public])).unwrap();
        let slow_admin = store.save(path(&[Public, Internal, Internal, Admin])).unwrap();
        assert_eq!(store.best_path().unwrap().0, slow_admin);

        let fast_admin = store.save(path(&[Public, Internal, Admin])).unwrap();
        assert_eq!(store.best_path().unwrap().0, fast_admin);

        // same level and speed as the current best: first one stays
        store.save(path(&[Public, Internal, Admin, Admin])).unwrap();
        assert_eq!(store.best_path().unwrap().0, fast_admin);
    }

    #[test]
    fn test_statistics() {
        use AccessLevel::{Admin, Internal, Public};
        let mut store = InMemoryPathStore::new();
        store.save(path(&[Public, Public])).unwrap();
        store.save(path(&[Public, Internal, Admin])).unwrap();

        let stats = store.statistics();
        assert_eq!(stats.total_paths, 2);
        assert_eq!(stats.admin_paths, 1);
        assert_eq!(stats.total_transitions, 5);
        assert_eq!(stats.total_successes, 4);
        assert_eq!(stats.total_failures, 1);

        let public = stats.per_action[&AttackAction::PublicAccessAttempt];
        assert_eq!(public.attempts, 5);
        assert!((public.success_rate() - 0.8).abs() < 1e-12);
        // admin path: 100 * (1 + 1.0)
        assert_eq!(stats.max_score, 200.0);
    }

    #[test]
    fn test_export_import() {
        let mut store = InMemoryPathStore::new();
        store.save(path(&[AccessLevel::Public])).unwrap();
        let json = store.export_json().unwrap();

        let mut other = InMemoryPathStore::new();
        assert_eq!(other.import_json(&json).unwrap(), 1);
        assert_eq!(other.get(0), store.get(0));
        assert!(matches!(other.import_json("not json"), Err(SimError::Json(_))));
    }
}
