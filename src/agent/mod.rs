use crate::attack::{AccessLevel, AttackAction};
use crate::config::AgentConfig;
use crate::environment::EnvironmentState;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Reduced, hashable projection of an environment state
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateSignature {
    pub access_level: AccessLevel,
    /// Sorted service fingerprints
    pub services: Vec<String>,
}

impl StateSignature {
    pub fn of(state: &EnvironmentState) -> Self {
        Self {
            access_level: state.access_level,
            // BTreeSet iteration is already sorted
            services: state.discovered_services.iter().cloned().collect(),
        }
    }
}

impl fmt::Display for StateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.access_level, self.services.join(","))
    }
}

/// Learned value per (state signature, action). Unseen pairs read as 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueTable {
    values: HashMap<StateSignature, HashMap<AttackAction, f64>>,
}

/// One persisted value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEntry {
    pub signature: StateSignature,
    pub action: AttackAction,
    pub value: f64,
}

/// Serializable form of a [`ValueTable`], entries in canonical order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueTableSnapshot {
    pub entries: Vec<ValueEntry>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, signature: &StateSignature, action: AttackAction) -> f64 {
        self.values
            .get(signature)
            .and_then(|row| row.get(&action))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn set(&mut self, signature: StateSignature, action: AttackAction, value: f64) {
        self.values.entry(signature).or_default().insert(action, value);
    }

    /// max over every action, unseen ones counting as 0
    pub fn max_value(&self, signature: &StateSignature) -> f64 {
        AttackAction::ALL
            .iter()
            .map(|a| self.get(signature, *a))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Highest-valued action; ties go to the earlier action in priority order
    pub fn best_action(&self, signature: &StateSignature) -> AttackAction {
        let mut best = AttackAction::ALL[0];
        let mut best_value = self.get(signature, best);

        for action in AttackAction::ALL.iter().skip(1) {
            let value = self.get(signature, *action);
            if value > best_value {
                best = *action;
                best_value = value;
            }
        }

        best
    }

    /// Number of stored (signature, action) entries
    pub fn len(&self) -> usize {
        self.values.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn signatures(&self) -> usize {
        self.values.len()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn snapshot(&self) -> ValueTableSnapshot {
        let mut entries: Vec<ValueEntry> = self
            .values
            .iter()
            .flat_map(|(signature, row)| {
                row.iter().map(move |(action, value)| ValueEntry {
                    signature: signature.clone(),
                    action: *action,
                    value: *value,
                })
            })
            .collect();
        entries.sort_by(|a, b| {
            a.signature
                .cmp(&b.signature)
                .then_with(|| a.action.cmp(&b.action))
        });

        ValueTableSnapshot { entries }
    }

    pub fn from_snapshot(snapshot: &ValueTableSnapshot) -> Self {
        let mut table = Self::new();
        for entry in &snapshot.entries {
            table.set(entry.signature.clone(), entry.action, entry.value);
        }
        table
    }
}

/// Value table shared between agents; every write takes the lock, so there
/// is a single writer at a time
#[derive(Debug, Clone, Default)]
pub struct SharedValueTable {
    inner: Arc<RwLock<ValueTable>>,
}

impl SharedValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_table(table: ValueTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(table)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ValueTable> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ValueTable> {
        self.inner.write()
    }

    pub fn snapshot(&self) -> ValueTableSnapshot {
        self.inner.read().snapshot()
    }

    /// Forget everything learned
    pub fn forget(&self) {
        self.inner.write().clear();
    }
}

/// Why an action was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    FollowedHint,
    Exploit,
    Explore,
    Manual,
}

/// Learning statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatistics {
    pub epsilon: f64,
    pub cumulative_reward: f64,
    pub updates: u64,
    pub table_entries: usize,
    pub state_signatures: usize,
}

/// Hint-aware epsilon-greedy Q-learning agent.
///
/// Holds no episode state. The value table is its only memory; the reward
/// counters are bookkeeping and never feed back into decisions.
#[derive(Debug, Clone)]
pub struct QLearningAgent {
    config: AgentConfig,
    table: SharedValueTable,
    cumulative_reward: f64,
    updates: u64,
}

impl QLearningAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self::with_table(config, SharedValueTable::new())
    }

    pub fn with_table(config: AgentConfig, table: SharedValueTable) -> Self {
        Self {
            config,
            table,
            cumulative_reward: 0.0,
            updates: 0,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn table(&self) -> &SharedValueTable {
        &self.table
    }

    pub fn epsilon(&self) -> f64 {
        self.config.epsilon
    }

    pub fn choose_action<R: Rng>(&self, state: &EnvironmentState, rng: &mut R) -> AttackAction {
        self.decide(state, rng).0
    }

    /// Select an action: follow the hint with fixed probability, otherwise
    /// epsilon-greedy over the value table
    pub fn decide<R: Rng>(
        &self,
        state: &EnvironmentState,
        rng: &mut R,
    ) -> (AttackAction, Decision) {
        if let Some(hint_action) = state.hint_action() {
            if rng.gen::<f64>() < self.config.hint_follow_probability {
                return (hint_action, Decision::FollowedHint);
            }
        }

        if rng.gen::<f64>() < self.config.epsilon {
            let idx = rng.gen_range(0..AttackAction::ALL.len());
            return (AttackAction::ALL[idx], Decision::Explore);
        }

        let signature = StateSignature::of(state);
        (self.table.read().best_action(&signature), Decision::Exploit)
    }

    /// TD(0) update: Q(s,a) += α (r + γ max_a' Q(s',a') − Q(s,a)).
    /// Returns the new value.
    pub fn update(
        &mut self,
        state: &EnvironmentState,
        action: AttackAction,
        reward: f64,
        new_state: &EnvironmentState,
    ) -> f64 {
        let signature = StateSignature::of(state);
        let next_signature = StateSignature::of(new_state);

        let mut table = self.table.write();
        let old = table.get(&signature, action);
        let target = reward + self.config.discount_factor * table.max_value(&next_signature);
        let new = old + self.config.learning_rate * (target - old);
        table.set(signature, action, new);

        self.cumulative_reward += reward;
        self.updates += 1;
        new
    }

    /// Softmax over learned values for `state`
    pub fn policy(&self, state: &EnvironmentState) -> Vec<(AttackAction, f64)> {
        let signature = StateSignature::of(state);
        let table = self.table.read();
        let values: Vec<f64> = AttackAction::ALL
            .iter()
            .map(|a| table.get(&signature, *a))
            .collect();

        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
        let sum: f64 = exp.iter().sum();

        AttackAction::ALL
            .iter()
            .zip(exp)
            .map(|(a, e)| (*a, e / sum))
            .collect()
    }

    /// Shrink exploration after an episode
    pub fn decay_epsilon(&mut self) {
        self.config.epsilon = (self.config.epsilon * self.config.epsilon_decay).max(self.config.min_epsilon);
    }

    pub fn statistics(&self) -> AgentStatistics {
        let table = self.table.read();
        AgentStatistics {
            epsilon: self.config.epsilon,
            cumulative_reward: self.cumulative_reward,
            updates: self.updates,
            table_entries: table.len(),
            state_signatures: table.signatures(),
        }
    }
}
