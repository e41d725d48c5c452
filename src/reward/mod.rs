use crate::attack::AttackAction;
use crate::environment::{EnvironmentState, Resolution};
use crate::knowledge::Hint;
use serde::{Deserialize, Serialize};

pub const ESCALATION_REWARD: f64 = 10.0;
pub const SUCCESS_REWARD: f64 = 5.0;
pub const VULNERABILITY_REWARD: f64 = 3.0;
pub const FAILURE_PENALTY: f64 = -2.0;
pub const BLOCKED_PENALTY: f64 = -10.0;

/// Paid whenever the hinted action is taken, whatever the outcome
pub const HINT_TRUST_BONUS: f64 = 2.0;
/// Paid when the hinted action is taken and succeeds
pub const HINT_VALIDATION_BONUS: f64 = 100.0;
/// Charged when a hint was active, a different action was taken, and it failed
pub const HINT_IGNORED_PENALTY: f64 = -1.0;

/// Facts about a step the reward depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub success: bool,
    pub blocked: bool,
    pub escalated: bool,
    pub new_vulnerability: bool,
}

impl StepOutcome {
    pub fn from_resolution(prior: &EnvironmentState, resolution: &Resolution) -> Self {
        Self {
            success: resolution.success,
            blocked: resolution.blocked,
            escalated: resolution.escalated_from(prior.access_level),
            new_vulnerability: resolution.new_vulnerability(),
        }
    }
}

/// Individual reward terms for one step
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub escalation: f64,
    pub success: f64,
    pub vulnerability: f64,
    pub failure: f64,
    pub blocked: f64,
    pub hint_trust: f64,
    pub hint_validation: f64,
    pub hint_ignored: f64,
}

impl RewardBreakdown {
    pub fn compute(action: AttackAction, outcome: &StepOutcome, hint: Option<&Hint>) -> Self {
        let mut terms = Self::default();

        if outcome.escalated {
            terms.escalation = ESCALATION_REWARD;
        }
        if outcome.success {
            terms.success = SUCCESS_REWARD;
        }
        if outcome.new_vulnerability {
            terms.vulnerability = VULNERABILITY_REWARD;
        }
        if !outcome.success {
            if outcome.blocked {
                terms.blocked = BLOCKED_PENALTY;
            } else {
                terms.failure = FAILURE_PENALTY;
            }
        }

        if let Some(hint) = hint {
            if action == hint.suggested_action {
                terms.hint_trust = HINT_TRUST_BONUS;
                if outcome.success {
                    terms.hint_validation = HINT_VALIDATION_BONUS;
                }
            } else if !outcome.success {
                terms.hint_ignored = HINT_IGNORED_PENALTY;
            }
        }

        terms
    }

    /// Sum of the outcome terms without any hint terms
    pub fn base(&self) -> f64 {
        self.escalation + self.success + self.vulnerability + self.failure + self.blocked
    }

    pub fn hint_terms(&self) -> f64 {
        self.hint_trust + self.hint_validation + self.hint_ignored
    }

    pub fn total(&self) -> f64 {
        self.base() + self.hint_terms()
    }
}

/// Scalar reward for taking `action` from `prior` and landing in `resolution`.
///
/// The hint is passed separately from `prior` so callers can score a step
/// against a hint that is not (or no longer) attached to the state.
pub fn reward(
    prior: &EnvironmentState,
    action: AttackAction,
    resolution: &Resolution,
    hint: Option<&Hint>,
) -> f64 {
    let outcome = StepOutcome::from_resolution(prior, resolution);
    RewardBreakdown::compute(action, &outcome, hint).total()
}
