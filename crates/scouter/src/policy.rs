//! Per-target escalation state machine and retry backoff.
//!
//! ```text
//! NotStarted ─► LightAttempt(1) ─► … ─► LightAttempt(max_light)
//!                    │                        │ (error / degraded)
//!                    │ usable                 ▼
//!                    ▼                  RenderAttempt(1) ─► … ─► RenderAttempt(max_render)
//!                Succeeded ◄──────────────────┘ usable               │
//!                                                                    ▼
//!                                                                Exhausted
//! ```
//!
//! A normalization error moves any attempt state to `Failed`. Strategy
//! only ever moves from lightweight to render.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::catalog::TargetHints;
use crate::document::Strategy;

/// Attempt budgets per strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryBudget {
    pub max_light_attempts: u32,
    pub max_render_attempts: u32,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_light_attempts: 2,
            max_render_attempts: 2,
        }
    }
}

impl RetryBudget {
    /// Worst-case number of fetches for one target.
    pub fn total(&self) -> u32 {
        self.max_light_attempts + self.max_render_attempts
    }
}

/// Exponential backoff with additive jitter between same-strategy retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 8_000,
            jitter_ms: 250,
        }
    }
}

impl BackoffConfig {
    /// Deterministic part of the delay before retry number `retry` (1-based).
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(32);
        let ms = self.base_ms.saturating_mul(1u64 << exp).min(self.max_ms);
        Duration::from_millis(ms)
    }

    /// Full delay including a random jitter in `[0, jitter_ms]`.
    pub fn delay(&self, retry: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        self.base_delay(retry) + Duration::from_millis(jitter)
    }
}

/// Where a target's attempt sequence currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "attempt", rename_all = "snake_case")]
pub enum EscalationState {
    NotStarted,
    LightAttempt(u32),
    RenderAttempt(u32),
    Succeeded,
    Exhausted,
    /// The document was usable but could not be normalized.
    Failed,
}

impl EscalationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EscalationState::Succeeded | EscalationState::Exhausted | EscalationState::Failed
        )
    }

    /// Strategy of the attempt this state stands for, if any.
    pub fn strategy(&self) -> Option<Strategy> {
        match self {
            EscalationState::LightAttempt(_) => Some(Strategy::Lightweight),
            EscalationState::RenderAttempt(_) => Some(Strategy::Render),
            _ => None,
        }
    }
}

/// How an attempt ended, as far as the policy is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    Usable,
    /// Fetch error or degraded verdict.
    Unusable,
    /// Usable document that failed normalization.
    Rejected,
}

/// What the caller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Retry the same strategy after backing off; `retry` is 1-based.
    Retry { next: EscalationState, retry: u32 },
    /// Move to the render strategy immediately.
    Escalate { next: EscalationState },
    /// The sequence is over.
    Terminal(EscalationState),
}

impl Transition {
    pub fn state(&self) -> EscalationState {
        match *self {
            Transition::Retry { next, .. } | Transition::Escalate { next } => next,
            Transition::Terminal(state) => state,
        }
    }
}

/// One target's escalation state machine. Created per target and dropped
/// once terminal; nothing is shared between targets.
#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    budget: RetryBudget,
    hints: TargetHints,
    state: EscalationState,
    attempts: u32,
}

impl EscalationPolicy {
    pub fn new(budget: RetryBudget, hints: TargetHints) -> Self {
        Self {
            budget,
            hints,
            state: EscalationState::NotStarted,
            attempts: 0,
        }
    }

    pub fn state(&self) -> EscalationState {
        self.state
    }

    /// Total attempts started so far, across both strategies.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Leave `NotStarted`. Returns the first attempt state, or `Exhausted`
    /// for an empty budget.
    pub fn start(&mut self) -> EscalationState {
        debug_assert_eq!(self.state, EscalationState::NotStarted);
        let can_render = self.budget.max_render_attempts > 0;
        let can_light = self.budget.max_light_attempts > 0;
        // A dynamic hint only skips the light strategy when rendering is budgeted.
        let skip_light = !can_light || (self.hints.known_dynamic && can_render);
        self.state = if !skip_light {
            EscalationState::LightAttempt(1)
        } else if can_render {
            EscalationState::RenderAttempt(1)
        } else {
            EscalationState::Exhausted
        };
        if !self.state.is_terminal() {
            self.attempts = 1;
        }
        self.state
    }

    /// Feed the result of the current attempt and move to the next state.
    pub fn advance(&mut self, result: AttemptResult) -> Transition {
        let transition = match (self.state, result) {
            (
                EscalationState::LightAttempt(_) | EscalationState::RenderAttempt(_),
                AttemptResult::Usable,
            ) => Transition::Terminal(EscalationState::Succeeded),
            (
                EscalationState::LightAttempt(_) | EscalationState::RenderAttempt(_),
                AttemptResult::Rejected,
            ) => Transition::Terminal(EscalationState::Failed),
            (EscalationState::LightAttempt(n), AttemptResult::Unusable) => {
                if n < self.budget.max_light_attempts {
                    Transition::Retry {
                        next: EscalationState::LightAttempt(n + 1),
                        retry: n,
                    }
                } else if self.budget.max_render_attempts > 0 {
                    Transition::Escalate {
                        next: EscalationState::RenderAttempt(1),
                    }
                } else {
                    Transition::Terminal(EscalationState::Exhausted)
                }
            }
            (EscalationState::RenderAttempt(m), AttemptResult::Unusable) => {
                if m < self.budget.max_render_attempts {
                    Transition::Retry {
                        next: EscalationState::RenderAttempt(m + 1),
                        retry: m,
                    }
                } else {
                    Transition::Terminal(EscalationState::Exhausted)
                }
            }
            // Not started or already terminal: nothing to advance.
            (state, _) => Transition::Terminal(state),
        };

        let next = transition.state();
        if !next.is_terminal() {
            self.attempts += 1;
        }
        self.state = next;
        transition
    }
}
