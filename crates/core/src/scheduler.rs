use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{AttemptResult, Outcome};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum SchedulerError {
    #[error("response latency must be non-negative and finite, got {provided}")]
    InvalidLatency { provided: f64 },
    #[error("prior easiness must be positive and finite, got {provided}")]
    InvalidEasiness { provided: f64 },
    #[error("invalid schedule policy: {0}")]
    InvalidPolicy(&'static str),
}

//
// ─── POLICY ────────────────────────────────────────────────────────────────────
//

/// Tunables of the SM-2 style calculator.
///
/// # Ease sample
///
/// With `speed = latency_scale / (latency_scale + latency)` in `(0, 1]`:
///
/// * correct: `ease = 0.5 + 0.5 * speed`, in `(0.5, 1]` (faster is larger)
/// * incorrect: `ease = -(1 - 0.5 * speed)`, in `[-1, -0.5)` (slower is larger in magnitude)
///
/// # Easiness update
///
/// * `ease >= 0`: `EF' = EF + ease * gain * max(plateau - EF, 0)`, which
///   approaches `plateau` under repeated correct answers and never overshoots it
/// * `ease < 0`: `EF' = EF + ease * penalty`
///
/// The result is clamped below by `easiness_floor`.
///
/// # Interval
///
/// Win streak 1 and 2 map to `first_interval_days` and `second_interval_days`;
/// streak `n > 2` maps to `second_interval_days * EF^(n - 2)`, rounded and
/// capped at `max_interval_days`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulePolicy {
    pub easiness_floor: f64,
    pub default_easiness: f64,
    pub easiness_plateau: f64,
    pub gain: f64,
    pub penalty: f64,
    pub latency_scale_secs: f64,
    pub first_interval_days: u32,
    pub second_interval_days: u32,
    pub max_interval_days: u32,
    pub retry_after_secs: i64,
}

/// Longest retry window a policy may ask for. Misses come back the same day.
const RETRY_CEILING_SECS: i64 = 86_400;

/// Upper bound on `max_interval_days`, well inside the timestamp range.
const INTERVAL_CEILING_DAYS: u32 = 365_250;

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            easiness_floor: 1.3,
            default_easiness: 2.5,
            easiness_plateau: 3.0,
            gain: 0.2,
            penalty: 0.3,
            latency_scale_secs: 30.0,
            first_interval_days: 1,
            second_interval_days: 6,
            max_interval_days: 36_500,
            retry_after_secs: 3_600,
        }
    }
}

impl SchedulePolicy {
    fn validate(&self) -> Result<(), SchedulerError> {
        let finite = [
            self.easiness_floor,
            self.default_easiness,
            self.easiness_plateau,
            self.gain,
            self.penalty,
            self.latency_scale_secs,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(SchedulerError::InvalidPolicy("values must be finite"));
        }
        if self.easiness_floor <= 0.0 {
            return Err(SchedulerError::InvalidPolicy("easiness floor must be positive"));
        }
        if self.default_easiness < self.easiness_floor
            || self.easiness_plateau < self.default_easiness
        {
            return Err(SchedulerError::InvalidPolicy(
                "expected floor <= default easiness <= plateau",
            ));
        }
        if !(self.gain > 0.0 && self.gain <= 1.0) || self.penalty < 0.0 {
            return Err(SchedulerError::InvalidPolicy(
                "gain must be in (0, 1] and penalty non-negative",
            ));
        }
        if self.latency_scale_secs <= 0.0 {
            return Err(SchedulerError::InvalidPolicy("latency scale must be positive"));
        }
        if self.first_interval_days == 0
            || self.second_interval_days < self.first_interval_days
            || self.max_interval_days < self.second_interval_days
        {
            return Err(SchedulerError::InvalidPolicy(
                "expected 1 <= first <= second <= max interval",
            ));
        }
        if self.max_interval_days > INTERVAL_CEILING_DAYS {
            return Err(SchedulerError::InvalidPolicy("max interval exceeds 1000 years"));
        }
        if !(1..=RETRY_CEILING_SECS).contains(&self.retry_after_secs) {
            return Err(SchedulerError::InvalidPolicy(
                "retry window must be between one second and one day",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn retry_after(&self) -> Duration {
        Duration::seconds(self.retry_after_secs)
    }
}

//
// ─── INPUTS ────────────────────────────────────────────────────────────────────
//

/// Easiness and streaks inherited from the previous graded attempt of a pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarryForward {
    pub easiness: f64,
    pub win_streak: u32,
    pub loss_streak: u32,
}

impl CarryForward {
    /// Starting point for a pair with no graded history.
    #[must_use]
    pub fn initial(policy: &SchedulePolicy) -> Self {
        Self {
            easiness: policy.default_easiness,
            win_streak: 0,
            loss_streak: 0,
        }
    }

    #[must_use]
    pub fn from_result(result: &AttemptResult) -> Self {
        Self {
            easiness: result.easiness,
            win_streak: result.win_streak,
            loss_streak: result.loss_streak,
        }
    }
}

/// A learner's response to grade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grading {
    pub outcome: Outcome,
    pub latency_secs: f64,
}

impl Grading {
    #[must_use]
    pub fn new(outcome: Outcome, latency_secs: f64) -> Self {
        Self {
            outcome,
            latency_secs,
        }
    }
}

//
// ─── SCHEDULER ─────────────────────────────────────────────────────────────────
//

/// Easiness/interval calculator.
///
/// Pure: the same carry-forward, grading and timestamp always yield the same
/// result.
///
/// # Examples
///
/// ```
/// # use quiz_core::scheduler::{CarryForward, Grading, Scheduler};
/// # use quiz_core::model::Outcome;
/// let scheduler = Scheduler::new();
/// let carry = CarryForward::initial(scheduler.policy());
/// let now = chrono::Utc::now();
/// let result = scheduler.grade(&carry, Grading::new(Outcome::Correct, 5.0), now)?;
///
/// assert_eq!(result.win_streak, 1);
/// assert_eq!(result.interval_days, 1);
/// # Ok::<(), quiz_core::scheduler::SchedulerError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    policy: SchedulePolicy,
}

impl Scheduler {
    /// Scheduler with the default policy (EF floor 1.3, seeds 1 and 6 days, one hour retry).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scheduler with a custom policy.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidPolicy` if the policy is inconsistent.
    pub fn try_with_policy(policy: SchedulePolicy) -> Result<Self, SchedulerError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    #[must_use]
    pub fn policy(&self) -> &SchedulePolicy {
        &self.policy
    }

    /// Ease sample for a response; positive for correct, negative for incorrect.
    #[must_use]
    pub fn ease_sample(&self, outcome: Outcome, latency_secs: f64) -> f64 {
        let scale = self.policy.latency_scale_secs;
        let speed = scale / (scale + latency_secs.max(0.0));
        match outcome {
            Outcome::Correct => 0.5 + 0.5 * speed,
            Outcome::Incorrect => -(1.0 - 0.5 * speed),
        }
    }

    /// Fold an ease sample into the prior easiness, never dropping below the floor.
    #[must_use]
    pub fn combine(&self, prior: f64, ease: f64) -> f64 {
        let p = &self.policy;
        let next = if ease >= 0.0 {
            prior + ease * p.gain * (p.easiness_plateau - prior).max(0.0)
        } else {
            prior + ease * p.penalty
        };
        next.max(p.easiness_floor)
    }

    /// Days until the next review after `win_streak` consecutive correct answers.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn interval_days(&self, win_streak: u32, easiness: f64) -> u32 {
        let p = &self.policy;
        let days = match win_streak {
            0 => return 0,
            1 => p.first_interval_days,
            2 => p.second_interval_days,
            n => {
                let exponent = i32::try_from(n - 2).unwrap_or(i32::MAX);
                let grown = f64::from(p.second_interval_days) * easiness.powi(exponent);
                grown.round().min(f64::from(p.max_interval_days)) as u32
            }
        };
        days.min(p.max_interval_days)
    }

    /// Grade a response against the carried-forward state.
    ///
    /// Correct answers reset the loss streak and push the next review out by
    /// the streak interval. Incorrect answers reset the win streak, force the
    /// interval to 0 and schedule a retry after the policy's short window.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidLatency` for negative or non-finite latency and
    /// `SchedulerError::InvalidEasiness` for a non-positive or non-finite prior easiness.
    pub fn grade(
        &self,
        carry: &CarryForward,
        grading: Grading,
        graded_at: DateTime<Utc>,
    ) -> Result<AttemptResult, SchedulerError> {
        if !grading.latency_secs.is_finite() || grading.latency_secs < 0.0 {
            return Err(SchedulerError::InvalidLatency {
                provided: grading.latency_secs,
            });
        }
        if !carry.easiness.is_finite() || carry.easiness <= 0.0 {
            return Err(SchedulerError::InvalidEasiness {
                provided: carry.easiness,
            });
        }

        let ease = self.ease_sample(grading.outcome, grading.latency_secs);
        let easiness = self.combine(carry.easiness, ease);

        let (win_streak, loss_streak, interval_days, next_up) = match grading.outcome {
            Outcome::Correct => {
                let wins = carry.win_streak.saturating_add(1);
                let days = self.interval_days(wins, easiness);
                (wins, 0, days, graded_at + Duration::days(i64::from(days)))
            }
            Outcome::Incorrect => (
                0,
                carry.loss_streak.saturating_add(1),
                0,
                graded_at + self.policy.retry_after(),
            ),
        };

        Ok(AttemptResult {
            outcome: grading.outcome,
            latency_secs: grading.latency_secs,
            ease,
            easiness,
            win_streak,
            loss_streak,
            interval_days,
            next_up,
            graded_at,
        })
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
