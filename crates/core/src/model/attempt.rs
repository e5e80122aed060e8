use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{AttemptId, QuestionId, StudentId};

/// Whether the learner picked the correct choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Correct,
    Incorrect,
}

impl Outcome {
    #[must_use]
    pub fn from_correct(correct: bool) -> Self {
        if correct {
            Self::Correct
        } else {
            Self::Incorrect
        }
    }

    #[must_use]
    pub fn is_correct(self) -> bool {
        matches!(self, Self::Correct)
    }
}

/// Final grading of an attempt plus the schedule it produced.
///
/// Written once; an attempt carrying a result is historical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub outcome: Outcome,
    pub latency_secs: f64,
    pub ease: f64,
    pub easiness: f64,
    pub win_streak: u32,
    pub loss_streak: u32,
    /// Days until the next review; 0 means "again within hours".
    pub interval_days: u32,
    pub next_up: DateTime<Utc>,
    pub graded_at: DateTime<Utc>,
}

/// Insert shape for a fresh, ungraded attempt. The store assigns the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewAttempt {
    pub student_id: StudentId,
    pub question_id: QuestionId,
    pub created_at: DateTime<Utc>,
}

/// One presentation of a question to a learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: AttemptId,
    pub student_id: StudentId,
    pub question_id: QuestionId,
    pub created_at: DateTime<Utc>,
    /// Set once this attempt has been redelivered from the due queue or
    /// superseded by a newer attempt for the same pair.
    pub reattempted: bool,
    pub result: Option<AttemptResult>,
}

impl Attempt {
    #[must_use]
    pub fn from_new(id: AttemptId, new: NewAttempt) -> Self {
        Self {
            id,
            student_id: new.student_id,
            question_id: new.question_id,
            created_at: new.created_at,
            reattempted: false,
            result: None,
        }
    }

    #[must_use]
    pub fn is_graded(&self) -> bool {
        self.result.is_some()
    }

    #[must_use]
    pub fn next_up(&self) -> Option<DateTime<Utc>> {
        self.result.as_ref().map(|r| r.next_up)
    }

    /// Created, not graded, not superseded.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.is_graded() && !self.reattempted
    }

    /// Eligible for the due queue at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.reattempted && self.next_up().is_some_and(|at| at <= now)
    }

    /// Key that orders attempts by creation, breaking ties by id.
    #[must_use]
    pub fn recency_key(&self) -> (DateTime<Utc>, AttemptId) {
        (self.created_at, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn graded(next_up: DateTime<Utc>) -> AttemptResult {
        AttemptResult {
            outcome: Outcome::Correct,
            latency_secs: 4.0,
            ease: 0.9,
            easiness: 2.6,
            win_streak: 1,
            loss_streak: 0,
            interval_days: 1,
            next_up,
            graded_at: fixed_now(),
        }
    }

    fn fresh() -> Attempt {
        Attempt::from_new(
            AttemptId::new(1),
            NewAttempt {
                student_id: StudentId::new(1),
                question_id: QuestionId::new(1),
                created_at: fixed_now(),
            },
        )
    }

    #[test]
    fn fresh_attempt_is_live_and_not_due() {
        let a = fresh();
        assert!(a.is_live());
        assert!(!a.is_graded());
        assert!(!a.is_due(fixed_now() + Duration::days(365)));
    }

    #[test]
    fn due_requires_past_next_up_and_no_redelivery() {
        let now = fixed_now();
        let mut a = fresh();
        a.result = Some(graded(now - Duration::hours(1)));
        assert!(!a.is_live());
        assert!(a.is_due(now));

        a.result = Some(graded(now + Duration::hours(1)));
        assert!(!a.is_due(now));

        a.result = Some(graded(now));
        a.reattempted = true;
        assert!(!a.is_due(now));
    }

    #[test]
    fn outcome_from_bool() {
        assert!(Outcome::from_correct(true).is_correct());
        assert_eq!(Outcome::from_correct(false), Outcome::Incorrect);
    }
}
