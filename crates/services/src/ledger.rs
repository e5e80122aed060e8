use std::sync::Arc;

use chrono::{DateTime, Utc};
use quiz_core::model::{Attempt, AttemptId, AttemptResult, NewAttempt, QuestionId, StudentId};
use quiz_core::scheduler::{CarryForward, SchedulePolicy};
use storage::repository::{AttemptRepository, StorageError};
use tracing::debug;

use crate::error::PracticeError;

/// State inherited by the next attempt of a pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Supersession {
    /// The most recent attempt of the pair as it was before being superseded.
    pub superseded: Option<Attempt>,
    pub carry: CarryForward,
}

/// Records each presentation and its grading.
#[derive(Clone)]
pub struct AttemptLedger {
    attempts: Arc<dyn AttemptRepository>,
}

impl AttemptLedger {
    #[must_use]
    pub fn new(attempts: Arc<dyn AttemptRepository>) -> Self {
        Self { attempts }
    }

    /// Create a fresh, ungraded attempt for the pair.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the pair already has a live attempt.
    pub async fn open_attempt(
        &self,
        student: StudentId,
        question: QuestionId,
        at: DateTime<Utc>,
    ) -> Result<Attempt, StorageError> {
        self.attempts
            .insert_attempt(NewAttempt {
                student_id: student,
                question_id: question,
                created_at: at,
            })
            .await
    }

    /// Supersede the pair's most recent attempt and work out what the next one
    /// inherits.
    ///
    /// Easiness and streaks come from the latest *graded* attempt, so a
    /// timed-out attempt never resets progress. A pair with no graded history
    /// starts from the policy defaults.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    pub async fn find_live_attempt(
        &self,
        student: StudentId,
        question: QuestionId,
        policy: &SchedulePolicy,
    ) -> Result<Supersession, StorageError> {
        let carry = self
            .attempts
            .latest_graded(student, question)
            .await?
            .and_then(|a| a.result.as_ref().map(CarryForward::from_result))
            .unwrap_or_else(|| CarryForward::initial(policy));

        let superseded = self.attempts.supersede_latest(student, question).await?;

        debug!(
            student = %student,
            question = %question,
            superseded = ?superseded.as_ref().map(|a| a.id),
            easiness = carry.easiness,
            win_streak = carry.win_streak,
            loss_streak = carry.loss_streak,
            "carrying schedule forward"
        );

        Ok(Supersession { superseded, carry })
    }

    /// Write the final outcome of an attempt. Single assignment.
    ///
    /// # Errors
    ///
    /// Returns `PracticeError::StateConflict` if the attempt is unknown or
    /// already graded, leaving the stored record untouched.
    pub async fn grade(
        &self,
        attempt: AttemptId,
        result: &AttemptResult,
    ) -> Result<Attempt, PracticeError> {
        self.attempts
            .record_result(attempt, result)
            .await
            .map_err(|err| match err {
                StorageError::NotFound | StorageError::Conflict => {
                    PracticeError::StateConflict { attempt }
                }
                other => PracticeError::Storage(other),
            })
    }

    /// The learner's earliest pending due attempt across all topics.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    pub async fn next_due(&self, student: StudentId) -> Result<Option<Attempt>, StorageError> {
        self.attempts.next_due(student).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use quiz_core::model::Outcome;
    use quiz_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    fn ledger() -> (AttemptLedger, InMemoryRepository) {
        let repo = InMemoryRepository::new();
        (AttemptLedger::new(Arc::new(repo.clone())), repo)
    }

    fn result(outcome: Outcome, easiness: f64, wins: u32, losses: u32) -> AttemptResult {
        AttemptResult {
            outcome,
            latency_secs: 7.0,
            ease: 0.8,
            easiness,
            win_streak: wins,
            loss_streak: losses,
            interval_days: 6,
            next_up: fixed_now() + Duration::days(6),
            graded_at: fixed_now(),
        }
    }

    #[tokio::test]
    async fn fresh_pair_uses_policy_defaults() {
        let (ledger, _) = ledger();
        let policy = SchedulePolicy::default();
        let s = ledger
            .find_live_attempt(StudentId::new(1), QuestionId::new(1), &policy)
            .await
            .unwrap();
        assert!(s.superseded.is_none());
        assert!((s.carry.easiness - 2.5).abs() < f64::EPSILON);
        assert_eq!((s.carry.win_streak, s.carry.loss_streak), (0, 0));
    }

    #[tokio::test]
    async fn carry_skips_timed_out_attempts() {
        let (ledger, repo) = ledger();
        let (student, question) = (StudentId::new(1), QuestionId::new(9));
        let policy = SchedulePolicy::default();

        let graded = ledger.open_attempt(student, question, fixed_now()).await.unwrap();
        ledger
            .grade(graded.id, &result(Outcome::Correct, 2.7, 2, 0))
            .await
            .unwrap();

        // A later delivery that nobody answered.
        ledger.find_live_attempt(student, question, &policy).await.unwrap();
        let abandoned = ledger
            .open_attempt(student, question, fixed_now() + Duration::days(6))
            .await
            .unwrap();

        let s = ledger.find_live_attempt(student, question, &policy).await.unwrap();
        assert_eq!(s.superseded.map(|a| a.id), Some(abandoned.id));
        assert!((s.carry.easiness - 2.7).abs() < f64::EPSILON);
        assert_eq!(s.carry.win_streak, 2);
        assert!(repo.get_attempt(abandoned.id).await.unwrap().reattempted);
    }

    #[tokio::test]
    async fn grading_twice_is_a_state_conflict() {
        let (ledger, repo) = ledger();
        let a = ledger
            .open_attempt(StudentId::new(1), QuestionId::new(1), fixed_now())
            .await
            .unwrap();
        let first = result(Outcome::Incorrect, 2.2, 0, 1);
        ledger.grade(a.id, &first).await.unwrap();

        let err = ledger
            .grade(a.id, &result(Outcome::Correct, 2.9, 4, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, PracticeError::StateConflict { attempt } if attempt == a.id));
        assert_eq!(repo.get_attempt(a.id).await.unwrap().result, Some(first));

        let unknown = ledger
            .grade(AttemptId::new(404), &result(Outcome::Correct, 2.5, 1, 0))
            .await
            .unwrap_err();
        assert!(matches!(unknown, PracticeError::StateConflict { .. }));
    }
}
