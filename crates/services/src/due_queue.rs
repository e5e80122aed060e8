use std::sync::Arc;

use chrono::{DateTime, Utc};
use quiz_core::model::{Attempt, Question, StudentId, TagName};
use storage::repository::{AttemptRepository, QuestionRepository, StorageError};
use tracing::debug;

/// A claimed due attempt and the question it resurfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct DueItem {
    pub claimed: Attempt,
    pub question: Question,
}

/// Finds questions whose scheduled review has arrived.
#[derive(Clone)]
pub struct DueQueueSelector {
    attempts: Arc<dyn AttemptRepository>,
    questions: Arc<dyn QuestionRepository>,
}

impl DueQueueSelector {
    #[must_use]
    pub fn new(
        attempts: Arc<dyn AttemptRepository>,
        questions: Arc<dyn QuestionRepository>,
    ) -> Self {
        Self {
            attempts,
            questions,
        }
    }

    /// Claim the learner's earliest due attempt on a question tagged `tag`.
    ///
    /// The claim is a single compare-and-set in the store, so concurrent
    /// callers never receive the same attempt. A hit counts a delivery on the
    /// question.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; an empty queue is `Ok(None)`.
    pub async fn claim_next(
        &self,
        student: StudentId,
        tag: &TagName,
        now: DateTime<Utc>,
    ) -> Result<Option<DueItem>, StorageError> {
        let Some(claimed) = self.attempts.claim_due(student, tag, now).await? else {
            debug!(student = %student, tag = %tag, "nothing due");
            return Ok(None);
        };

        let mut question = self.questions.get_question(claimed.question_id).await?;
        self.questions.increment_attempts(question.id).await?;
        question.count_delivery();

        debug!(
            student = %student,
            attempt = %claimed.id,
            question = %question.id,
            "claimed due attempt"
        );
        Ok(Some(DueItem { claimed, question }))
    }
}
