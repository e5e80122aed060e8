use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quiz_core::model::{
    Attempt, AttemptId, AttemptResult, NewAttempt, Question, QuestionId, Student, StudentId,
    TagName,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Learner lookup. Learners are owned by an external identity system.
#[async_trait]
pub trait StudentRepository: Send + Sync {
    /// Persist or update a learner.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if another learner already owns the
    /// external reference, or other storage errors.
    async fn upsert_student(&self, student: &Student) -> Result<(), StorageError>;

    /// Resolve a learner by the identity the transport knows them by.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; a missing learner is `Ok(None)`.
    async fn find_student(&self, external_ref: &str) -> Result<Option<Student>, StorageError>;
}

/// Question bank operations, including the candidate pool for novel sampling.
///
/// `count_unattempted` and `nth_unattempted` share one stable ordering
/// (ascending question id) so that an offset drawn against the count names the
/// same candidate, as long as the pool does not change between the two calls.
#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Persist or update question content. Existing counters and the
    /// attempted-by set are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the question cannot be stored.
    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_question(&self, id: QuestionId) -> Result<Question, StorageError>;

    /// Number of questions tagged `tag` that `student` has never attempted.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn count_unattempted(
        &self,
        student: StudentId,
        tag: &TagName,
    ) -> Result<u64, StorageError>;

    /// The candidate at `offset` within the unattempted pool.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; an out-of-range offset is `Ok(None)`.
    async fn nth_unattempted(
        &self,
        student: StudentId,
        tag: &TagName,
        offset: u64,
    ) -> Result<Option<Question>, StorageError>;

    /// Record that `student` has seen the question and count the delivery.
    /// Marking twice is harmless; the counter still increments.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the question is missing.
    async fn mark_attempted(
        &self,
        question: QuestionId,
        student: StudentId,
    ) -> Result<(), StorageError>;

    /// Count a redelivery of the question.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the question is missing.
    async fn increment_attempts(&self, question: QuestionId) -> Result<(), StorageError>;
}

/// Attempt records and the due queue.
#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Insert a fresh, ungraded attempt and return it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the pair already has a live
    /// (ungraded, not superseded) attempt.
    async fn insert_attempt(&self, new: NewAttempt) -> Result<Attempt, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_attempt(&self, id: AttemptId) -> Result<Attempt, StorageError>;

    /// Atomically find the learner's earliest due attempt on a question tagged
    /// `tag` and flip its `reattempted` flag. Concurrent callers never claim
    /// the same attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures; an empty queue is `Ok(None)`.
    async fn claim_due(
        &self,
        student: StudentId,
        tag: &TagName,
        now: DateTime<Utc>,
    ) -> Result<Option<Attempt>, StorageError>;

    /// Mark the most recently created attempt of the pair as superseded and
    /// return it as it was before the update.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn supersede_latest(
        &self,
        student: StudentId,
        question: QuestionId,
    ) -> Result<Option<Attempt>, StorageError>;

    /// Most recently created graded attempt of the pair.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn latest_graded(
        &self,
        student: StudentId,
        question: QuestionId,
    ) -> Result<Option<Attempt>, StorageError>;

    /// Write the grading of an attempt. Single assignment.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown id and
    /// `StorageError::Conflict` if the attempt is already graded; the stored
    /// record is left unchanged in both cases.
    async fn record_result(
        &self,
        id: AttemptId,
        result: &AttemptResult,
    ) -> Result<Attempt, StorageError>;

    /// The learner's earliest pending due date across all topics.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn next_due(&self, student: StudentId) -> Result<Option<Attempt>, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct Arena {
    students: HashMap<StudentId, Student>,
    questions: BTreeMap<QuestionId, Question>,
    attempts: BTreeMap<AttemptId, Attempt>,
    by_pair: HashMap<(StudentId, QuestionId), Vec<AttemptId>>,
    last_attempt_id: u64,
}

impl Arena {
    fn pair_attempts(
        &self,
        student: StudentId,
        question: QuestionId,
    ) -> impl Iterator<Item = &Attempt> {
        self.by_pair
            .get(&(student, question))
            .into_iter()
            .flatten()
            .filter_map(|id| self.attempts.get(id))
    }

    fn unattempted<'a>(
        &'a self,
        student: StudentId,
        tag: &'a TagName,
    ) -> impl Iterator<Item = &'a Question> {
        self.questions
            .values()
            .filter(move |q| q.has_tag(tag) && !q.was_attempted_by(student))
    }
}

/// Arena-backed repository for tests and prototyping.
///
/// Every operation runs under one lock, which gives `claim_due` and
/// `record_result` their compare-and-set semantics.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    arena: Arc<Mutex<Arena>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Arena>, StorageError> {
        self.arena
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl StudentRepository for InMemoryRepository {
    async fn upsert_student(&self, student: &Student) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let taken = guard
            .students
            .values()
            .any(|s| s.external_ref == student.external_ref && s.id != student.id);
        if taken {
            return Err(StorageError::Conflict);
        }
        guard.students.insert(student.id, student.clone());
        Ok(())
    }

    async fn find_student(&self, external_ref: &str) -> Result<Option<Student>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .students
            .values()
            .find(|s| s.external_ref == external_ref)
            .cloned())
    }
}

#[async_trait]
impl QuestionRepository for InMemoryRepository {
    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let mut stored = question.clone();
        if let Some(existing) = guard.questions.get(&question.id) {
            stored.total_attempts = existing.total_attempts;
            stored.attempted_by = existing.attempted_by.clone();
        }
        guard.questions.insert(question.id, stored);
        Ok(())
    }

    async fn get_question(&self, id: QuestionId) -> Result<Question, StorageError> {
        let guard = self.lock()?;
        guard.questions.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn count_unattempted(
        &self,
        student: StudentId,
        tag: &TagName,
    ) -> Result<u64, StorageError> {
        let guard = self.lock()?;
        let count = guard.unattempted(student, tag).count();
        u64::try_from(count).map_err(|_| StorageError::Serialization("count overflow".into()))
    }

    async fn nth_unattempted(
        &self,
        student: StudentId,
        tag: &TagName,
        offset: u64,
    ) -> Result<Option<Question>, StorageError> {
        let Ok(offset) = usize::try_from(offset) else {
            return Ok(None);
        };
        let guard = self.lock()?;
        Ok(guard.unattempted(student, tag).nth(offset).cloned())
    }

    async fn mark_attempted(
        &self,
        question: QuestionId,
        student: StudentId,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let q = guard
            .questions
            .get_mut(&question)
            .ok_or(StorageError::NotFound)?;
        q.mark_attempted_by(student);
        Ok(())
    }

    async fn increment_attempts(&self, question: QuestionId) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let q = guard
            .questions
            .get_mut(&question)
            .ok_or(StorageError::NotFound)?;
        q.count_delivery();
        Ok(())
    }
}

#[async_trait]
impl AttemptRepository for InMemoryRepository {
    async fn insert_attempt(&self, new: NewAttempt) -> Result<Attempt, StorageError> {
        let mut guard = self.lock()?;
        if guard
            .pair_attempts(new.student_id, new.question_id)
            .any(Attempt::is_live)
        {
            return Err(StorageError::Conflict);
        }

        guard.last_attempt_id += 1;
        let attempt = Attempt::from_new(AttemptId::new(guard.last_attempt_id), new);
        guard.attempts.insert(attempt.id, attempt.clone());
        guard
            .by_pair
            .entry((new.student_id, new.question_id))
            .or_default()
            .push(attempt.id);
        Ok(attempt)
    }

    async fn get_attempt(&self, id: AttemptId) -> Result<Attempt, StorageError> {
        let guard = self.lock()?;
        guard.attempts.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn claim_due(
        &self,
        student: StudentId,
        tag: &TagName,
        now: DateTime<Utc>,
    ) -> Result<Option<Attempt>, StorageError> {
        let mut guard = self.lock()?;
        let arena = &*guard;
        let candidate = arena
            .attempts
            .values()
            .filter(|a| a.student_id == student && a.is_due(now))
            .filter(|a| {
                arena
                    .questions
                    .get(&a.question_id)
                    .is_some_and(|q| q.has_tag(tag))
            })
            .min_by_key(|a| (a.next_up(), a.id))
            .map(|a| a.id);

        let Some(id) = candidate else {
            return Ok(None);
        };
        let attempt = guard.attempts.get_mut(&id).ok_or(StorageError::NotFound)?;
        attempt.reattempted = true;
        Ok(Some(attempt.clone()))
    }

    async fn supersede_latest(
        &self,
        student: StudentId,
        question: QuestionId,
    ) -> Result<Option<Attempt>, StorageError> {
        let mut guard = self.lock()?;
        let latest = guard
            .pair_attempts(student, question)
            .max_by_key(|a| a.recency_key())
            .map(|a| a.id);

        let Some(id) = latest else {
            return Ok(None);
        };
        let attempt = guard.attempts.get_mut(&id).ok_or(StorageError::NotFound)?;
        let before = attempt.clone();
        attempt.reattempted = true;
        Ok(Some(before))
    }

    async fn latest_graded(
        &self,
        student: StudentId,
        question: QuestionId,
    ) -> Result<Option<Attempt>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .pair_attempts(student, question)
            .filter(|a| a.is_graded())
            .max_by_key(|a| a.recency_key())
            .cloned())
    }

    async fn record_result(
        &self,
        id: AttemptId,
        result: &AttemptResult,
    ) -> Result<Attempt, StorageError> {
        let mut guard = self.lock()?;
        let attempt = guard.attempts.get_mut(&id).ok_or(StorageError::NotFound)?;
        if attempt.is_graded() {
            return Err(StorageError::Conflict);
        }
        attempt.result = Some(result.clone());
        Ok(attempt.clone())
    }

    async fn next_due(&self, student: StudentId) -> Result<Option<Attempt>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .attempts
            .values()
            .filter(|a| a.student_id == student && !a.reattempted)
            .filter_map(|a| a.next_up().map(|at| (at, a)))
            .min_by_key(|(at, a)| (*at, a.id))
            .map(|(_, a)| a.clone()))
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub students: Arc<dyn StudentRepository>,
    pub questions: Arc<dyn QuestionRepository>,
    pub attempts: Arc<dyn AttemptRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let students: Arc<dyn StudentRepository> = Arc::new(repo.clone());
        let questions: Arc<dyn QuestionRepository> = Arc::new(repo.clone());
        let attempts: Arc<dyn AttemptRepository> = Arc::new(repo);
        Self {
            students,
            questions,
            attempts,
        }
    }
}
