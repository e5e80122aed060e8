use std::sync::{Arc, Mutex, PoisonError};

use quiz_core::model::{Attempt, Question, StudentId, TagName};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use storage::repository::{AttemptRepository, QuestionRepository, StorageError};
use tracing::{debug, warn};

//
// ─── RANDOMNESS ────────────────────────────────────────────────────────────────
//

/// Source of uniform indices for the novel sampler.
pub trait RandomIndex: Send + Sync {
    /// A uniformly distributed index in `0..upper`. `upper` is never zero.
    fn index(&self, upper: u64) -> u64;
}

/// `StdRng` behind a lock, seeded from the OS or from a fixed value.
pub struct SeededIndex {
    rng: Mutex<StdRng>,
}

impl SeededIndex {
    #[must_use]
    pub fn from_os() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomIndex for SeededIndex {
    fn index(&self, upper: u64) -> u64 {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.random_range(0..upper.max(1))
    }
}

/// Always draws the same index, wrapped into range.
#[derive(Debug, Clone, Copy)]
pub struct FixedIndex(pub u64);

impl RandomIndex for FixedIndex {
    fn index(&self, upper: u64) -> u64 {
        self.0 % upper.max(1)
    }
}

//
// ─── SAMPLER ───────────────────────────────────────────────────────────────────
//

/// Result of looking for a question the learner has never seen.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Drawn(Question),
    /// Nothing unseen remains; `next_due` is the learner's earliest pending review.
    Exhausted { next_due: Option<Attempt> },
}

/// Uniformly samples an unseen question when nothing is due.
#[derive(Clone)]
pub struct NovelSampler {
    questions: Arc<dyn QuestionRepository>,
    attempts: Arc<dyn AttemptRepository>,
    random: Arc<dyn RandomIndex>,
}

impl NovelSampler {
    #[must_use]
    pub fn new(
        questions: Arc<dyn QuestionRepository>,
        attempts: Arc<dyn AttemptRepository>,
        random: Arc<dyn RandomIndex>,
    ) -> Self {
        Self {
            questions,
            attempts,
            random,
        }
    }

    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn RandomIndex>) -> Self {
        self.random = random;
        self
    }

    /// Draw an unseen question tagged `tag` and mark it attempted by `student`.
    ///
    /// Counting and fetching are two store calls over the same stable
    /// ordering. They are not a snapshot: if the pool shrinks in between and
    /// the drawn offset falls off the end, the draw is reported as exhausted.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    pub async fn sample(&self, student: StudentId, tag: &TagName) -> Result<Sample, StorageError> {
        let count = self.questions.count_unattempted(student, tag).await?;
        if count == 0 {
            return self.exhausted(student, tag).await;
        }

        let offset = self.random.index(count);
        let Some(mut question) = self.questions.nth_unattempted(student, tag, offset).await?
        else {
            warn!(
                student = %student,
                tag = %tag,
                count,
                offset,
                "candidate pool shrank between count and fetch"
            );
            return self.exhausted(student, tag).await;
        };

        self.questions.mark_attempted(question.id, student).await?;
        question.mark_attempted_by(student);

        debug!(student = %student, tag = %tag, count, offset, question = %question.id, "drew novel question");
        Ok(Sample::Drawn(question))
    }

    async fn exhausted(&self, student: StudentId, tag: &TagName) -> Result<Sample, StorageError> {
        let next_due = self.attempts.next_due(student).await?;
        debug!(
            student = %student,
            tag = %tag,
            next_up = ?next_due.as_ref().and_then(Attempt::next_up),
            "no unseen questions left"
        );
        Ok(Sample::Exhausted { next_due })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{ChoiceLabel, Choices, QuestionDraft, QuestionId};
    use storage::repository::InMemoryRepository;

    async fn pool(ids: impl IntoIterator<Item = u64>) -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        for id in ids {
            let q = QuestionDraft {
                text: format!("Q{id}"),
                choices: Choices::new("a", "b", "c", "d"),
                answer: ChoiceLabel::A,
                directions: None,
                image: None,
                tags: vec!["algebra".into()],
            }
            .validate(QuestionId::new(id))
            .unwrap();
            repo.upsert_question(&q).await.unwrap();
        }
        repo
    }

    fn sampler(repo: &InMemoryRepository, random: impl RandomIndex + 'static) -> NovelSampler {
        NovelSampler::new(
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
            Arc::new(random),
        )
    }

    #[tokio::test]
    async fn drawn_index_selects_fifth_candidate() {
        let repo = pool(1..=10).await;
        let algebra = TagName::new("algebra").unwrap();
        let student = StudentId::new(1);

        let Sample::Drawn(q) = sampler(&repo, FixedIndex(4))
            .sample(student, &algebra)
            .await
            .unwrap()
        else {
            panic!("expected a draw");
        };
        assert_eq!(q.id, QuestionId::new(5));
        assert!(q.was_attempted_by(student));

        let stored = repo.get_question(q.id).await.unwrap();
        assert!(stored.was_attempted_by(student));
        assert_eq!(stored.total_attempts, 1);
        assert_eq!(repo.count_unattempted(student, &algebra).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn empty_pool_reports_exhaustion_without_mutation() {
        let repo = pool(1..=2).await;
        let algebra = TagName::new("algebra").unwrap();
        let student = StudentId::new(3);
        for id in 1..=2 {
            repo.mark_attempted(QuestionId::new(id), student).await.unwrap();
        }

        let out = sampler(&repo, FixedIndex(0))
            .sample(student, &algebra)
            .await
            .unwrap();
        assert_eq!(out, Sample::Exhausted { next_due: None });
        assert_eq!(
            repo.get_question(QuestionId::new(1)).await.unwrap().total_attempts,
            1
        );
    }

    #[test]
    fn seeded_index_stays_in_range_and_repeats() {
        let a = SeededIndex::from_seed(7);
        let b = SeededIndex::from_seed(7);
        for upper in 1..50 {
            let x = a.index(upper);
            assert!(x < upper);
            assert_eq!(x, b.index(upper));
        }
    }

    #[test]
    fn fixed_index_wraps() {
        assert_eq!(FixedIndex(4).index(10), 4);
        assert_eq!(FixedIndex(12).index(10), 2);
        assert_eq!(FixedIndex(3).index(1), 0);
    }
}
