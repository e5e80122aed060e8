use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use quiz_core::{
    Clock,
    model::{Attempt, ChoiceLabel, Outcome, Question, QuestionId, Student, TagName},
    scheduler::{Grading, Scheduler},
};
use storage::repository::{Storage, StudentRepository};
use tracing::{error, info};

use crate::config::PracticeConfig;
use crate::due_queue::DueQueueSelector;
use crate::error::PracticeError;
use crate::ledger::AttemptLedger;
use crate::presenter::{Presenter, QuestionPrompt, ResponseOutcome};
use crate::sampler::{NovelSampler, RandomIndex, Sample, SeededIndex};

//
// ─── OUTCOMES ──────────────────────────────────────────────────────────────────
//

/// Where the delivered question came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionSource {
    Due,
    Novel,
}

/// A cycle that collected and graded an answer.
#[derive(Debug, Clone, PartialEq)]
pub struct GradedCycle {
    pub attempt: Attempt,
    pub source: QuestionSource,
    pub selected: ChoiceLabel,
    pub correct_answer: ChoiceLabel,
    pub next_up: DateTime<Utc>,
}

impl GradedCycle {
    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.selected == self.correct_answer
    }
}

/// Terminal state of one practice cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Graded(GradedCycle),
    /// No answer within the bound; the attempt stays open and ungraded.
    TimedOut {
        attempt: Attempt,
        source: QuestionSource,
    },
    /// Nothing due and nothing unseen; the learner's next review is at `next_due`.
    Exhausted {
        next_due: DateTime<Utc>,
        question_id: QuestionId,
    },
    /// Nothing due, nothing unseen, and nothing scheduled.
    Empty,
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Runs one select, deliver, wait, grade cycle per call.
///
/// Holds no per-learner state; concurrent cycles coordinate only through the
/// store's atomic claim.
#[derive(Clone)]
pub struct PracticeService {
    clock: Clock,
    scheduler: Scheduler,
    response_timeout: Duration,
    students: Arc<dyn StudentRepository>,
    due_queue: DueQueueSelector,
    sampler: NovelSampler,
    ledger: AttemptLedger,
    presenter: Arc<dyn Presenter>,
}

impl PracticeService {
    /// Wire the service to a store and a presentation transport.
    ///
    /// # Errors
    ///
    /// Returns `PracticeError::Scheduler` if the configured policy is invalid.
    pub fn new(
        storage: &Storage,
        presenter: Arc<dyn Presenter>,
        config: PracticeConfig,
    ) -> Result<Self, PracticeError> {
        let random: Arc<dyn RandomIndex> = Arc::new(SeededIndex::from_os());
        Ok(Self {
            clock: Clock::default(),
            scheduler: Scheduler::try_with_policy(config.policy)?,
            response_timeout: config.response_timeout,
            students: Arc::clone(&storage.students),
            due_queue: DueQueueSelector::new(
                Arc::clone(&storage.attempts),
                Arc::clone(&storage.questions),
            ),
            sampler: NovelSampler::new(
                Arc::clone(&storage.questions),
                Arc::clone(&storage.attempts),
                random,
            ),
            ledger: AttemptLedger::new(Arc::clone(&storage.attempts)),
            presenter,
        })
    }

    /// Override the clock (usually for deterministic testing).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Override the sampler's randomness.
    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn RandomIndex>) -> Self {
        self.sampler = self.sampler.with_random(random);
        self
    }

    /// Deliver one question to the learner known as `external_ref` and grade
    /// the answer.
    ///
    /// Due reviews tagged `tag` take priority over unseen questions. A store
    /// failure ends the cycle and is logged; nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns `PracticeError::StudentNotFound` before touching the store if
    /// the learner is unknown, `PracticeError::StateConflict` if the attempt
    /// was graded elsewhere, and storage, presenter or scheduler errors
    /// otherwise.
    pub async fn run_cycle(
        &self,
        external_ref: &str,
        tag: &TagName,
    ) -> Result<CycleOutcome, PracticeError> {
        let result = self.cycle(external_ref, tag).await;
        if let Err(PracticeError::Storage(err)) = &result {
            error!(student = external_ref, tag = %tag, error = %err, "store failure ended practice cycle");
        }
        result
    }

    async fn cycle(&self, external_ref: &str, tag: &TagName) -> Result<CycleOutcome, PracticeError> {
        let student = self
            .students
            .find_student(external_ref)
            .await?
            .ok_or_else(|| PracticeError::StudentNotFound {
                external_ref: external_ref.to_owned(),
            })?;

        let now = self.clock.now();
        let (question, source) = match self.due_queue.claim_next(student.id, tag, now).await? {
            Some(item) => (item.question, QuestionSource::Due),
            None => match self.sampler.sample(student.id, tag).await? {
                Sample::Drawn(question) => (question, QuestionSource::Novel),
                Sample::Exhausted { next_due } => {
                    return Ok(Self::exhausted(&student, tag, next_due));
                }
            },
        };

        self.deliver(&student, &question, source, now).await
    }

    fn exhausted(student: &Student, tag: &TagName, next_due: Option<Attempt>) -> CycleOutcome {
        match next_due.and_then(|a| a.next_up().map(|at| (at, a.question_id))) {
            Some((next_due, question_id)) => {
                info!(student = %student.id, tag = %tag, next_due = %next_due, "pool exhausted");
                CycleOutcome::Exhausted {
                    next_due,
                    question_id,
                }
            }
            None => {
                info!(student = %student.id, tag = %tag, "nothing to practice");
                CycleOutcome::Empty
            }
        }
    }

    async fn deliver(
        &self,
        student: &Student,
        question: &Question,
        source: QuestionSource,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, PracticeError> {
        // Supersede before opening so the new attempt is not the one superseded.
        let supersession = self
            .ledger
            .find_live_attempt(student.id, question.id, self.scheduler.policy())
            .await?;
        let attempt = self.ledger.open_attempt(student.id, question.id, now).await?;

        let pending = self
            .presenter
            .present(student, QuestionPrompt::from(question))
            .await?;
        info!(
            student = %student.id,
            question = %question.id,
            attempt = %attempt.id,
            source = ?source,
            "question delivered"
        );

        let (choice, latency) = match pending.wait(self.response_timeout).await {
            ResponseOutcome::Answered { choice, latency } => (choice, latency),
            ResponseOutcome::TimedOut => {
                info!(student = %student.id, attempt = %attempt.id, "no response before timeout");
                return Ok(CycleOutcome::TimedOut { attempt, source });
            }
        };

        let grading = Grading::new(
            Outcome::from_correct(question.is_correct(choice)),
            latency.as_secs_f64(),
        );
        let result = self
            .scheduler
            .grade(&supersession.carry, grading, self.clock.now())?;
        let graded = self.ledger.grade(attempt.id, &result).await?;

        info!(
            student = %student.id,
            attempt = %graded.id,
            correct = result.outcome.is_correct(),
            easiness = result.easiness,
            interval_days = result.interval_days,
            next_up = %result.next_up,
            "attempt graded"
        );

        Ok(CycleOutcome::Graded(GradedCycle {
            attempt: graded,
            source,
            selected: choice,
            correct_answer: question.answer,
            next_up: result.next_up,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PresenterError;
    use crate::presenter::PendingResponse;
    use crate::sampler::FixedIndex;
    use quiz_core::model::{Choices, QuestionDraft, StudentId};
    use quiz_core::time::{fixed_clock, fixed_now};
    use storage::repository::QuestionRepository;

    struct Answering(ChoiceLabel);

    #[async_trait::async_trait]
    impl Presenter for Answering {
        async fn present(
            &self,
            _student: &Student,
            _prompt: QuestionPrompt,
        ) -> Result<PendingResponse, PresenterError> {
            Ok(PendingResponse::ready(self.0))
        }
    }

    struct Offline;

    #[async_trait::async_trait]
    impl Presenter for Offline {
        async fn present(
            &self,
            _student: &Student,
            _prompt: QuestionPrompt,
        ) -> Result<PendingResponse, PresenterError> {
            Err(PresenterError::Unreachable("dm closed".into()))
        }
    }

    async fn storage_with_bank() -> Storage {
        let storage = Storage::in_memory();
        storage
            .students
            .upsert_student(&Student::new(StudentId::new(1), "disc-1", "Ada"))
            .await
            .unwrap();
        let q = QuestionDraft {
            text: "2 + 2".into(),
            choices: Choices::new("3", "4", "5", "22"),
            answer: ChoiceLabel::B,
            directions: None,
            image: None,
            tags: vec!["algebra".into()],
        }
        .validate(QuestionId::new(1))
        .unwrap();
        storage.questions.upsert_question(&q).await.unwrap();
        storage
    }

    fn service(storage: &Storage, presenter: impl Presenter + 'static) -> PracticeService {
        PracticeService::new(storage, Arc::new(presenter), PracticeConfig::default())
            .unwrap()
            .with_clock(fixed_clock())
            .with_random(Arc::new(FixedIndex(0)))
    }

    #[tokio::test]
    async fn unknown_learner_fails_before_any_mutation() {
        let storage = storage_with_bank().await;
        let svc = service(&storage, Answering(ChoiceLabel::B));
        let algebra = TagName::new("algebra").unwrap();

        let err = svc.run_cycle("nobody", &algebra).await.unwrap_err();
        assert!(matches!(err, PracticeError::StudentNotFound { .. }));
        let q = storage.questions.get_question(QuestionId::new(1)).await.unwrap();
        assert_eq!(q.total_attempts, 0);
    }

    #[tokio::test]
    async fn correct_answer_is_graded_and_scheduled() {
        let storage = storage_with_bank().await;
        let svc = service(&storage, Answering(ChoiceLabel::B));
        let algebra = TagName::new("algebra").unwrap();

        let CycleOutcome::Graded(cycle) = svc.run_cycle("disc-1", &algebra).await.unwrap() else {
            panic!("expected a graded cycle");
        };
        assert!(cycle.is_correct());
        assert_eq!(cycle.source, QuestionSource::Novel);
        let result = cycle.attempt.result.as_ref().unwrap();
        assert_eq!((result.win_streak, result.loss_streak), (1, 0));
        assert_eq!(result.interval_days, 1);
        assert_eq!(cycle.next_up, fixed_now() + chrono::Duration::days(1));
    }

    #[tokio::test]
    async fn graded_question_comes_back_due_after_its_interval() {
        let storage = storage_with_bank().await;
        let svc = service(&storage, Answering(ChoiceLabel::B));
        let algebra = TagName::new("algebra").unwrap();

        svc.run_cycle("disc-1", &algebra).await.unwrap();
        let same_day = svc.run_cycle("disc-1", &algebra).await.unwrap();
        assert!(matches!(same_day, CycleOutcome::Exhausted { .. }));

        let tomorrow = svc
            .clone()
            .with_clock(fixed_clock().advanced_by(chrono::Duration::days(1)));
        let CycleOutcome::Graded(cycle) = tomorrow.run_cycle("disc-1", &algebra).await.unwrap()
        else {
            panic!("expected the review to be delivered");
        };
        assert_eq!(cycle.source, QuestionSource::Due);
        let result = cycle.attempt.result.as_ref().unwrap();
        assert_eq!(result.win_streak, 2);
        assert_eq!(result.interval_days, 6);
    }

    #[tokio::test]
    async fn presenter_failure_is_surfaced() {
        let storage = storage_with_bank().await;
        let svc = service(&storage, Offline);
        let algebra = TagName::new("algebra").unwrap();

        let err = svc.run_cycle("disc-1", &algebra).await.unwrap_err();
        assert!(matches!(err, PracticeError::Presenter(PresenterError::Unreachable(_))));
    }

    #[tokio::test]
    async fn invalid_policy_is_rejected() {
        let storage = Storage::in_memory();
        let mut config = PracticeConfig::default();
        config.policy.easiness_floor = 0.0;
        let err = PracticeService::new(&storage, Arc::new(Offline), config)
            .err()
            .expect("policy rejected");
        assert!(matches!(err, PracticeError::Scheduler(_)));
    }
}
