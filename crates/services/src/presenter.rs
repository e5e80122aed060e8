use std::time::Duration;

use async_trait::async_trait;
use quiz_core::model::{ChoiceLabel, Choices, Question, QuestionId, Student};
use tokio::sync::oneshot;
use tokio::time::Instant;
use url::Url;

use crate::error::PresenterError;

/// What a transport needs to render a question. The correct label is withheld.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionPrompt {
    pub question_id: QuestionId,
    pub text: String,
    pub choices: Choices,
    pub directions: Option<String>,
    pub image: Option<Url>,
}

impl From<&Question> for QuestionPrompt {
    fn from(question: &Question) -> Self {
        Self {
            question_id: question.id,
            text: question.text.clone(),
            choices: question.choices.clone(),
            directions: question.directions.clone(),
            image: question.image.clone(),
        }
    }
}

/// Delivery boundary to the learner.
///
/// `present` returns as soon as the question is shown; the answer arrives
/// later through the returned `PendingResponse`.
#[async_trait]
pub trait Presenter: Send + Sync {
    /// # Errors
    ///
    /// Returns `PresenterError` if the question cannot be delivered.
    async fn present(
        &self,
        student: &Student,
        prompt: QuestionPrompt,
    ) -> Result<PendingResponse, PresenterError>;
}

/// Result of one bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Answered {
        choice: ChoiceLabel,
        /// Time from delivery to answer.
        latency: Duration,
    },
    TimedOut,
}

/// Transport half of a pending response. Consumed by the first answer.
#[derive(Debug)]
pub struct ResponseSender {
    tx: oneshot::Sender<ChoiceLabel>,
}

impl ResponseSender {
    /// Deliver the learner's choice. Returns `false` if the wait already ended.
    pub fn respond(self, choice: ChoiceLabel) -> bool {
        self.tx.send(choice).is_ok()
    }

    /// Resolves once the waiting side has given up.
    pub async fn closed(&mut self) {
        self.tx.closed().await;
    }
}

/// A delivered question waiting for exactly one answer.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<ChoiceLabel>,
    delivered_at: Instant,
}

impl PendingResponse {
    /// Start the latency clock and hand back both halves of the wait.
    #[must_use]
    pub fn channel() -> (ResponseSender, Self) {
        let (tx, rx) = oneshot::channel();
        (
            ResponseSender { tx },
            Self {
                rx,
                delivered_at: Instant::now(),
            },
        )
    }

    /// A response that is already known, e.g. from a synchronous transport.
    #[must_use]
    pub fn ready(choice: ChoiceLabel) -> Self {
        let (sender, pending) = Self::channel();
        sender.respond(choice);
        pending
    }

    /// Wait for the answer or until `limit` elapses, whichever comes first.
    /// A sender dropped without answering counts as a timeout.
    pub async fn wait(self, limit: Duration) -> ResponseOutcome {
        let delivered_at = self.delivered_at;
        match tokio::time::timeout(limit, self.rx).await {
            Ok(Ok(choice)) => ResponseOutcome::Answered {
                choice,
                latency: delivered_at.elapsed(),
            },
            Ok(Err(_)) => {
                tracing::warn!("response channel closed without an answer");
                ResponseOutcome::TimedOut
            }
            Err(_) => ResponseOutcome::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn answer_reports_latency_from_delivery() {
        let (sender, pending) = PendingResponse::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            sender.respond(ChoiceLabel::C);
        });

        let ResponseOutcome::Answered { choice, latency } =
            pending.wait(Duration::from_secs(600)).await
        else {
            panic!("expected an answer");
        };
        assert_eq!(choice, ChoiceLabel::C);
        assert!(latency >= Duration::from_secs(5));
        assert!(latency < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_out_at_the_bound() {
        let (sender, pending) = PendingResponse::channel();
        let started = Instant::now();

        let outcome = pending.wait(Duration::from_secs(600)).await;
        assert_eq!(outcome, ResponseOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(600));
        let mut sender = sender;
        sender.closed().await;
        assert!(!sender.respond(ChoiceLabel::A));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_ends_the_wait() {
        let (sender, pending) = PendingResponse::channel();
        drop(sender);
        assert_eq!(
            pending.wait(Duration::from_secs(600)).await,
            ResponseOutcome::TimedOut
        );
    }

    #[tokio::test]
    async fn ready_answer_is_immediate() {
        let outcome = PendingResponse::ready(ChoiceLabel::D)
            .wait(Duration::from_secs(1))
            .await;
        assert!(matches!(
            outcome,
            ResponseOutcome::Answered {
                choice: ChoiceLabel::D,
                ..
            }
        ));
    }
}
