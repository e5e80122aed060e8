#![forbid(unsafe_code)]

pub mod config;
pub mod due_queue;
pub mod error;
pub mod ledger;
pub mod practice;
pub mod presenter;
pub mod sampler;

pub use quiz_core::Clock;

pub use config::PracticeConfig;
pub use due_queue::{DueItem, DueQueueSelector};
pub use error::{PracticeError, PresenterError};
pub use ledger::{AttemptLedger, Supersession};
pub use practice::{CycleOutcome, GradedCycle, PracticeService, QuestionSource};
pub use presenter::{PendingResponse, Presenter, QuestionPrompt, ResponseOutcome, ResponseSender};
pub use sampler::{FixedIndex, NovelSampler, RandomIndex, Sample, SeededIndex};
