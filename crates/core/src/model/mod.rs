mod attempt;
mod choice;
mod ids;
mod question;
mod student;
mod tag;

pub use attempt::{Attempt, AttemptResult, NewAttempt, Outcome};
pub use choice::{ChoiceError, ChoiceLabel, Choices};
pub use ids::{AttemptId, ParseIdError, QuestionId, StudentId};
pub use question::{Question, QuestionDraft, QuestionError};
pub use student::Student;
pub use tag::{TagError, TagName};
