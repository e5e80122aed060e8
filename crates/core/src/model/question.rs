use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::model::choice::{ChoiceLabel, Choices};
use crate::model::ids::{QuestionId, StudentId};
use crate::model::tag::{TagError, TagName};

//
// ─── QUESTION TYPES ────────────────────────────────────────────────────────────
//

/// Unvalidated question input, as it arrives from an authoring tool or seed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionDraft {
    pub text: String,
    pub choices: Choices,
    pub answer: ChoiceLabel,
    pub directions: Option<String>,
    pub image: Option<String>,
    pub tags: Vec<String>,
}

impl QuestionDraft {
    /// Validate the draft and assign it an identity.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the text or any choice is blank, the tag set
    /// is empty, a tag is blank, or the image reference is not a valid URL.
    pub fn validate(self, id: QuestionId) -> Result<Question, QuestionError> {
        let text = self.text.trim();
        if text.is_empty() {
            return Err(QuestionError::EmptyText);
        }

        for (label, choice) in self.choices.iter() {
            if choice.trim().is_empty() {
                return Err(QuestionError::EmptyChoice(label));
            }
        }

        let tags = self
            .tags
            .into_iter()
            .map(TagName::new)
            .collect::<Result<BTreeSet<_>, _>>()?;
        if tags.is_empty() {
            return Err(QuestionError::NoTags);
        }

        let image = self
            .image
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| Url::parse(raw.trim()).map_err(|_| QuestionError::InvalidImage(raw)))
            .transpose()?;

        let directions = self
            .directions
            .map(|d| d.trim().to_owned())
            .filter(|d| !d.is_empty());

        Ok(Question {
            id,
            text: text.to_owned(),
            choices: self.choices,
            answer: self.answer,
            directions,
            image,
            tags,
            total_attempts: 0,
            attempted_by: BTreeSet::new(),
        })
    }
}

/// A multiple-choice question in the bank.
///
/// `total_attempts` and `attempted_by` are the only mutable parts and only
/// ever grow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    pub choices: Choices,
    pub answer: ChoiceLabel,
    pub directions: Option<String>,
    pub image: Option<Url>,
    pub tags: BTreeSet<TagName>,
    pub total_attempts: u64,
    pub attempted_by: BTreeSet<StudentId>,
}

impl Question {
    #[must_use]
    pub fn is_correct(&self, selected: ChoiceLabel) -> bool {
        self.answer == selected
    }

    #[must_use]
    pub fn has_tag(&self, tag: &TagName) -> bool {
        self.tags.contains(tag)
    }

    #[must_use]
    pub fn was_attempted_by(&self, student: StudentId) -> bool {
        self.attempted_by.contains(&student)
    }

    /// Count one more delivery. Saturates instead of wrapping.
    pub fn count_delivery(&mut self) {
        self.total_attempts = self.total_attempts.saturating_add(1);
    }

    /// Count a first delivery to `student` and remember that they have seen it.
    pub fn mark_attempted_by(&mut self, student: StudentId) {
        self.count_delivery();
        self.attempted_by.insert(student);
    }
}

//
// ─── QUESTION VALIDATION ERRORS ────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question text cannot be empty")]
    EmptyText,

    #[error("choice {0} cannot be empty")]
    EmptyChoice(ChoiceLabel),

    #[error("question must carry at least one topic tag")]
    NoTags,

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error("invalid image reference: {0}")]
    InvalidImage(String),
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
