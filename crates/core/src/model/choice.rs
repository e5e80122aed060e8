use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChoiceError {
    #[error("unknown choice label: {0:?}")]
    UnknownLabel(String),
}

/// One of the four answer slots every question carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChoiceLabel {
    A,
    B,
    C,
    D,
}

impl ChoiceLabel {
    pub const ALL: [ChoiceLabel; 4] = [Self::A, Self::B, Self::C, Self::D];

    /// Lowercase storage/transport form (`"a"`..`"d"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChoiceLabel::A => "a",
            ChoiceLabel::B => "b",
            ChoiceLabel::C => "c",
            ChoiceLabel::D => "d",
        }
    }
}

impl fmt::Display for ChoiceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

impl FromStr for ChoiceLabel {
    type Err = ChoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" => Ok(Self::A),
            "b" => Ok(Self::B),
            "c" => Ok(Self::C),
            "d" => Ok(Self::D),
            _ => Err(ChoiceError::UnknownLabel(s.to_owned())),
        }
    }
}

/// The four labeled answer texts of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choices {
    pub a: String,
    pub b: String,
    pub c: String,
    pub d: String,
}

impl Choices {
    #[must_use]
    pub fn new(
        a: impl Into<String>,
        b: impl Into<String>,
        c: impl Into<String>,
        d: impl Into<String>,
    ) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            c: c.into(),
            d: d.into(),
        }
    }

    #[must_use]
    pub fn get(&self, label: ChoiceLabel) -> &str {
        match label {
            ChoiceLabel::A => &self.a,
            ChoiceLabel::B => &self.b,
            ChoiceLabel::C => &self.c,
            ChoiceLabel::D => &self.d,
        }
    }

    /// Iterate `(label, text)` pairs in display order.
    pub fn iter(&self) -> impl Iterator<Item = (ChoiceLabel, &str)> {
        ChoiceLabel::ALL.into_iter().map(|label| (label, self.get(label)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_case_insensitively() {
        assert_eq!("B".parse::<ChoiceLabel>().unwrap(), ChoiceLabel::B);
        assert_eq!(" d\n".parse::<ChoiceLabel>().unwrap(), ChoiceLabel::D);
        assert!(matches!(
            "e".parse::<ChoiceLabel>(),
            Err(ChoiceError::UnknownLabel(_))
        ));
    }

    #[test]
    fn choices_iterate_in_label_order() {
        let choices = Choices::new("one", "two", "three", "four");
        let labels: Vec<_> = choices.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, ChoiceLabel::ALL.to_vec());
        assert_eq!(choices.get(ChoiceLabel::C), "three");
    }
}
