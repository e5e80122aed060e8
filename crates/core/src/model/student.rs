use serde::{Deserialize, Serialize};

use crate::model::ids::StudentId;

/// A learner, owned by an external identity system.
///
/// `external_ref` is the identity the transport knows the learner by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub external_ref: String,
    pub display_name: String,
}

impl Student {
    #[must_use]
    pub fn new(
        id: StudentId,
        external_ref: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            external_ref: external_ref.into(),
            display_name: display_name.into(),
        }
    }
}
