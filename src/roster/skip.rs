//! Skip policy: decides whether a question is asked or copied.

use super::record::CharacterRecord;
use super::schema::{AFFIRMATIVE, Field, is_affirmative};

/// Outcome for one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDecision {
    /// Post the question and take the reply.
    Ask,
    /// Don't ask; reuse the stored value (or the forced one for sticky flags).
    SkipCopy,
}

/// Pure ask-or-copy rules.
///
/// - Class is fixed once the character exists.
/// - Ascended is sticky: once affirmative it is never asked again.
pub struct SkipPolicy;

impl SkipPolicy {
    pub fn decide(
        field: Field,
        record_exists: bool,
        existing_ascended: Option<&str>,
    ) -> SkipDecision {
        match field {
            Field::Class if record_exists => SkipDecision::SkipCopy,
            Field::Ascended if existing_ascended.is_some_and(is_affirmative) => {
                SkipDecision::SkipCopy
            }
            _ => SkipDecision::Ask,
        }
    }

    /// Decision against an optional existing record.
    pub fn decide_for(field: Field, existing: Option<&CharacterRecord>) -> SkipDecision {
        Self::decide(
            field,
            existing.is_some(),
            existing.map(|r| r.ascended.as_str()),
        )
    }

    /// The value a `SkipCopy` field takes. `None` when the field is asked.
    pub fn copied_value(field: Field, existing: &CharacterRecord) -> Option<String> {
        match Self::decide_for(field, Some(existing)) {
            SkipDecision::Ask => None,
            SkipDecision::SkipCopy if field == Field::Ascended => Some(AFFIRMATIVE.to_string()),
            SkipDecision::SkipCopy => Some(existing.field(field).to_string()),
        }
    }
}
