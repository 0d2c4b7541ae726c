//! Session state machine: tracks where one update conversation is.

use uuid::Uuid;

use crate::channels::ConversationKey;
use crate::error::SessionError;
use crate::roster::schema::{Field, MAX_ATTACHMENTS};
use crate::roster::{CharacterRecord, SkipDecision};

/// The phases of an update conversation.
///
/// Progresses linearly: AskingQuestion(0..COUNT) → AwaitingAttachment(0..MAX)
/// → Finalizing → Done. Any live phase may drop to Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Resolving schema question `i` (asked or copied).
    AskingQuestion(usize),
    /// Waiting on attachment slot `j`.
    AwaitingAttachment(usize),
    /// Writing the row.
    Finalizing,
    Done,
    Failed,
}

impl SessionPhase {
    pub fn initial() -> Self {
        Self::AskingQuestion(0)
    }

    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: SessionPhase) -> bool {
        if target == Self::Failed {
            return !self.is_terminal();
        }
        self.next() == Some(target)
    }

    /// Whether this phase ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// The next phase on the success path, if any.
    pub fn next(&self) -> Option<SessionPhase> {
        use SessionPhase::*;
        match *self {
            AskingQuestion(i) if i + 1 < Field::COUNT => Some(AskingQuestion(i + 1)),
            AskingQuestion(_) if MAX_ATTACHMENTS > 0 => Some(AwaitingAttachment(0)),
            AskingQuestion(_) => Some(Finalizing),
            AwaitingAttachment(j) if j + 1 < MAX_ATTACHMENTS => Some(AwaitingAttachment(j + 1)),
            AwaitingAttachment(_) => Some(Finalizing),
            Finalizing => Some(Done),
            Done | Failed => None,
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AskingQuestion(i) => write!(f, "asking_question({i})"),
            Self::AwaitingAttachment(j) => write!(f, "awaiting_attachment({j})"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Record already in the store when the session looked it up.
#[derive(Debug, Clone)]
pub struct ExistingRecord {
    pub row_index: usize,
    pub record: CharacterRecord,
}

/// Everything one in-flight conversation has collected. Never persisted.
#[derive(Debug)]
pub struct PendingSession {
    pub id: Uuid,
    pub key: ConversationKey,
    pub phase: SessionPhase,
    /// Answers so far, including copied values.
    pub draft: CharacterRecord,
    pub decisions: Vec<(Field, SkipDecision)>,
    pub existing: Option<ExistingRecord>,
    pub attachments: Vec<String>,
}

impl PendingSession {
    pub fn new(key: ConversationKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            phase: SessionPhase::initial(),
            draft: CharacterRecord::default(),
            decisions: Vec::new(),
            existing: None,
            attachments: Vec::new(),
        }
    }

    /// Move to the next phase on the success path.
    pub fn advance(&mut self) -> Result<SessionPhase, SessionError> {
        let next = self.phase.next().ok_or_else(|| SessionError::InvalidTransition {
            from: self.phase.to_string(),
            to: "<none>".into(),
        })?;
        self.transition(next)
    }

    /// Mark the session failed. No-op once terminal.
    pub fn fail(&mut self) {
        if self.phase.can_transition_to(SessionPhase::Failed) {
            self.phase = SessionPhase::Failed;
        }
    }

    fn transition(&mut self, target: SessionPhase) -> Result<SessionPhase, SessionError> {
        if !self.phase.can_transition_to(target) {
            return Err(SessionError::InvalidTransition {
                from: self.phase.to_string(),
                to: target.to_string(),
            });
        }
        tracing::debug!(session = %self.id, from = %self.phase, to = %target, "Session transition");
        self.phase = target;
        Ok(target)
    }

    /// Questions actually posted to the user, in order.
    pub fn asked_fields(&self) -> Vec<Field> {
        self.decisions
            .iter()
            .filter(|(_, d)| *d == SkipDecision::Ask)
            .map(|(f, _)| *f)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConversationKey {
        ConversationKey {
            author_id: "u".into(),
            channel_id: "c".into(),
        }
    }

    #[test]
    fn next_walks_all_phases() {
        use SessionPhase::*;
        let mut expected: Vec<SessionPhase> = (1..Field::COUNT).map(AskingQuestion).collect();
        expected.extend((0..MAX_ATTACHMENTS).map(AwaitingAttachment));
        expected.push(Finalizing);
        expected.push(Done);

        let mut current = SessionPhase::initial();
        for expected_next in expected {
            let next = current.next().unwrap();
            assert_eq!(next, expected_next);
            current = next;
        }
        assert!(current.next().is_none());
    }

    #[test]
    fn invalid_transitions() {
        use SessionPhase::*;
        // Skip ahead
        assert!(!AskingQuestion(0).can_transition_to(AskingQuestion(2)));
        assert!(!AskingQuestion(3).can_transition_to(Finalizing));
        // Go backward
        assert!(!AwaitingAttachment(1).can_transition_to(AwaitingAttachment(0)));
        // Terminal
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(AskingQuestion(0)));
        // Self-transition
        assert!(!Finalizing.can_transition_to(Finalizing));
    }

    #[test]
    fn any_live_phase_can_fail() {
        use SessionPhase::*;
        for phase in [AskingQuestion(0), AwaitingAttachment(1), Finalizing] {
            assert!(phase.can_transition_to(Failed), "{phase} should be able to fail");
        }
    }

    #[test]
    fn display_formats() {
        assert_eq!(SessionPhase::AskingQuestion(4).to_string(), "asking_question(4)");
        assert_eq!(SessionPhase::AwaitingAttachment(1).to_string(), "awaiting_attachment(1)");
        assert_eq!(SessionPhase::Finalizing.to_string(), "finalizing");
    }

    #[test]
    fn pending_advance_to_done_then_errors() {
        let mut pending = PendingSession::new(key());
        while pending.phase != SessionPhase::Done {
            pending.advance().unwrap();
        }
        assert!(matches!(
            pending.advance(),
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn fail_is_sticky() {
        let mut pending = PendingSession::new(key());
        pending.fail();
        assert_eq!(pending.phase, SessionPhase::Failed);
        assert!(pending.advance().is_err());
        pending.fail();
        assert_eq!(pending.phase, SessionPhase::Failed);
    }

    #[test]
    fn asked_fields_filters_copies() {
        let mut pending = PendingSession::new(key());
        pending.decisions = vec![
            (Field::Character, SkipDecision::Ask),
            (Field::Class, SkipDecision::SkipCopy),
            (Field::Level, SkipDecision::Ask),
        ];
        assert_eq!(pending.asked_fields(), vec![Field::Character, Field::Level]);
    }
}
