//! One update conversation, driven prompt by prompt over the chat gateway.

use std::time::Duration;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::channels::IncomingMessage;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::roster::schema::MAX_ATTACHMENTS;
use crate::roster::{CharacterRecord, Field, SkipDecision, SkipPolicy, normalize};
use crate::session::BotDeps;
use crate::session::replies::ReplyWaiter;
use crate::session::state::{ExistingRecord, PendingSession};

/// How the finished record was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// New identity, appended at the end of the store.
    Created { identity: String },
    /// Existing identity, overwritten in place.
    Updated { identity: String, row_index: usize },
}

impl SessionOutcome {
    pub fn identity(&self) -> &str {
        match self {
            Self::Created { identity } | Self::Updated { identity, .. } => identity,
        }
    }
}

/// Drives one user through the questionnaire and writes the row once.
pub struct ConversationSession {
    deps: BotDeps,
    config: SessionConfig,
    waiter: ReplyWaiter,
    pending: PendingSession,
    channel_id: String,
    mention: String,
}

impl ConversationSession {
    /// Start a session for the author of `trigger`, who must own `waiter`.
    pub fn new(
        deps: BotDeps,
        config: SessionConfig,
        waiter: ReplyWaiter,
        trigger: &IncomingMessage,
    ) -> Self {
        Self {
            deps,
            config,
            pending: PendingSession::new(waiter.key().clone()),
            waiter,
            channel_id: trigger.channel_id.clone(),
            mention: trigger.mention(),
        }
    }

    /// Run to completion. Consumes the session; the reply slot is released
    /// when this returns.
    pub async fn run(mut self) -> Result<SessionOutcome, SessionError> {
        info!(session = %self.pending.id, conversation = %self.pending.key, "Update session started");
        match self.drive().await {
            Ok(outcome) => {
                info!(
                    session = %self.pending.id,
                    identity = outcome.identity(),
                    asked = self.pending.asked_fields().len(),
                    attachments = self.pending.attachments.len(),
                    "Update session finished"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(session = %self.pending.id, phase = %self.pending.phase, error = %e, "Update session aborted");
                self.pending.fail();
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<SessionOutcome, SessionError> {
        let identity = self.ask(Field::IDENTITY).await?;
        if identity.is_empty() {
            return Err(SessionError::EmptyIdentity);
        }
        self.pending.draft.set_field(Field::IDENTITY, identity.clone());
        self.pending.decisions.push((Field::IDENTITY, SkipDecision::Ask));
        self.pending.existing = self.lookup(&identity).await?;

        for field in Field::ALL.into_iter().skip(1) {
            self.pending.advance()?;
            let copied = self
                .pending
                .existing
                .as_ref()
                .and_then(|e| SkipPolicy::copied_value(field, &e.record));
            let (decision, value) = match copied {
                Some(value) => (SkipDecision::SkipCopy, value),
                None => (SkipDecision::Ask, self.ask(field).await?),
            };
            debug!(session = %self.pending.id, %field, ?decision, "Field resolved");
            self.pending.decisions.push((field, decision));
            self.pending.draft.set_field(field, value);
        }

        for slot in 0..MAX_ATTACHMENTS {
            self.pending.advance()?;
            if let Some(reference) = self.collect_attachment(slot).await? {
                self.pending.attachments.push(reference);
            }
        }

        self.pending.advance()?;
        let outcome = self.finalize().await?;
        self.pending.advance()?;

        let confirmation = match &outcome {
            SessionOutcome::Created { identity } => {
                format!("{}, {identity} has been added to the roster.", self.mention)
            }
            SessionOutcome::Updated { identity, .. } => {
                format!("{}, {identity} has been updated.", self.mention)
            }
        };
        self.deps.gateway.send(&self.channel_id, &confirmation).await?;
        Ok(outcome)
    }

    /// Post `field`'s question, take one reply, then retire both messages.
    async fn ask(&mut self, field: Field) -> Result<String, SessionError> {
        self.waiter.discard_pending();
        let question = self.deps.gateway.send(&self.channel_id, field.prompt()).await?;
        self.waiter.hold(&question);
        let reply = self
            .waiter
            .next(self.config.reply_timeout, self.pending.phase)
            .await?;

        self.retire(&reply.id).await?;
        self.retire(&question).await?;
        self.settle().await;
        Ok(normalize(&reply.content))
    }

    /// Request one photo. A reply without an attachment leaves the slot empty.
    async fn collect_attachment(&mut self, slot: usize) -> Result<Option<String>, SessionError> {
        self.waiter.discard_pending();
        let prompt = format!(
            "{}, please upload a photo ({}/{MAX_ATTACHMENTS}).",
            self.mention,
            slot + 1
        );
        let prompt_id = self.deps.gateway.send(&self.channel_id, &prompt).await?;
        self.waiter.hold(&prompt_id);
        let reply = self
            .waiter
            .next(self.config.reply_timeout, self.pending.phase)
            .await?;

        let reference = match reply.attachments.split_first() {
            Some((first, rest)) => {
                if !rest.is_empty() {
                    info!(session = %self.pending.id, ignored = rest.len(), "Extra attachments ignored");
                }
                let blob = self.deps.gateway.fetch_attachment(first).await?;
                let reference = self
                    .deps
                    .relay
                    .store(&blob, &first.filename, first.mime_type())
                    .await?;
                Some(reference)
            }
            None => {
                debug!(session = %self.pending.id, slot, "Reply carried no attachment");
                None
            }
        };

        self.retire(&reply.id).await?;
        self.settle().await;
        Ok(reference)
    }

    /// Delete a message this session is done with. One that is already gone
    /// counts as retired.
    async fn retire(&self, message_id: &str) -> Result<(), SessionError> {
        match self.deps.gateway.delete(&self.channel_id, message_id).await {
            Err(e) if e.is_message_gone() => {
                debug!(session = %self.pending.id, message = message_id, "Message already gone");
                Ok(())
            }
            other => other.map_err(SessionError::from),
        }
    }

    async fn lookup(&self, identity: &str) -> Result<Option<ExistingRecord>, SessionError> {
        Ok(self
            .deps
            .store
            .find_by_key(identity)
            .await?
            .map(|found| ExistingRecord {
                row_index: found.row_index,
                record: CharacterRecord::from_row(&found.cells),
            }))
    }

    /// Build the final row and write it with exactly one store call.
    ///
    /// Runs under the identity's lock and looks the row up again, so a
    /// concurrent writer for the same identity is never overwritten blindly.
    async fn finalize(&mut self) -> Result<SessionOutcome, SessionError> {
        let identity = self.pending.draft.character.clone();
        let _guard = self.deps.locks.lock(&identity).await;

        let current = self.lookup(&identity).await?;
        let initial_row = self.pending.existing.as_ref().map(|e| e.row_index);
        if current.as_ref().map(|e| e.row_index) != initial_row {
            warn!(
                session = %self.pending.id,
                identity = %identity,
                "Record changed while the session was open; using current row"
            );
        }

        let mut record = self.pending.draft.clone();
        if let Some(existing) = &current {
            for field in [Field::Class, Field::Ascended] {
                if let Some(value) = SkipPolicy::copied_value(field, &existing.record) {
                    record.set_field(field, value);
                }
            }
        }
        record.attachments = self.pending.attachments.clone();
        record.stamp_submission(Local::now().date_naive());
        let row = record.to_row();

        let outcome = match current {
            Some(existing) => {
                self.deps.store.upsert_row(existing.row_index, &row).await?;
                SessionOutcome::Updated {
                    identity,
                    row_index: existing.row_index,
                }
            }
            None => {
                self.deps.store.append_row(&row).await?;
                SessionOutcome::Created { identity }
            }
        };
        self.pending.draft = record;
        Ok(outcome)
    }

    async fn settle(&self) {
        if self.config.settle_delay > Duration::ZERO {
            tokio::time::sleep(self.config.settle_delay).await;
        }
    }
}
