//! Command dispatch: parses inbound messages and runs the matching handler.
//!
//! Replies that belong to an open conversation are routed to it before any
//! command parsing, so an answer never starts a new command.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::channels::{IncomingMessage, MessageStream};
use crate::config::{BotConfig, SessionConfig};
use crate::display::DisplayRefresher;
use crate::error::{Error, SessionError};
use crate::roster::{CharacterRecord, normalize};
use crate::session::{BotDeps, ConversationSession, ReplyRouter};

/// A recognised chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start an update conversation.
    Update,
    /// Mark a character validated.
    Validate {
        /// Normalised identity key.
        identity: String,
    },
    /// `validate` with no identity; reply with usage.
    ValidateUsage,
}

/// Parses message content into commands.
#[derive(Debug, Clone)]
pub struct CommandParser {
    prefix: String,
}

impl CommandParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `None` for anything that is not a known command.
    pub fn parse(&self, content: &str) -> Option<Command> {
        let rest = content.trim().strip_prefix(self.prefix.as_str())?;
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };

        match name.to_lowercase().as_str() {
            "update" | "actualizar" => Some(Command::Update),
            "validate" | "validar" if args.is_empty() => Some(Command::ValidateUsage),
            "validate" | "validar" => Some(Command::Validate {
                identity: normalize(args),
            }),
            _ => None,
        }
    }
}

/// Result of a validate command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidateOutcome {
    Validated { row_index: usize },
    NotFound,
}

struct Shared {
    deps: BotDeps,
    session: SessionConfig,
    refresher: DisplayRefresher,
    router: ReplyRouter,
    prefix: String,
}

/// Routes inbound messages to conversations and command handlers.
pub struct Dispatcher {
    shared: Arc<Shared>,
    parser: CommandParser,
}

impl Dispatcher {
    pub fn new(deps: BotDeps, config: &BotConfig) -> Self {
        let refresher = DisplayRefresher::new(
            Arc::clone(&deps.gateway),
            Arc::clone(&deps.store),
            config.cleanup.clone(),
            config.reminder.clone(),
        );
        Self {
            shared: Arc::new(Shared {
                deps,
                session: config.session.clone(),
                refresher,
                router: ReplyRouter::new(),
                prefix: config.command_prefix.clone(),
            }),
            parser: CommandParser::new(config.command_prefix.clone()),
        }
    }

    pub fn router(&self) -> &ReplyRouter {
        &self.shared.router
    }

    /// Consume the gateway stream until it ends.
    pub async fn run(&self, mut stream: MessageStream) {
        info!(prefix = %self.parser.prefix(), "Dispatcher running");
        while let Some(msg) = stream.next().await {
            self.handle(msg);
        }
        warn!("Message stream ended");
    }

    /// Handle one inbound message. Returns the spawned handler task, if any.
    pub fn handle(&self, msg: IncomingMessage) -> Option<JoinHandle<()>> {
        if msg.author_is_bot {
            return None;
        }
        let msg = match self.shared.router.deliver(msg) {
            Ok(()) => return None,
            Err(msg) => msg,
        };
        let command = self.parser.parse(&msg.content)?;
        info!(author = %msg.author_id, channel = %msg.channel_id, ?command, "Command received");

        let shared = Arc::clone(&self.shared);
        match command {
            Command::Update => {
                let Some(waiter) = self.shared.router.register(msg.conversation_key()) else {
                    warn!(conversation = %msg.conversation_key(), "Update already in progress");
                    return None;
                };
                let session = ConversationSession::new(
                    shared.deps.clone(),
                    shared.session.clone(),
                    waiter,
                    &msg,
                );
                Some(tokio::spawn(async move {
                    match session.run().await {
                        Ok(_) => shared.refresh(&msg.channel_id).await,
                        Err(e) => shared.report_failure(&msg, &Error::from(e)).await,
                    }
                }))
            }
            Command::Validate { identity } => Some(tokio::spawn(async move {
                match shared.validate(&identity).await {
                    Ok(ValidateOutcome::Validated { .. }) => {
                        let text = format!(
                            "{}, character {identity} has been validated.",
                            msg.mention()
                        );
                        shared.notify(&msg.channel_id, &text).await;
                        shared.refresh(&msg.channel_id).await;
                    }
                    Ok(ValidateOutcome::NotFound) => {
                        let text =
                            format!("{}, character {identity} was not found.", msg.mention());
                        shared.notify(&msg.channel_id, &text).await;
                    }
                    Err(e) => shared.report_failure(&msg, &e).await,
                }
            })),
            Command::ValidateUsage => Some(tokio::spawn(async move {
                let text = format!(
                    "{}, usage: `{}validate <character>`",
                    msg.mention(),
                    shared.prefix
                );
                shared.notify(&msg.channel_id, &text).await;
            })),
        }
    }
}

impl Shared {
    /// Flip the validated flag of `identity`; every other cell is written back
    /// as read.
    async fn validate(&self, identity: &str) -> Result<ValidateOutcome, Error> {
        let _guard = self.deps.locks.lock(identity).await;
        let Some(found) = self.deps.store.find_by_key(identity).await? else {
            info!(identity, "Validate target not found");
            return Ok(ValidateOutcome::NotFound);
        };

        let mut record = CharacterRecord::from_row(&found.cells);
        record.mark_validated();
        self.deps
            .store
            .upsert_row(found.row_index, &record.to_row())
            .await?;
        info!(identity, row = found.row_index, "Character validated");
        Ok(ValidateOutcome::Validated {
            row_index: found.row_index,
        })
    }

    /// Repost the summary and clear the channel, sparing messages other open
    /// conversations still use.
    async fn refresh(&self, channel_id: &str) {
        let held = self.router.held_messages(channel_id);
        if let Err(e) = self.refresher.refresh_and_cleanup(channel_id, &held).await {
            error!(channel = channel_id, error = %e, "Summary refresh failed");
        }
    }

    async fn notify(&self, channel_id: &str, text: &str) {
        if let Err(e) = self.deps.gateway.send(channel_id, text).await {
            error!(channel = channel_id, error = %e, "Failed to send message");
        }
    }

    /// Log the detail, tell the user something short.
    async fn report_failure(&self, msg: &IncomingMessage, err: &Error) {
        error!(author = %msg.author_id, channel = %msg.channel_id, error = %err, "Command failed");
        self.notify(&msg.channel_id, &failure_message(&msg.mention(), err, &self.prefix))
            .await;
    }
}

/// User-facing text for a failed command. Never includes error detail.
pub fn failure_message(mention: &str, err: &Error, prefix: &str) -> String {
    match err {
        Error::Session(SessionError::TimedOut { .. }) => format!(
            "{mention}, no answer received in time. Type `{prefix}update` to start again."
        ),
        Error::Session(SessionError::EmptyIdentity) => {
            format!("{mention}, the character name can't be empty. Type `{prefix}update` to start again.")
        }
        _ => format!("{mention}, something went wrong and nothing was saved. Please try again later."),
    }
}
