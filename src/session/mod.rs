//! Update conversations: phase tracking, reply routing and the
//! question/answer driver.

mod conversation;
pub mod replies;
pub mod state;

use std::sync::Arc;

pub use conversation::{ConversationSession, SessionOutcome};
pub use replies::{ReplyRouter, ReplyWaiter};
pub use state::{PendingSession, SessionPhase};

use crate::channels::ChatGateway;
use crate::relay::AttachmentRelay;
use crate::store::{KeyLocks, RecordStore};

/// Shared collaborators handed to every command handler.
#[derive(Clone)]
pub struct BotDeps {
    pub gateway: Arc<dyn ChatGateway>,
    pub store: Arc<dyn RecordStore>,
    pub relay: Arc<dyn AttachmentRelay>,
    /// Serializes writes per identity.
    pub locks: KeyLocks,
}
