//! Roster domain: schema, record layout, and skip rules.

pub mod record;
pub mod schema;
pub mod skip;

pub use record::CharacterRecord;
pub use schema::{Field, normalize};
pub use skip::{SkipDecision, SkipPolicy};
