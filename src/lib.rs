//! Roster Bot: chat-driven character roster collection.

pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod display;
pub mod error;
pub mod relay;
pub mod roster;
pub mod session;
pub mod store;
