//! Roster summary rendering and channel housekeeping.

mod refresher;
pub mod table;

pub use refresher::{CleanupReport, DisplayHandles, DisplayRefresher};
pub use table::{code_blocks, render_table};
