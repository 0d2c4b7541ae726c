//! Channel summary: post the roster table, then clear everything else.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channels::discord::DISCORD_MAX_MESSAGE_LENGTH;
use crate::channels::{ChatGateway, MessageId};
use crate::config::CleanupPolicy;
use crate::display::table::{code_blocks, render_table};
use crate::error::{ChannelError, Result};
use crate::roster::CharacterRecord;
use crate::roster::schema::{Field, SYSTEM_FIELDS, default_headers};
use crate::store::RecordStore;

const DISPLAY_COLUMNS: usize = Field::COUNT + SYSTEM_FIELDS;

/// Messages posted by a refresh; cleanup must leave these alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayHandles {
    /// One per table chunk.
    pub summary: Vec<MessageId>,
    pub reminder: MessageId,
}

impl DisplayHandles {
    pub fn contains(&self, message_id: &str) -> bool {
        self.reminder == message_id || self.summary.iter().any(|id| id == message_id)
    }
}

/// What one cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub scanned: usize,
    pub kept: usize,
    pub deleted: usize,
    pub failed: usize,
    pub rate_limited: usize,
}

#[derive(Debug)]
struct DeleteTask {
    message_id: MessageId,
    attempts: u32,
}

pub struct DisplayRefresher {
    gateway: Arc<dyn ChatGateway>,
    store: Arc<dyn RecordStore>,
    policy: CleanupPolicy,
    reminder: String,
    max_message_len: usize,
}

impl DisplayRefresher {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        store: Arc<dyn RecordStore>,
        policy: CleanupPolicy,
        reminder: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            store,
            policy,
            reminder: reminder.into(),
            max_message_len: DISCORD_MAX_MESSAGE_LENGTH,
        }
    }

    pub fn with_max_message_len(mut self, max_message_len: usize) -> Self {
        self.max_message_len = max_message_len;
        self
    }

    /// Render the store as a table (schema + updated + validated columns).
    pub async fn render(&self) -> Result<String> {
        let rows = self.store.all_rows().await?;
        let mut rows = rows.into_iter();

        let stored_headers = rows.next().unwrap_or_default();
        let fallback = default_headers();
        let headers: Vec<String> = (0..DISPLAY_COLUMNS)
            .map(|i| match stored_headers.get(i) {
                Some(h) if !h.trim().is_empty() => h.clone(),
                _ => fallback[i].clone(),
            })
            .collect();

        let body: Vec<Vec<String>> = rows
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .map(|row| CharacterRecord::from_row(&row).display_cells())
            .collect();

        Ok(render_table(&headers, &body))
    }

    /// Post the table and the reminder; return their handles.
    pub async fn refresh(&self, channel_id: &str) -> Result<DisplayHandles> {
        let table = self.render().await?;
        let mut summary = Vec::new();
        for block in code_blocks(&table, self.max_message_len) {
            summary.push(self.gateway.send(channel_id, &block).await?);
        }
        let reminder = self.gateway.send(channel_id, &self.reminder).await?;
        debug!(channel = channel_id, chunks = summary.len(), "Summary posted");
        Ok(DisplayHandles { summary, reminder })
    }

    /// Delete every recent message that is neither in `keep` nor `held` by
    /// an open conversation.
    ///
    /// Individual delete failures never abort the pass. Rate-limited deletes
    /// wait and go back on the queue until `max_attempts` is spent.
    pub async fn cleanup(
        &self,
        channel_id: &str,
        keep: &DisplayHandles,
        held: &HashSet<MessageId>,
    ) -> std::result::Result<CleanupReport, ChannelError> {
        let recent = self
            .gateway
            .recent_messages(channel_id, self.policy.scan_window)
            .await?;

        let mut report = CleanupReport {
            scanned: recent.len().min(self.policy.scan_window),
            ..Default::default()
        };
        let mut queue: VecDeque<DeleteTask> = VecDeque::new();
        for message_id in recent.into_iter().take(self.policy.scan_window) {
            if keep.contains(&message_id) || held.contains(&message_id) {
                report.kept += 1;
            } else {
                queue.push_back(DeleteTask {
                    message_id,
                    attempts: 0,
                });
            }
        }

        while let Some(mut task) = queue.pop_front() {
            task.attempts += 1;
            match self.gateway.delete(channel_id, &task.message_id).await {
                Ok(()) => {
                    report.deleted += 1;
                    pause(self.policy.base_delay).await;
                }
                Err(e) if e.is_message_gone() => {
                    debug!(message = %task.message_id, "Already deleted");
                    report.deleted += 1;
                }
                Err(ChannelError::RateLimited { retry_after, .. }) => {
                    report.rate_limited += 1;
                    let wait = retry_after
                        .unwrap_or_default()
                        .max(self.policy.rate_limit_delay);
                    warn!(
                        message = %task.message_id,
                        attempt = task.attempts,
                        wait_ms = wait.as_millis() as u64,
                        "Delete rate limited, backing off"
                    );
                    pause(wait).await;
                    if task.attempts < self.policy.max_attempts {
                        queue.push_back(task);
                    } else {
                        report.failed += 1;
                    }
                }
                Err(e) => {
                    warn!(message = %task.message_id, error = %e, "Delete failed, skipping");
                    report.failed += 1;
                    pause(self.policy.base_delay).await;
                }
            }
        }

        info!(
            channel = channel_id,
            scanned = report.scanned,
            deleted = report.deleted,
            failed = report.failed,
            "Channel cleanup finished"
        );
        Ok(report)
    }

    /// Post a fresh summary, then clear the rest of the channel.
    pub async fn refresh_and_cleanup(
        &self,
        channel_id: &str,
        held: &HashSet<MessageId>,
    ) -> Result<CleanupReport> {
        let handles = self.refresh(channel_id).await?;
        Ok(self.cleanup(channel_id, &handles, held).await?)
    }
}

async fn pause(delay: Duration) {
    if delay > Duration::ZERO {
        tokio::time::sleep(delay).await;
    }
}
