//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Reminder posted under the summary table, naming the commands with
/// `prefix`.
pub fn default_reminder(prefix: &str) -> String {
    format!("Reminder: to add or update a character, type `{prefix}update` (or `{prefix}actualizar`).")
}

/// Conversation timing.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Pause after each question/answer exchange (host rate limits).
    pub settle_delay: Duration,
    /// How long to wait for a reply before abandoning. `None` waits forever.
    pub reply_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(1),
            reply_timeout: Some(Duration::from_secs(600)), // 10 minutes
        }
    }
}

/// Backoff for the channel cleanup queue.
#[derive(Debug, Clone)]
pub struct CleanupPolicy {
    /// Pause between deletions.
    pub base_delay: Duration,
    /// Pause after a rate-limit rejection.
    pub rate_limit_delay: Duration,
    /// Most recent messages inspected per pass.
    pub scan_window: usize,
    /// Delete attempts per message (rate-limited deletes are re-queued).
    pub max_attempts: u32,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            rate_limit_delay: Duration::from_secs(5),
            scan_window: 100,
            max_attempts: 2,
        }
    }
}

/// Where roster rows live.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Sheets {
        spreadsheet_id: String,
        sheet_name: String,
    },
    LibSql {
        path: PathBuf,
    },
}

/// Where attachments go.
#[derive(Debug, Clone)]
pub enum RelayBackend {
    Drive {
        folder_id: String,
    },
    Local {
        dir: PathBuf,
        base_url: Option<String>,
    },
}

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Prefix that marks a command (`!update`).
    pub command_prefix: String,
    pub session: SessionConfig,
    pub cleanup: CleanupPolicy,
    /// Text posted after the summary table.
    pub reminder: String,
    pub store: StoreBackend,
    pub relay: RelayBackend,
}

impl Default for BotConfig {
    fn default() -> Self {
        let command_prefix = "!".to_string();
        Self {
            reminder: default_reminder(&command_prefix),
            command_prefix,
            session: SessionConfig::default(),
            cleanup: CleanupPolicy::default(),
            store: StoreBackend::LibSql {
                path: PathBuf::from("./data/roster.db"),
            },
            relay: RelayBackend::Local {
                dir: PathBuf::from("./data/attachments"),
                base_url: None,
            },
        }
    }
}

impl BotConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let command_prefix = get("ROSTER_COMMAND_PREFIX").unwrap_or(defaults.command_prefix);

        let settle_delay = parse_millis(&get, "ROSTER_SETTLE_DELAY_MS")?
            .unwrap_or(defaults.session.settle_delay);
        let reply_timeout = match parse_u64(&get, "ROSTER_REPLY_TIMEOUT_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.session.reply_timeout,
        };

        let cleanup = CleanupPolicy {
            base_delay: parse_millis(&get, "ROSTER_CLEANUP_DELAY_MS")?
                .unwrap_or(defaults.cleanup.base_delay),
            rate_limit_delay: parse_millis(&get, "ROSTER_RATE_LIMIT_DELAY_MS")?
                .unwrap_or(defaults.cleanup.rate_limit_delay),
            ..defaults.cleanup
        };

        let store = match get("ROSTER_STORE").as_deref() {
            None | Some("libsql") => StoreBackend::LibSql {
                path: get("ROSTER_DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/roster.db")),
            },
            Some("sheets") => StoreBackend::Sheets {
                spreadsheet_id: get("SHEETS_SPREADSHEET_ID")
                    .ok_or_else(|| ConfigError::MissingEnvVar("SHEETS_SPREADSHEET_ID".into()))?,
                sheet_name: get("SHEETS_SHEET_NAME").unwrap_or_else(|| "Sheet1".to_string()),
            },
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "ROSTER_STORE".into(),
                    message: format!("unknown store backend '{other}' (expected sheets or libsql)"),
                });
            }
        };

        let relay = match get("ROSTER_RELAY").as_deref() {
            None | Some("local") => RelayBackend::Local {
                dir: get("ROSTER_ATTACHMENT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/attachments")),
                base_url: get("ROSTER_ATTACHMENT_BASE_URL"),
            },
            Some("drive") => RelayBackend::Drive {
                folder_id: get("DRIVE_FOLDER_ID")
                    .ok_or_else(|| ConfigError::MissingEnvVar("DRIVE_FOLDER_ID".into()))?,
            },
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "ROSTER_RELAY".into(),
                    message: format!("unknown relay backend '{other}' (expected drive or local)"),
                });
            }
        };

        let reminder =
            get("ROSTER_REMINDER").unwrap_or_else(|| default_reminder(&command_prefix));

        Ok(Self {
            command_prefix,
            session: SessionConfig {
                settle_delay,
                reply_timeout,
            },
            cleanup,
            reminder,
            store,
            relay,
        })
    }

    /// Whether any configured backend talks to Google APIs.
    pub fn needs_google_token(&self) -> bool {
        matches!(self.store, StoreBackend::Sheets { .. })
            || matches!(self.relay, RelayBackend::Drive { .. })
    }
}

/// Read a required secret.
pub fn required_secret<F>(lookup: F, key: &str) -> Result<SecretString, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_u64<G>(get: &G, key: &str) -> Result<Option<u64>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}' is not a whole number: {e}"),
            })
        })
        .transpose()
}

fn parse_millis<G>(get: &G, key: &str) -> Result<Option<Duration>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    Ok(parse_u64(get, key)?.map(Duration::from_millis))
}
