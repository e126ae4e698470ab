//! Configuration types.
//!
//! Settings come from a JSON file (path in `INBOX_SHEETS_CONFIG`, default
//! `./config.json`). Secrets never live in that file; they are read from the
//! environment into [`Secrets`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pipeline::rules::{FilterRule, RuleSet};

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "INBOX_SHEETS_CONFIG";
/// Env var naming a directory for a daily rolling log file.
pub const LOG_DIR_ENV: &str = "INBOX_SHEETS_LOG_DIR";
pub const IMAP_PASSWORD_ENV: &str = "IMAP_PASSWORD";
pub const SHEETS_TOKEN_ENV: &str = "SHEETS_ACCESS_TOKEN";

const DEFAULT_CONFIG_PATH: &str = "./config.json";
pub const DEFAULT_SHEET_NAME: &str = "Gmail Email Logs";
pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";

// ── Run mode ────────────────────────────────────────────────────────

/// Whether the binary makes one pass or keeps polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Once,
    Loop,
}

// ── State ───────────────────────────────────────────────────────────

/// Which state store backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    Json,
    Libsql,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackend,
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::Json,
            path: PathBuf::from("./state.json"),
        }
    }
}

// ── Collaborators ───────────────────────────────────────────────────

/// IMAP connection settings. The password comes from [`Secrets`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub mailbox: String,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 993,
            username: String::new(),
            mailbox: "INBOX".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetsConfig {
    /// Base URL of the Sheets v4 API. Overridable for tests.
    pub api_base: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_SHEETS_API_BASE.to_string(),
        }
    }
}

// ── Top level ───────────────────────────────────────────────────────

/// Everything one pipeline run needs, passed explicitly into constructors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Spreadsheet id rows are appended to.
    pub destination_id: String,
    /// Sheet (tab) inside the spreadsheet; created on first run.
    pub sheet_name: String,
    pub filter_rules: Vec<FilterRule>,
    pub case_sensitive: bool,
    pub run_mode: RunMode,
    pub poll_interval_secs: u64,
    /// Set `\Seen` on the provider after a row is recorded.
    pub mark_handled: bool,
    /// Add a fifth column listing the rules that matched.
    pub include_filter_match: bool,
    /// Upper bound on any single network call.
    pub network_timeout_secs: u64,
    pub max_subject_chars: usize,
    pub max_body_chars: usize,
    pub state: StateConfig,
    pub imap: ImapConfig,
    pub sheets: SheetsConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            destination_id: String::new(),
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
            filter_rules: Vec::new(),
            case_sensitive: false,
            run_mode: RunMode::Once,
            poll_interval_secs: 300, // 5 minutes
            mark_handled: false,
            include_filter_match: false,
            network_timeout_secs: 30,
            max_subject_chars: 200,
            max_body_chars: 5000,
            state: StateConfig::default(),
            imap: ImapConfig::default(),
            sheets: SheetsConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Path of the config file, from `INBOX_SHEETS_CONFIG` or the default.
    pub fn path_from_env() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::MissingRequired {
                    key: path.display().to_string(),
                    hint: format!("Create it or point {CONFIG_PATH_ENV} at an existing file."),
                });
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Self::from_json(&bytes)
    }

    /// Parse and validate config JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_slice(bytes).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check required fields and ranges. Also compiles the rule set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require(&self.destination_id, "destination_id", "Set it to the spreadsheet id.")?;
        require(&self.sheet_name, "sheet_name", "Leave it out to use the default.")?;
        require(&self.imap.host, "imap.host", "e.g. imap.gmail.com")?;
        require(&self.imap.username, "imap.username", "The mailbox login.")?;
        require(&self.imap.mailbox, "imap.mailbox", "Leave it out to use INBOX.")?;
        require(&self.sheets.api_base, "sheets.api_base", "Leave it out to use the default.")?;

        positive(self.network_timeout_secs, "network_timeout_secs")?;
        positive(self.max_subject_chars as u64, "max_subject_chars")?;
        positive(self.max_body_chars as u64, "max_body_chars")?;
        if self.run_mode == RunMode::Loop {
            positive(self.poll_interval_secs, "poll_interval_secs")?;
        }

        self.rule_set()?;
        Ok(())
    }

    /// The validated filter rules.
    pub fn rule_set(&self) -> Result<RuleSet, ConfigError> {
        RuleSet::new(self.filter_rules.clone(), self.case_sensitive)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn require(value: &str, key: &str, hint: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingRequired {
            key: key.to_string(),
            hint: hint.to_string(),
        });
    }
    Ok(())
}

fn positive(value: u64, key: &str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

// ── Secrets ─────────────────────────────────────────────────────────

/// Credentials supplied by the environment.
#[derive(Clone)]
pub struct Secrets {
    pub imap_password: SecretString,
    pub sheets_token: SecretString,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("imap_password", &"[REDACTED]")
            .field("sheets_token", &"[REDACTED]")
            .finish()
    }
}

impl Secrets {
    /// Read `IMAP_PASSWORD` and `SHEETS_ACCESS_TOKEN`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            imap_password: secret_var(IMAP_PASSWORD_ENV)?,
            sheets_token: secret_var(SHEETS_TOKEN_ENV)?,
        })
    }
}

fn secret_var(name: &str) -> Result<SecretString, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(SecretString::from(value)),
        _ => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}
