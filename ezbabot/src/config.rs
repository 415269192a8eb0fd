use std::{collections::HashMap, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use chrono::FixedOffset;
use clap::{ArgAction, Parser};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    classifier::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL, OpenAiConfig},
    farmhand::FarmSettings,
    storages::{ServiceAccountKey, SheetNames},
};

pub const PREDEFINED_BOT_TOKEN: Option<&str> = option_env!("PREDEFINED_BOT_TOKEN");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid allowed user entry `{0}`, expected id:name[:role]")]
    InvalidUser(String),
    #[error("unknown role `{0}`, expected admin or viewer")]
    InvalidRole(String),
    #[error("UTC offset of {0} hours is out of range")]
    InvalidOffset(i32),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid users file: {0}")]
    UsersFile(#[from] serde_yaml::Error),
    #[error("invalid service account: {0}")]
    ServiceAccount(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May record, edit and confirm
    #[default]
    Admin,
    /// Read-only: reports, details, inventory, export
    Viewer,
}

impl Role {
    pub fn can_write(self) -> bool {
        self == Role::Admin
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "viewer" | "read" | "readonly" => Ok(Role::Viewer),
            other => Err(ConfigError::InvalidRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedUser {
    pub id: u64,
    pub name: String,
    pub role: Role,
}

impl FromStr for AllowedUser {
    type Err = ConfigError;

    /// `id:name` or `id:name:role`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidUser(s.to_string());
        let mut parts = s.trim().splitn(3, ':');
        let id = parts
            .next()
            .and_then(|id| id.trim().parse::<u64>().ok())
            .ok_or_else(invalid)?;
        let name = parts
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(invalid)?
            .to_string();
        let role = match parts.next() {
            Some(role) => role.parse()?,
            None => Role::default(),
        };
        Ok(AllowedUser { id, name, role })
    }
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    name: String,
    #[serde(default)]
    role: Role,
}

/// Telegram user ids allowed to talk to the bot
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    users: HashMap<u64, AllowedUser>,
}

impl AllowList {
    pub fn new(users: impl IntoIterator<Item = AllowedUser>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
        }
    }

    pub fn get(&self, user_id: u64) -> Option<&AllowedUser> {
        self.users.get(&user_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.users.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Parse a YAML map of `id: {name, role}`
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let entries: HashMap<u64, UserEntry> = serde_yaml::from_str(content)?;
        Ok(Self::new(entries.into_iter().map(|(id, entry)| AllowedUser {
            id,
            name: entry.name,
            role: entry.role,
        })))
    }

    /// Later entries replace earlier ones with the same id
    pub fn merge(mut self, other: AllowList) -> Self {
        self.users.extend(other.users);
        self
    }
}

/// Where the ledger lives
pub enum LedgerBackend {
    Sheets {
        key: ServiceAccountKey,
        spreadsheet_id: String,
        sheets: SheetNames,
    },
    Yaml(PathBuf),
    Memory,
}

/// A Telegram bot that keeps a farm's books in a spreadsheet
#[derive(Parser, Debug)]
#[command(name = "ezbabot")]
#[command(about = "Farm ledger bot: Arabic messages in, spreadsheet rows out", long_about = None)]
pub struct Args {
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_MODEL", default_value = DEFAULT_MODEL)]
    pub openai_model: String,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub openai_base_url: String,

    /// Service account key: the JSON itself or a path to the key file
    #[arg(long, env = "GOOGLE_SERVICE_ACCOUNT_JSON", hide_env_values = true)]
    pub google_service_account_json: Option<String>,

    #[arg(long, env = "SPREADSHEET_ID")]
    pub spreadsheet_id: Option<String>,

    #[arg(long, env = "TRANSACTIONS_SHEET", default_value = "Transactions")]
    pub transactions_sheet: String,

    #[arg(long, env = "INVENTORY_SHEET", default_value = "Inventory")]
    pub inventory_sheet: String,

    #[arg(long, env = "PENDING_SHEET", default_value = "Pending")]
    pub pending_sheet: String,

    /// YAML ledger used when no spreadsheet is configured
    #[arg(long, env = "LEDGER_FILE")]
    pub ledger_file: Option<PathBuf>,

    /// Warn on expense receipts once this month's expenses reach this amount
    #[arg(long, env = "MONTHLY_EXPENSE_ALERT")]
    pub monthly_expense_alert: Option<f64>,

    /// Comma separated `id:name[:role]` entries
    #[arg(long, env = "ALLOWED_USERS", value_delimiter = ',')]
    pub allowed_users: Vec<AllowedUser>,

    #[arg(long, env = "USERS_FILE")]
    pub users_file: Option<PathBuf>,

    #[arg(long, env = "REQUIRE_CONFIRMATION", default_value_t = true, action = ArgAction::Set)]
    pub require_confirmation: bool,

    #[arg(long, env = "UTC_OFFSET_HOURS", default_value_t = 4, allow_hyphen_values = true)]
    pub utc_offset_hours: i32,

    /// Serve a webhook on this address instead of long polling
    #[arg(long, env = "LISTEN_ADDR")]
    pub listen_addr: Option<SocketAddr>,

    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 20)]
    pub request_timeout_secs: u64,
}

impl Args {
    pub fn bot_token(&self) -> Result<String, ConfigError> {
        self.bot_token
            .clone()
            .or_else(|| PREDEFINED_BOT_TOKEN.map(str::to_string))
            .ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn openai_config(&self) -> Result<OpenAiConfig, ConfigError> {
        let api_key = self
            .openai_api_key
            .clone()
            .ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;
        Ok(OpenAiConfig {
            api_key,
            model: self.openai_model.clone(),
            base_url: self.openai_base_url.clone(),
            timeout: self.request_timeout(),
        })
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.utc_offset_hours.saturating_mul(3600))
            .ok_or(ConfigError::InvalidOffset(self.utc_offset_hours))
    }

    pub fn farm_settings(&self) -> Result<FarmSettings, ConfigError> {
        Ok(FarmSettings {
            require_confirmation: self.require_confirmation,
            monthly_expense_alert: self.monthly_expense_alert,
            utc_offset: self.utc_offset()?,
        })
    }

    /// Users from `ALLOWED_USERS`, then `USERS_FILE` entries on top
    pub fn allow_list(&self) -> Result<AllowList, ConfigError> {
        let mut list = AllowList::new(self.allowed_users.iter().cloned());
        if let Some(path) = &self.users_file {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            list = list.merge(AllowList::from_yaml(&content)?);
        }
        Ok(list)
    }

    /// Spreadsheet when both id and credentials are given, else the YAML
    /// file, else memory
    pub fn ledger_backend(&self) -> Result<LedgerBackend, ConfigError> {
        match (&self.spreadsheet_id, &self.google_service_account_json) {
            (Some(spreadsheet_id), Some(credentials)) => Ok(LedgerBackend::Sheets {
                key: load_service_account(credentials)?,
                spreadsheet_id: spreadsheet_id.clone(),
                sheets: SheetNames {
                    transactions: self.transactions_sheet.clone(),
                    inventory: self.inventory_sheet.clone(),
                    pending: self.pending_sheet.clone(),
                },
            }),
            (Some(_), None) => Err(ConfigError::Missing("GOOGLE_SERVICE_ACCOUNT_JSON")),
            (None, _) => Ok(match &self.ledger_file {
                Some(path) => LedgerBackend::Yaml(path.clone()),
                None => LedgerBackend::Memory,
            }),
        }
    }
}

fn load_service_account(value: &str) -> Result<ServiceAccountKey, ConfigError> {
    let json = if value.trim_start().starts_with('{') {
        value.to_string()
    } else {
        let path = PathBuf::from(value);
        std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?
    };
    ServiceAccountKey::from_json(&json).map_err(|e| ConfigError::ServiceAccount(e.to_string()))
}
