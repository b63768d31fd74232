//! Application configuration file.
//!
//! A single JSON object with independent sections. Sections are written
//! additively: saving one section re-reads the file and leaves its sibling
//! sections untouched. Missing or unknown keys fall back to defaults so
//! configs written by older or newer versions keep loading.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::criteria::{CollisionPolicy, NamedRange};
use crate::mailbox::{MailAccount, Protocol};
use crate::pdftext::EngineChoice;

pub const CONFIG_FILE: &str = "config.json";

const MAILBOX_SECTION: &str = "mailbox";
const SEARCH_SECTION: &str = "search";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Config(String),
}

/// Connection parameters for the mailbox account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    pub protocol: Protocol,
    pub server: String,
    pub port: u16,
    pub email: String,
    pub password: String,
    pub use_ssl: bool,
    pub pdf_engine: EngineChoice,
    /// Primary OCR language; English is always added as the secondary.
    pub ocr_language: String,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Imap,
            server: String::new(),
            port: 993,
            email: String::new(),
            password: String::new(),
            use_ssl: true,
            pdf_engine: EngineChoice::Auto,
            ocr_language: "pol".to_string(),
        }
    }
}

impl MailboxConfig {
    pub fn account(&self) -> MailAccount {
        MailAccount {
            protocol: self.protocol,
            server: self.server.clone(),
            port: self.port,
            email: self.email.clone(),
            password: self.password.clone(),
            use_ssl: self.use_ssl,
        }
    }
}

/// Saved search defaults, restored into the search form on startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub identifier: String,
    pub output_folder: PathBuf,
    pub date_from: Option<chrono::NaiveDate>,
    pub date_to: Option<chrono::NaiveDate>,
    pub named_ranges: Vec<NamedRange>,
    pub folder_path: Option<String>,
    pub excluded_folders: Vec<String>,
    pub sort_into_month_folders: bool,
    pub collision_policy: CollisionPolicy,
}

pub fn default_path() -> Result<PathBuf, ConfigError> {
    crate::paths::app_home()
        .map(|home| home.join(CONFIG_FILE))
        .ok_or_else(|| ConfigError::Config("failed to determine home directory".to_string()))
}

pub fn load_mailbox(path: &Path) -> MailboxConfig {
    load_section(path, MAILBOX_SECTION)
}

pub fn load_search(path: &Path) -> SearchConfig {
    load_section(path, SEARCH_SECTION)
}

pub fn save_mailbox(path: &Path, config: &MailboxConfig) -> Result<(), ConfigError> {
    save_section(path, MAILBOX_SECTION, config)
}

pub fn save_search(path: &Path, config: &SearchConfig) -> Result<(), ConfigError> {
    save_section(path, SEARCH_SECTION, config)
}

fn load_section<T: DeserializeOwned + Default>(path: &Path, key: &str) -> T {
    let Some(value) = read_root(path).and_then(|mut root| {
        root.as_object_mut()
            .and_then(|object| object.remove(key))
    }) else {
        return T::default();
    };

    match serde_json::from_value(value) {
        Ok(section) => section,
        Err(error) => {
            warn!(
                "config section '{key}' in {} is malformed ({error}); using defaults",
                path.display()
            );
            T::default()
        }
    }
}

fn save_section<T: Serialize>(path: &Path, key: &str, value: &T) -> Result<(), ConfigError> {
    let mut root = read_root(path)
        .filter(serde_json::Value::is_object)
        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));

    root.as_object_mut()
        .expect("root is an object")
        .insert(key.to_string(), serde_json::to_value(value)?);

    crate::paths::write_atomic_json(path, &root)?;
    Ok(())
}

fn read_root(path: &Path) -> Option<serde_json::Value> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!("cannot read config file {} ({error})", path.display());
            }
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(root) => Some(root),
        Err(error) => {
            warn!(
                "config file {} is not valid JSON ({error}); treating as empty",
                path.display()
            );
            None
        }
    }
}
