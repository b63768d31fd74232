use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("search identifier is empty")]
    EmptyIdentifier,

    #[error("output folder is not set")]
    MissingOutputFolder,

    #[error("output folder does not exist: {0}")]
    OutputFolderNotFound(PathBuf),

    #[error("date range is inverted: {from} is after {to}")]
    InvertedDateRange { from: NaiveDate, to: NaiveDate },
}

/// Quick date ranges offered alongside explicit from/to dates. When more
/// than one is requested the longest one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamedRange {
    #[serde(rename = "last_7_days")]
    Last7Days,
    #[serde(rename = "last_30_days")]
    Last30Days,
    #[serde(rename = "last_90_days")]
    Last90Days,
    #[serde(rename = "last_180_days")]
    Last180Days,
}

impl NamedRange {
    /// Window length in days, today included.
    pub fn days(self) -> i64 {
        match self {
            Self::Last7Days => 7,
            Self::Last30Days => 30,
            Self::Last90Days => 90,
            Self::Last180Days => 180,
        }
    }
}

impl FromStr for NamedRange {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "last_7_days" | "7" => Ok(Self::Last7Days),
            "last_30_days" | "30" => Ok(Self::Last30Days),
            "last_90_days" | "90" => Ok(Self::Last90Days),
            "last_180_days" | "180" => Ok(Self::Last180Days),
            other => Err(format!("invalid named range: {other}")),
        }
    }
}

/// What to do when a saved attachment would collide with an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Overwrite the existing file in place.
    Overwrite,
    /// Append `_1`, `_2`, ... before the extension until a free name is found.
    #[default]
    Suffix,
}

#[derive(Debug, Clone)]
pub struct SearchCriteria {
    /// The tax identifier (NIP) to look for in attachment text.
    pub identifier: String,
    /// Inclusive lower bound on the message date.
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on the message date.
    pub date_to: Option<NaiveDate>,
    /// Quick ranges; ignored when explicit dates are given.
    pub named_ranges: Vec<NamedRange>,
    /// Base folder to search, slash-separated. `None` searches everything.
    pub folder_path: Option<String>,
    /// Folder names (not paths) skipped during traversal.
    pub excluded_folders: HashSet<String>,
    /// Where matched attachments and their source messages are written.
    pub output_folder: PathBuf,
    /// Nest saved files under `MM.YYYY` subfolders keyed by the message date.
    pub sort_into_month_folders: bool,
    pub collision_policy: CollisionPolicy,
}

impl SearchCriteria {
    pub fn new(identifier: impl Into<String>, output_folder: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            date_from: None,
            date_to: None,
            named_ranges: Vec::new(),
            folder_path: None,
            excluded_folders: HashSet::new(),
            output_folder: output_folder.into(),
            sort_into_month_folders: false,
            collision_policy: CollisionPolicy::default(),
        }
    }

    /// Rejects bad criteria before any network activity happens.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.identifier.trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier);
        }

        if self.output_folder.as_os_str().is_empty() {
            return Err(ValidationError::MissingOutputFolder);
        }

        if !self.output_folder.is_dir() {
            return Err(ValidationError::OutputFolderNotFound(
                self.output_folder.clone(),
            ));
        }

        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(ValidationError::InvertedDateRange { from, to });
            }
        }

        Ok(())
    }
}
