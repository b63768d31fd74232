//! Shared helpers for the fixed user-home files.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub(crate) const APP_DIR_NAME: &str = ".invoscan";

/// `~/.invoscan`, or `None` when the home directory cannot be determined.
pub(crate) fn app_home() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(APP_DIR_NAME))
}

/// Serializes `value` and replaces `path` atomically: the JSON is written to
/// a `.tmp` sibling first and renamed over the target, so readers never see
/// a half-written file and no temp file is left behind on success.
pub(crate) fn write_atomic_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;

    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
