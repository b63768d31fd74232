//! Writing matched attachments and their source messages to disk.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use tracing::warn;

use crate::attachments::{sanitize_filename, PdfAttachment};
use crate::criteria::CollisionPolicy;
use crate::mailbox::CandidateMessage;

pub(crate) struct SavedFiles {
    pub pdf_path: PathBuf,
    pub eml_path: PathBuf,
}

/// Persists the attachment and a companion `.eml` with the full source
/// message, applying the collision policy and the optional month subfolder.
/// File times are set to the message date afterwards; failing that is only
/// a warning.
pub(crate) fn save_match(
    output_folder: &Path,
    monthly_subfolders: bool,
    policy: CollisionPolicy,
    message: &CandidateMessage,
    attachment: &PdfAttachment,
) -> Result<SavedFiles> {
    let dir = target_dir(output_folder, message.date, monthly_subfolders);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create output folder {}", dir.display()))?;

    let safe_name = sanitize_filename(&attachment.filename);
    let pdf_path = unique_path(&dir, &safe_name, policy);
    std::fs::write(&pdf_path, &attachment.content)
        .with_context(|| format!("write attachment {}", pdf_path.display()))?;

    // The companion message file shares the attachment's final stem so the
    // pair stays together under the suffix policy.
    let stem = pdf_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| safe_name.clone());
    let eml_path = dir.join(format!("{stem}.eml"));
    std::fs::write(&eml_path, &message.raw)
        .with_context(|| format!("write message {}", eml_path.display()))?;

    if let Some(date) = message.date {
        for path in [&pdf_path, &eml_path] {
            if let Err(error) = set_file_times(path, date) {
                warn!("cannot set file times on {} ({error})", path.display());
            }
        }
    }

    Ok(SavedFiles { pdf_path, eml_path })
}

/// Output directory for one message, nesting under `MM.YYYY` when monthly
/// sorting is on and the message has a date.
pub(crate) fn target_dir(
    output_folder: &Path,
    date: Option<DateTime<Utc>>,
    monthly_subfolders: bool,
) -> PathBuf {
    match (monthly_subfolders, date) {
        (true, Some(date)) => output_folder.join(format!("{:02}.{}", date.month(), date.year())),
        _ => output_folder.to_path_buf(),
    }
}

/// Resolves a target path under the collision policy: overwrite in place,
/// or probe `name_1.ext`, `name_2.ext`, ... for the first free name.
pub(crate) fn unique_path(dir: &Path, filename: &str, policy: CollisionPolicy) -> PathBuf {
    let candidate = dir.join(filename);
    if policy == CollisionPolicy::Overwrite || !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(dot) => filename.split_at(dot),
        None => (filename, ""),
    };
    for n in 1.. {
        let candidate = dir.join(format!("{stem}_{n}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("suffix probing terminates at the first free name");
}

fn set_file_times(path: &Path, date: DateTime<Utc>) -> std::io::Result<()> {
    let timestamp =
        SystemTime::UNIX_EPOCH + Duration::from_secs(date.timestamp().max(0) as u64);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(
        std::fs::FileTimes::new()
            .set_accessed(timestamp)
            .set_modified(timestamp),
    )
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};

    use chrono::{TimeZone, Utc};

    use crate::attachments::PdfAttachment;
    use crate::criteria::CollisionPolicy;
    use crate::mailbox::CandidateMessage;

    use super::{save_match, target_dir, unique_path};

    fn temp_root() -> PathBuf {
        let root =
            std::env::temp_dir().join(format!("invoscan-persist-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).expect("create temp root");
        root
    }

    fn message() -> CandidateMessage {
        CandidateMessage::from_raw(
            "1",
            "INBOX",
            b"Subject: Faktura\r\nDate: Mon, 15 Jan 2024 10:00:00 +0000\r\n\r\nbody".to_vec(),
        )
    }

    #[test]
    fn suffix_policy_appends_counters_in_order() {
        let root = temp_root();

        for expected in ["faktura.pdf", "faktura_1.pdf", "faktura_2.pdf"] {
            let path = unique_path(&root, "faktura.pdf", CollisionPolicy::Suffix);
            assert_eq!(path.file_name().expect("file name"), expected);
            std::fs::write(&path, b"x").expect("occupy name");
        }

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn overwrite_policy_always_targets_the_same_path() {
        let root = temp_root();

        for _ in 0..3 {
            let path = unique_path(&root, "faktura.pdf", CollisionPolicy::Overwrite);
            assert_eq!(path, root.join("faktura.pdf"));
            std::fs::write(&path, b"x").expect("write file");
        }

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn monthly_subfolder_uses_month_dot_year() {
        let date = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let dir = target_dir(&PathBuf::from("/out"), Some(date), true);
        assert_eq!(dir, PathBuf::from("/out/01.2024"));

        // Without a date the root folder is used even when sorting is on.
        assert_eq!(
            target_dir(&PathBuf::from("/out"), None, true),
            PathBuf::from("/out")
        );
    }

    #[test]
    fn save_writes_attachment_with_companion_message_file() {
        let root = temp_root();
        let attachment = PdfAttachment {
            filename: "faktura.pdf".to_string(),
            content: b"%PDF-1.4 tresc".to_vec(),
        };

        let saved = save_match(&root, false, CollisionPolicy::Suffix, &message(), &attachment)
            .expect("save match");

        assert_eq!(
            std::fs::read(&saved.pdf_path).expect("read pdf"),
            attachment.content
        );
        assert!(saved.eml_path.exists());
        assert_eq!(saved.eml_path.extension().expect("extension"), "eml");

        // File times follow the message date.
        let expected = SystemTime::UNIX_EPOCH
            + Duration::from_secs(
                Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0)
                    .unwrap()
                    .timestamp() as u64,
            );
        let modified = std::fs::metadata(&saved.pdf_path)
            .expect("metadata")
            .modified()
            .expect("mtime");
        assert_eq!(modified, expected);

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn repeated_saves_keep_attachment_and_message_paired() {
        let root = temp_root();
        let attachment = PdfAttachment {
            filename: "faktura.pdf".to_string(),
            content: b"%PDF-1.4".to_vec(),
        };

        let first = save_match(&root, false, CollisionPolicy::Suffix, &message(), &attachment)
            .expect("first save");
        let second = save_match(&root, false, CollisionPolicy::Suffix, &message(), &attachment)
            .expect("second save");

        assert_eq!(first.pdf_path, root.join("faktura.pdf"));
        assert_eq!(first.eml_path, root.join("faktura.eml"));
        assert_eq!(second.pdf_path, root.join("faktura_1.pdf"));
        assert_eq!(second.eml_path, root.join("faktura_1.eml"));

        let _ = std::fs::remove_dir_all(root);
    }
}
