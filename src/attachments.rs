//! PDF attachment extraction from parsed MIME messages.

use mailparse::ParsedMail;
use tracing::{debug, warn};

/// Longest filename kept after sanitizing, extension included.
const MAX_FILENAME_LEN: usize = 200;
const FALLBACK_FILENAME: &str = "faktura.pdf";

/// A PDF attachment lifted out of one message. Lives only while that
/// message is being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfAttachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// Walks the MIME tree and decodes every qualifying PDF attachment.
///
/// A part qualifies when it carries a `.pdf` filename (case-insensitive)
/// and, when `require_disposition` is set, a `Content-Disposition` header.
/// Exchange traversal passes `false` there: its attachment objects don't
/// expose MIME disposition, so the filename is the canonical signal.
pub fn extract_pdf_attachments(mail: &ParsedMail<'_>, require_disposition: bool) -> Vec<PdfAttachment> {
    let mut out = Vec::new();
    walk(mail, require_disposition, &mut out);
    out
}

fn walk(part: &ParsedMail<'_>, require_disposition: bool, out: &mut Vec<PdfAttachment>) {
    if !part.ctype.mimetype.starts_with("multipart/") {
        if let Some(filename) = part_filename(part) {
            let has_disposition = part
                .get_headers()
                .into_iter()
                .any(|h| h.get_key().eq_ignore_ascii_case("Content-Disposition"));

            if filename.to_lowercase().ends_with(".pdf")
                && (!require_disposition || has_disposition)
            {
                match part.get_body_raw() {
                    Ok(content) => {
                        debug!("extracted PDF attachment '{filename}' ({} bytes)", content.len());
                        out.push(PdfAttachment { filename, content });
                    }
                    Err(error) => {
                        warn!("cannot decode attachment payload '{filename}': {error}");
                    }
                }
            }
        }
    }

    for sub in &part.subparts {
        walk(sub, require_disposition, out);
    }
}

fn part_filename(part: &ParsedMail<'_>) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|raw| decode_mime_filename(raw))
}

/// Decodes RFC 2047 encoded words that survived into a filename parameter,
/// leaving already-decoded names alone. Undecodable bytes are replaced
/// rather than failing the attachment.
fn decode_mime_filename(raw: &str) -> String {
    if !raw.contains("=?") {
        return raw.to_string();
    }

    let synthetic = format!("Content-Description: {raw}\n");
    match mailparse::parse_header(synthetic.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => raw.to_string(),
    }
}

/// Reduces an attachment filename to characters safe for every supported
/// filesystem, keeping letters (Polish included), digits and `-_.() `.
/// Long names are truncated with the extension preserved.
pub fn sanitize_filename(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .filter(|c| c.is_alphanumeric() || " -_.()".contains(*c))
        .collect();

    let safe = if safe.chars().count() > MAX_FILENAME_LEN {
        let (stem, ext) = match safe.rfind('.') {
            Some(dot) => safe.split_at(dot),
            None => (safe.as_str(), ""),
        };
        let keep = MAX_FILENAME_LEN.saturating_sub(ext.chars().count());
        let stem: String = stem.chars().take(keep).collect();
        format!("{stem}{ext}")
    } else {
        safe
    };

    if safe.trim().is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        safe
    }
}

#[cfg(test)]
mod tests {
    use super::{extract_pdf_attachments, sanitize_filename};

    fn multipart_mail(parts: &[&str]) -> String {
        let mut mail = String::from(
            "Subject: Faktura\r\n\
             From: biuro@example.com\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"sep\"\r\n\r\n",
        );
        for part in parts {
            mail.push_str("--sep\r\n");
            mail.push_str(part);
            mail.push_str("\r\n");
        }
        mail.push_str("--sep--\r\n");
        mail
    }

    #[test]
    fn finds_pdf_attachment_with_disposition() {
        let raw = multipart_mail(&[
            "Content-Type: text/plain\r\n\r\nFaktura w załączniku.",
            "Content-Type: application/pdf; name=\"faktura.pdf\"\r\n\
             Content-Disposition: attachment; filename=\"faktura.pdf\"\r\n\r\n\
             %PDF-1.4 fake content",
        ]);
        let mail = mailparse::parse_mail(raw.as_bytes()).expect("parse mail");

        let attachments = extract_pdf_attachments(&mail, true);
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "faktura.pdf");
        assert!(attachments[0].content.starts_with(b"%PDF-1.4"));
    }

    #[test]
    fn skips_pdf_without_disposition_on_legacy_path() {
        let part = "Content-Type: application/pdf; name=\"inline.pdf\"\r\n\r\n%PDF-1.4";
        let raw = multipart_mail(&[part]);
        let mail = mailparse::parse_mail(raw.as_bytes()).expect("parse mail");

        assert!(extract_pdf_attachments(&mail, true).is_empty());
        // The Exchange path qualifies on the filename alone.
        assert_eq!(extract_pdf_attachments(&mail, false).len(), 1);
    }

    #[test]
    fn skips_non_pdf_attachments() {
        let raw = multipart_mail(&[
            "Content-Type: image/png; name=\"logo.png\"\r\n\
             Content-Disposition: attachment; filename=\"logo.png\"\r\n\r\nPNG",
        ]);
        let mail = mailparse::parse_mail(raw.as_bytes()).expect("parse mail");
        assert!(extract_pdf_attachments(&mail, true).is_empty());
    }

    #[test]
    fn matches_pdf_extension_case_insensitively() {
        let raw = multipart_mail(&[
            "Content-Type: application/pdf; name=\"FAKTURA.PDF\"\r\n\
             Content-Disposition: attachment; filename=\"FAKTURA.PDF\"\r\n\r\n%PDF-1.4",
        ]);
        let mail = mailparse::parse_mail(raw.as_bytes()).expect("parse mail");
        assert_eq!(extract_pdf_attachments(&mail, true).len(), 1);
    }

    #[test]
    fn decodes_encoded_word_filenames() {
        let raw = multipart_mail(&[
            "Content-Type: application/pdf\r\n\
             Content-Disposition: attachment; filename=\"=?UTF-8?Q?faktura_stycze=C5=84.pdf?=\"\r\n\r\n\
             %PDF-1.4",
        ]);
        let mail = mailparse::parse_mail(raw.as_bytes()).expect("parse mail");

        let attachments = extract_pdf_attachments(&mail, true);
        assert_eq!(attachments.len(), 1);
        // Q-encoding turns the underscore into a space.
        assert_eq!(attachments[0].filename, "faktura styczeń.pdf");
    }

    #[test]
    fn sanitize_keeps_polish_letters_and_drops_unsafe_characters() {
        assert_eq!(
            sanitize_filename("faktura żółta 01/2024*.pdf"),
            "faktura żółta 012024.pdf"
        );
    }

    #[test]
    fn sanitize_caps_length_preserving_extension() {
        let long = format!("{}.pdf", "a".repeat(300));
        let sanitized = sanitize_filename(&long);
        assert_eq!(sanitized.chars().count(), 200);
        assert!(sanitized.ends_with(".pdf"));
    }

    #[test]
    fn sanitize_falls_back_on_empty_result() {
        assert_eq!(sanitize_filename("***"), "faktura.pdf");
    }
}
