//! Protocol-polymorphic mailbox access.
//!
//! The orchestrator is written once against [`MailClient`]; the concrete
//! variant (IMAP, POP3, Exchange over IMAP) is selected when the connection
//! is constructed. Folder and message failures are surfaced as errors for
//! the orchestrator to log and skip; only connection-level failures abort a
//! run.

pub mod imap;
pub mod pop3;

pub use self::imap::ImapClient;
pub use self::pop3::Pop3Client;

use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::daterange::ResolvedDateRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Imap,
    Pop3,
    /// Exchange mailboxes reached over their IMAP endpoint, with
    /// Exchange-style folder path resolution.
    Exchange,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "imap" => Ok(Self::Imap),
            "pop3" => Ok(Self::Pop3),
            "exchange" => Ok(Self::Exchange),
            other => Err(format!("invalid protocol: {other}")),
        }
    }
}

/// Connection parameters for one mailbox account.
#[derive(Debug, Clone)]
pub struct MailAccount {
    pub protocol: Protocol,
    pub server: String,
    pub port: u16,
    pub email: String,
    pub password: String,
    pub use_ssl: bool,
}

#[derive(Debug, Error)]
pub enum MailboxError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("folder error: {0}")]
    Folder(String),

    #[error("message fetch failed: {0}")]
    Fetch(String),
}

/// One message pulled from the mailbox, headers decoded and raw bytes kept
/// for `.eml` persistence. Produced per message and discarded after
/// processing; never mutated.
#[derive(Debug, Clone)]
pub struct CandidateMessage {
    pub message_id: String,
    pub uid: String,
    pub subject: String,
    pub from: String,
    pub date: Option<DateTime<Utc>>,
    pub folder: String,
    pub raw: Vec<u8>,
}

impl CandidateMessage {
    /// Builds a candidate from raw message bytes, decoding headers
    /// best-effort. Header parse failures leave fields empty rather than
    /// dropping the message.
    pub fn from_raw(uid: impl Into<String>, folder: impl Into<String>, raw: Vec<u8>) -> Self {
        let mut message_id = String::new();
        let mut subject = String::new();
        let mut from = String::new();
        let mut date = None;

        if let Ok((headers, _)) = mailparse::parse_headers(&raw) {
            use mailparse::MailHeaderMap;
            message_id = headers.get_first_value("Message-ID").unwrap_or_default();
            subject = headers.get_first_value("Subject").unwrap_or_default();
            from = headers.get_first_value("From").unwrap_or_default();
            date = headers
                .get_first_value("Date")
                .and_then(|value| parse_mail_date(&value));
        }

        Self {
            message_id,
            uid: uid.into(),
            subject,
            from,
            date,
            folder: folder.into(),
            raw,
        }
    }
}

/// Parses an RFC 2822 `Date` header value. `None` on anything unparsable;
/// callers must keep such messages rather than filter them out.
pub(crate) fn parse_mail_date(value: &str) -> Option<DateTime<Utc>> {
    let seconds = mailparse::dateparse(value).ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}

/// Capability interface over the wire protocols. Implementations own their
/// socket; the orchestrator owns the implementation for the duration of one
/// run and always calls [`MailClient::logout`] on the way out.
pub trait MailClient: Send {
    fn protocol(&self) -> Protocol;

    /// Folders to search under `base` (entire mailbox when `None`),
    /// excluding any folder whose name is in `excluded`. Exclusion prunes
    /// the folder's subtree.
    fn list_folders(
        &mut self,
        base: Option<&str>,
        excluded: &HashSet<String>,
    ) -> Result<Vec<String>, MailboxError>;

    /// Selects `folder` and returns identifiers of messages inside the date
    /// range. Server-side filtering is used where the protocol offers it;
    /// otherwise identifiers are filtered client-side by the `Date` header,
    /// keeping messages whose date is missing or unparsable.
    fn search_messages(
        &mut self,
        folder: &str,
        range: &ResolvedDateRange,
    ) -> Result<Vec<String>, MailboxError>;

    /// Fetches one message from the folder most recently selected by
    /// [`MailClient::search_messages`].
    fn fetch_message(&mut self, folder: &str, id: &str) -> Result<CandidateMessage, MailboxError>;

    fn logout(&mut self) -> Result<(), MailboxError>;
}

/// Opens an authenticated connection for the account's protocol.
pub fn connect(account: &MailAccount) -> Result<Box<dyn MailClient>, MailboxError> {
    match account.protocol {
        Protocol::Imap => Ok(Box::new(ImapClient::connect(
            account,
            imap::FolderStyle::Standard,
        )?)),
        Protocol::Exchange => Ok(Box::new(ImapClient::connect(
            account,
            imap::FolderStyle::ExchangePath,
        )?)),
        Protocol::Pop3 => Ok(Box::new(Pop3Client::connect(account)?)),
    }
}

/// Connects, authenticates and logs out again. Used by the host's
/// "test connection" action.
pub fn test_connection(account: &MailAccount) -> Result<(), MailboxError> {
    let mut client = connect(account)?;
    client.logout()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{parse_mail_date, CandidateMessage, Protocol};

    #[test]
    fn protocol_parses_known_names() {
        assert_eq!("IMAP".parse::<Protocol>().expect("imap"), Protocol::Imap);
        assert_eq!(
            "exchange".parse::<Protocol>().expect("exchange"),
            Protocol::Exchange
        );
        assert!("smtp".parse::<Protocol>().is_err());
    }

    #[test]
    fn candidate_decodes_headers_from_raw_bytes() {
        let raw = b"Subject: Faktura 01/2024\r\n\
            From: Biuro <biuro@example.com>\r\n\
            Message-ID: <abc@example.com>\r\n\
            Date: Mon, 15 Jan 2024 10:30:00 +0000\r\n\
            \r\n\
            tre\xc5\x9b\xc4\x87"
            .to_vec();

        let message = CandidateMessage::from_raw("7", "INBOX", raw);
        assert_eq!(message.subject, "Faktura 01/2024");
        assert_eq!(message.from, "Biuro <biuro@example.com>");
        assert_eq!(message.message_id, "<abc@example.com>");
        assert_eq!(
            message.date,
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap())
        );
        assert_eq!(message.folder, "INBOX");
    }

    #[test]
    fn unparsable_headers_leave_fields_empty() {
        let message = CandidateMessage::from_raw("1", "INBOX", b"\xff\xfe garbage".to_vec());
        assert_eq!(message.uid, "1");
        assert!(message.date.is_none());
    }

    #[test]
    fn mail_date_parsing_is_lenient_about_failures() {
        assert!(parse_mail_date("Mon, 15 Jan 2024 10:30:00 +0100").is_some());
        assert!(parse_mail_date("not a date").is_none());
        assert!(parse_mail_date("").is_none());
    }
}
