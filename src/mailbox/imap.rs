//! IMAP variant of the mailbox client, also covering Exchange mailboxes
//! reached over their IMAP endpoint.

use std::collections::{HashMap, HashSet};
use std::net::TcpStream;

use chrono::{DateTime, Utc};
use imap::types::{Fetch, Mailbox, Name, NameAttribute, ZeroCopy};
use native_tls::{TlsConnector, TlsStream};
use tracing::{debug, warn};

use crate::daterange::ResolvedDateRange;

use super::{parse_mail_date, CandidateMessage, MailAccount, MailClient, MailboxError, Protocol};

/// Header fetches run in UID chunks of this size to bound round-trip and
/// response sizes on large folders.
const FETCH_BATCH_SIZE: usize = 200;

/// How folder identifiers in the search criteria are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderStyle {
    /// Plain IMAP: the base is a literal folder name.
    Standard,
    /// Exchange: the base is a slash-separated path resolved with
    /// case-insensitive segment matching, defaulting to the inbox.
    ExchangePath,
}

enum ImapSession {
    Tls(imap::Session<TlsStream<TcpStream>>),
    Plain(imap::Session<TcpStream>),
}

impl ImapSession {
    fn list(
        &mut self,
        reference: Option<&str>,
        pattern: Option<&str>,
    ) -> imap::error::Result<ZeroCopy<Vec<Name>>> {
        match self {
            Self::Tls(session) => session.list(reference, pattern),
            Self::Plain(session) => session.list(reference, pattern),
        }
    }

    fn select(&mut self, folder: &str) -> imap::error::Result<Mailbox> {
        match self {
            Self::Tls(session) => session.select(folder),
            Self::Plain(session) => session.select(folder),
        }
    }

    fn uid_search(&mut self, query: &str) -> imap::error::Result<HashSet<u32>> {
        match self {
            Self::Tls(session) => session.uid_search(query),
            Self::Plain(session) => session.uid_search(query),
        }
    }

    fn uid_fetch(
        &mut self,
        uid_set: &str,
        query: &str,
    ) -> imap::error::Result<ZeroCopy<Vec<Fetch>>> {
        match self {
            Self::Tls(session) => session.uid_fetch(uid_set, query),
            Self::Plain(session) => session.uid_fetch(uid_set, query),
        }
    }

    fn logout(&mut self) -> imap::error::Result<()> {
        match self {
            Self::Tls(session) => session.logout(),
            Self::Plain(session) => session.logout(),
        }
    }
}

#[derive(Debug, Clone)]
struct ListedFolder {
    name: String,
    segments: Vec<String>,
}

pub struct ImapClient {
    session: ImapSession,
    style: FolderStyle,
}

impl ImapClient {
    pub fn connect(account: &MailAccount, style: FolderStyle) -> Result<Self, MailboxError> {
        let session = if account.use_ssl {
            let tls = TlsConnector::builder().build()?;
            let client = imap::connect(
                (account.server.as_str(), account.port),
                account.server.as_str(),
                &tls,
            )
            .map_err(|error| MailboxError::Connection(error.to_string()))?;
            ImapSession::Tls(
                client
                    .login(&account.email, &account.password)
                    .map_err(|(error, _)| MailboxError::Auth(error.to_string()))?,
            )
        } else {
            let tcp = TcpStream::connect((account.server.as_str(), account.port))?;
            let client = imap::Client::new(tcp);
            ImapSession::Plain(
                client
                    .login(&account.email, &account.password)
                    .map_err(|(error, _)| MailboxError::Auth(error.to_string()))?,
            )
        };

        debug!(server = %account.server, port = account.port, "IMAP session established");
        Ok(Self { session, style })
    }

    fn listed_folders(&mut self) -> Result<Vec<ListedFolder>, MailboxError> {
        let names = self
            .session
            .list(None, Some("*"))
            .map_err(|error| MailboxError::Protocol(format!("LIST failed: {error}")))?;

        let mut folders = Vec::new();
        for name in names.iter() {
            if name.attributes().contains(&NameAttribute::NoSelect) {
                continue;
            }
            let full = name.name().to_string();
            let segments = match name.delimiter() {
                Some(delimiter) if !delimiter.is_empty() => full
                    .split(delimiter)
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
                _ => vec![full.clone()],
            };
            folders.push(ListedFolder {
                name: full,
                segments,
            });
        }
        Ok(folders)
    }
}

impl MailClient for ImapClient {
    fn protocol(&self) -> Protocol {
        match self.style {
            FolderStyle::Standard => Protocol::Imap,
            FolderStyle::ExchangePath => Protocol::Exchange,
        }
    }

    fn list_folders(
        &mut self,
        base: Option<&str>,
        excluded: &HashSet<String>,
    ) -> Result<Vec<String>, MailboxError> {
        let folders = self.listed_folders()?;

        let selected = match self.style {
            FolderStyle::Standard => select_standard(&folders, base),
            FolderStyle::ExchangePath => select_exchange(&folders, base),
        };

        if selected.is_empty() {
            if let Some(base) = base.map(str::trim).filter(|b| !b.is_empty()) {
                // Some servers omit folders from LIST that still select
                // fine; attempt the base literally and let selection decide.
                warn!("base folder '{base}' not in LIST response; trying it as-is");
                return Ok(vec![base.to_string()]);
            }
        }

        let names: Vec<String> = selected
            .into_iter()
            .filter(|folder| !folder.excluded_by(excluded))
            .map(|folder| folder.folder.name.clone())
            .collect();

        debug!("folders to search: {}", names.len());
        Ok(names)
    }

    fn search_messages(
        &mut self,
        folder: &str,
        range: &ResolvedDateRange,
    ) -> Result<Vec<String>, MailboxError> {
        self.session
            .select(folder)
            .map_err(|error| MailboxError::Folder(format!("cannot select '{folder}': {error}")))?;

        // Prefer server-side date filtering.
        if let Some(query) = range.imap_query() {
            match self.session.uid_search(&query) {
                Ok(uids) => return Ok(sorted_ids(uids)),
                Err(error) => {
                    warn!(
                        "server-side search '{query}' rejected in '{folder}' ({error}); \
                         falling back to client-side date filtering"
                    );
                }
            }
        }

        let uids = self
            .session
            .uid_search("ALL")
            .map_err(|error| MailboxError::Protocol(format!("SEARCH ALL failed: {error}")))?;
        let mut all: Vec<u32> = uids.into_iter().collect();
        all.sort_unstable();

        if range.is_unbounded() {
            return Ok(all.iter().map(u32::to_string).collect());
        }

        // Filter client-side on the Date header, fetched in bounded batches.
        // Messages with a missing or unparsable date are kept.
        let mut keep = Vec::new();
        for chunk in all.chunks(FETCH_BATCH_SIZE) {
            let dates = match self.fetch_header_dates(chunk) {
                Ok(dates) => dates,
                Err(error) => {
                    warn!(
                        "header fetch failed for a batch of {} messages in '{folder}' \
                         ({error}); including the whole batch",
                        chunk.len()
                    );
                    keep.extend(chunk.iter().map(u32::to_string));
                    continue;
                }
            };

            for uid in chunk {
                match dates.get(uid) {
                    Some(Some(date)) if !range.contains(*date) => {}
                    _ => keep.push(uid.to_string()),
                }
            }
        }
        Ok(keep)
    }

    fn fetch_message(&mut self, folder: &str, id: &str) -> Result<CandidateMessage, MailboxError> {
        let fetches = self
            .session
            .uid_fetch(id, "(UID RFC822)")
            .map_err(|error| MailboxError::Fetch(format!("UID FETCH {id} failed: {error}")))?;

        let fetch = fetches
            .iter()
            .next()
            .ok_or_else(|| MailboxError::Fetch(format!("no response for UID {id}")))?;
        let body = fetch
            .body()
            .ok_or_else(|| MailboxError::Fetch(format!("no body for UID {id}")))?;

        Ok(CandidateMessage::from_raw(id, folder, body.to_vec()))
    }

    fn logout(&mut self) -> Result<(), MailboxError> {
        self.session
            .logout()
            .map_err(|error| MailboxError::Protocol(format!("LOGOUT failed: {error}")))
    }
}

impl ImapClient {
    fn fetch_header_dates(
        &mut self,
        uids: &[u32],
    ) -> Result<HashMap<u32, Option<DateTime<Utc>>>, MailboxError> {
        let set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let fetches = self
            .session
            .uid_fetch(&set, "(UID RFC822.HEADER)")
            .map_err(|error| MailboxError::Fetch(error.to_string()))?;

        let mut dates = HashMap::with_capacity(uids.len());
        for fetch in fetches.iter() {
            let Some(uid) = fetch.uid else { continue };
            let date = fetch.header().and_then(|raw| {
                use mailparse::MailHeaderMap;
                let (headers, _) = mailparse::parse_headers(raw).ok()?;
                headers
                    .get_first_value("Date")
                    .and_then(|value| parse_mail_date(&value))
            });
            dates.insert(uid, date);
        }
        Ok(dates)
    }
}

/// A folder picked for searching, with its path relative to the base kept
/// for exclusion checks.
struct SelectedFolder<'a> {
    folder: &'a ListedFolder,
    relative: Vec<String>,
}

impl SelectedFolder<'_> {
    /// Exclusion is by exact folder name and prunes the whole subtree: an
    /// excluded name anywhere on the relative path drops the folder.
    fn excluded_by(&self, excluded: &HashSet<String>) -> bool {
        self.relative
            .iter()
            .any(|segment| excluded.contains(segment))
    }
}

fn select_standard<'a>(folders: &'a [ListedFolder], base: Option<&str>) -> Vec<SelectedFolder<'a>> {
    let Some(base) = base.map(str::trim).filter(|b| !b.is_empty()) else {
        return folders
            .iter()
            .map(|folder| SelectedFolder {
                folder,
                relative: folder.segments.clone(),
            })
            .collect();
    };

    let Some(root) = folders
        .iter()
        .find(|folder| folder.name.eq_ignore_ascii_case(base))
    else {
        return Vec::new();
    };

    descendants_of(folders, root, false)
}

fn select_exchange<'a>(folders: &'a [ListedFolder], base: Option<&str>) -> Vec<SelectedFolder<'a>> {
    let requested: Vec<String> = base
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(|b| {
            b.split('/')
                .map(str::trim)
                .filter(|segment| !segment.is_empty() && !is_inbox_alias(segment))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let root = if requested.is_empty() {
        folders
            .iter()
            .find(|folder| folder.name.eq_ignore_ascii_case("INBOX"))
    } else {
        folders.iter().find(|folder| {
            let segments: Vec<&String> = folder
                .segments
                .iter()
                .filter(|segment| !is_inbox_alias(segment))
                .collect();
            segments.len() == requested.len()
                && segments
                    .iter()
                    .zip(&requested)
                    .all(|(a, b)| a.eq_ignore_ascii_case(b))
        })
    };

    let Some(root) = root else {
        warn!(
            "folder path '{}' not found; falling back to the inbox",
            base.unwrap_or("INBOX")
        );
        return match folders
            .iter()
            .find(|folder| folder.name.eq_ignore_ascii_case("INBOX"))
        {
            Some(inbox) => descendants_of(folders, inbox, true),
            None => Vec::new(),
        };
    };

    descendants_of(folders, root, true)
}

fn descendants_of<'a>(
    folders: &'a [ListedFolder],
    root: &'a ListedFolder,
    case_insensitive: bool,
) -> Vec<SelectedFolder<'a>> {
    let matches = |a: &str, b: &str| {
        if case_insensitive {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    };

    let mut selected = vec![SelectedFolder {
        folder: root,
        relative: Vec::new(),
    }];

    for folder in folders {
        if folder.segments.len() <= root.segments.len() {
            continue;
        }
        let is_child = folder
            .segments
            .iter()
            .zip(&root.segments)
            .all(|(a, b)| matches(a, b));
        if is_child {
            selected.push(SelectedFolder {
                folder,
                relative: folder.segments[root.segments.len()..].to_vec(),
            });
        }
    }
    selected
}

fn is_inbox_alias(segment: &str) -> bool {
    segment.eq_ignore_ascii_case("inbox") || segment.eq_ignore_ascii_case("skrzynka odbiorcza")
}

fn sorted_ids(uids: HashSet<u32>) -> Vec<String> {
    let mut ids: Vec<u32> = uids.into_iter().collect();
    ids.sort_unstable();
    ids.iter().map(u32::to_string).collect()
}
