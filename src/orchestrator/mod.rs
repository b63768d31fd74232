//! The search pipeline coordinator.
//!
//! One run walks folders, messages and PDF attachments, extracts text,
//! matches the identifier and persists every hit. The whole state machine
//! executes on a single dedicated worker thread; the initiating side talks
//! to it only through the returned [`SearchHandle`]: a polled event queue
//! out, a cooperative cancellation flag in. The mailbox connection is owned
//! by the worker and logged out on every exit path.

mod events;
mod persist;

pub use events::{FolderStats, SearchEvent, SearchOutcome, SearchSummary};

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::attachments::{extract_pdf_attachments, PdfAttachment};
use crate::cancel::CancelFlag;
use crate::criteria::{SearchCriteria, ValidationError};
use crate::daterange;
use crate::found::{FoundInvoiceLog, FoundInvoiceRecord};
use crate::mailbox::{CandidateMessage, MailClient, MailboxError, Protocol};
use crate::matcher::{self, MatchResult};
use crate::pdftext::{Extraction, PdfTextExtractor};

/// Progress is reported on folder entry and then every this many messages.
const PROGRESS_EVERY_MESSAGES: usize = 10;

/// Handle held by the initiating side while a search runs.
pub struct SearchHandle {
    events: Receiver<SearchEvent>,
    cancel: CancelFlag,
    worker: Option<JoinHandle<()>>,
}

impl SearchHandle {
    /// Requests cancellation. Safe to call any number of times; the run
    /// emits a single `Finished` event either way.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The event queue, for hosts that want to block on it.
    pub fn events(&self) -> &Receiver<SearchEvent> {
        &self.events
    }

    /// Drains everything currently queued without blocking. Intended to be
    /// called on the host's own tick.
    pub fn drain_events(&self) -> Vec<SearchEvent> {
        self.events.try_iter().collect()
    }

    /// Blocks until the worker exits and returns all remaining events, the
    /// terminal `Finished` included.
    pub fn wait(mut self) -> Vec<SearchEvent> {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.events.try_iter().collect()
    }
}

/// Validates the criteria and spawns the worker thread for one run.
///
/// The connection must already be authenticated; the worker takes exclusive
/// ownership and closes it when the run ends. Validation failures surface
/// synchronously and nothing is spawned.
pub fn start_search(
    criteria: SearchCriteria,
    client: Box<dyn MailClient>,
    extractor: PdfTextExtractor,
    found_log: FoundInvoiceLog,
) -> Result<SearchHandle, ValidationError> {
    criteria.validate()?;

    let (events, receiver) = mpsc::channel();
    let cancel = CancelFlag::new();

    let worker = SearchWorker {
        criteria,
        client,
        extractor,
        found_log,
        events,
        cancel: cancel.clone(),
        stats: BTreeMap::new(),
        found_count: 0,
        missing_engines_reported: false,
    };
    let handle = std::thread::spawn(move || worker.run());

    Ok(SearchHandle {
        events: receiver,
        cancel,
        worker: Some(handle),
    })
}

struct SearchWorker {
    criteria: SearchCriteria,
    client: Box<dyn MailClient>,
    extractor: PdfTextExtractor,
    found_log: FoundInvoiceLog,
    events: Sender<SearchEvent>,
    cancel: CancelFlag,
    stats: BTreeMap<String, FolderStats>,
    found_count: usize,
    missing_engines_reported: bool,
}

impl SearchWorker {
    fn run(mut self) {
        let result = self.execute();

        if let Err(logout_error) = self.client.logout() {
            warn!("mailbox logout failed: {logout_error}");
        }

        let (outcome, error) = match result {
            Ok(outcome) => (outcome, None),
            Err(fatal) => {
                error!("search failed: {fatal}");
                (SearchOutcome::Failed, Some(fatal.to_string()))
            }
        };

        match outcome {
            SearchOutcome::Completed => self.log(format!(
                "Search finished: {} invoice(s) found",
                self.found_count
            )),
            SearchOutcome::Cancelled => self.log(format!(
                "Search cancelled: {} invoice(s) found before stopping",
                self.found_count
            )),
            SearchOutcome::Failed => {
                if let Some(message) = &error {
                    self.log(format!("Search failed: {message}"));
                }
            }
        }

        let _ = self.events.send(SearchEvent::Finished(SearchSummary {
            outcome,
            found_count: self.found_count,
            folder_stats: self.stats.clone(),
            error,
        }));
    }

    fn execute(&mut self) -> Result<SearchOutcome, MailboxError> {
        let range = daterange::resolve(&self.criteria);

        self.progress("Starting search", 0);
        self.log(format!(
            "Searching for identifier '{}'",
            self.criteria.identifier.trim()
        ));

        let folders = self.client.list_folders(
            self.criteria.folder_path.as_deref(),
            &self.criteria.excluded_folders,
        )?;
        if folders.is_empty() {
            return Err(MailboxError::Folder(
                "no folders available to search".to_string(),
            ));
        }
        self.log(format!("Folders to search: {}", folders.len()));

        let folder_count = folders.len();
        for (folder_index, folder) in folders.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(SearchOutcome::Cancelled);
            }

            self.progress(
                format!("Searching folder '{folder}'"),
                percent(folder_index, 0, 1, folder_count),
            );
            self.stats.entry(folder.clone()).or_default();

            let ids = match self.client.search_messages(folder, &range) {
                Ok(ids) => ids,
                Err(folder_error) => {
                    warn!("skipping folder '{folder}': {folder_error}");
                    self.log(format!("Skipping folder '{folder}': {folder_error}"));
                    continue;
                }
            };
            self.log(format!(
                "Folder '{folder}': {} message(s) to check",
                ids.len()
            ));

            let message_total = ids.len();
            for (message_index, id) in ids.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    return Ok(SearchOutcome::Cancelled);
                }

                if (message_index + 1) % PROGRESS_EVERY_MESSAGES == 0 {
                    self.progress(
                        format!(
                            "Folder '{folder}': checked {}/{message_total} messages",
                            message_index + 1
                        ),
                        percent(folder_index, message_index + 1, message_total, folder_count),
                    );
                }

                let message = match self.client.fetch_message(folder, id) {
                    Ok(message) => message,
                    Err(fetch_error) => {
                        warn!("skipping message {id} in '{folder}': {fetch_error}");
                        continue;
                    }
                };

                // The candidate lists are already date-filtered, but the
                // boundary check is cheap and canonical here. Messages
                // without a parseable date are always processed.
                if let Some(date) = message.date {
                    if !range.contains(date) {
                        continue;
                    }
                }

                self.stats.entry(folder.clone()).or_default().total_checked += 1;
                self.process_message(folder, &message);
            }
        }

        Ok(SearchOutcome::Completed)
    }

    fn process_message(&mut self, folder: &str, message: &CandidateMessage) {
        let parsed = match mailparse::parse_mail(&message.raw) {
            Ok(parsed) => parsed,
            Err(parse_error) => {
                warn!(
                    "cannot parse message {} in '{folder}': {parse_error}",
                    message.uid
                );
                return;
            }
        };

        let require_disposition = self.client.protocol() != Protocol::Exchange;
        for attachment in extract_pdf_attachments(&parsed, require_disposition) {
            if self.cancel.is_cancelled() {
                return;
            }

            let result = self.match_attachment(&attachment);
            if result.found {
                debug!(
                    method = ?result.method,
                    "identifier found in '{}'", attachment.filename
                );
                self.persist_match(folder, message, &attachment, &result);
            }
        }
    }

    fn match_attachment(&mut self, attachment: &PdfAttachment) -> MatchResult {
        match self
            .extractor
            .extract_text(&attachment.content, &self.cancel)
        {
            Extraction::Text { family, text } => {
                matcher::match_identifier(&text, &self.criteria.identifier).for_family(family)
            }
            Extraction::Empty => MatchResult::not_found(),
            Extraction::Failed(extract_error) => {
                self.log(format!(
                    "Cannot read attachment '{}': {extract_error}",
                    attachment.filename
                ));
                MatchResult::error(extract_error)
            }
            Extraction::MissingDependencies => {
                if !self.missing_engines_reported {
                    self.missing_engines_reported = true;
                    self.log(
                        "No PDF engine available; attachments cannot be searched".to_string(),
                    );
                }
                MatchResult::missing_dependencies()
            }
        }
    }

    fn persist_match(
        &mut self,
        folder: &str,
        message: &CandidateMessage,
        attachment: &PdfAttachment,
        result: &MatchResult,
    ) {
        let saved = match persist::save_match(
            &self.criteria.output_folder,
            self.criteria.sort_into_month_folders,
            self.criteria.collision_policy,
            message,
            attachment,
        ) {
            Ok(saved) => saved,
            Err(save_error) => {
                // A match that could not be saved is not counted as found.
                error!(
                    "failed to save matched attachment '{}' from message {}: {save_error:#}",
                    attachment.filename, message.uid
                );
                self.log(format!(
                    "ERROR: match in '{}' could not be saved: {save_error:#}",
                    attachment.filename
                ));
                return;
            }
        };

        let filename = saved
            .pdf_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| attachment.filename.clone());

        let record = FoundInvoiceRecord {
            date: message
                .date
                .map(|date| date.to_rfc3339())
                .unwrap_or_default(),
            sender: message.from.clone(),
            subject: message.subject.clone(),
            filename: filename.clone(),
            file_path: saved.pdf_path.clone(),
            found_timestamp: Utc::now().to_rfc3339(),
        };
        if let Err(log_error) = self.found_log.append(record.clone()) {
            warn!("could not persist the found-invoices log: {log_error}");
        }

        self.found_count += 1;
        self.stats
            .entry(folder.to_string())
            .or_default()
            .matches_found += 1;

        self.log(format!("Found: {filename} (message: {})", message.subject));
        if let Some(snippet) = result.snippets.first() {
            self.log(format!("  context: {snippet}"));
        }
        let _ = self.events.send(SearchEvent::Found(record));
    }

    fn log(&self, message: String) {
        info!("{message}");
        let _ = self.events.send(SearchEvent::Log(message));
    }

    fn progress(&self, message: impl Into<String>, percent: u8) {
        let _ = self.events.send(SearchEvent::Progress {
            message: message.into(),
            percent,
        });
    }
}

fn percent(
    folder_index: usize,
    message_index: usize,
    message_total: usize,
    folder_count: usize,
) -> u8 {
    if folder_count == 0 {
        return 0;
    }
    let message_fraction = if message_total == 0 {
        0.0
    } else {
        message_index as f32 / message_total as f32
    };
    (((folder_index as f32 + message_fraction) / folder_count as f32) * 100.0).min(100.0) as u8
}
