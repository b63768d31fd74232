//! invoscan — mailbox invoice scanner.
//!
//! Scans a mailbox (IMAP, POP3, or Exchange over IMAP) for PDF attachments
//! whose text contains a tax identifier (NIP), and saves every match
//! together with its source message. The pipeline runs on a dedicated
//! worker thread and reports back through a polled event queue:
//!
//! ```no_run
//! use invoscan::criteria::SearchCriteria;
//! use invoscan::found::FoundInvoiceLog;
//! use invoscan::mailbox::{self, MailAccount, Protocol};
//! use invoscan::orchestrator::{start_search, SearchEvent};
//! use invoscan::pdftext::{EngineChoice, PdfTextExtractor};
//!
//! # fn main() -> anyhow::Result<()> {
//! let account = MailAccount {
//!     protocol: Protocol::Imap,
//!     server: "imap.example.com".to_string(),
//!     port: 993,
//!     email: "user@example.com".to_string(),
//!     password: "secret".to_string(),
//!     use_ssl: true,
//! };
//! let client = mailbox::connect(&account)?;
//!
//! let criteria = SearchCriteria::new("1234567890", "/tmp/faktury");
//! let extractor = PdfTextExtractor::new(EngineChoice::Auto, "pol");
//! let log = FoundInvoiceLog::load(&FoundInvoiceLog::default_path()?);
//!
//! let handle = start_search(criteria, client, extractor, log)?;
//! for event in handle.wait() {
//!     if let SearchEvent::Found(record) = event {
//!         println!("found {}", record.filename);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod attachments;
pub mod cancel;
pub mod config;
pub mod criteria;
pub mod daterange;
pub mod found;
pub mod mailbox;
pub mod matcher;
pub mod orchestrator;
pub mod pdftext;

mod paths;

pub use cancel::CancelFlag;
pub use criteria::{CollisionPolicy, NamedRange, SearchCriteria, ValidationError};
pub use found::{FoundInvoiceLog, FoundInvoiceRecord};
pub use mailbox::{CandidateMessage, MailAccount, MailClient, MailboxError, Protocol};
pub use matcher::{MatchMethod, MatchResult};
pub use orchestrator::{
    start_search, FolderStats, SearchEvent, SearchHandle, SearchOutcome, SearchSummary,
};
pub use pdftext::{EngineChoice, PdfTextExtractor};
