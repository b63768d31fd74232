use std::collections::BTreeMap;

use serde::Serialize;

use crate::found::FoundInvoiceRecord;

/// Terminal state of a search run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOutcome {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FolderStats {
    pub total_checked: usize,
    pub matches_found: usize,
}

/// Final summary, sent exactly once as the run's terminal event.
#[derive(Debug, Clone, Serialize)]
pub struct SearchSummary {
    pub outcome: SearchOutcome,
    pub found_count: usize,
    pub folder_stats: BTreeMap<String, FolderStats>,
    /// Present only when `outcome` is `Failed`.
    pub error: Option<String>,
}

/// Messages streamed from the worker to the initiating side. The initiator
/// drains these on its own schedule and never touches worker state.
#[derive(Debug, Clone)]
pub enum SearchEvent {
    Log(String),
    Progress { message: String, percent: u8 },
    Found(FoundInvoiceRecord),
    Finished(SearchSummary),
}
