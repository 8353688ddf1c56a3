//! Per-item classification and the run summary it reduces into.

use crate::config::DispatchMode;
use crate::error::ItemError;
use serde::{Deserialize, Serialize};

/// Why a policy check stopped an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    NotAllowlisted,
    CapReached,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAllowlisted => "not_allowlisted",
            Self::CapReached => "cap_reached",
        }
    }
}

/// Non-error classification of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Sent,
    WouldSend,
    Blocked(BlockReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedItem {
    pub id: String,
    pub reason: BlockReason,
}

/// Item ids by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchDetails {
    pub successful: Vec<String>,
    pub failed: Vec<FailedItem>,
    #[serde(default)]
    pub blocked: Vec<BlockedItem>,
}

/// Summary of one dispatch run. Serialized verbatim by the HTTP route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub mode: DispatchMode,
    pub dry_run: bool,
    /// Items returned by the queue for this run.
    pub fetched: u64,
    pub sent: u64,
    pub would_send: u64,
    pub blocked: u64,
    pub errors: u64,
    /// Pending count reported by the queue after the run. `None` (serialized
    /// as `null`) when the count could not be read.
    pub remaining: Option<u64>,
    pub details: DispatchDetails,
}

impl DispatchResult {
    /// Empty summary for a run under `mode`.
    pub fn empty(mode: DispatchMode) -> Self {
        Self {
            mode,
            dry_run: mode == DispatchMode::DryRun,
            remaining: Some(0),
            ..Default::default()
        }
    }

    /// Fold one item's outcome into the summary.
    pub fn record(&mut self, id: &str, outcome: Result<ItemOutcome, ItemError>) {
        match outcome {
            Ok(ItemOutcome::Sent) => {
                self.sent += 1;
                self.details.successful.push(id.to_string());
            }
            Ok(ItemOutcome::WouldSend) => self.would_send += 1,
            Ok(ItemOutcome::Blocked(reason)) => {
                self.blocked += 1;
                self.details.blocked.push(BlockedItem {
                    id: id.to_string(),
                    reason,
                });
            }
            Err(e) => {
                self.errors += 1;
                self.details.failed.push(FailedItem {
                    id: id.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Number of items that received a classification.
    pub fn classified(&self) -> u64 {
        self.sent + self.would_send + self.blocked + self.errors
    }
}
