//! Run-level delivery policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Delivery mode for a dispatch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Classify every item but never call the provider or touch the queue.
    #[default]
    DryRun,
    /// Real sends limited by the per-run cap.
    Capped,
    /// Real sends. The per-run cap still applies.
    Full,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DryRun => "dry_run",
            Self::Capped => "capped",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "dry_run" | "dryrun" => Ok(Self::DryRun),
            "capped" => Ok(Self::Capped),
            "full" | "live" => Ok(Self::Full),
            other => Err(format!("unknown email mode: {other}")),
        }
    }
}

/// Policy for one dispatch run. Immutable for the duration of the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub mode: DispatchMode,
    /// Normalized (trimmed, lowercase) recipient addresses.
    pub allowlist: BTreeSet<String>,
    pub cap_max_per_run: u32,
    pub block_non_allowlist: bool,
    /// Prepended to every subject, followed by a space, when non-empty.
    pub subject_prefix: String,
    /// Sender address.
    pub from: String,
    /// Pause between consecutive provider sends.
    pub throttle_ms: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::DryRun,
            allowlist: BTreeSet::new(),
            cap_max_per_run: 50,
            block_non_allowlist: true,
            subject_prefix: String::new(),
            from: "Conference <no-reply@example.com>".to_string(),
            throttle_ms: 0,
        }
    }
}

impl EmailConfig {
    /// Replace the allowlist, normalizing entries and dropping blanks.
    pub fn with_allowlist<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowlist = entries
            .into_iter()
            .map(|e| normalize_address(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    /// Parse a comma separated allowlist (`EMAIL_ALLOWLIST` format).
    pub fn parse_allowlist(raw: &str) -> BTreeSet<String> {
        raw.split(',')
            .map(normalize_address)
            .filter(|e| !e.is_empty())
            .collect()
    }

    pub fn is_dry_run(&self) -> bool {
        self.mode == DispatchMode::DryRun
    }

    pub fn is_allowlisted(&self, address: &str) -> bool {
        self.allowlist.contains(&normalize_address(address))
    }

    /// Whether recipients outside the allowlist must be blocked. Depends only
    /// on `block_non_allowlist`, in every sending mode.
    pub fn enforces_allowlist(&self) -> bool {
        self.block_non_allowlist
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Apply the subject prefix.
    pub fn prefixed_subject(&self, subject: &str) -> String {
        let prefix = self.subject_prefix.trim();
        if prefix.is_empty() {
            subject.to_string()
        } else {
            format!("{prefix} {subject}")
        }
    }
}

fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}
