//! Run reports
//!
//! The orchestrator fills these in as it goes; once `run_filters`
//! returns they are plain data for the CLI or any other caller.

use crate::error::{Error, ErrorKind};
use crate::session::Uid;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Outcome of one account pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Every rule ran and the commit succeeded.
    Ok,
    /// The session was opened but something along the way failed, or
    /// the pass was cancelled before finishing.
    Partial,
    /// No session: connect, TLS, login, credential or rule loading
    /// failed.
    Failed,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Failed => "failed",
        })
    }
}

/// Lifecycle of one account pass.
///
/// `pending -> connecting -> authenticating -> evaluating -> committing
/// -> done`, with `failed` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    Pending,
    Connecting,
    Authenticating,
    Evaluating,
    Committing,
    Done,
    Failed,
}

impl AccountState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Whether the final EXPUNGE ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOutcome {
    Committed,
    /// Nothing was flagged deleted in this pass.
    NotNeeded,
    /// Dry run, cancellation, or a session failure.
    Skipped,
    Failed,
}

/// An error flattened for reporting, optionally pinned to the term or
/// UID it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
}

impl ReportError {
    #[must_use]
    pub fn new(error: &Error) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            term: None,
            uid: None,
        }
    }

    #[must_use]
    pub fn for_term(error: &Error, term: &str) -> Self {
        Self {
            term: Some(term.to_string()),
            ..Self::new(error)
        }
    }

    #[must_use]
    pub fn for_uid(error: &Error, uid: Uid) -> Self {
        Self {
            uid: Some(uid),
            ..Self::new(error)
        }
    }
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.term, self.uid) {
            (Some(term), _) => write!(f, "term {term:?}: {}", self.message),
            (None, Some(uid)) => write!(f, "UID {uid}: {}", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleReport {
    pub rule: String,
    pub action: String,
    pub matched: usize,
    pub applied: usize,
    pub matched_uids: Vec<Uid>,
    /// Matches left alone because an earlier rule already claimed them
    /// (first-match-wins only).
    pub skipped: usize,
    pub errors: Vec<ReportError>,
}

impl RuleReport {
    #[must_use]
    pub const fn new(rule: String, action: String) -> Self {
        Self {
            rule,
            action,
            matched: 0,
            applied: 0,
            matched_uids: Vec::new(),
            skipped: 0,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountReport {
    pub account: String,
    pub status: AccountStatus,
    pub state: AccountState,
    /// Where the pass was when it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<AccountState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportError>,
    pub commit: CommitOutcome,
    pub cancelled: bool,
    pub dry_run: bool,
    pub rules: Vec<RuleReport>,
}

impl AccountReport {
    #[must_use]
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            status: AccountStatus::Failed,
            state: AccountState::Pending,
            failed_in: None,
            error: None,
            commit: CommitOutcome::Skipped,
            cancelled: false,
            dry_run: false,
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn rule(&self, label: &str) -> Option<&RuleReport> {
        self.rules.iter().find(|r| r.rule == label)
    }

    #[must_use]
    pub fn matched(&self) -> usize {
        self.rules.iter().map(|r| r.matched).sum()
    }

    #[must_use]
    pub fn applied(&self) -> usize {
        self.rules.iter().map(|r| r.applied).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts: Vec<AccountReport>,
}

impl RunReport {
    #[must_use]
    pub fn account(&self, id: &str) -> Option<&AccountReport> {
        self.accounts.iter().find(|a| a.account == id)
    }

    #[must_use]
    pub fn count(&self, status: AccountStatus) -> usize {
        self.accounts.iter().filter(|a| a.status == status).count()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.count(AccountStatus::Failed) > 0
    }
}
