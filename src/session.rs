//! Mailbox session abstraction
//!
//! The engine never talks IMAP directly. It drives a [`MailSession`]
//! obtained from a [`SessionProvider`]; the real provider lives in
//! [`crate::connection`], tests substitute in-memory ones.
//!
//! Every message is addressed by UID. Sequence numbers shift when
//! messages are expunged, UIDs do not.

use crate::account::{Account, Secret};
use crate::criteria::SearchPredicate;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// IMAP message UID, stable for the lifetime of the selected mailbox.
pub type Uid = u32;

/// An authenticated session with the INBOX selected.
#[async_trait]
pub trait MailSession: Send {
    /// `UID SEARCH` with a single predicate.
    async fn search(
        &mut self,
        predicate: &SearchPredicate,
    ) -> Result<BTreeSet<Uid>>;

    /// `UID COPY` of `uids` into `folder`.
    async fn copy(&mut self, uids: &[Uid], folder: &str) -> Result<()>;

    /// `UID STORE +FLAGS (\Deleted)` on `uids`.
    async fn mark_deleted(&mut self, uids: &[Uid]) -> Result<()>;

    /// `UID STORE -FLAGS (\Deleted)` on `uids`.
    ///
    /// COPY carries flags over, so a message flagged earlier in the
    /// pass has to be unflagged before it is copied anywhere.
    async fn unmark_deleted(&mut self, uids: &[Uid]) -> Result<()>;

    /// `EXPUNGE`: permanently remove everything flagged `\Deleted`.
    async fn commit(&mut self) -> Result<()>;

    /// Log out. Errors are swallowed; the connection is gone either way.
    async fn close(&mut self);
}

/// Opens sessions for accounts.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    type Session: MailSession;

    /// Connect, negotiate TLS per [`Account::encryption`], log in, and
    /// select the INBOX.
    ///
    /// Connection problems surface as `Error::Connect`/`Error::Tls`/
    /// `Error::Io`, rejected credentials as `Error::Auth`.
    async fn open(
        &self,
        account: &Account,
        secret: &Secret,
    ) -> Result<Self::Session>;
}

/// Await an in-flight session call unless `cancel` fires first.
pub(crate) async fn cancellable<T: Send>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T>> + Send,
) -> Result<T> {
    tokio::select! {
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = call => result,
    }
}

/// Format UIDs as a compact IMAP sequence set (`1:3,7,9:10`).
///
/// Input need not be sorted; duplicates are collapsed.
#[must_use]
pub fn uid_set(uids: &[Uid]) -> String {
    let sorted: BTreeSet<Uid> = uids.iter().copied().collect();
    let mut parts: Vec<String> = Vec::new();
    let mut iter = sorted.into_iter();

    let Some(first) = iter.next() else {
        return String::new();
    };
    let (mut start, mut end) = (first, first);

    for uid in iter {
        if end.checked_add(1) != Some(uid) {
            parts.push(range(start, end));
            start = uid;
        }
        end = uid;
    }
    parts.push(range(start, end));
    parts.join(",")
}

fn range(start: Uid, end: Uid) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}:{end}")
    }
}
