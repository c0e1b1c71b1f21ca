//! Action execution: move or delete matched UIDs.
//!
//! UIDs go out in batches. A batch that the server rejects is retried
//! one UID at a time so a single bad message cannot sink its
//! neighbours. Nothing here expunges; the orchestrator commits once at
//! the end of the account pass so UIDs stay valid across rules.

use crate::error::Error;
use crate::evaluator::MatchSet;
use crate::rule::Action;
use crate::session::{MailSession, Uid, cancellable};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One UID the action could not be applied to.
#[derive(Debug)]
pub struct UidFailure {
    pub uid: Uid,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct ActionResult {
    /// UIDs the action fully succeeded on.
    pub applied: Vec<Uid>,
    pub failures: Vec<UidFailure>,
    /// A session-fatal error that stopped the action part-way.
    pub aborted: Option<Error>,
}

/// Where in the account pass an action runs.
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    /// Most UIDs sent in one COPY or STORE.
    pub batch_size: usize,
    /// UIDs already flagged `\Deleted` by an earlier rule in this pass.
    pub flagged: &'a MatchSet,
    /// Fires to abandon the protocol call in flight.
    pub cancel: &'a CancellationToken,
}

#[derive(Clone, Copy)]
enum Step<'a> {
    Copy(&'a str),
    MarkDeleted,
    UnmarkDeleted,
}

impl Step<'_> {
    async fn run<S>(
        self,
        session: &mut S,
        uids: &[Uid],
        cancel: &CancellationToken,
    ) -> Result<(), Error>
    where
        S: MailSession + ?Sized,
    {
        let call = async {
            match self {
                Self::Copy(folder) => session.copy(uids, folder).await,
                Self::MarkDeleted => session.mark_deleted(uids).await,
                Self::UnmarkDeleted => session.unmark_deleted(uids).await,
            }
        };
        cancellable(cancel, call).await
    }
}

/// Apply `action` to every UID in `matches`.
///
/// `move:<folder>` copies each UID and then flags only the UIDs whose
/// copy succeeded; `delete` flags directly. An empty match set issues
/// no protocol calls.
pub async fn apply<S>(
    session: &mut S,
    action: &Action,
    matches: &MatchSet,
    ctx: PassContext<'_>,
) -> ActionResult
where
    S: MailSession + ?Sized,
{
    let mut result = ActionResult::default();
    let uids: Vec<Uid> = matches.iter().copied().collect();

    for chunk in uids.chunks(ctx.batch_size.max(1)) {
        let failures = &mut result.failures;
        let outcome = match action {
            Action::Move(folder) => {
                move_chunk(session, folder, chunk, ctx, failures).await
            }
            Action::Delete => {
                isolate(session, Step::MarkDeleted, chunk, ctx.cancel, failures)
                    .await
            }
        };

        match outcome {
            Ok(done) => result.applied.extend(done),
            Err(e) => {
                warn!("Action {} aborted: {}", action, e);
                result.aborted = Some(e);
                break;
            }
        }
    }

    debug!(
        "Action {}: {} applied, {} failed",
        action,
        result.applied.len(),
        result.failures.len()
    );
    result
}

/// Copy `chunk` into `folder` and flag the originals that landed.
///
/// COPY keeps flags, so UIDs an earlier rule flagged are unflagged
/// first and flagged again afterwards. A UID that cannot be unflagged
/// is not copied.
async fn move_chunk<S>(
    session: &mut S,
    folder: &str,
    chunk: &[Uid],
    ctx: PassContext<'_>,
    failures: &mut Vec<UidFailure>,
) -> Result<Vec<Uid>, Error>
where
    S: MailSession + ?Sized,
{
    let preflagged: Vec<Uid> = chunk
        .iter()
        .copied()
        .filter(|uid| ctx.flagged.contains(uid))
        .collect();
    let unflagged = if preflagged.is_empty() {
        Vec::new()
    } else {
        debug!("Unflagging {} UID(s) before copy", preflagged.len());
        let step = Step::UnmarkDeleted;
        isolate(session, step, &preflagged, ctx.cancel, failures).await?
    };

    let copyable: Vec<Uid> = chunk
        .iter()
        .copied()
        .filter(|uid| !preflagged.contains(uid) || unflagged.contains(uid))
        .collect();
    let copied = if copyable.is_empty() {
        Vec::new()
    } else {
        let step = Step::Copy(folder);
        isolate(session, step, &copyable, ctx.cancel, failures).await?
    };

    // Unflagged UIDs go back to `\Deleted` whether or not they copied.
    let mut reflag: Vec<Uid> = copied.clone();
    reflag.extend(
        unflagged.iter().copied().filter(|uid| !copied.contains(uid)),
    );
    reflag.sort_unstable();
    if reflag.is_empty() {
        return Ok(copied);
    }

    let step = Step::MarkDeleted;
    let done = isolate(session, step, &reflag, ctx.cancel, failures).await?;
    Ok(copied.into_iter().filter(|uid| done.contains(uid)).collect())
}

/// Run `step` on `chunk`; on a non-fatal failure retry UID by UID and
/// return the UIDs that went through.
async fn isolate<S>(
    session: &mut S,
    step: Step<'_>,
    chunk: &[Uid],
    cancel: &CancellationToken,
    failures: &mut Vec<UidFailure>,
) -> Result<Vec<Uid>, Error>
where
    S: MailSession + ?Sized,
{
    match step.run(session, chunk, cancel).await {
        Ok(()) => return Ok(chunk.to_vec()),
        Err(e) if e.is_session_fatal() => return Err(e),
        Err(error) if chunk.len() == 1 => {
            failures.push(UidFailure {
                uid: chunk[0],
                error,
            });
            return Ok(Vec::new());
        }
        Err(e) => warn!(
            "Batch of {} UIDs failed ({}), retrying individually",
            chunk.len(),
            e
        ),
    }

    let mut done = Vec::with_capacity(chunk.len());
    for &uid in chunk {
        match step.run(session, &[uid], cancel).await {
            Ok(()) => done.push(uid),
            Err(e) if e.is_session_fatal() => return Err(e),
            Err(error) => {
                warn!(uid, "{}", error);
                failures.push(UidFailure { uid, error });
            }
        }
    }
    Ok(done)
}
