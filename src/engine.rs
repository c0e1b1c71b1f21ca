//! Account orchestration
//!
//! [`Engine::run_filters`] walks every account through
//! `pending -> connecting -> authenticating -> evaluating -> committing
//! -> done`. Accounts on different hosts run concurrently up to
//! [`EngineConfig::max_parallel_hosts`]; accounts on the same host run
//! one after another. Nothing that goes wrong in one account pass
//! reaches another: every error, and even a panic, ends up in that
//! account's [`AccountReport`].

use crate::account::{Account, Secret};
use crate::config::{EngineConfig, MatchPolicy};
use crate::error::{Error, Result};
use crate::evaluator::{MatchSet, evaluate};
use crate::executor::{self, PassContext};
use crate::report::{
    AccountReport, AccountState, AccountStatus, CommitOutcome, ReportError,
    RuleReport, RunReport,
};
use crate::rule::{FilterRule, filter_set};
use crate::session::{MailSession, SessionProvider, cancellable};
use crate::store::{AccountStore, CredentialProvider, RuleStore};
use chrono::Utc;
use futures::{FutureExt, StreamExt, stream};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Engine<P, C, S> {
    provider: P,
    credentials: C,
    store: S,
    config: EngineConfig,
}

impl<P, C, S> Engine<P, C, S>
where
    P: SessionProvider,
    C: CredentialProvider,
    S: AccountStore + RuleStore,
{
    #[must_use]
    pub const fn new(
        provider: P,
        credentials: C,
        store: S,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            credentials,
            store,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Run every applicable rule against each account's INBOX.
    ///
    /// With `None`, all accounts from the account store are processed.
    ///
    /// # Errors
    ///
    /// Only when the account list or the global rules cannot be loaded.
    /// Per-account failures are reported in the [`RunReport`].
    pub async fn run_filters(
        &self,
        accounts: Option<&[Account]>,
    ) -> Result<RunReport> {
        self.run_filters_with_cancel(accounts, &CancellationToken::new())
            .await
    }

    /// Like [`Engine::run_filters`], stopping early once `cancel` fires.
    ///
    /// Accounts not yet started are reported failed with a cancellation
    /// error. Accounts in flight abandon the protocol call under way,
    /// skip the EXPUNGE, close their session and report partial.
    ///
    /// # Errors
    ///
    /// See [`Engine::run_filters`].
    pub async fn run_filters_with_cancel(
        &self,
        accounts: Option<&[Account]>,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let accounts = match accounts {
            Some(accounts) => accounts.to_vec(),
            None => self.store.list_accounts()?,
        };
        let global = self.store.load_global_rules()?;

        info!(
            "Running {} global rule(s) over {} account(s)",
            global.len(),
            accounts.len()
        );

        let mut reports: Vec<Option<AccountReport>> =
            vec![None; accounts.len()];
        let mut passes = stream::iter(group_by_host(&accounts))
            .map(|group| {
                let accounts = &accounts;
                let global = &global;
                async move {
                    let mut done = Vec::with_capacity(group.len());
                    for idx in group {
                        let account = &accounts[idx];
                        let report =
                            self.guarded_pass(account, global, cancel).await;
                        done.push((idx, report));
                    }
                    done
                }
            })
            .buffer_unordered(self.config.max_parallel_hosts.max(1));

        while let Some(done) = passes.next().await {
            for (idx, report) in done {
                reports[idx] = Some(report);
            }
        }

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            accounts: reports.into_iter().flatten().collect(),
        };
        info!(
            "Run finished: {} ok, {} partial, {} failed",
            report.count(AccountStatus::Ok),
            report.count(AccountStatus::Partial),
            report.count(AccountStatus::Failed)
        );
        Ok(report)
    }

    /// Run one account pass, keeping whatever it reported and closing
    /// its session even if the pass panics.
    async fn guarded_pass(
        &self,
        account: &Account,
        global: &[FilterRule],
        cancel: &CancellationToken,
    ) -> AccountReport {
        let mut pass = Pass::new(account, self.config.dry_run);
        if cancel.is_cancelled() {
            return pass.fail(&Error::Cancelled);
        }

        let mut session = None;
        let run = self.account_pass(
            account,
            global,
            cancel,
            &mut pass,
            &mut session,
        );
        let ended_by = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(ended_by)) => ended_by,
            Ok(Err(e)) => return pass.fail(&e),
            Err(_) => {
                let e = Error::Internal("Account pass panicked".into());
                if session.is_none() {
                    return pass.fail(&e);
                }
                Some(e)
            }
        };

        if let Some(mut session) = session {
            let closed = AssertUnwindSafe(session.close()).catch_unwind().await;
            if closed.is_err() {
                warn!(account = %account.id, "Session close panicked");
            }
        }
        pass.finish(ended_by)
    }

    /// Drive one account from loading its rules to the commit.
    ///
    /// The opened session is left in `slot` for the caller to close.
    /// `Err` means the pass failed before a session existed; `Ok`
    /// carries the error, if any, that ended the pass early.
    async fn account_pass(
        &self,
        account: &Account,
        global: &[FilterRule],
        cancel: &CancellationToken,
        pass: &mut Pass,
        slot: &mut Option<P::Session>,
    ) -> Result<Option<Error>> {
        let own = self.store.load_account_rules(&account.id)?;
        let rules = filter_set(global, &own, &account.id);
        let secret = self.credentials.resolve(account)?;

        pass.transition(AccountState::Connecting);
        let opened = self.open_session(account, &secret, cancel).await;
        let session = match opened {
            Ok(session) => slot.insert(session),
            Err(e) => {
                if matches!(e, Error::Auth(_)) {
                    pass.transition(AccountState::Authenticating);
                }
                return Err(e);
            }
        };
        pass.transition(AccountState::Authenticating);
        pass.transition(AccountState::Evaluating);

        // UIDs flagged `\Deleted` so far; in a dry run, the UIDs that
        // would have been.
        let mut claimed = MatchSet::new();
        let mut aborted = None;
        for rule in &rules {
            if cancel.is_cancelled() {
                aborted = Some(Error::Cancelled);
                break;
            }
            let (report, fatal) = self
                .run_rule(session, &account.id, rule, &mut claimed, cancel)
                .await;
            pass.report.rules.push(report);
            if let Some(e) = fatal {
                aborted = Some(e);
                break;
            }
        }

        if aborted.is_none() && cancel.is_cancelled() {
            aborted = Some(Error::Cancelled);
        }
        if aborted.is_some() {
            return Ok(aborted);
        }
        Ok(self.commit(session, pass, cancel).await)
    }

    /// Open a session, retrying transport failures while attempts remain.
    async fn open_session(
        &self,
        account: &Account,
        secret: &Secret,
        cancel: &CancellationToken,
    ) -> Result<P::Session> {
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                result = self.provider.open(account, secret) => result,
            };

            match result {
                Err(e)
                    if e.is_retryable()
                        && attempt < self.config.connect_attempts =>
                {
                    warn!(
                        account = %account.id,
                        attempt,
                        "Connect failed, retrying in {}s: {}",
                        self.config.retry_delay.as_secs_f32(),
                        e
                    );
                    tokio::select! {
                        () = cancel.cancelled() => return Err(Error::Cancelled),
                        () = tokio::time::sleep(self.config.retry_delay) => {}
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Evaluate one rule and apply its action.
    ///
    /// Returns the rule's report and, if the session can no longer be
    /// used, the error that ends the pass.
    async fn run_rule(
        &self,
        session: &mut P::Session,
        account_id: &str,
        rule: &FilterRule,
        claimed: &mut MatchSet,
        cancel: &CancellationToken,
    ) -> (RuleReport, Option<Error>) {
        let mut report = RuleReport::new(rule.label(), rule.action.to_string());

        let evaluated = cancellable(cancel, evaluate(session, rule)).await;
        let evaluation = match evaluated {
            Ok(evaluation) => evaluation,
            Err(e) if e.is_session_fatal() => return (report, Some(e)),
            Err(e) => {
                warn!(
                    account = %account_id,
                    rule = %report.rule,
                    "Rule skipped: {}",
                    e
                );
                report.errors.push(ReportError::new(&e));
                return (report, None);
            }
        };

        report.errors.extend(
            evaluation
                .term_errors
                .iter()
                .map(|t| ReportError::for_term(&t.error, &t.term)),
        );
        let mut matches = evaluation.matches;
        report.matched = matches.len();
        report.matched_uids = matches.iter().copied().collect();

        if self.config.match_policy == MatchPolicy::FirstMatchWins {
            matches.retain(|uid| !claimed.contains(uid));
            report.skipped = report.matched - matches.len();
        }

        if matches.is_empty() || self.config.dry_run {
            claimed.extend(matches.iter().copied());
            info!(
                account = %account_id,
                rule = %report.rule,
                matched = report.matched,
                "Rule evaluated, nothing applied"
            );
            return (report, None);
        }
        if cancel.is_cancelled() {
            return (report, Some(Error::Cancelled));
        }

        let ctx = PassContext {
            batch_size: self.config.batch_size,
            flagged: claimed,
            cancel,
        };
        let result =
            executor::apply(session, &rule.action, &matches, ctx).await;
        report.applied = result.applied.len();
        report.errors.extend(
            result
                .failures
                .iter()
                .map(|f| ReportError::for_uid(&f.error, f.uid)),
        );
        claimed.extend(result.applied.iter().copied());

        info!(
            account = %account_id,
            rule = %report.rule,
            matched = report.matched,
            applied = report.applied,
            "Rule applied"
        );
        (report, result.aborted)
    }

    /// EXPUNGE once for the whole pass, if anything was flagged.
    async fn commit(
        &self,
        session: &mut P::Session,
        pass: &mut Pass,
        cancel: &CancellationToken,
    ) -> Option<Error> {
        if self.config.dry_run {
            pass.report.commit = CommitOutcome::Skipped;
            return None;
        }
        if pass.report.applied() == 0 {
            pass.report.commit = CommitOutcome::NotNeeded;
            return None;
        }

        pass.transition(AccountState::Committing);
        match cancellable(cancel, session.commit()).await {
            Ok(()) => {
                pass.report.commit = CommitOutcome::Committed;
                None
            }
            Err(e) => {
                pass.report.commit = CommitOutcome::Failed;
                Some(e)
            }
        }
    }
}

/// Report under construction for one account pass.
struct Pass {
    report: AccountReport,
}

impl Pass {
    fn new(account: &Account, dry_run: bool) -> Self {
        let mut report = AccountReport::new(account.id.clone());
        report.dry_run = dry_run;
        Self { report }
    }

    fn transition(&mut self, next: AccountState) {
        debug!(
            account = %self.report.account,
            "State {:?} -> {:?}",
            self.report.state,
            next
        );
        self.report.state = next;
    }

    /// No usable session: the account failed outright.
    fn fail(mut self, e: &Error) -> AccountReport {
        error!(
            account = %self.report.account,
            state = ?self.report.state,
            "Account failed: {}",
            e
        );
        self.report.cancelled = matches!(e, Error::Cancelled);
        self.report.failed_in = Some(self.report.state);
        self.report.error = Some(ReportError::new(e));
        self.report.status = AccountStatus::Failed;
        self.transition(AccountState::Failed);
        self.report
    }

    /// The session was open; settle status from what happened.
    fn finish(mut self, ended_by: Option<Error>) -> AccountReport {
        if let Some(e) = ended_by {
            warn!(
                account = %self.report.account,
                state = ?self.report.state,
                "Account pass ended early: {}",
                e
            );
            self.report.cancelled = matches!(e, Error::Cancelled);
            self.report.failed_in = Some(self.report.state);
            self.report.error = Some(ReportError::new(&e));
            self.report.status = AccountStatus::Partial;
            self.transition(AccountState::Failed);
            return self.report;
        }

        self.report.status =
            if self.report.rules.iter().all(RuleReport::is_clean) {
                AccountStatus::Ok
            } else {
                AccountStatus::Partial
            };
        self.transition(AccountState::Done);
        info!(
            account = %self.report.account,
            status = %self.report.status,
            matched = self.report.matched(),
            applied = self.report.applied(),
            "Account done"
        );
        self.report
    }
}

/// Account indices grouped by lowercased host, groups and members in
/// first-seen order.
fn group_by_host(accounts: &[Account]) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut by_host: HashMap<String, usize> = HashMap::new();

    for (idx, account) in accounts.iter().enumerate() {
        let host = account.host.to_ascii_lowercase();
        if let Some(&group) = by_host.get(&host) {
            groups[group].push(idx);
        } else {
            by_host.insert(host, groups.len());
            groups.push(vec![idx]);
        }
    }
    groups
}
