//! Rule-based IMAP inbox filtering
//!
//! Runs a list of filter rules (`from`/`subject`/`body` contains any of
//! a few terms, then `move:<folder>` or `delete`) against the INBOX of
//! one or more IMAP accounts. Messages are addressed by UID throughout
//! and the mailbox is expunged once per account pass, after every rule
//! has run.
//!
//! The entry point is [`Engine::run_filters`], which returns a
//! [`RunReport`] with per-account and per-rule outcomes. Accounts,
//! rules and secrets come from the [`AccountStore`], [`RuleStore`] and
//! [`CredentialProvider`] traits; [`JsonStore`] and [`EnvCredentials`]
//! cover the common case.

mod account;
mod config;
mod connection;
mod criteria;
mod engine;
mod error;
mod evaluator;
mod executor;
pub mod legacy;
mod report;
mod rule;
mod session;
mod store;


pub use account::{Account, Encryption, Secret};
pub use config::{EngineConfig, MatchPolicy};
pub use connection::{ImapMailSession, ImapProvider};
pub use criteria::{SearchPredicate, build_predicates};
pub use engine::Engine;
pub use error::{Error, ErrorKind, Result};
pub use evaluator::{Evaluation, MatchSet, TermError, evaluate};
pub use executor::{ActionResult, PassContext, UidFailure, apply};
pub use report::{
    AccountReport, AccountState, AccountStatus, CommitOutcome, ReportError,
    RuleReport, RunReport,
};
pub use rule::{Action, Field, FilterRule, Scope, filter_set};
pub use session::{MailSession, SessionProvider, Uid, uid_set};
pub use store::{
    AccountStore, CredentialProvider, EnvCredentials, JsonStore, MemoryStore,
    RuleStore, StaticCredentials,
};
pub use tokio_util::sync::CancellationToken;

/// Engine wired to real IMAP servers.
pub type ImapEngine<C, S> = Engine<ImapProvider, C, S>;
