//! Rule evaluation: run a rule's searches and union the hits.

use crate::criteria::build_predicates;
use crate::error::{Error, Result};
use crate::rule::FilterRule;
use crate::session::{MailSession, Uid};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// UIDs matched by one rule in one session.
pub type MatchSet = BTreeSet<Uid>;

/// A search that failed for one term of a rule.
#[derive(Debug)]
pub struct TermError {
    pub term: String,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct Evaluation {
    pub matches: MatchSet,
    pub term_errors: Vec<TermError>,
}

/// Search every term of `rule` and OR the results.
///
/// A failing term is recorded in [`Evaluation::term_errors`] and the
/// remaining terms still run. Zero matches is not an error.
///
/// # Errors
///
/// Returns [`Error::Config`] before touching the session when the rule
/// cannot be turned into search predicates, and passes through any
/// session-fatal error (timeout, lost connection).
pub async fn evaluate<S>(
    session: &mut S,
    rule: &FilterRule,
) -> Result<Evaluation>
where
    S: MailSession + ?Sized,
{
    let predicates = build_predicates(&rule.field, &rule.terms)?;
    let mut evaluation = Evaluation::default();

    for predicate in &predicates {
        match session.search(predicate).await {
            Ok(uids) => {
                debug!(
                    term = %predicate.term,
                    hits = uids.len(),
                    "Term searched"
                );
                evaluation.matches.extend(uids);
            }
            Err(e) if e.is_session_fatal() => return Err(e),
            Err(e) => {
                warn!(term = %predicate.term, "Search failed: {}", e);
                evaluation.term_errors.push(TermError {
                    term: predicate.term.clone(),
                    error: e,
                });
            }
        }
    }

    Ok(evaluation)
}
