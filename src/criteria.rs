//! IMAP SEARCH criteria for filter rules
//!
//! Each term of a rule becomes its own single-key predicate; the
//! evaluator ORs the results together. Terms are sent verbatim as IMAP
//! quoted strings, so matching semantics (case-insensitive substring on
//! most servers) are left to the server.

use crate::error::{Error, Result};
use crate::rule::Field;
use std::fmt;

/// One `UID SEARCH` query for one term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPredicate {
    pub term: String,
    query: String,
}

impl SearchPredicate {
    /// The query string passed to `UID SEARCH`.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }
}

impl fmt::Display for SearchPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query)
    }
}

/// Build one predicate per term.
///
/// # Errors
///
/// Returns [`Error::Config`] for an unsupported field, an empty term
/// list, an empty term, or a term containing CR, LF or NUL (which
/// cannot be sent as a quoted string).
pub fn build_predicates(
    field: &Field,
    terms: &[String],
) -> Result<Vec<SearchPredicate>> {
    let key = search_key(field)?;
    if terms.is_empty() {
        return Err(Error::Config(format!("Rule on '{field}' has no terms")));
    }

    terms
        .iter()
        .map(|term| {
            let quoted = quote(term)?;
            let query = if term.is_ascii() {
                format!("{key} {quoted}")
            } else {
                format!("CHARSET UTF-8 {key} {quoted}")
            };
            Ok(SearchPredicate {
                term: term.clone(),
                query,
            })
        })
        .collect()
}

fn search_key(field: &Field) -> Result<&'static str> {
    match field {
        Field::From => Ok("FROM"),
        Field::Subject => Ok("SUBJECT"),
        // TEXT, not BODY: headers are searched as well.
        Field::Body => Ok("TEXT"),
        Field::Other(name) => {
            Err(Error::Config(format!("Unsupported filter field: {name}")))
        }
    }
}

/// Render `term` as an IMAP quoted string (RFC 3501 `quoted`).
fn quote(term: &str) -> Result<String> {
    if term.is_empty() {
        return Err(Error::Config("Empty search term".into()));
    }
    if term.contains(['\r', '\n', '\0']) {
        return Err(Error::Config(format!(
            "Search term {term:?} contains a line break or NUL"
        )));
    }

    let mut out = String::with_capacity(term.len() + 2);
    out.push('"');
    for c in term.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    Ok(out)
}
