//! Filter rules
//!
//! A [`FilterRule`] says: when `field` contains any of `terms`, apply
//! `action`. Rules are either global or bound to a single account;
//! [`filter_set`] combines both groups into the ordered list that is
//! applied to one mailbox.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The message part a rule searches.
///
/// Unknown names are kept as [`Field::Other`] so that a single bad
/// rule is reported as a configuration error instead of failing the
/// whole rule file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Field {
    From,
    Subject,
    Body,
    Other(String),
}

impl Field {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::From => "from",
            Self::Subject => "subject",
            Self::Body => "body",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "from" => Self::From,
            "subject" => Self::Subject,
            "body" => Self::Body,
            _ => Self::Other(s.to_string()),
        }
    }
}

impl From<String> for Field {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<Field> for String {
    fn from(f: Field) -> Self {
        f.as_str().to_string()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to a matched message.
///
/// Written as `move:<folder>` or `delete` in rule files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Action {
    /// Copy to the folder, then flag the original `\Deleted`.
    Move(String),
    /// Flag `\Deleted` without copying.
    Delete,
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("delete") {
            return Ok(Self::Delete);
        }
        match s.split_once(':') {
            Some((verb, folder)) if verb.eq_ignore_ascii_case("move") => {
                let folder = folder.trim();
                if folder.is_empty() {
                    Err(Error::Config(
                        "move action needs a target folder".into(),
                    ))
                } else {
                    Ok(Self::Move(folder.to_string()))
                }
            }
            _ => Err(Error::Config(format!("Unknown action: {s}"))),
        }
    }
}

impl TryFrom<String> for Action {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Action> for String {
    fn from(a: Action) -> Self {
        a.to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Move(folder) => write!(f, "move:{folder}"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// Which accounts a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Account(String),
}

impl Scope {
    #[must_use]
    pub fn applies_to(&self, account_id: &str) -> bool {
        match self {
            Self::Global => true,
            Self::Account(id) => id == account_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Optional display name; reports fall back to the rule's summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub scope: Scope,
    pub field: Field,
    /// OR-combined: a message matches if it matches any term.
    pub terms: Vec<String>,
    pub action: Action,
}

impl FilterRule {
    #[must_use]
    pub fn global(field: Field, terms: &[&str], action: Action) -> Self {
        Self {
            name: None,
            scope: Scope::Global,
            field,
            terms: terms.iter().map(ToString::to_string).collect(),
            action,
        }
    }

    #[must_use]
    pub fn for_account(
        account_id: &str,
        field: Field,
        terms: &[&str],
        action: Action,
    ) -> Self {
        Self {
            scope: Scope::Account(account_id.to_string()),
            ..Self::global(field, terms, action)
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Label used in logs and reports.
    #[must_use]
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.to_string())
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> =
            self.terms.iter().map(|t| format!("{t:?}")).collect();
        write!(
            f,
            "{} contains {} -> {}",
            self.field,
            terms.join(" | "),
            self.action
        )
    }
}

/// Global rules followed by the account's own rules, each group in
/// stored order. Account rules bound to a different account are
/// dropped.
#[must_use]
pub fn filter_set(
    global: &[FilterRule],
    account: &[FilterRule],
    account_id: &str,
) -> Vec<FilterRule> {
    global
        .iter()
        .chain(account.iter().filter(|r| r.scope.applies_to(account_id)))
        .cloned()
        .collect()
}
