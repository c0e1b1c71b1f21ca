//! Import of the old triplet rule rows.
//!
//! Old rule files are a flat JSON array read three strings at a time:
//!
//! ```json
//! ["contain:from", "move_to:Trash", "filter:\"Casino.com,Lottery\""]
//! ```
//!
//! Old rule files always copied and deleted, so `move_to:<folder>`
//! becomes [`Action::Move`]. `move_to:delete` (any case) becomes
//! [`Action::Delete`].

use crate::error::{Error, Result};
use crate::rule::{Action, Field, FilterRule, Scope};
use std::path::Path;

/// Parse triplet rows into rules with the given scope.
///
/// # Errors
///
/// [`Error::Config`] naming the first malformed triplet.
pub fn parse_triplets(
    rows: &[String],
    scope: &Scope,
) -> Result<Vec<FilterRule>> {
    if !rows.len().is_multiple_of(3) {
        return Err(Error::Config(format!(
            "Legacy rule list has {} entries, expected a multiple of 3",
            rows.len()
        )));
    }

    rows.chunks(3)
        .enumerate()
        .map(|(i, row)| {
            parse_row(&row[0], &row[1], &row[2], scope).map_err(|e| {
                Error::Config(format!("Legacy rule #{}: {e}", i + 1))
            })
        })
        .collect()
}

/// Read a JSON file holding triplet rows.
///
/// # Errors
///
/// [`Error::Store`] if the file cannot be read, [`Error::Config`] if it
/// is not a string array of triplets.
pub fn load_file(
    path: impl AsRef<Path>,
    scope: &Scope,
) -> Result<Vec<FilterRule>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::Store(format!("Failed to read {}: {e}", path.display()))
    })?;
    let rows: Vec<String> = serde_json::from_str(&raw).map_err(|e| {
        Error::Config(format!("Invalid {}: {e}", path.display()))
    })?;
    parse_triplets(&rows, scope)
}

fn parse_row(
    condition: &str,
    action: &str,
    filter: &str,
    scope: &Scope,
) -> std::result::Result<FilterRule, String> {
    let field = match tagged(condition, "contain")? {
        "from" => Field::From,
        "subject" => Field::Subject,
        "body" => Field::Body,
        other => return Err(format!("unsupported field {other:?}")),
    };

    let target = tagged(action, "move_to")?;
    let action = if target.eq_ignore_ascii_case("delete") {
        Action::Delete
    } else if target.is_empty() {
        return Err("move_to needs a folder".into());
    } else {
        Action::Move(target.to_string())
    };

    let terms: Vec<String> = tagged(filter, "filter")?
        .replace('"', "")
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect();
    if terms.is_empty() {
        return Err("no filter terms".into());
    }

    Ok(FilterRule {
        name: None,
        scope: scope.clone(),
        field,
        terms,
        action,
    })
}

/// `tag:value` -> `value`, trimmed.
fn tagged<'a>(
    entry: &'a str,
    tag: &str,
) -> std::result::Result<&'a str, String> {
    match entry.split_once(':') {
        Some((t, value)) if t.trim() == tag => Ok(value.trim()),
        _ => Err(format!("expected {tag}:..., got {entry:?}")),
    }
}
