//! Account, rule and credential sources
//!
//! The engine only sees the three traits below. Storage formats are the
//! stores' business: rules arrive fully parsed, secrets arrive
//! decrypted.

use crate::account::{Account, Secret};
use crate::error::{Error, Result};
use crate::rule::{FilterRule, Scope};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Turns an account's credential handle into a usable secret.
pub trait CredentialProvider: Send + Sync {
    /// # Errors
    ///
    /// [`Error::Credential`] when the secret is missing or cannot be
    /// decrypted.
    fn resolve(&self, account: &Account) -> Result<Secret>;
}

pub trait RuleStore: Send + Sync {
    /// Rules that apply to every account.
    ///
    /// # Errors
    ///
    /// [`Error::Store`] when the backing storage cannot be read.
    fn load_global_rules(&self) -> Result<Vec<FilterRule>>;

    /// Rules scoped to `account_id` only.
    ///
    /// # Errors
    ///
    /// [`Error::Store`] when the backing storage cannot be read.
    fn load_account_rules(&self, account_id: &str) -> Result<Vec<FilterRule>>;
}

pub trait AccountStore: Send + Sync {
    /// # Errors
    ///
    /// [`Error::Store`] when the backing storage cannot be read.
    fn list_accounts(&self) -> Result<Vec<Account>>;
}

/// Accounts and rules held in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStore {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub rules: Vec<FilterRule>,
}

impl MemoryStore {
    #[must_use]
    pub const fn new(accounts: Vec<Account>, rules: Vec<FilterRule>) -> Self {
        Self { accounts, rules }
    }
}

impl AccountStore for MemoryStore {
    fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.clone())
    }
}

impl RuleStore for MemoryStore {
    fn load_global_rules(&self) -> Result<Vec<FilterRule>> {
        Ok(self
            .rules
            .iter()
            .filter(|r| r.scope == Scope::Global)
            .cloned()
            .collect())
    }

    fn load_account_rules(&self, account_id: &str) -> Result<Vec<FilterRule>> {
        Ok(self
            .rules
            .iter()
            .filter(|r| {
                matches!(&r.scope, Scope::Account(id) if id == account_id)
            })
            .cloned()
            .collect())
    }
}

/// A single JSON file `{ "accounts": [...], "rules": [...] }`, parsed
/// once when loaded.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
    data: MemoryStore,
}

impl JsonStore {
    /// # Errors
    ///
    /// [`Error::Store`] when the file cannot be read, and
    /// [`Error::Config`] when it does not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Store(format!("Failed to read {}: {e}", path.display()))
        })?;
        let data: MemoryStore = serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!("Invalid {}: {e}", path.display()))
        })?;

        debug!(
            "Loaded {} account(s) and {} rule(s) from {}",
            data.accounts.len(),
            data.rules.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    /// Write the current contents back to the file.
    ///
    /// # Errors
    ///
    /// [`Error::Store`] on any write failure.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.data).map_err(|e| {
            Error::Store(format!("Failed to serialize rules: {e}"))
        })?;
        std::fs::write(&self.path, json).map_err(|e| {
            Error::Store(format!(
                "Failed to write {}: {e}",
                self.path.display()
            ))
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn data(&self) -> &MemoryStore {
        &self.data
    }

    pub fn add_rules(&mut self, rules: impl IntoIterator<Item = FilterRule>) {
        self.data.rules.extend(rules);
    }
}

impl AccountStore for JsonStore {
    fn list_accounts(&self) -> Result<Vec<Account>> {
        self.data.list_accounts()
    }
}

impl RuleStore for JsonStore {
    fn load_global_rules(&self) -> Result<Vec<FilterRule>> {
        self.data.load_global_rules()
    }

    fn load_account_rules(&self, account_id: &str) -> Result<Vec<FilterRule>> {
        self.data.load_account_rules(account_id)
    }
}

/// Reads each account's secret from the environment variable named by
/// its credential handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn resolve(&self, account: &Account) -> Result<Secret> {
        match env::var(&account.credential) {
            Ok(value) if !value.is_empty() => Ok(Secret::new(value)),
            Ok(_) => Err(Error::Credential(format!(
                "{} is empty for {}",
                account.credential, account.id
            ))),
            Err(e) => Err(Error::Credential(format!(
                "{} for {}: {e}",
                account.credential, account.id
            ))),
        }
    }
}

/// Secrets keyed by credential handle.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    secrets: HashMap<String, Secret>,
}

impl StaticCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(
        mut self,
        handle: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        self.secrets.insert(handle.into(), Secret::new(secret));
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn resolve(&self, account: &Account) -> Result<Secret> {
        self.secrets
            .get(&account.credential)
            .cloned()
            .ok_or_else(|| {
                Error::Credential(format!("No secret for {}", account.id))
            })
    }
}
