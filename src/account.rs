//! Mail account connection parameters
//!
//! An [`Account`] names one mailbox server login. It carries an opaque
//! credential handle, never the secret itself; secrets are resolved
//! through a [`CredentialProvider`](crate::store::CredentialProvider)
//! right before the session is opened.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the connection to the IMAP server is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Encryption {
    /// Plain TCP, no TLS at all.
    None,
    /// TLS from the first byte (usually port 993).
    ImplicitTls,
    /// Plain TCP upgraded with STARTTLS before LOGIN.
    StartTls,
}

impl Encryption {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ImplicitTls => "implicit-tls",
            Self::StartTls => "starttls",
        }
    }

    /// Well-known port for this mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::ImplicitTls => 993,
            Self::None | Self::StartTls => 143,
        }
    }
}

impl FromStr for Encryption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "plain" => Ok(Self::None),
            "implicit-tls" | "ssl" | "tls" => Ok(Self::ImplicitTls),
            "starttls" => Ok(Self::StartTls),
            other => Err(Error::Config(format!(
                "Unknown encryption mode: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for Encryption {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Encryption> for String {
    fn from(e: Encryption) -> Self {
        e.as_str().to_string()
    }
}

impl fmt::Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mailbox login: the address doubles as the IMAP username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AccountRecord")]
pub struct Account {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub encryption: Encryption,
    /// Opaque handle passed to the credential provider.
    pub credential: String,
    /// Skip certificate verification (self-signed servers, local bridges).
    pub accept_invalid_certs: bool,
}

impl Account {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        encryption: Encryption,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port: encryption.default_port(),
            encryption,
            credential: credential.into(),
            accept_invalid_certs: false,
        }
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn accepting_invalid_certs(mut self) -> Self {
        self.accept_invalid_certs = true;
        self
    }

    /// `host:port`, used both for connecting and for grouping accounts
    /// that share a server.
    #[must_use]
    pub fn server(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// On-disk shape of an account; the port is optional and defaults by
/// encryption mode.
#[derive(Deserialize)]
struct AccountRecord {
    id: String,
    host: String,
    port: Option<u16>,
    #[serde(default = "default_encryption")]
    encryption: Encryption,
    credential: String,
    #[serde(default)]
    accept_invalid_certs: bool,
}

const fn default_encryption() -> Encryption {
    Encryption::ImplicitTls
}

impl TryFrom<AccountRecord> for Account {
    type Error = Error;

    fn try_from(r: AccountRecord) -> Result<Self> {
        if r.id.trim().is_empty() {
            return Err(Error::Config("Account id must not be empty".into()));
        }
        if r.host.trim().is_empty() {
            return Err(Error::Config(format!("Account {} has no host", r.id)));
        }
        Ok(Self {
            port: r.port.unwrap_or_else(|| r.encryption.default_port()),
            id: r.id,
            host: r.host,
            encryption: r.encryption,
            credential: r.credential,
            accept_invalid_certs: r.accept_invalid_certs,
        })
    }
}

/// A decrypted password. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}
