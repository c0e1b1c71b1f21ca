//! IMAP session provider
//!
//! Opens real IMAP connections with `async-imap` over tokio. The three
//! encryption modes share one code path: the transport is boxed as a
//! [`ImapStream`] once TLS (if any) is in place, then LOGIN and SELECT
//! INBOX run identically.

use crate::account::{Account, Encryption, Secret};
use crate::config::EngineConfig;
use crate::criteria::SearchPredicate;
use crate::error::{Error, Result};
use crate::session::{MailSession, SessionProvider, Uid, uid_set};
use async_trait::async_trait;
use futures::StreamExt;
use futures::io::{AsyncRead, AsyncWrite};
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info, warn};

/// Transport under an IMAP session: plain TCP or TLS.
pub trait ImapStream: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug> ImapStream for T {}

pub type ImapSession = async_imap::Session<Box<dyn ImapStream>>;

const INBOX: &str = "INBOX";

/// [`SessionProvider`] backed by real IMAP servers.
#[derive(Debug, Clone)]
pub struct ImapProvider {
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl ImapProvider {
    #[must_use]
    pub const fn new(
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            connect_timeout,
            command_timeout,
        }
    }

    #[must_use]
    pub const fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.connect_timeout, config.command_timeout)
    }

    async fn connect(
        &self,
        account: &Account,
        secret: &Secret,
    ) -> Result<ImapSession> {
        let addr = account.server();
        debug!(account = %account.id, "Connecting to IMAP server at {}", addr);

        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::Connect(format!("{addr}: {e}")))?;

        let stream: Box<dyn ImapStream> = match account.encryption {
            Encryption::None => Box::new(tcp.compat()),
            Encryption::ImplicitTls => {
                Box::new(tls_handshake(account, tcp).await?.compat())
            }
            Encryption::StartTls => {
                let mut client = async_imap::Client::new(tcp.compat());
                client
                    .run_command_and_check_ok("STARTTLS", None)
                    .await
                    .map_err(|e| Error::Tls(format!("STARTTLS failed: {e}")))?;
                let tcp = client.into_inner().into_inner();
                Box::new(tls_handshake(account, tcp).await?.compat())
            }
        };

        let client = async_imap::Client::new(stream);
        let mut session = client
            .login(&account.id, secret.expose())
            .await
            .map_err(|(e, _)| login_error(e))?;

        session.select(INBOX).await.map_err(|e| {
            imap_error(e, |m| {
                Error::Protocol(format!("Failed to select {INBOX}: {m}"))
            })
        })?;

        info!(
            account = %account.id,
            encryption = %account.encryption,
            "Connected to IMAP server"
        );
        Ok(session)
    }
}

#[async_trait]
impl SessionProvider for ImapProvider {
    type Session = ImapMailSession;

    async fn open(
        &self,
        account: &Account,
        secret: &Secret,
    ) -> Result<ImapMailSession> {
        let session = with_timeout(
            self.connect_timeout,
            "connect",
            self.connect(account, secret),
        )
        .await?;

        Ok(ImapMailSession {
            session,
            command_timeout: self.command_timeout,
        })
    }
}

/// A logged-in IMAP session with the INBOX selected.
pub struct ImapMailSession {
    session: ImapSession,
    command_timeout: Duration,
}

impl ImapMailSession {
    /// `UID STORE` with a silent flag update; `query` is e.g.
    /// `+FLAGS.SILENT (\Deleted)`.
    async fn store(&mut self, uids: &[Uid], query: &str) -> Result<()> {
        let set = uid_set(uids);
        let session = &mut self.session;
        let failed =
            |m: String| Error::Action(format!("Store failed: {m}"));
        with_timeout(self.command_timeout, "UID STORE", async move {
            let updates = session
                .uid_store(&set, query)
                .await
                .map_err(|e| imap_error(e, failed))?;
            let updates: Vec<_> = updates.collect().await;
            for update in updates {
                update.map_err(|e| imap_error(e, failed))?;
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl MailSession for ImapMailSession {
    async fn search(
        &mut self,
        predicate: &SearchPredicate,
    ) -> Result<BTreeSet<Uid>> {
        let session = &mut self.session;
        let timeout = self.command_timeout;
        let uids = with_timeout(timeout, "UID SEARCH", async move {
            session.uid_search(predicate.query()).await.map_err(|e| {
                imap_error(e, |m| {
                    Error::Protocol(format!("Search failed: {m}"))
                })
            })
        })
        .await?;

        debug!("UID SEARCH {} -> {} hit(s)", predicate, uids.len());
        Ok(uids.into_iter().collect())
    }

    async fn copy(&mut self, uids: &[Uid], folder: &str) -> Result<()> {
        let set = uid_set(uids);
        let session = &mut self.session;
        with_timeout(self.command_timeout, "UID COPY", async move {
            session.uid_copy(&set, folder).await.map_err(|e| {
                imap_error(e, |m| {
                    Error::Action(format!("Copy to {folder} failed: {m}"))
                })
            })
        })
        .await
    }

    async fn mark_deleted(&mut self, uids: &[Uid]) -> Result<()> {
        self.store(uids, "+FLAGS.SILENT (\\Deleted)").await
    }

    async fn unmark_deleted(&mut self, uids: &[Uid]) -> Result<()> {
        self.store(uids, "-FLAGS.SILENT (\\Deleted)").await
    }

    async fn commit(&mut self) -> Result<()> {
        let session = &mut self.session;
        let timeout = self.command_timeout;
        let removed = with_timeout(timeout, "EXPUNGE", async move {
            let seqs = session.expunge().await.map_err(|e| {
                imap_error(e, |m| Error::Action(format!("Expunge failed: {m}")))
            })?;
            let seqs: Vec<_> = seqs.collect().await;
            Ok(seqs.len())
        })
        .await?;

        debug!("EXPUNGE removed {} message(s)", removed);
        Ok(())
    }

    async fn close(&mut self) {
        let logout = self.session.logout();
        match tokio::time::timeout(self.command_timeout, logout).await {
            Ok(Ok(())) => debug!("Logged out"),
            Ok(Err(e)) => debug!("Logout failed: {e}"),
            Err(_) => warn!("Logout timed out"),
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T>> + Send,
) -> Result<T> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        Error::Timeout(format!("{what} after {}s", limit.as_secs_f32()))
    })?
}

/// Map an `async-imap` error, keeping transport failures distinct from
/// command-level rejections.
fn imap_error(
    e: async_imap::error::Error,
    wrap: impl FnOnce(String) -> Error,
) -> Error {
    match e {
        async_imap::error::Error::Io(io) => Error::Io(io),
        async_imap::error::Error::ConnectionLost => {
            Error::Connect("Connection lost".into())
        }
        other => wrap(other.to_string()),
    }
}

fn login_error(e: async_imap::error::Error) -> Error {
    imap_error(e, |m| Error::Auth(format!("Login failed: {m}")))
}

async fn tls_handshake(
    account: &Account,
    tcp: TcpStream,
) -> Result<TlsStream<TcpStream>> {
    let connector = tls_connector(account.accept_invalid_certs)?;
    let server_name = ServerName::try_from(account.host.clone())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;

    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::Tls(e.to_string()))
}

/// Build a TLS connector, verifying against the webpki roots unless
/// the account opted out.
fn tls_connector(accept_invalid_certs: bool) -> Result<TlsConnector> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder =
        rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(e.to_string()))?;

    let config = if accept_invalid_certs {
        let verifier = Arc::new(AcceptAnyServerCert { provider });
        builder
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth()
    } else {
        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Certificate verifier that trusts any server certificate but still
/// checks handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
