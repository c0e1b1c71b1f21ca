//! In-process fake IMAP server for integration testing
//!
//! ## Connection lifecycle
//!
//! ```text
//!   Client connects via TCP
//!       |
//!   [implicit TLS: handshake first]
//!       |
//!   Server sends greeting: "* OK IMAP4rev1 ready\r\n"
//!       |
//!   [STARTTLS: client asks, then handshake]
//!       |
//!   LOGIN -> SELECT INBOX -> UID SEARCH / UID COPY / UID STORE
//!       -> EXPUNGE -> LOGOUT
//! ```
//!
//! Every client command starts with a **tag** the server echoes in its
//! completion response; lines prefixed with `*` are untagged data sent
//! before that final OK/NO/BAD:
//!
//! ```text
//!   Client:  A0003 UID SEARCH FROM "ads@x.com"
//!   Server:  * SEARCH 4 7
//!   Server:  A0003 OK SEARCH completed
//! ```

use super::handlers::{
    StoreArgs, handle_expunge, handle_login, handle_logout, handle_select,
    handle_uid_copy, handle_uid_search, handle_uid_store,
};
use super::io::write_line;
use super::mailbox::Mailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

const GREETING: &str = "* OK IMAP4rev1 Fake server ready\r\n";

/// How the listener secures connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Transport {
    /// Plaintext greeting, then STARTTLS.
    #[default]
    StartTls,
    /// TLS handshake before the greeting.
    ImplicitTls,
    /// No TLS at all.
    Plain,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerOptions {
    pub transport: Transport,
    /// Answer every LOGIN with `NO [AUTHENTICATIONFAILED]`.
    pub reject_logins: bool,
}

/// A fake IMAP server that runs on localhost with an OS-assigned port.
///
/// The server generates a self-signed TLS certificate at startup using
/// `rcgen`, so no cert files are needed. Clients must accept invalid
/// certificates to talk to it over TLS.
pub struct FakeImapServer {
    port: u16,
    mailbox: Arc<Mutex<Mailbox>>,
    /// Accept loop, aborted on drop.
    handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a STARTTLS server that accepts any login.
    pub async fn start(mailbox: Mailbox) -> Self {
        Self::start_with(mailbox, ServerOptions::default()).await
    }

    /// Start a server with the given options.
    ///
    /// The server runs until the `FakeImapServer` is dropped (the
    /// tokio task is aborted).
    pub async fn start_with(mailbox: Mailbox, options: ServerOptions) -> Self {
        // Multiple tests may race to install the provider, so we ignore
        // the error if it's already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let mailbox = Arc::new(Mutex::new(mailbox));
        let shared = Arc::clone(&mailbox);

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let mailbox = Arc::clone(&shared);
                tokio::spawn(async move {
                    handle_connection(stream, acceptor, options, &mailbox)
                        .await;
                });
            }
        });

        Self {
            port,
            mailbox,
            handle,
        }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Current mailbox state.
    pub fn snapshot(&self) -> Mailbox {
        self.mailbox.lock().unwrap().clone()
    }

    /// Add a message to a folder, as if it had just been delivered.
    pub fn deliver(&self, folder: &str, raw: &[u8]) -> u32 {
        let mut mailbox = self.mailbox.lock().unwrap();
        let folder = mailbox.get_folder_mut(folder).expect("folder exists");
        let uid = folder.max_uid() + 1;
        folder.emails.push(super::mailbox::TestEmail {
            uid,
            seen: false,
            deleted: false,
            raw: raw.to_vec(),
        });
        uid
    }
}

impl Drop for FakeImapServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    acceptor: TlsAcceptor,
    options: ServerOptions,
    mailbox: &Mutex<Mailbox>,
) {
    match options.transport {
        Transport::Plain => {
            let mut reader = BufReader::new(stream);
            if write_line(&mut reader, GREETING).await.is_ok() {
                handle_imap_session(reader, options, mailbox).await;
            }
        }
        Transport::ImplicitTls => {
            let Ok(tls_stream) = acceptor.accept(stream).await else {
                return;
            };
            let mut reader = BufReader::new(tls_stream);
            if write_line(&mut reader, GREETING).await.is_ok() {
                handle_imap_session(reader, options, mailbox).await;
            }
        }
        Transport::StartTls => {
            let mut reader = BufReader::new(stream);
            if write_line(&mut reader, GREETING).await.is_err() {
                return;
            }
            if !negotiate_starttls(&mut reader).await {
                return;
            }
            let tcp = reader.into_inner();
            let Ok(tls_stream) = acceptor.accept(tcp).await else {
                return;
            };
            let reader = BufReader::new(tls_stream);
            handle_imap_session(reader, options, mailbox).await;
        }
    }
}

/// Read the STARTTLS command and agree to it.
async fn negotiate_starttls(reader: &mut BufReader<TcpStream>) -> bool {
    let mut line = String::new();
    if reader.read_line(&mut line).await.is_err() {
        return false;
    }

    let Some((tag, command)) = line.trim().split_once(' ') else {
        return false;
    };

    if !command.eq_ignore_ascii_case("STARTTLS") {
        let resp = format!("{tag} BAD Expected STARTTLS\r\n");
        let _ = write_line(reader, &resp).await;
        return false;
    }

    let resp = format!("{tag} OK Begin TLS negotiation now\r\n");
    write_line(reader, &resp).await.is_ok()
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Run the IMAP command loop after the greeting (and TLS, if any).
///
/// Uses `imap-codec`'s `CommandCodec` to parse each client command
/// into a strongly-typed `Command`, then dispatches to the
/// appropriate handler based on the `CommandBody` variant.
///
/// Read handlers receive a snapshot (`Mailbox` clone) taken under
/// lock. Write handlers receive `&Mutex<Mailbox>` and lock briefly
/// to mutate state.
#[allow(clippy::too_many_lines)]
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    mut reader: BufReader<S>,
    options: ServerOptions,
    mailbox: &Mutex<Mailbox>,
) {
    let mut selected_folder: Option<String> = None;
    let mut authenticated = false;
    let codec = CommandCodec::default();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let Ok((_, command)) = codec.decode(line.as_bytes()) else {
            let tag = trimmed.split_whitespace().next().unwrap_or("*");
            let resp = format!("{tag} BAD Parse error\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        };

        let tag = command.tag.inner();

        match &command.body {
            CommandBody::Login { .. } => {
                authenticated =
                    handle_login(tag, options.reject_logins, &mut reader)
                        .await;
                continue;
            }
            CommandBody::Logout => {
                handle_logout(tag, &mut reader).await;
                break;
            }
            _ if !authenticated => {
                let resp = format!("{tag} NO Not authenticated\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
                continue;
            }
            _ => {}
        }

        // Take a snapshot for read-only handlers.
        let snap = mailbox.lock().unwrap().clone();

        match command.body {
            CommandBody::Select { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                selected_folder =
                    handle_select(tag, &name, &snap, &mut reader).await;
            }
            CommandBody::Search {
                criteria,
                uid: true,
                ..
            } => {
                handle_uid_search(
                    tag,
                    criteria.as_ref(),
                    &snap,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Store {
                ref sequence_set,
                uid: true,
                ref kind,
                ref response,
                ref flags,
                ..
            } => {
                let args = StoreArgs {
                    sequence_set,
                    kind,
                    response,
                    flags,
                };
                handle_uid_store(
                    tag,
                    &args,
                    mailbox,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Copy {
                ref sequence_set,
                mailbox: ref dest_mb,
                uid: true,
                ..
            } => {
                let dest_name = mailbox_name(dest_mb);
                handle_uid_copy(
                    tag,
                    sequence_set,
                    &dest_name,
                    mailbox,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Expunge => {
                let selected = selected_folder.as_deref();
                handle_expunge(tag, mailbox, selected, &mut reader).await;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}
