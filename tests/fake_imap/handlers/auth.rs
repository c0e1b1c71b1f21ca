//! LOGIN and LOGOUT handlers.
//!
//! LOGIN accepts any credentials unless the server was started with
//! `reject_logins`, in which case every attempt gets the RFC 5530
//! `AUTHENTICATIONFAILED` response code.

use crate::fake_imap::io::write_line;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the LOGIN command. Returns whether the session is now
/// authenticated.
pub async fn handle_login<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    reject: bool,
    stream: &mut BufReader<S>,
) -> bool {
    let resp = if reject {
        format!("{tag} NO [AUTHENTICATIONFAILED] Invalid credentials\r\n")
    } else {
        format!("{tag} OK LOGIN completed\r\n")
    };
    write_line(stream, &resp).await.is_ok() && !reject
}

/// Untagged BYE, then the tagged OK.
pub async fn handle_logout<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    stream: &mut BufReader<S>,
) {
    let resp = format!("* BYE Logging out\r\n{tag} OK LOGOUT completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, BufReader, DuplexStream};

    async fn output(client: DuplexStream) -> String {
        let mut buf = Vec::new();
        BufReader::new(client).read_to_end(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    async fn login(tag: &str, reject: bool) -> (String, bool) {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);
        let ok = handle_login(tag, reject, &mut stream).await;
        drop(stream);
        (output(client).await, ok)
    }

    #[tokio::test]
    async fn login_responds_with_ok() {
        let (output, ok) = login("A0001", false).await;
        assert!(ok);
        assert_eq!(output, "A0001 OK LOGIN completed\r\n");
    }

    #[tokio::test]
    async fn login_rejects_with_authenticationfailed() {
        let (output, ok) = login("A0001", true).await;
        assert!(!ok);
        assert_eq!(
            output,
            "A0001 NO [AUTHENTICATIONFAILED] Invalid credentials\r\n"
        );
    }

    #[tokio::test]
    async fn logout_sends_bye_before_ok() {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);
        handle_logout("X1", &mut stream).await;
        drop(stream);

        assert_eq!(
            output(client).await,
            "* BYE Logging out\r\nX1 OK LOGOUT completed\r\n"
        );
    }
}
