//! EXPUNGE command handler.
//!
//! Drops every `\Deleted` message from the selected folder and reports
//! each removal as `* N EXPUNGE`, where N is the sequence number the
//! client sees at that moment (later numbers shift down as earlier
//! messages go).

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::{Folder, Mailbox};
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Remove deleted messages and return the sequence numbers to report.
fn expunge_folder(folder: &mut Folder) -> Vec<usize> {
    let mut seqs = Vec::new();
    let mut removed = 0;
    for (idx, email) in folder.emails.iter().enumerate() {
        if email.deleted {
            seqs.push(idx + 1 - removed);
            removed += 1;
        }
    }
    folder.emails.retain(|e| !e.deleted);
    seqs
}

pub async fn handle_expunge<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    // Lock is released before any await.
    let seqs = mailbox
        .lock()
        .unwrap()
        .get_folder_mut(folder_name)
        .map(expunge_folder);

    let Some(seqs) = seqs else {
        let resp = format!("{tag} BAD Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    for seq in &seqs {
        let line = format!("* {seq} EXPUNGE\r\n");
        if write_line(stream, &line).await.is_err() {
            return;
        }
    }

    let resp = format!("{tag} OK EXPUNGE completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::{MailboxBuilder, message};
    use tokio::io::{AsyncReadExt, BufReader};

    async fn run_expunge(
        tag: &str,
        mailbox: &Mutex<Mailbox>,
        selected: Option<&str>,
    ) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        handle_expunge(tag, mailbox, selected, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        BufReader::new(client).read_to_end(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn inbox_with_deleted(deleted: &[u32]) -> Mutex<Mailbox> {
        let raw = message("ads@x.com", "Sale", "buy");
        let mut mb = MailboxBuilder::new()
            .folder("INBOX")
            .email(1, false, &raw)
            .email(2, false, &raw)
            .email(3, false, &raw)
            .build();
        for email in &mut mb.get_folder_mut("INBOX").unwrap().emails {
            email.deleted = deleted.contains(&email.uid);
        }
        Mutex::new(mb)
    }

    #[tokio::test]
    async fn removes_flagged_messages_with_shifting_sequence_numbers() {
        let mb = inbox_with_deleted(&[1, 3]);

        let output = run_expunge("A1", &mb, Some("INBOX")).await;

        assert_eq!(
            output,
            "* 1 EXPUNGE\r\n* 2 EXPUNGE\r\nA1 OK EXPUNGE completed\r\n"
        );
        let uids = mb.lock().unwrap().get_folder("INBOX").unwrap().uids();
        assert_eq!(uids, vec![2]);
    }

    #[tokio::test]
    async fn nothing_flagged_is_noop() {
        let mb = inbox_with_deleted(&[]);

        let output = run_expunge("A1", &mb, Some("INBOX")).await;

        assert_eq!(output, "A1 OK EXPUNGE completed\r\n");
        let uids = mb.lock().unwrap().get_folder("INBOX").unwrap().uids();
        assert_eq!(uids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mb = inbox_with_deleted(&[1]);

        let output = run_expunge("A1", &mb, None).await;

        assert!(output.contains("A1 BAD No folder selected"));
    }
}
