//! SELECT command handler.
//!
//! Sends the untagged data RFC 3501 requires (FLAGS, EXISTS, RECENT)
//! plus UIDVALIDITY and UIDNEXT, then a READ-WRITE OK. The filter
//! engine only ever selects INBOX, but any folder works.

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the SELECT command. Returns the selected folder name.
pub async fn handle_select<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    folder_name: &str,
    mailbox: &Mailbox,
    stream: &mut BufReader<S>,
) -> Option<String> {
    let Some(folder) = mailbox.get_folder(folder_name) else {
        let resp = format!("{tag} NO [NONEXISTENT] Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return None;
    };

    let resp = format!(
        "* FLAGS (\\Seen \\Deleted)\r\n\
         * {exists} EXISTS\r\n\
         * 0 RECENT\r\n\
         * OK [UIDVALIDITY 1]\r\n\
         * OK [UIDNEXT {next}]\r\n\
         {tag} OK [READ-WRITE] SELECT completed\r\n",
        exists = folder.emails.len(),
        next = folder.max_uid() + 1,
    );
    let _ = write_line(stream, &resp).await;
    Some(folder_name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::{MailboxBuilder, message};
    use tokio::io::{AsyncReadExt, BufReader};

    async fn run(
        tag: &str,
        folder_name: &str,
        mailbox: &Mailbox,
    ) -> (String, Option<String>) {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        let selected =
            handle_select(tag, folder_name, mailbox, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        BufReader::new(client).read_to_end(&mut buf).await.unwrap();
        (String::from_utf8(buf).unwrap(), selected)
    }

    #[tokio::test]
    async fn reports_exists_and_uidnext() {
        let raw = message("a@b.com", "Test", "Body");
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(5, false, &raw)
            .email(10, true, &raw)
            .build();

        let (output, selected) = run("A1", "INBOX", &mailbox).await;

        assert_eq!(selected.as_deref(), Some("INBOX"));
        assert!(output.contains("* 2 EXISTS\r\n"));
        assert!(output.contains("* OK [UIDNEXT 11]\r\n"));
        assert!(output.ends_with("A1 OK [READ-WRITE] SELECT completed\r\n"));
    }

    #[tokio::test]
    async fn empty_folder_starts_uids_at_one() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();

        let (output, _) = run("A1", "INBOX", &mailbox).await;

        assert!(output.contains("* 0 EXISTS\r\n"));
        assert!(output.contains("* OK [UIDNEXT 1]\r\n"));
    }

    #[tokio::test]
    async fn missing_folder_is_no() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();

        let (output, selected) = run("A1", "Archive", &mailbox).await;

        assert!(selected.is_none());
        assert_eq!(output, "A1 NO [NONEXISTENT] Folder not found\r\n");
    }
}
