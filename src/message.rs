//! The message transaction lifecycle: the in-flight [`Transaction`] built up
//! across MAIL/RCPT/DATA, and the finalized, immutable [`Message`] handed to
//! collaborators once DATA completes.

use mailparse::MailHeaderMap;

/// The client's declared MIME body type for a transaction, from `BODY=` on
/// `MAIL FROM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyType {
    #[default]
    SevenBit,
    EightBitMime,
}

/// Where the DATA reader accumulates a transaction's body while it streams
/// in. The core only ships the in-memory policy; an embedder wanting a
/// streaming sink wraps the accumulated bytes per their own storage choice
/// once the transaction commits (the reader itself is generic enough to
/// support either, see [`crate::session::data::DataReader`]).
#[derive(Debug, Default)]
pub struct Transaction {
    /// The reverse-path mailbox; empty string for the null reverse-path
    /// (`MAIL FROM:<>`), used by bounces.
    pub reverse_path: String,
    /// Forward-path mailboxes, in RCPT order, de-duplicated.
    pub forward_paths: Vec<String>,
    /// The `SIZE=` parameter from MAIL FROM, if declared.
    pub declared_size: Option<u64>,
    pub body_type: BodyType,
}

impl Transaction {
    pub fn new(reverse_path: String, declared_size: Option<u64>, body_type: BodyType) -> Self {
        Transaction {
            reverse_path,
            forward_paths: Vec::new(),
            declared_size,
            body_type,
        }
    }

    /// Appends `recipient` if not already present. Returns `false` if it
    /// was a duplicate (the caller still replies 250 per RFC convention;
    /// de-duplication just avoids double delivery).
    pub fn add_recipient(&mut self, recipient: String) -> bool {
        if self.forward_paths.contains(&recipient) {
            false
        } else {
            self.forward_paths.push(recipient);
            true
        }
    }
}

/// A finalized, accepted message ready for collaborators.
#[derive(Debug, Clone)]
pub struct Message {
    /// Stable per-message identifier, used as the SMTP queue id.
    pub id: String,
    pub reverse_path: String,
    pub forward_paths: Vec<String>,
    /// Raw octets exactly as received: CRLF-normalized, dot-unstuffed, with
    /// no terminator line.
    pub raw: Vec<u8>,
    pub size: usize,
}

impl Message {
    pub fn new(id: String, reverse_path: String, forward_paths: Vec<String>, raw: Vec<u8>) -> Self {
        let size = raw.len();
        Message {
            id,
            reverse_path,
            forward_paths,
            raw,
            size,
        }
    }

    /// Lazily parses the headers with `mailparse`. Returns `None` if the
    /// raw octets are not valid enough for `mailparse` to find a header
    /// block at all (a message with no headers at all still parses fine —
    /// this only fails on pathological input).
    fn parsed(&self) -> Option<mailparse::ParsedMail<'_>> {
        mailparse::parse_mail(&self.raw).ok()
    }

    /// The `Subject:` header, if present.
    pub fn subject(&self) -> Option<String> {
        self.parsed()?
            .headers
            .get_first_value("Subject")
    }

    /// The `Date:` header, if present.
    pub fn date(&self) -> Option<String> {
        self.parsed()?.headers.get_first_value("Date")
    }

    /// The `X-Priority`/`Priority` header, if present.
    pub fn priority(&self) -> Option<String> {
        let parsed = self.parsed()?;
        parsed
            .headers
            .get_first_value("X-Priority")
            .or_else(|| parsed.headers.get_first_value("Priority"))
    }

    /// Whether any MIME part looks like an attachment (has a
    /// `Content-Disposition: attachment` or a filename parameter).
    pub fn has_attachments(&self) -> bool {
        self.attachment_count() > 0
    }

    /// Count of MIME parts that look like attachments.
    pub fn attachment_count(&self) -> usize {
        let Some(parsed) = self.parsed() else {
            return 0;
        };
        count_attachments(&parsed)
    }

    /// All headers as ordered `(name, value)` pairs, case preserved as
    /// received.
    pub fn headers(&self) -> Vec<(String, String)> {
        let Some(parsed) = self.parsed() else {
            return Vec::new();
        };
        parsed
            .headers
            .iter()
            .map(|h| (h.get_key(), h.get_value()))
            .collect()
    }
}

fn count_attachments(mail: &mailparse::ParsedMail<'_>) -> usize {
    if mail.subparts.is_empty() {
        return usize::from(is_attachment(mail));
    }
    mail.subparts.iter().map(count_attachments).sum()
}

fn is_attachment(part: &mailparse::ParsedMail<'_>) -> bool {
    if let Some(cd) = part.headers.get_first_value("Content-Disposition") {
        if cd.to_ascii_lowercase().starts_with("attachment") {
            return true;
        }
    }
    part.ctype.params.contains_key("name")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(raw: &str) -> Message {
        Message::new(
            "q1".to_string(),
            "a@example.com".to_string(),
            vec!["b@example.com".to_string()],
            raw.as_bytes().to_vec(),
        )
    }

    #[test]
    fn transaction_deduplicates_recipients() {
        let mut tx = Transaction::new("a@example.com".to_string(), None, BodyType::SevenBit);
        assert!(tx.add_recipient("b@example.com".to_string()));
        assert!(!tx.add_recipient("b@example.com".to_string()));
        assert_eq!(tx.forward_paths.len(), 1);
    }

    #[test]
    fn subject_is_extracted() {
        let m = msg("Subject: hi\r\n\r\nbody\r\n");
        assert_eq!(m.subject().as_deref(), Some("hi"));
    }

    #[test]
    fn missing_subject_is_none() {
        let m = msg("From: a@example.com\r\n\r\nbody\r\n");
        assert_eq!(m.subject(), None);
    }

    #[test]
    fn size_matches_raw_length() {
        let m = msg("Subject: hi\r\n\r\nbody\r\n");
        assert_eq!(m.size, m.raw.len());
    }

    #[test]
    fn plain_text_message_has_no_attachments() {
        let m = msg("Subject: hi\r\n\r\nbody\r\n");
        assert!(!m.has_attachments());
        assert_eq!(m.attachment_count(), 0);
    }
}
