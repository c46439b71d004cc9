//! The SMTP response codec.
//!
//! A [`Response`] is a numeric reply code paired with one or more lines of
//! text. Single-line responses are written as `CODE SP text CRLF`;
//! multi-line responses continue each line but the last with `CODE-`,
//! switching to `CODE SP` only for the final line, per RFC 5321 §4.2.1.
//!
//! The fixed-response constants mirror the vocabulary `mailin` exposes
//! (`OK`, `NO_SERVICE`, `AUTH_REQUIRED`, ...): a small set of named,
//! reusable replies for the common outcomes, built once and cloned.

use std::fmt;

/// A complete SMTP reply: a 3-digit code plus one or more text lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    lines: Vec<String>,
}

impl Response {
    /// Builds a response. `lines` must be non-empty; a single-element slice
    /// produces a single-line reply.
    pub fn new(code: u16, lines: Vec<String>) -> Self {
        debug_assert!((100..=599).contains(&code), "SMTP code out of range");
        debug_assert!(!lines.is_empty(), "a response needs at least one line");
        Response { code, lines }
    }

    /// A single-line response built from a `&str`.
    pub fn single(code: u16, text: impl Into<String>) -> Self {
        Response::new(code, vec![text.into()])
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// 2xx or 3xx: the command succeeded (possibly pending further input).
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.code)
    }

    /// 4xx or 5xx: the command failed.
    pub fn is_error(&self) -> bool {
        self.code >= 400
    }

    /// 4xx specifically: a transient failure the client may retry.
    pub fn is_transient(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// Renders the response as wire bytes (CRLF-terminated lines, no
    /// trailing separator beyond the last line's CRLF).
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        let last = self.lines.len() - 1;
        for (i, line) in self.lines.iter().enumerate() {
            let sep = if i == last { ' ' } else { '-' };
            out.push_str(&format!("{}{}{}\r\n", self.code, sep, line));
        }
        out
    }

    // --- Named conventional responses -------------------------------------

    pub fn service_ready(banner: impl Into<String>) -> Self {
        Response::single(220, banner.into())
    }

    pub fn service_closing() -> Self {
        Response::single(221, "Bye")
    }

    pub fn auth_ok() -> Self {
        Response::single(235, "Authentication succeeded")
    }

    pub fn ok() -> Self {
        Response::single(250, "OK")
    }

    pub fn ok_queued(queue_id: &str) -> Self {
        Response::single(250, format!("OK queued as {queue_id}"))
    }

    pub fn start_mail_input() -> Self {
        Response::single(354, "Start mail input; end with <CRLF>.<CRLF>")
    }

    pub fn service_not_available(reason: impl Into<String>) -> Self {
        Response::single(421, reason.into())
    }

    pub fn too_many_errors() -> Self {
        Response::single(421, "Too many errors")
    }

    pub fn too_many_connections() -> Self {
        Response::single(421, "Too many connections")
    }

    pub fn mailbox_unavailable_transient(reason: impl Into<String>) -> Self {
        Response::single(450, reason.into())
    }

    pub fn local_error(reason: impl Into<String>) -> Self {
        Response::single(451, reason.into())
    }

    pub fn too_many_recipients() -> Self {
        Response::single(452, "Too many recipients")
    }

    pub fn syntax_error(detail: impl fmt::Display) -> Self {
        Response::single(500, format!("Syntax error: {detail}"))
    }

    pub fn syntax_error_in_parameters(detail: impl fmt::Display) -> Self {
        Response::single(501, format!("Syntax error in parameters: {detail}"))
    }

    pub fn not_implemented() -> Self {
        Response::single(502, "Command not implemented")
    }

    pub fn bad_sequence() -> Self {
        Response::single(503, "Bad sequence of commands")
    }

    pub fn cannot_vrfy() -> Self {
        Response::single(252, "Cannot VRFY user, but will accept message")
    }

    pub fn help() -> Self {
        Response::single(214, "See RFC 5321")
    }

    pub fn auth_required() -> Self {
        Response::single(530, "Authentication required")
    }

    pub fn encryption_required() -> Self {
        Response::single(538, "Encryption required for requested authentication mechanism")
    }

    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Response::single(535, reason.into())
    }

    pub fn auth_aborted() -> Self {
        Response::single(501, "Authentication aborted")
    }

    pub fn mailbox_unavailable(reason: impl Into<String>) -> Self {
        Response::single(550, reason.into())
    }

    pub fn message_too_large() -> Self {
        Response::single(552, "Message size exceeds maximum")
    }

    pub fn transaction_failed(reason: impl Into<String>) -> Self {
        Response::single(554, reason.into())
    }

    /// A multi-line EHLO success reply: first line is the greeting, the
    /// rest are advertised extensions (caller supplies them in order).
    pub fn ehlo_ok(server_name: &str, extensions: Vec<String>) -> Self {
        let mut lines = vec![server_name.to_string()];
        lines.extend(extensions);
        Response::new(250, lines)
    }

    /// A base64-encoded SASL challenge, e.g. `334 VXNlcm5hbWU6`.
    pub fn auth_challenge(prompt_b64: impl Into<String>) -> Self {
        Response::single(334, prompt_b64.into())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire().trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_uses_space_separator() {
        let r = Response::single(250, "OK");
        assert_eq!(r.to_wire(), "250 OK\r\n");
    }

    #[test]
    fn multi_line_uses_hyphen_then_space() {
        let r = Response::new(
            250,
            vec!["srv.test".to_string(), "PIPELINING".to_string(), "HELP".to_string()],
        );
        assert_eq!(r.to_wire(), "250-srv.test\r\n250-PIPELINING\r\n250 HELP\r\n");
    }

    #[test]
    fn predicates_classify_codes() {
        assert!(Response::single(250, "x").is_success());
        assert!(Response::single(354, "x").is_success());
        assert!(Response::single(450, "x").is_error());
        assert!(Response::single(450, "x").is_transient());
        assert!(Response::single(550, "x").is_error());
        assert!(!Response::single(550, "x").is_transient());
    }
}
