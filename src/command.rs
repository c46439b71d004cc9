//! Parses a single CRLF-stripped command line into a [`Command`].
//!
//! The grammar handled here is deliberately small: a verb, an optional
//! argument, and — for `MAIL`/`RCPT` — a trailing `KEY=VALUE` (or bare
//! `KEY`) parameter list, collected case-insensitively on the key. Anything
//! more exotic than that (address literal syntax, full RFC 5321 path
//! grammar) is left to the session, which only needs the bracketed path and
//! the parameter map.

use std::collections::HashMap;

use crate::error::SessionError;

/// A parsed SMTP command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Upper-cased verb, e.g. `"MAIL"`, `"RCPT"`, `"EHLO"`.
    pub verb: String,
    /// Everything after the verb and its separating whitespace, verbatim
    /// (not upper-cased), with parameters for MAIL/RCPT already stripped.
    pub argument: String,
    /// `KEY=VALUE` / bare `KEY` parameters found after the path, key
    /// upper-cased, value verbatim.
    pub params: HashMap<String, Option<String>>,
}

/// Maximum command line length per RFC 5321 §4.5.3.1.4.
pub const MAX_COMMAND_LINE_LEN: usize = 1000;

impl Command {
    /// Parses a single line (CRLF already stripped by the reader).
    ///
    /// Returns `SessionError::ProtocolSyntax` for an oversize line or a verb
    /// containing non-ASCII bytes; an empty line parses to a command with
    /// an empty verb, which the session state machine will reject as
    /// unrecognized in whichever state it is in.
    pub fn parse(line: &str) -> Result<Command, SessionError> {
        if line.len() > MAX_COMMAND_LINE_LEN {
            return Err(SessionError::ProtocolSyntax(format!(
                "command line exceeds {MAX_COMMAND_LINE_LEN} octets"
            )));
        }

        let (verb_raw, rest) = match line.find(|c: char| c.is_whitespace()) {
            Some(idx) => (&line[..idx], line[idx..].trim_start()),
            None => (line, ""),
        };

        if !verb_raw.is_ascii() {
            return Err(SessionError::ProtocolSyntax(
                "command verb must be ASCII".to_string(),
            ));
        }

        let verb = verb_raw.to_ascii_uppercase();

        // MAIL/RCPT carry `<path> [PARAM=VALUE ...]`; split the path off
        // before collecting parameters so the argument stays just the path.
        let (argument, params) = if verb == "MAIL" || verb == "RCPT" {
            split_path_and_params(rest)
        } else {
            (rest.to_string(), HashMap::new())
        };

        Ok(Command {
            verb,
            argument,
            params,
        })
    }
}

/// Splits `<path> KEY=VAL KEY2=VAL2 KEY3` into the path and a parameter map.
fn split_path_and_params(rest: &str) -> (String, HashMap<String, Option<String>>) {
    let rest = rest.trim();

    // The path is either a bracketed `<...>` token or, failing that, the
    // first whitespace-delimited token (lenient clients sometimes omit the
    // angle brackets).
    let (path, tail) = if let Some(stripped) = rest.strip_prefix('<') {
        match stripped.find('>') {
            Some(end) => (
                format!("<{}>", &stripped[..end]),
                stripped[end + 1..].trim_start(),
            ),
            None => (rest.to_string(), ""),
        }
    } else {
        match rest.find(char::is_whitespace) {
            Some(idx) => (rest[..idx].to_string(), rest[idx..].trim_start()),
            None => (rest.to_string(), ""),
        }
    };

    let mut params = HashMap::new();
    for token in tail.split_whitespace() {
        match token.split_once('=') {
            Some((k, v)) => {
                params.insert(k.to_ascii_uppercase(), Some(v.to_string()));
            }
            None => {
                params.insert(token.to_ascii_uppercase(), None);
            }
        }
    }

    (path, params)
}

/// Extracts the mailbox inside `<...>` from a MAIL/RCPT path argument.
/// Returns `Some("")` for the empty reverse-path (`<>`), `None` if the
/// brackets are missing or malformed.
pub fn extract_mailbox(path: &str) -> Option<String> {
    let path = path.trim();
    let start = path.find('<')?;
    let end = path.find('>')?;
    if start >= end {
        return None;
    }
    Some(path[start + 1..end].to_string())
}
