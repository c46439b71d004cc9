//! The per-connection SMTP session state machine (§4.2): greeting, EHLO
//! capability negotiation, STARTTLS, AUTH, the MAIL/RCPT/DATA transaction,
//! the error budget, and idle/command timeouts.
//!
//! A [`Session`] owns everything scoped to one accepted connection: the
//! transport (plain or TLS, see [`stream::SessionStream`]), the read-ahead
//! buffer pipelined commands arrive in, the in-flight [`Transaction`], and
//! the [`ConnectionHandle`] admitting it, released on every exit path by
//! `Drop` when the session finishes.

mod data;
mod stream;

pub use data::{DataError, DataReader};
pub use stream::SessionStream;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::sync::watch;

use crate::auth::{AuthChannel, AuthOutcome, Authenticator};
use crate::command::{extract_mailbox, Command};
use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::hooks::{
    Collaborators, FilterDecision, MailboxFilter, MessageStore, SessionObserver,
    StatisticsCollector,
};
use crate::message::{BodyType, Message, Transaction};
use crate::reader::{read_line_timeout, write_response};
use crate::response::Response;
use crate::session_view::SessionView;
use crate::tracker::ConnectionHandle;

/// States from the session state machine (§4.2). `ReceivingData` and
/// `Authenticating` are handled synchronously inside their command's
/// handler rather than held as persisted phases, since nothing else can
/// observe the session while either sub-protocol is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingGreeting,
    Ready,
    InTransaction,
    Closing,
}

/// What the command loop should do after a [`Session::dispatch`] call
/// returns, beyond writing the ordinary per-command [`Response`].
enum DispatchOutcome {
    /// Write the response and keep running.
    Reply(Response),
    /// Write the response, then end the session (`QUIT`).
    ReplyThenClose(Response),
    /// Write the response, then attempt the TLS handshake (`STARTTLS`).
    ReplyThenUpgradeTls(Response),
    /// The session is already unrecoverable (a write failed, the peer
    /// vanished mid-DATA); nothing further to write.
    Closed,
}

/// One accepted SMTP connection, driven to completion by [`Session::run`].
pub struct Session {
    config: Arc<ServerConfig>,
    collaborators: Collaborators,
    stream: BufReader<SessionStream>,
    _handle: ConnectionHandle,
    view: SessionView,
    phase: Phase,
    error_count: u32,
    transaction: Option<Transaction>,
    shutdown: watch::Receiver<bool>,
}

impl Session {
    /// Constructs a session for a freshly accepted connection. The banner
    /// has not been written yet; call [`Session::run`] to drive it.
    pub fn new(
        id: String,
        remote: SocketAddr,
        local: SocketAddr,
        stream: SessionStream,
        handle: ConnectionHandle,
        config: Arc<ServerConfig>,
        collaborators: Collaborators,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Session {
            view: SessionView::new(id, remote, local, config.max_message_size),
            config,
            collaborators,
            stream: BufReader::new(stream),
            _handle: handle,
            phase: Phase::AwaitingGreeting,
            error_count: 0,
            transaction: None,
            shutdown,
        }
    }

    /// Drives the session to completion: writes the banner, runs the
    /// command loop until `QUIT`, a fatal error, a timeout, or server
    /// shutdown, then fires `SessionCompleted`. Always returns; the
    /// `ConnectionHandle` releases its slots when `self` drops.
    pub async fn run(mut self) {
        self.collaborators.observer.on_session_created(&self.view).await;
        self.collaborators.stats.record_session().await;

        if self
            .write(&Response::service_ready(self.config.banner.clone()))
            .await
            .is_err()
        {
            self.finish().await;
            return;
        }

        let lifetime = tokio::time::sleep(self.config.connection_timeout);
        tokio::pin!(lifetime);

        loop {
            if *self.shutdown.borrow() {
                let _ = self
                    .write(&Response::service_not_available("Server shutting down"))
                    .await;
                break;
            }

            let line_result = tokio::select! {
                biased;
                _ = self.shutdown.changed() => {
                    let _ = self
                        .write(&Response::service_not_available("Server shutting down"))
                        .await;
                    break;
                }
                () = &mut lifetime => {
                    let _ = self
                        .write(&Response::service_not_available("Connection lifetime exceeded"))
                        .await;
                    break;
                }
                r = read_line_timeout(&mut self.stream, self.config.max_command_line_len, self.config.command_timeout) => r,
            };

            let line = match line_result {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(SessionError::TransportTimeout) => {
                    let _ = self
                        .write(&Response::service_not_available("Idle timeout"))
                        .await;
                    break;
                }
                Err(e) => {
                    let Some(resp) = e.response() else { break };
                    if !self.write_and_apply_budget(&resp).await {
                        break;
                    }
                    continue;
                }
            };

            let cmd = match Command::parse(&line) {
                Ok(cmd) => cmd,
                Err(e) => {
                    let resp = e
                        .response()
                        .expect("ProtocolSyntax always carries a response");
                    if !self.write_and_apply_budget(&resp).await {
                        break;
                    }
                    continue;
                }
            };

            match self.dispatch(cmd).await {
                DispatchOutcome::Reply(resp) => {
                    if !self.write_and_apply_budget(&resp).await {
                        break;
                    }
                }
                DispatchOutcome::ReplyThenClose(resp) => {
                    let _ = self.write(&resp).await;
                    break;
                }
                DispatchOutcome::ReplyThenUpgradeTls(resp) => {
                    if self.write(&resp).await.is_err() {
                        break;
                    }
                    if !self.upgrade_to_tls().await {
                        break;
                    }
                }
                DispatchOutcome::Closed => break,
            }
        }

        self.finish().await;
    }

    async fn finish(&self) {
        self.collaborators.observer.on_session_completed(&self.view).await;
    }

    async fn write(&mut self, response: &Response) -> std::io::Result<()> {
        write_response(&mut self.stream, response).await
    }

    /// Writes `response`, then updates the error budget per §4.2: a 4xx/5xx
    /// reply increments it, a 2xx/3xx reply resets it (1xx replies, e.g.
    /// `HELP`'s 214, touch neither). Returns `false` if the budget was
    /// exceeded and `421 Too many errors` was written to close the session.
    async fn write_and_apply_budget(&mut self, response: &Response) -> bool {
        let _ = self.write(response).await;
        if response.is_error() {
            self.error_count += 1;
        } else if response.is_success() {
            self.error_count = 0;
        }
        if self.error_count > self.config.max_retry_count {
            let _ = self.write(&Response::too_many_errors()).await;
            return false;
        }
        true
    }

    async fn dispatch(&mut self, cmd: Command) -> DispatchOutcome {
        match cmd.verb.as_str() {
            "HELO" | "EHLO" => self.handle_helo_ehlo(&cmd),
            "MAIL" => self.handle_mail(&cmd).await,
            "RCPT" => self.handle_rcpt(&cmd).await,
            "DATA" => self.handle_data().await,
            "RSET" => self.handle_rset(),
            "NOOP" => DispatchOutcome::Reply(Response::ok()),
            "QUIT" => self.handle_quit(),
            "VRFY" => self.handle_vrfy(),
            "HELP" => self.handle_help(),
            "STARTTLS" => self.handle_starttls(),
            "AUTH" => self.handle_auth(&cmd).await,
            "" => DispatchOutcome::Reply(Response::syntax_error("empty command")),
            _ => DispatchOutcome::Reply(Response::not_implemented()),
        }
    }

    fn handle_helo_ehlo(&mut self, cmd: &Command) -> DispatchOutcome {
        let domain = cmd.argument.trim();
        if domain.is_empty() {
            return DispatchOutcome::Reply(Response::syntax_error_in_parameters(
                "HELO/EHLO requires a domain",
            ));
        }

        self.view.client_domain = Some(domain.to_string());
        self.transaction = None;
        self.phase = Phase::Ready;

        if cmd.verb == "EHLO" {
            self.view.capabilities.pipelining = self.config.enable_pipelining;
            self.view.capabilities.eight_bit_mime = self.config.enable_8bit_mime;
            self.view.capabilities.smtp_utf8 = self.config.enable_smtp_utf8;
            DispatchOutcome::Reply(Response::ehlo_ok(&self.config.server_name, self.ehlo_lines()))
        } else {
            DispatchOutcome::Reply(Response::single(250, self.config.server_name.clone()))
        }
    }

    fn ehlo_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.config.enable_pipelining {
            lines.push("PIPELINING".to_string());
        }
        if self.config.enable_8bit_mime {
            lines.push("8BITMIME".to_string());
        }
        if self.config.enable_smtp_utf8 {
            lines.push("SMTPUTF8".to_string());
        }
        lines.push(format!("SIZE {}", self.config.max_message_size));
        if self.config.tls.is_some() && !self.view.secure {
            lines.push("STARTTLS".to_string());
        }
        if self.config.auth_enabled && (self.view.secure || self.config.allow_plaintext_auth) {
            let mut mechanisms = self.config.auth_mechanisms.mechanism_names();
            mechanisms.sort();
            if !mechanisms.is_empty() {
                lines.push(format!("AUTH {}", mechanisms.join(" ")));
            }
        }
        lines.push("HELP".to_string());
        lines
    }

    async fn handle_mail(&mut self, cmd: &Command) -> DispatchOutcome {
        if self.phase != Phase::Ready {
            return DispatchOutcome::Reply(Response::bad_sequence());
        }

        let Some(sender) = extract_mailbox(&cmd.argument) else {
            return DispatchOutcome::Reply(Response::syntax_error_in_parameters(
                "MAIL FROM requires a bracketed reverse-path",
            ));
        };

        let declared_size = match cmd.params.get("SIZE").and_then(Clone::clone) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(n) => Some(n),
                Err(_) => {
                    return DispatchOutcome::Reply(Response::syntax_error_in_parameters(
                        "SIZE must be numeric",
                    ))
                }
            },
            None => None,
        };
        if let Some(n) = declared_size {
            if n > self.config.max_message_size {
                return DispatchOutcome::Reply(Response::message_too_large());
            }
        }

        let body_type = match cmd.params.get("BODY").and_then(Clone::clone) {
            Some(val) if val.eq_ignore_ascii_case("8BITMIME") => BodyType::EightBitMime,
            _ => BodyType::SevenBit,
        };

        if self.config.require_auth && !self.view.authenticated {
            return DispatchOutcome::Reply(Response::auth_required());
        }

        match self
            .collaborators
            .filter
            .can_accept_from(&self.view, &sender, declared_size)
            .await
        {
            FilterDecision::DenyPermanent => {
                return DispatchOutcome::Reply(Response::mailbox_unavailable("Sender rejected"))
            }
            FilterDecision::DenyTransient => {
                return DispatchOutcome::Reply(Response::mailbox_unavailable_transient(
                    "Sender temporarily rejected",
                ))
            }
            FilterDecision::Accept => {}
        }

        self.transaction = Some(Transaction::new(sender, declared_size, body_type));
        self.phase = Phase::InTransaction;
        DispatchOutcome::Reply(Response::ok())
    }

    async fn handle_rcpt(&mut self, cmd: &Command) -> DispatchOutcome {
        if self.phase != Phase::InTransaction {
            return DispatchOutcome::Reply(Response::bad_sequence());
        }

        let Some(recipient) = extract_mailbox(&cmd.argument) else {
            return DispatchOutcome::Reply(Response::syntax_error_in_parameters(
                "RCPT TO requires a bracketed forward-path",
            ));
        };

        let sender = self
            .transaction
            .as_ref()
            .expect("InTransaction implies a transaction")
            .reverse_path
            .clone();
        let recipient_count = self.transaction.as_ref().unwrap().forward_paths.len();
        if recipient_count >= self.config.max_recipients {
            return DispatchOutcome::Reply(Response::too_many_recipients());
        }

        match self
            .collaborators
            .filter
            .can_deliver_to(&self.view, &recipient, &sender)
            .await
        {
            FilterDecision::DenyPermanent => {
                return DispatchOutcome::Reply(Response::mailbox_unavailable("Recipient rejected"))
            }
            FilterDecision::DenyTransient => {
                return DispatchOutcome::Reply(Response::mailbox_unavailable_transient(
                    "Recipient temporarily rejected",
                ))
            }
            FilterDecision::Accept => {}
        }

        self.transaction.as_mut().unwrap().add_recipient(recipient);
        DispatchOutcome::Reply(Response::ok())
    }

    async fn handle_data(&mut self) -> DispatchOutcome {
        let ready = self.phase == Phase::InTransaction
            && self
                .transaction
                .as_ref()
                .map(|t| !t.forward_paths.is_empty())
                .unwrap_or(false);
        if !ready {
            return DispatchOutcome::Reply(Response::bad_sequence());
        }

        if self.write(&Response::start_mail_input()).await.is_err() {
            return DispatchOutcome::Closed;
        }

        let eight_bit_allowed = self.config.enable_8bit_mime
            || self
                .transaction
                .as_ref()
                .map(|t| t.body_type == BodyType::EightBitMime)
                .unwrap_or(false);

        let result = DataReader::read_body(
            &mut self.stream,
            self.config.max_message_size,
            eight_bit_allowed,
            self.config.data_timeout,
        )
        .await;

        let raw = match result {
            Ok(raw) => raw,
            Err(DataError::TooLarge) => {
                self.transaction = None;
                self.phase = Phase::Ready;
                return DispatchOutcome::Reply(Response::message_too_large());
            }
            Err(DataError::EightBitViolation) => {
                self.transaction = None;
                self.phase = Phase::Ready;
                return DispatchOutcome::Reply(Response::syntax_error(
                    "8-bit data requires BODY=8BITMIME",
                ));
            }
            Err(DataError::Timeout) => {
                return DispatchOutcome::ReplyThenClose(Response::local_error("DATA timed out"))
            }
            Err(DataError::UnexpectedEof) | Err(DataError::Io(_)) => {
                return DispatchOutcome::Closed
            }
        };

        let transaction = self.transaction.take().expect("checked above");
        let queue_id = uuid::Uuid::new_v4().to_string();
        let message = Message::new(
            queue_id.clone(),
            transaction.reverse_path,
            transaction.forward_paths,
            raw,
        );
        self.phase = Phase::Ready;

        if let Some(cancel_response) = self
            .collaborators
            .observer
            .on_message_received(&self.view, &message)
            .await
        {
            return DispatchOutcome::Reply(cancel_response);
        }

        match self.collaborators.store.save(&self.view, &message).await {
            Ok(()) => {
                self.view.message_count += 1;
                self.collaborators.stats.record_message(&message).await;
                DispatchOutcome::Reply(Response::ok_queued(&queue_id))
            }
            Err(reason) => {
                self.collaborators.stats.record_error(&reason).await;
                self.collaborators.observer.on_error(&self.view, &reason).await;
                DispatchOutcome::Reply(Response::transaction_failed(reason))
            }
        }
    }

    fn handle_rset(&mut self) -> DispatchOutcome {
        self.transaction = None;
        if self.phase == Phase::InTransaction {
            self.phase = Phase::Ready;
        }
        DispatchOutcome::Reply(Response::ok())
    }

    fn handle_quit(&mut self) -> DispatchOutcome {
        self.phase = Phase::Closing;
        DispatchOutcome::ReplyThenClose(Response::service_closing())
    }

    fn handle_vrfy(&self) -> DispatchOutcome {
        if self.phase == Phase::AwaitingGreeting {
            return DispatchOutcome::Reply(Response::bad_sequence());
        }
        DispatchOutcome::Reply(Response::cannot_vrfy())
    }

    fn handle_help(&self) -> DispatchOutcome {
        if self.phase == Phase::AwaitingGreeting {
            return DispatchOutcome::Reply(Response::bad_sequence());
        }
        DispatchOutcome::Reply(Response::help())
    }

    fn handle_starttls(&self) -> DispatchOutcome {
        if self.phase != Phase::Ready || self.view.secure {
            return DispatchOutcome::Reply(Response::bad_sequence());
        }
        if self.config.tls.is_none() {
            return DispatchOutcome::Reply(Response::not_implemented());
        }
        DispatchOutcome::ReplyThenUpgradeTls(Response::service_ready("Ready to start TLS"))
    }

    /// Takes the plain stream out of its `BufReader`, discarding any
    /// leftover buffered bytes (a client that pipelines plaintext commands
    /// past `STARTTLS` must not have them replayed once the channel is
    /// encrypted), and performs the handshake.
    async fn upgrade_to_tls(&mut self) -> bool {
        let Some(tls_config) = self.config.tls.clone() else {
            return false;
        };

        let inner = std::mem::replace(&mut self.stream, BufReader::new(SessionStream::Upgrading))
            .into_inner();
        let plain = match inner {
            SessionStream::Plain(tcp) => tcp,
            _ => return false,
        };

        let acceptor = tokio_rustls::TlsAcceptor::from(tls_config);
        match acceptor.accept(plain).await {
            Ok(tls_stream) => {
                self.stream = BufReader::new(SessionStream::Tls(Box::new(tls_stream)));
                self.view.secure = true;
                self.view.client_domain = None;
                self.phase = Phase::AwaitingGreeting;
                true
            }
            Err(e) => {
                self.collaborators
                    .observer
                    .on_error(&self.view, &format!("TLS handshake failed: {e}"))
                    .await;
                false
            }
        }
    }

    async fn handle_auth(&mut self, cmd: &Command) -> DispatchOutcome {
        if self.phase != Phase::Ready || self.view.authenticated {
            return DispatchOutcome::Reply(Response::bad_sequence());
        }
        if !self.config.auth_enabled {
            return DispatchOutcome::Reply(Response::not_implemented());
        }
        if !self.view.secure && (self.config.require_secure || !self.config.allow_plaintext_auth) {
            return DispatchOutcome::Reply(Response::encryption_required());
        }

        let mut parts = cmd.argument.splitn(2, char::is_whitespace);
        let mechanism = match parts.next() {
            Some(m) if !m.is_empty() => m,
            _ => {
                return DispatchOutcome::Reply(Response::syntax_error_in_parameters(
                    "AUTH requires a mechanism name",
                ))
            }
        };
        let initial_response = parts
            .next()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let Some(mut authenticator) = self.config.auth_mechanisms.create(mechanism) else {
            return DispatchOutcome::Reply(Response::single(
                504,
                "Unrecognized authentication mechanism",
            ));
        };

        let callback = self.collaborators.auth_callback.clone();
        let mut channel = SessionAuthChannel {
            stream: &mut self.stream,
            max_len: self.config.max_command_line_len,
            timeout: self.config.command_timeout,
        };
        let outcome = authenticator
            .authenticate(initial_response, &mut channel, callback.as_ref())
            .await;

        match outcome {
            AuthOutcome::Success { identity } => {
                self.view.authenticated = true;
                self.view.identity = Some(identity);
                DispatchOutcome::Reply(Response::auth_ok())
            }
            AuthOutcome::Failure(resp) => DispatchOutcome::Reply(resp),
            AuthOutcome::Aborted => DispatchOutcome::Reply(Response::auth_aborted()),
        }
    }
}

/// Adapts the session's line reader/writer to the [`AuthChannel`] contract
/// so authenticators don't need to know about `BufReader<SessionStream>`.
struct SessionAuthChannel<'a> {
    stream: &'a mut BufReader<SessionStream>,
    max_len: usize,
    timeout: Duration,
}

#[async_trait]
impl AuthChannel for SessionAuthChannel<'_> {
    async fn write_challenge(&mut self, response: &Response) -> Result<(), SessionError> {
        write_response(self.stream, response)
            .await
            .map_err(SessionError::TransportFault)
    }

    async fn read_line(&mut self) -> Result<Option<String>, SessionError> {
        read_line_timeout(self.stream, self.max_len, self.timeout).await
    }
}
