//! `AUTH PLAIN` (RFC 4616): a single message of the form
//! `authzid\0authcid\0passwd`, either supplied as the `AUTH` line's initial
//! response or prompted for with an empty challenge.

use async_trait::async_trait;

use crate::hooks::AuthenticationCallback;
use crate::response::Response;

use super::{decode_or_abort, outcome_from_result, AuthChannel, AuthOutcome, Authenticator};

#[derive(Default)]
pub struct PlainAuthenticator;

#[async_trait]
impl Authenticator for PlainAuthenticator {
    async fn authenticate(
        &mut self,
        initial_response: Option<String>,
        channel: &mut dyn AuthChannel,
        callback: &dyn AuthenticationCallback,
    ) -> AuthOutcome {
        let line = match initial_response {
            Some(line) => line,
            None => {
                if let Err(e) = channel.write_challenge(&Response::auth_challenge("")).await {
                    return AuthOutcome::Failure(Response::local_error(e.to_string()));
                }
                match channel.read_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        return AuthOutcome::Failure(Response::local_error("connection closed"))
                    }
                    Err(e) => return AuthOutcome::Failure(Response::local_error(e.to_string())),
                }
            }
        };

        let decoded = match decode_or_abort(&line) {
            Ok(bytes) => bytes,
            Err(outcome) => return outcome,
        };

        let parts: Vec<&[u8]> = decoded.splitn(3, |b| *b == 0).collect();
        if parts.len() != 3 {
            return AuthOutcome::Failure(Response::auth_failed(
                "Malformed PLAIN response (expected authzid\\0authcid\\0passwd)",
            ));
        }
        let authcid = match std::str::from_utf8(parts[1]) {
            Ok(s) => s,
            Err(_) => {
                return AuthOutcome::Failure(Response::auth_failed("PLAIN response is not UTF-8"))
            }
        };
        let passwd = match std::str::from_utf8(parts[2]) {
            Ok(s) => s,
            Err(_) => {
                return AuthOutcome::Failure(Response::auth_failed("PLAIN response is not UTF-8"))
            }
        };

        outcome_from_result(callback.authenticate(Some(authcid), Some(passwd)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::Engine;
    use std::collections::VecDeque;

    use crate::error::SessionError;
    use crate::hooks::AuthenticationResult;

    struct FakeChannel {
        inbound: VecDeque<String>,
        challenges: Vec<Response>,
    }

    #[async_trait]
    impl AuthChannel for FakeChannel {
        async fn write_challenge(&mut self, response: &Response) -> Result<(), SessionError> {
            self.challenges.push(response.clone());
            Ok(())
        }
        async fn read_line(&mut self) -> Result<Option<String>, SessionError> {
            Ok(self.inbound.pop_front())
        }
    }

    struct FixedCallback {
        expect_user: &'static str,
        expect_pass: &'static str,
    }

    #[async_trait]
    impl AuthenticationCallback for FixedCallback {
        async fn authenticate(
            &self,
            username: Option<&str>,
            password: Option<&str>,
        ) -> AuthenticationResult {
            if username == Some(self.expect_user) && password == Some(self.expect_pass) {
                AuthenticationResult::Success {
                    identity: self.expect_user.to_string(),
                }
            } else {
                AuthenticationResult::Failure { reason: None }
            }
        }
    }

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    #[tokio::test]
    async fn succeeds_with_initial_response() {
        let mut auth = PlainAuthenticator::default();
        let mut channel = FakeChannel {
            inbound: VecDeque::new(),
            challenges: Vec::new(),
        };
        let callback = FixedCallback {
            expect_user: "alice",
            expect_pass: "hunter2",
        };
        let initial = b64("\0alice\0hunter2");
        let outcome = auth
            .authenticate(Some(initial), &mut channel, &callback)
            .await;
        assert!(matches!(outcome, AuthOutcome::Success { identity } if identity == "alice"));
        assert!(channel.challenges.is_empty());
    }

    #[tokio::test]
    async fn prompts_when_no_initial_response() {
        let mut auth = PlainAuthenticator::default();
        let mut channel = FakeChannel {
            inbound: VecDeque::from(vec![b64("\0alice\0hunter2")]),
            challenges: Vec::new(),
        };
        let callback = FixedCallback {
            expect_user: "alice",
            expect_pass: "hunter2",
        };
        let outcome = auth.authenticate(None, &mut channel, &callback).await;
        assert!(matches!(outcome, AuthOutcome::Success { .. }));
        assert_eq!(channel.challenges.len(), 1);
    }

    #[tokio::test]
    async fn wrong_password_fails() {
        let mut auth = PlainAuthenticator::default();
        let mut channel = FakeChannel {
            inbound: VecDeque::new(),
            challenges: Vec::new(),
        };
        let callback = FixedCallback {
            expect_user: "alice",
            expect_pass: "hunter2",
        };
        let initial = b64("\0alice\0wrong");
        let outcome = auth
            .authenticate(Some(initial), &mut channel, &callback)
            .await;
        assert!(matches!(outcome, AuthOutcome::Failure(_)));
    }

    #[tokio::test]
    async fn client_abort_is_reported() {
        let mut auth = PlainAuthenticator::default();
        let mut channel = FakeChannel {
            inbound: VecDeque::from(vec!["*".to_string()]),
            challenges: Vec::new(),
        };
        let callback = FixedCallback {
            expect_user: "alice",
            expect_pass: "hunter2",
        };
        let outcome = auth.authenticate(None, &mut channel, &callback).await;
        assert!(matches!(outcome, AuthOutcome::Aborted));
    }

    #[tokio::test]
    async fn malformed_initial_response_fails() {
        let mut auth = PlainAuthenticator::default();
        let mut channel = FakeChannel {
            inbound: VecDeque::new(),
            challenges: Vec::new(),
        };
        let callback = FixedCallback {
            expect_user: "alice",
            expect_pass: "hunter2",
        };
        let initial = b64("onlyonepart");
        let outcome = auth
            .authenticate(Some(initial), &mut channel, &callback)
            .await;
        assert!(matches!(outcome, AuthOutcome::Failure(_)));
    }
}
