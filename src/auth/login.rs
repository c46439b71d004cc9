//! `AUTH LOGIN`: prompts for a base64 username then a base64 password,
//! each on its own round trip.

use async_trait::async_trait;
use base64::Engine;

use crate::hooks::AuthenticationCallback;
use crate::response::Response;

use super::{decode_or_abort, outcome_from_result, AuthChannel, AuthOutcome, Authenticator};

#[derive(Default)]
pub struct LoginAuthenticator;

fn b64(s: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(s)
}

#[async_trait]
impl Authenticator for LoginAuthenticator {
    async fn authenticate(
        &mut self,
        initial_response: Option<String>,
        channel: &mut dyn AuthChannel,
        callback: &dyn AuthenticationCallback,
    ) -> AuthOutcome {
        // An initial response on `AUTH LOGIN <resp>` is the username,
        // skipping straight to the password prompt.
        let username_line = match initial_response {
            Some(line) => line,
            None => {
                if let Err(e) = channel
                    .write_challenge(&Response::auth_challenge(b64("Username:")))
                    .await
                {
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

        let username_bytes = match decode_or_abort(&username_line) {
            Ok(bytes) => bytes,
            Err(outcome) => return outcome,
        };
        let username = match String::from_utf8(username_bytes) {
            Ok(s) => s,
            Err(_) => {
                return AuthOutcome::Failure(Response::auth_failed("username is not UTF-8"))
            }
        };

        if let Err(e) = channel
            .write_challenge(&Response::auth_challenge(b64("Password:")))
            .await
        {
            return AuthOutcome::Failure(Response::local_error(e.to_string()));
        }
        let password_line = match channel.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return AuthOutcome::Failure(Response::local_error("connection closed")),
            Err(e) => return AuthOutcome::Failure(Response::local_error(e.to_string())),
        };
        let password_bytes = match decode_or_abort(&password_line) {
            Ok(bytes) => bytes,
            Err(outcome) => return outcome,
        };
        let password = match String::from_utf8(password_bytes) {
            Ok(s) => s,
            Err(_) => {
                return AuthOutcome::Failure(Response::auth_failed("password is not UTF-8"))
            }
        };

        outcome_from_result(
            callback
                .authenticate(Some(&username), Some(&password))
                .await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
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

    struct FixedCallback;

    #[async_trait]
    impl AuthenticationCallback for FixedCallback {
        async fn authenticate(
            &self,
            username: Option<&str>,
            password: Option<&str>,
        ) -> AuthenticationResult {
            if username == Some("alice") && password == Some("hunter2") {
                AuthenticationResult::Success {
                    identity: "alice".to_string(),
                }
            } else {
                AuthenticationResult::Failure { reason: None }
            }
        }
    }

    #[tokio::test]
    async fn prompts_username_then_password() {
        let mut auth = LoginAuthenticator::default();
        let mut channel = FakeChannel {
            inbound: VecDeque::from(vec![b64("alice"), b64("hunter2")]),
            challenges: Vec::new(),
        };
        let outcome = auth.authenticate(None, &mut channel, &FixedCallback).await;
        assert!(matches!(outcome, AuthOutcome::Success { identity } if identity == "alice"));
        assert_eq!(channel.challenges.len(), 2);
        assert_eq!(channel.challenges[0].code, 334);
        assert_eq!(channel.challenges[0].lines()[0], b64("Username:"));
        assert_eq!(channel.challenges[1].lines()[0], b64("Password:"));
    }

    #[tokio::test]
    async fn initial_response_is_treated_as_username() {
        let mut auth = LoginAuthenticator::default();
        let mut channel = FakeChannel {
            inbound: VecDeque::from(vec![b64("hunter2")]),
            challenges: Vec::new(),
        };
        let outcome = auth
            .authenticate(Some(b64("alice")), &mut channel, &FixedCallback)
            .await;
        assert!(matches!(outcome, AuthOutcome::Success { .. }));
        assert_eq!(channel.challenges.len(), 1, "only the password prompt remains");
    }

    #[tokio::test]
    async fn abort_on_username_prompt() {
        let mut auth = LoginAuthenticator::default();
        let mut channel = FakeChannel {
            inbound: VecDeque::from(vec!["*".to_string()]),
            challenges: Vec::new(),
        };
        let outcome = auth.authenticate(None, &mut channel, &FixedCallback).await;
        assert!(matches!(outcome, AuthOutcome::Aborted));
    }

    #[tokio::test]
    async fn wrong_password_fails() {
        let mut auth = LoginAuthenticator::default();
        let mut channel = FakeChannel {
            inbound: VecDeque::from(vec![b64("alice"), b64("wrong")]),
            challenges: Vec::new(),
        };
        let outcome = auth.authenticate(None, &mut channel, &FixedCallback).await;
        assert!(matches!(outcome, AuthOutcome::Failure(_)));
    }
}
