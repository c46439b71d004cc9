//! Forwards accepted messages to a configured webhook URL via HTTPS POST.
//!
//! This is the demo binary's [`MessageStore`]: every accepted message
//! becomes one JSON POST. Mirrors the original product behavior this crate
//! was extracted from, now expressed as a pluggable hook instead of
//! something baked into the session loop.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::Request;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::hooks::MessageStore;
use crate::message::Message;
use crate::session_view::SessionView;

type HttpsConn = hyper_rustls::HttpsConnector<HttpConnector>;
type WebhookHttpClient = Client<HttpsConn, Full<Bytes>>;

/// The JSON payload posted to the webhook URL for each accepted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailPayload {
    pub sender: String,
    pub recipients: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
}

/// A [`MessageStore`] that POSTs every accepted message to a webhook URL.
pub struct WebhookStore {
    webhook_url: String,
    client: WebhookHttpClient,
    user_agent: String,
}

impl WebhookStore {
    /// Builds a client using `hyper-rustls` with the system's native root
    /// certificates.
    ///
    /// # Panics
    ///
    /// Panics if loading the native root certificates fails; treated as a
    /// fatal startup error, same as the client this was adapted from.
    pub fn new(webhook_url: String) -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .expect("Failed to load native root certificates for hyper-rustls")
            .https_only()
            .enable_http1()
            .build();

        let client: WebhookHttpClient = Client::builder(TokioExecutor::new()).build(https);
        let user_agent = format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

        WebhookStore {
            webhook_url,
            client,
            user_agent,
        }
    }

    /// Sends `payload` to the webhook URL. A non-success HTTP status is
    /// logged, not propagated: the message has already been accepted over
    /// SMTP, and a misbehaving webhook endpoint shouldn't turn into a 554
    /// for the client. Request construction or transport failures still
    /// propagate, since those mean the POST was never sent at all.
    async fn post(&self, payload: &EmailPayload) -> anyhow::Result<()> {
        let json_body = serde_json::to_string(payload)?;

        let request = Request::builder()
            .method(hyper::Method::POST)
            .uri(&self.webhook_url)
            .header("content-type", "application/json")
            .header("user-agent", &self.user_agent)
            .body(Full::new(Bytes::from(json_body)))?;

        let response = self.client.request(request).await?;
        let status = response.status();
        if status.is_success() {
            info!(
                "Message forwarded to webhook {}, status: {}",
                self.webhook_url, status
            );
        } else {
            error!(
                "Webhook request to {} failed with status: {}",
                self.webhook_url, status
            );
        }

        Ok(())
    }
}

#[async_trait]
impl MessageStore for WebhookStore {
    async fn save(&self, _session: &SessionView, message: &Message) -> Result<(), String> {
        let payload = EmailPayload {
            sender: message.reverse_path.clone(),
            recipients: message.forward_paths.clone(),
            subject: message.subject(),
            body: String::from_utf8_lossy(&message.raw).into_owned(),
        };

        info!(
            "Forwarding message {} from {} ({} recipients)",
            message.id,
            payload.sender,
            payload.recipients.len()
        );

        self.post(&payload).await.map_err(|e| e.to_string())
    }
}
