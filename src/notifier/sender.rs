//! HMAC-signed delivery of a single notification, adapted from the teacher's
//! `webhooks::sender::WebhookSender` verbatim except for the header names.

use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const HTTP_TIMEOUT: u64 = 20;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug)]
pub enum DeliveryResult {
    Success,
    RetryableFailure(String),
    PermanentFailure(String),
}

pub struct NotifierSender {
    client: Client,
}

impl Default for NotifierSender {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifierSender {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT))
            .user_agent("escrow-arbiter/1.0")
            .build()
            .expect("failed to build notifier HTTP client");
        Self { client }
    }

    pub async fn send(&self, url: &str, secret: &str, payload: &str) -> DeliveryResult {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::from_secs(0)).as_secs();

        let signature = match Self::sign_payload(secret, now, payload) {
            Ok(s) => s,
            Err(e) => return DeliveryResult::PermanentFailure(format!("signing error: {e}")),
        };

        let request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Escrow-Signature", signature)
            .header("X-Escrow-Timestamp", now.to_string())
            .body(payload.to_string());

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    DeliveryResult::Success
                } else if status.is_client_error() {
                    let body = response.text().await.unwrap_or_default().chars().take(200).collect::<String>();
                    DeliveryResult::PermanentFailure(format!("client error {status}: {body}"))
                } else {
                    DeliveryResult::RetryableFailure(format!("server error {status}"))
                }
            },
            Err(e) => DeliveryResult::RetryableFailure(format!("network error: {e}")),
        }
    }

    fn sign_payload(secret: &str, timestamp: u64, payload: &str) -> Result<String, String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| "invalid key length".to_string())?;
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        let sig_hex = hex::encode(mac.finalize().into_bytes());
        Ok(format!("t={timestamp},v1={sig_hex}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn signed_post_succeeds_on_2xx() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/hook")).respond_with(ResponseTemplate::new(200)).mount(&mock_server).await;

        let sender = NotifierSender::new();
        let url = format!("{}/hook", mock_server.uri());
        let result = sender.send(&url, "secret", r#"{"event":"deal.funded"}"#).await;
        assert!(matches!(result, DeliveryResult::Success));
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(500)).mount(&mock_server).await;

        let sender = NotifierSender::new();
        let result = sender.send(&mock_server.uri(), "secret", "{}").await;
        assert!(matches!(result, DeliveryResult::RetryableFailure(_)));
    }

    #[tokio::test]
    async fn client_error_is_permanent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(400)).mount(&mock_server).await;

        let sender = NotifierSender::new();
        let result = sender.send(&mock_server.uri(), "secret", "{}").await;
        assert!(matches!(result, DeliveryResult::PermanentFailure(_)));
    }
}
