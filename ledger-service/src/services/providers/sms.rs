//! Eskiz-style SMS gateway.
//!
//! The gateway issues a bearer token from `POST {api}/auth/login`. Tokens are
//! held in an [`SmsTokenCache`] with an explicit expiry; a 401 from the send
//! endpoint invalidates the cached token and the send is retried once.

use super::{ProviderError, ProviderResponse, SmsMessage, SmsProvider};
use crate::config::SmsConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Bearer token with expiry. Refreshes are serialized so concurrent senders
/// trigger a single login.
pub struct SmsTokenCache {
    ttl: Duration,
    slot: tokio::sync::Mutex<Option<CachedToken>>,
}

impl SmsTokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns the cached token, or runs `login` and caches its result.
    pub async fn get_or_refresh<F, Fut>(&self, login: F) -> Result<String, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, ProviderError>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(token.value.clone());
        }

        let value = login().await?;
        *slot = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + self.ttl,
        });
        Ok(value)
    }

    /// Drops the token only if it is still `stale`, so a token refreshed by
    /// another sender in the meantime survives.
    pub async fn invalidate(&self, stale: &str) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|t| t.value == stale) {
            *slot = None;
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    data: LoginData,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    mobile_phone: &'a str,
    message: &'a str,
    from: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: Option<serde_json::Value>,
}

enum Attempt {
    Sent(ProviderResponse),
    Unauthorized,
}

/// Keeps digits only, e.g. `+998 (90) 123-45-67` becomes `998901234567`.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

pub struct EskizSmsProvider {
    config: SmsConfig,
    client: Client,
    tokens: Arc<SmsTokenCache>,
}

impl EskizSmsProvider {
    pub fn new(config: SmsConfig, tokens: Arc<SmsTokenCache>) -> Self {
        Self {
            config,
            client: Client::new(),
            tokens,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    async fn login(&self) -> Result<String, ProviderError> {
        let password = self.config.password.expose_secret();
        if self.config.email.is_empty() || password.is_empty() {
            return Err(ProviderError::Configuration(
                "SMS credentials not configured".to_string(),
            ));
        }

        let response = self
            .client
            .post(self.endpoint("/auth/login"))
            .json(&LoginRequest {
                email: &self.config.email,
                password,
            })
            .send()
            .await
            .map_err(|e| ProviderError::Connection(format!("SMS login failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ProviderError::Authentication(format!(
                "SMS login returned {}",
                response.status()
            )));
        }

        let body: LoginResponse = response.json().await.map_err(|e| {
            ProviderError::Authentication(format!("Failed to parse SMS login response: {}", e))
        })?;

        tracing::info!("SMS token obtained");
        Ok(body.data.token)
    }

    async fn attempt(&self, token: &str, phone: &str, body: &str) -> Result<Attempt, ProviderError> {
        let response = self
            .client
            .post(self.endpoint("/message/sms/send"))
            .bearer_auth(token)
            .json(&SendRequest {
                mobile_phone: phone,
                message: body,
                from: &self.config.sender,
            })
            .send()
            .await
            .map_err(|e| ProviderError::Connection(format!("Failed to reach SMS gateway: {}", e)))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(Attempt::Unauthorized);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::SendFailed(format!(
                "SMS gateway returned {}: {}",
                status, text
            )));
        }

        let parsed: SendResponse = response.json().await.unwrap_or(SendResponse { id: None });
        let provider_id = parsed.id.map(|id| match id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });
        Ok(Attempt::Sent(ProviderResponse::success(provider_id)))
    }
}

#[async_trait]
impl SmsProvider for EskizSmsProvider {
    async fn send(&self, sms: &SmsMessage) -> Result<ProviderResponse, ProviderError> {
        if !self.config.enabled {
            return Err(ProviderError::NotEnabled(
                "SMS provider is not enabled".to_string(),
            ));
        }

        let phone = normalize_phone(&sms.to);
        if phone.is_empty() {
            return Err(ProviderError::InvalidRecipient(
                "Phone number is empty".to_string(),
            ));
        }

        let token = self.tokens.get_or_refresh(|| self.login()).await?;
        if let Attempt::Sent(response) = self.attempt(&token, &phone, &sms.body).await? {
            tracing::info!(to = %phone, "SMS sent");
            return Ok(response);
        }

        tracing::warn!("SMS token rejected, refreshing");
        self.tokens.invalidate(&token).await;
        let token = self.tokens.get_or_refresh(|| self.login()).await?;

        match self.attempt(&token, &phone, &sms.body).await? {
            Attempt::Sent(response) => {
                tracing::info!(to = %phone, "SMS sent after token refresh");
                Ok(response)
            }
            Attempt::Unauthorized => Err(ProviderError::Authentication(
                "SMS gateway rejected a freshly issued token".to_string(),
            )),
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if !self.config.enabled {
            return Ok(());
        }
        if self.config.email.is_empty() || self.config.password.expose_secret().is_empty() {
            return Err(ProviderError::Configuration(
                "SMS credentials are not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Records what would have been sent.
pub struct MockSmsProvider {
    enabled: bool,
    send_count: AtomicU64,
    sent: Mutex<Vec<SmsMessage>>,
}

impl MockSmsProvider {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            send_count: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SmsMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SmsProvider for MockSmsProvider {
    async fn send(&self, sms: &SmsMessage) -> Result<ProviderResponse, ProviderError> {
        if !self.enabled {
            return Err(ProviderError::NotEnabled(
                "Mock SMS provider is not enabled".to_string(),
            ));
        }

        let n = self.send_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(sms.clone());
        }

        tracing::info!(to = %sms.to, "[MOCK] SMS would be sent");

        Ok(ProviderResponse::success(Some(format!("mock-sms-{}", n))))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
