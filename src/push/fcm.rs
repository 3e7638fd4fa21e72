//! Firebase Cloud Messaging, HTTP v1 API.
//!
//! Authenticates as a service account: a short-lived RS256 JWT assertion is
//! exchanged at the account's `token_uri` for an OAuth access token, which is
//! cached until shortly before it expires. Each device token is one
//! `messages:send` call; the calls of a batch run concurrently.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{BatchResponse, PushError, PushNotification, PushNotifier, valid_tokens};

const FCM_ENDPOINT: &str = "https://fcm.googleapis.com";
const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Refresh the access token this long before it expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// The fields of a Firebase service-account JSON file this client needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct FcmNotifier {
    account: ServiceAccount,
    key: EncodingKey,
    endpoint: String,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl FcmNotifier {
    pub fn from_file(path: &Path) -> Result<Self, PushError> {
        let raw = std::fs::read_to_string(path)?;
        let account: ServiceAccount = serde_json::from_str(&raw)?;
        Self::from_service_account(account)
    }

    pub fn from_service_account(account: ServiceAccount) -> Result<Self, PushError> {
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())?;
        Ok(Self {
            account,
            key,
            endpoint: FCM_ENDPOINT.to_string(),
            client: reqwest::Client::new(),
            token: Mutex::new(None),
        })
    }

    /// Send messages to another base URL than the public FCM API.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn project_id(&self) -> &str {
        &self.account.project_id
    }

    /// Signed JWT asserting the service account's identity.
    pub fn assertion(&self, now: DateTime<Utc>) -> Result<String, PushError> {
        let claims = AssertionClaims {
            iss: &self.account.client_email,
            scope: MESSAGING_SCOPE,
            aud: &self.account.token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &self.key)?)
    }

    async fn access_token(&self) -> Result<String, PushError> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at - margin > now) {
            return Ok(token.value.clone());
        }

        let assertion = self.assertion(now)?;
        let response = self
            .client
            .post(&self.account.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PushError::Auth(format!("token endpoint returned {status}: {text}")));
        }
        let token: TokenResponse = response.json().await?;
        debug!("Obtained FCM access token valid for {}s", token.expires_in);

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: now + Duration::seconds(token.expires_in),
        });
        Ok(token.access_token)
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.endpoint, self.account.project_id
        )
    }

    async fn send_one(
        &self,
        access_token: &str,
        device_token: &str,
        notification: &PushNotification,
    ) -> bool {
        let result = self
            .client
            .post(self.send_url())
            .bearer_auth(access_token)
            .json(&message_body(device_token, notification))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                debug!("FCM rejected a device token with {status}: {text}");
                false
            }
            Err(e) => {
                warn!("FCM request failed: {e}");
                false
            }
        }
    }
}

/// The JSON body of one FCM v1 `messages:send` request.
pub fn message_body(device_token: &str, notification: &PushNotification) -> serde_json::Value {
    json!({
        "message": {
            "token": device_token,
            "notification": {
                "title": notification.title,
                "body": notification.body,
            },
            "data": notification.data,
        }
    })
}

#[async_trait]
impl PushNotifier for FcmNotifier {
    fn name(&self) -> &'static str {
        "fcm"
    }

    async fn send_batch(
        &self,
        tokens: &[String],
        notification: &PushNotification,
    ) -> Result<BatchResponse, PushError> {
        let tokens = valid_tokens(tokens);
        if tokens.is_empty() {
            debug!("No valid FCM tokens to notify");
            return Ok(BatchResponse::default());
        }

        let access_token = self.access_token().await?;
        let outcomes = join_all(
            tokens
                .iter()
                .map(|token| self.send_one(&access_token, token, notification)),
        )
        .await;

        let mut report = BatchResponse::default();
        for (token, delivered) in tokens.into_iter().zip(outcomes) {
            if delivered {
                report.success_count += 1;
            } else {
                report.failure_count += 1;
                report.failed_tokens.push(token);
            }
        }
        Ok(report)
    }
}
