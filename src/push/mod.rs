//! Push notifications to users' devices.
//!
//! [`PushNotifier`] is the seam; [`FcmNotifier`] talks to Firebase Cloud
//! Messaging and [`DisabledNotifier`] drops everything. Sends are batches of
//! device tokens sharing one notification.

pub mod fcm;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::PushSettings;
pub use fcm::{FcmNotifier, ServiceAccount};

#[derive(Debug, Error)]
pub enum PushError {
    #[error("cannot read credentials: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid credentials file: {0}")]
    Credentials(#[from] serde_json::Error),

    #[error("cannot sign access token request: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authorization failed: {0}")]
    Auth(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl PushNotification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Per-batch outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResponse {
    pub success_count: usize,
    pub failure_count: usize,
    pub failed_tokens: Vec<String>,
}

#[async_trait]
pub trait PushNotifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Send `notification` to every non-empty token.
    async fn send_batch(
        &self,
        tokens: &[String],
        notification: &PushNotification,
    ) -> Result<BatchResponse, PushError>;
}

pub struct DisabledNotifier;

#[async_trait]
impl PushNotifier for DisabledNotifier {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn send_batch(
        &self,
        tokens: &[String],
        notification: &PushNotification,
    ) -> Result<BatchResponse, PushError> {
        debug!(
            "Push disabled, dropping '{}' for {} device(s)",
            notification.title,
            tokens.len()
        );
        Ok(BatchResponse::default())
    }
}

/// Tokens worth sending to: blanks are dropped.
pub fn valid_tokens(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .filter(|t| !t.trim().is_empty())
        .cloned()
        .collect()
}

/// Build the notifier the settings ask for. Push enabled without a readable
/// credentials file degrades to [`DisabledNotifier`] with a warning.
pub fn notifier_from_settings(settings: &PushSettings) -> Arc<dyn PushNotifier> {
    if !settings.enabled {
        info!("Push notifications disabled by configuration");
        return Arc::new(DisabledNotifier);
    }
    let path = Path::new(&settings.credentials_path);
    if !path.exists() {
        warn!(
            "Firebase credentials not found at '{}', push notifications are disabled",
            path.display()
        );
        return Arc::new(DisabledNotifier);
    }
    match FcmNotifier::from_file(path) {
        Ok(notifier) => {
            info!("Push notifications enabled for project '{}'", notifier.project_id());
            Arc::new(notifier)
        }
        Err(e) => {
            warn!("Failed to initialize FCM, push notifications are disabled: {e}");
            Arc::new(DisabledNotifier)
        }
    }
}

/// Send in the background and log the outcome. Returns immediately.
pub fn spawn_batch(
    notifier: Arc<dyn PushNotifier>,
    tokens: Vec<String>,
    notification: PushNotification,
) {
    if tokens.is_empty() {
        return;
    }
    info!("Scheduling push notification for {} device(s)", tokens.len());
    tokio::spawn(async move {
        match notifier.send_batch(&tokens, &notification).await {
            Ok(report) if report.failure_count > 0 => warn!(
                "Push sent: {} succeeded, {} failed; failing tokens: {:?}",
                report.success_count, report.failure_count, report.failed_tokens
            ),
            Ok(report) => info!("Push sent: {} succeeded", report.success_count),
            Err(e) => warn!("Failed to send push batch: {e}"),
        }
    });
}

#[cfg(test)]
mod tests;
