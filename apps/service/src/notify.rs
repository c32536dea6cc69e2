//! Alert delivery.
//!
//! Alerts are best effort: the scheduler logs a failed send and moves on, it
//! never retries.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Sms;

/// Longest body the SMS provider accepts
const MAX_MESSAGE_LENGTH: usize = 1600;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid notification: {0}")]
    InvalidMessage(&'static str),

    #[error("Notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Notification provider rejected the message with status {0}")]
    Rejected(u16),
}

/// Sends a message to a phone number
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, phone: &str, message: &str) -> Result<(), NotifyError>;
}

fn validate_message(phone: &str, message: &str) -> Result<(), NotifyError> {
    if phone.trim().is_empty() {
        return Err(NotifyError::InvalidMessage("phone number is missing"));
    }
    // The body is sent as-is, so its full length counts
    if message.trim().is_empty() || message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(NotifyError::InvalidMessage("message must be 1 to 1600 characters"));
    }
    Ok(())
}

/// Prefix a local number with the country code, dropping its trunk `0`
pub fn international_number(country_code: &str, phone: &str) -> String {
    let phone = phone.trim();
    let local = phone.strip_prefix('0').unwrap_or(phone);
    format!("{country_code}{local}")
}

/// SMS through the Twilio messages API
pub struct TwilioNotifier {
    client: reqwest::Client,
    config: Sms,
}

impl TwilioNotifier {
    pub fn new(config: Sms) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

#[async_trait]
impl Notifier for TwilioNotifier {
    async fn send(&self, phone: &str, message: &str) -> Result<(), NotifyError> {
        validate_message(phone, message)?;

        let to = international_number(&self.config.country_code, phone);
        let form = [("From", self.config.from_phone.as_str()), ("To", to.as_str()), ("Body", message)];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await?;

        match response.status().as_u16() {
            200 | 201 => {
                info!(to = %to, "SMS alert sent");
                Ok(())
            }
            status => Err(NotifyError::Rejected(status)),
        }
    }
}

/// Fallback when no SMS credentials are configured: alerts only go to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, phone: &str, message: &str) -> Result<(), NotifyError> {
        validate_message(phone, message)?;
        warn!(phone = %phone, "ALERT: {}", message);
        Ok(())
    }
}

/// Pick the notifier the configuration allows
pub fn from_config(config: &Sms) -> Result<Box<dyn Notifier>, NotifyError> {
    if config.is_configured() {
        Ok(Box::new(TwilioNotifier::new(config.clone())?))
    } else {
        warn!("SMS credentials are not configured, alerts will only be logged");
        Ok(Box::new(LogNotifier))
    }
}
