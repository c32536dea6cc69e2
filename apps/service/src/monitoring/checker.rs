use std::time::Duration;

use thiserror::Error;

use super::types::{Check, Outcome};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("timeout")]
    Timeout,

    #[error("Invalid probe target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Request(String),
}

impl From<ProbeError> for Outcome {
    fn from(error: ProbeError) -> Self {
        match error {
            ProbeError::Timeout => Outcome::timeout(),
            other => Outcome::network_error(other.to_string()),
        }
    }
}

/// Performs a single request for a check and reports the response code.
///
/// Implementations do not need to enforce the check's deadline themselves,
/// the executor races them against it.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, check: &Check) -> Result<u16, ProbeError>;
}

/// HTTP/HTTPS checker
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("upcheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, check: &Check) -> Result<u16, ProbeError> {
        let target = check.target();
        let url = reqwest::Url::parse(&target).map_err(|e| ProbeError::InvalidTarget {
            target: target.clone(),
            reason: e.to_string(),
        })?;

        let response = self
            .client
            .request(check.method.to_reqwest(), url)
            .timeout(Duration::from_secs(check.timeout_seconds))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() { ProbeError::Timeout } else { ProbeError::Request(e.to_string()) }
            })?;

        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_error_into_outcome() {
        assert!(Outcome::from(ProbeError::Timeout).is_timeout());

        let outcome = Outcome::from(ProbeError::Request("connection refused".into()));
        assert_eq!(outcome.network_error.as_deref(), Some("HTTP request failed: connection refused"));
        assert_eq!(outcome.response_code, None);
    }

    #[tokio::test]
    async fn test_invalid_target_is_reported() {
        use crate::monitoring::types::{CheckState, Method, Protocol};

        let checker = HttpChecker::new().unwrap();
        let check = Check {
            id: "abcdefghij0123456789".to_string(),
            protocol: Protocol::Http,
            url: "exa mple.com".to_string(),
            method: Method::Get,
            phone: "0705465771".to_string(),
            success_codes: vec![200],
            timeout_seconds: 1,
            state: CheckState::Down,
            last_checked: None,
        };

        let result = checker.check(&check).await;
        assert!(matches!(result, Err(ProbeError::InvalidTarget { .. })));
    }
}
