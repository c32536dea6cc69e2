use serde::{Deserialize, Serialize};
use std::fmt;

/// Up/down classification of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    Up,
    #[default]
    Down,
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckState::Up => write!(f, "up"),
            CheckState::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP method of a check, stored lowercase and sent uppercase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Post => "post",
            Method::Put => "put",
            Method::Delete => "delete",
        }
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_ascii_uppercase())
    }
}

/// A validated check, as stored in the `checks` collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Check {
    /// 20-character identifier, immutable after creation
    pub id: String,

    pub protocol: Protocol,

    /// Host and optional path, without scheme
    pub url: String,

    pub method: Method,

    /// 10-digit number alerts are sent to
    pub phone: String,

    /// Response codes that count as "up"
    pub success_codes: Vec<u16>,

    pub timeout_seconds: u64,

    pub state: CheckState,

    /// Epoch milliseconds of the last evaluation, absent if never evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<i64>,
}

impl Check {
    /// Full URL including the scheme
    pub fn target(&self) -> String {
        format!("{}://{}", self.protocol, self.url)
    }
}

/// Coalesced result of a single probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
}

impl Outcome {
    pub const TIMEOUT: &'static str = "timeout";

    pub fn response(code: u16) -> Self {
        Self { network_error: None, response_code: Some(code) }
    }

    pub fn network_error(error: impl Into<String>) -> Self {
        Self { network_error: Some(error.into()), response_code: None }
    }

    pub fn timeout() -> Self {
        Self::network_error(Self::TIMEOUT)
    }

    #[allow(dead_code)] // Public API method
    pub fn is_timeout(&self) -> bool {
        self.network_error.as_deref() == Some(Self::TIMEOUT)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.network_error, self.response_code) {
            (Some(error), _) => write!(f, "network error: {error}"),
            (None, Some(code)) => write!(f, "response {code}"),
            (None, None) => write!(f, "no response"),
        }
    }
}

/// Result of evaluating an outcome against a check's prior state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub state: CheckState,
    pub should_alert: bool,
}
