//! Schema validation for raw check records.
//!
//! Records come straight from the store and may have been written by any
//! version of the CRUD layer, so every field is checked here before the
//! scheduler probes anything. A rejected record is skipped for the current
//! cycle only.

use serde_json::{Map, Value};
use thiserror::Error;

use super::types::{Check, CheckState, Method, Protocol};

const ID_LENGTH: usize = 20;
const PHONE_LENGTH: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Check record is not a JSON object")]
    NotAnObject,

    #[error("Missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Invalid `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidField { field, reason: reason.into() }
}

fn required<'a>(
    record: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, ValidationError> {
    match record.get(field) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(field)),
        Some(value) => Ok(value),
    }
}

fn required_str<'a>(
    record: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    required(record, field)?.as_str().ok_or_else(|| invalid(field, "expected a string"))
}

/// Validate and normalize a raw check record.
///
/// Only `state` and `lastChecked` have defaults; every other field must be
/// present and well-formed.
pub fn validate_check(raw: &Value, max_timeout_seconds: u64) -> Result<Check, ValidationError> {
    let record = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let id = validate_id(required_str(record, "id")?)?;
    let protocol = validate_protocol(required_str(record, "protocol")?)?;
    let url = validate_url(required_str(record, "url")?)?;
    let method = validate_method(required_str(record, "method")?)?;
    let phone = validate_phone(required_str(record, "phone")?)?;
    let success_codes = validate_success_codes(required(record, "successCodes")?)?;
    let timeout_seconds =
        validate_timeout(required(record, "timeoutSeconds")?, max_timeout_seconds)?;

    Ok(Check {
        id,
        protocol,
        url,
        method,
        phone,
        success_codes,
        timeout_seconds,
        state: parse_state(record.get("state")),
        last_checked: parse_last_checked(record.get("lastChecked")),
    })
}

fn validate_id(id: &str) -> Result<String, ValidationError> {
    let id = id.trim();
    if id.chars().count() != ID_LENGTH {
        return Err(invalid("id", format!("expected {ID_LENGTH} characters")));
    }
    Ok(id.to_string())
}

fn validate_protocol(protocol: &str) -> Result<Protocol, ValidationError> {
    match protocol {
        "http" => Ok(Protocol::Http),
        "https" => Ok(Protocol::Https),
        other => Err(invalid("protocol", format!("unsupported protocol '{other}'"))),
    }
}

fn validate_url(url: &str) -> Result<String, ValidationError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(invalid("url", "cannot be empty"));
    }
    if url.contains("://") {
        return Err(invalid("url", "must not include a scheme"));
    }
    if url.chars().any(char::is_whitespace) {
        return Err(invalid("url", "must not contain whitespace"));
    }
    Ok(url.to_string())
}

fn validate_method(method: &str) -> Result<Method, ValidationError> {
    match method {
        "get" => Ok(Method::Get),
        "post" => Ok(Method::Post),
        "put" => Ok(Method::Put),
        "delete" => Ok(Method::Delete),
        other => Err(invalid("method", format!("unsupported method '{other}'"))),
    }
}

fn validate_phone(phone: &str) -> Result<String, ValidationError> {
    let phone = phone.trim();
    if phone.len() != PHONE_LENGTH || !phone.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("phone", format!("expected {PHONE_LENGTH} digits")));
    }
    Ok(phone.to_string())
}

fn validate_success_codes(value: &Value) -> Result<Vec<u16>, ValidationError> {
    let codes = value.as_array().ok_or_else(|| invalid("successCodes", "expected an array"))?;
    if codes.is_empty() {
        return Err(invalid("successCodes", "cannot be empty"));
    }

    codes
        .iter()
        .map(|code| {
            code.as_u64()
                .filter(|code| (100..=599).contains(code))
                .map(|code| code as u16)
                .ok_or_else(|| invalid("successCodes", format!("{code} is not an HTTP status code")))
        })
        .collect()
}

fn validate_timeout(value: &Value, max_timeout_seconds: u64) -> Result<u64, ValidationError> {
    let timeout = value
        .as_u64()
        .ok_or_else(|| invalid("timeoutSeconds", "expected a positive integer"))?;

    if timeout < 1 || timeout > max_timeout_seconds {
        return Err(invalid(
            "timeoutSeconds",
            format!("{timeout} is outside 1..={max_timeout_seconds}"),
        ));
    }

    Ok(timeout)
}

/// Absent or unrecognized states count as "never observed up".
fn parse_state(value: Option<&Value>) -> CheckState {
    match value.and_then(Value::as_str) {
        Some("up") => CheckState::Up,
        _ => CheckState::Down,
    }
}

fn parse_last_checked(value: Option<&Value>) -> Option<i64> {
    value.and_then(Value::as_i64).filter(|timestamp| *timestamp > 0)
}
