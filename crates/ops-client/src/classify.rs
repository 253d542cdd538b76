//! Upstream error response classification
//!
//! Non-200 bodies are first parsed as one of two structured shapes, in XML
//! or JSON:
//!
//! - `<error><code/><message/><moreInfo/></error>` (code, message, optional link)
//! - `<fault><code/><message/><description/></fault>` (gateway faults)
//!
//! A recognised upstream code picks the error variant. When the body matches
//! neither shape the HTTP status alone decides, so callers always get a typed
//! error even for HTML error pages or empty bodies.

use std::time::Duration;

use quick_xml::events::Event;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;

use crate::error::Error;

/// Longest raw body excerpt carried inside an error.
const MAX_BODY_EXCERPT: usize = 512;

#[derive(Debug, Deserialize)]
struct ErrorShape {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "moreInfo", alias = "more_info", alias = "link")]
    more_info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FaultShape {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Structured upstream error, whichever shape it arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError {
    pub code: String,
    pub message: String,
    /// `moreInfo` link or fault `description`
    pub detail: Option<String>,
}

impl From<ErrorShape> for UpstreamError {
    fn from(shape: ErrorShape) -> Self {
        Self {
            message: shape.message.unwrap_or_else(|| shape.code.clone()),
            code: shape.code,
            detail: shape.more_info,
        }
    }
}

impl From<FaultShape> for UpstreamError {
    fn from(shape: FaultShape) -> Self {
        Self {
            message: shape.message.unwrap_or_else(|| shape.code.clone()),
            code: shape.code,
            detail: shape.description,
        }
    }
}

/// Classify a completed non-200 response.
pub fn classify_response(status: u16, headers: &HeaderMap, body: &[u8]) -> Error {
    let retry_after = parse_retry_after(headers);
    match parse_upstream_error(body) {
        Some(upstream) => classify_upstream(status, upstream, retry_after),
        None => classify_status(status, &String::from_utf8_lossy(body), retry_after),
    }
}

/// Try both structured shapes, XML first, then JSON.
pub fn parse_upstream_error(body: &[u8]) -> Option<UpstreamError> {
    let text = std::str::from_utf8(body).ok()?.trim();
    if text.starts_with('<') {
        parse_xml(text)
    } else if text.starts_with('{') {
        parse_json(text)
    } else {
        None
    }
}

fn parse_xml(text: &str) -> Option<UpstreamError> {
    let parsed = match root_element(text)?.as_str() {
        "error" => quick_xml::de::from_str::<ErrorShape>(text).ok()?.into(),
        "fault" => quick_xml::de::from_str::<FaultShape>(text).ok()?.into(),
        _ => return None,
    };
    non_blank(parsed)
}

fn parse_json(text: &str) -> Option<UpstreamError> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let parsed = if let Some(inner) = value.get("fault") {
        serde_json::from_value::<FaultShape>(inner.clone()).ok()?.into()
    } else if let Some(inner) = value.get("error").filter(|v| v.is_object()) {
        serde_json::from_value::<ErrorShape>(inner.clone()).ok()?.into()
    } else {
        serde_json::from_value::<ErrorShape>(value).ok()?.into()
    };
    non_blank(parsed)
}

fn non_blank(parsed: UpstreamError) -> Option<UpstreamError> {
    (!parsed.code.trim().is_empty()).then_some(parsed)
}

/// Local name of the first element, ignoring the XML declaration and any
/// namespace prefix.
fn root_element(text: &str) -> Option<String> {
    let mut reader = quick_xml::Reader::from_str(text);
    loop {
        match reader.read_event().ok()? {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.local_name();
                return Some(String::from_utf8_lossy(name.as_ref()).to_ascii_lowercase());
            }
            Event::Eof => return None,
            _ => continue,
        }
    }
}

/// Map a structured upstream code onto the error taxonomy.
pub fn classify_upstream(
    status: u16,
    upstream: UpstreamError,
    retry_after: Option<Duration>,
) -> Error {
    let code = upstream.code.to_ascii_lowercase();
    let is = |needles: &[&str]| needles.iter().any(|n| code.contains(n));

    if code == "404" || is(&["entitynotfound", "invalidreference", "notfound"]) {
        return Error::NotFound {
            status,
            code: Some(upstream.code),
            message: upstream.message,
        };
    }
    if code == "401" || is(&["invalidaccesstoken", "missingaccesstoken", "accesstokenexpired", "unauthorized"]) {
        return Error::Auth {
            status: Some(status),
            message: format!("{}: {}", upstream.code, upstream.message),
        };
    }
    if code == "429"
        || code == "403"
        || is(&["quotaperhour", "quotaperweek", "ratelimit", "robotdetected", "toomanyrequests"])
    {
        return Error::QuotaExceeded {
            status,
            code: Some(upstream.code),
            message: upstream.message,
        };
    }
    if code == "503" || is(&["serviceunavailable"]) {
        return Error::ServiceUnavailable {
            status,
            message: format!("{}: {}", upstream.code, upstream.message),
            retry_after,
        };
    }
    Error::Service {
        status,
        code: upstream.code,
        message: upstream.message,
        more_info: upstream.detail,
    }
}

/// Fallback when the body carried no structured error.
pub fn classify_status(status: u16, body: &str, retry_after: Option<Duration>) -> Error {
    let message = excerpt(body, status);
    match status {
        404 => Error::NotFound {
            status,
            code: None,
            message,
        },
        401 => Error::Auth {
            status: Some(status),
            message,
        },
        403 | 429 => Error::QuotaExceeded {
            status,
            code: None,
            message,
        },
        503 => Error::ServiceUnavailable {
            status,
            message,
            retry_after,
        },
        _ => Error::Http {
            status,
            body: message,
        },
    }
}

/// `Retry-After` in delta-seconds form; HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn excerpt(body: &str, status: u16) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("HTTP {status}");
    }
    match trimmed.char_indices().nth(MAX_BODY_EXCERPT) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
