use bytes::Bytes;
use http::header::{HeaderMap, CONTENT_TYPE};
use http::StatusCode;
use serde_json::Value;

/// Parsed response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Raw(Bytes),
}

/// A fully read response. Read-only once produced by the transport.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    text: String,
    body: ResponseBody,
}

impl Response {
    /// Builds a response from raw parts, decoding the body as JSON when the
    /// content type says so and the payload parses.
    pub fn new(status: u16, headers: HeaderMap, bytes: Bytes) -> Self {
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let is_json = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.to_ascii_lowercase().contains("json"));

        let body = if is_json {
            serde_json::from_slice(&bytes)
                .map(ResponseBody::Json)
                .unwrap_or(ResponseBody::Raw(bytes))
        } else {
            ResponseBody::Raw(bytes)
        };

        Self {
            status,
            headers,
            text,
            body,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Canonical reason phrase for the status, e.g. `"Not Found"`.
    pub fn status_text(&self) -> &'static str {
        reason_phrase(self.status)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// All values of a header field joined with `,` (case-insensitive name).
    pub fn header(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .get_all(name)
            .iter()
            .map(|value| value.to_str().unwrap_or("<binary>"))
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(","))
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Raw(_) => None,
        }
    }
}

pub(crate) fn reason_phrase(status: u16) -> &'static str {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown")
}
