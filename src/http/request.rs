use serde::Deserialize;

use super::method::HttpMethod;

/// Pass-through client configuration. Only `host` and `secure` are read by
/// the assertion engine; everything else is forwarded to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOptions {
    #[serde(default)]
    pub redirects: usize,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub secure: bool,
}

fn default_verify_tls() -> bool {
    true
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            redirects: 0,
            timeout_ms: None,
            verify_tls: default_verify_tls(),
            host: None,
            secure: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    Basic { username: String, password: String },
    Bearer(String),
}

/// Everything the transport needs to issue one request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    pub auth: Option<Auth>,
    pub options: ClientOptions,
}

impl RequestSpec {
    pub fn new(method: HttpMethod, url: impl Into<String>, options: ClientOptions) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            auth: None,
            options,
        }
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers
            .iter()
            .any(|(key, _)| key.eq_ignore_ascii_case(name))
    }
}
