use std::fmt::{self, Display};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    /// Any other valid token, stored upper-cased.
    Extension(String),
}

impl HttpMethod {
    /// Normalizes `raw` to upper case and validates it as a method token.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let upper = raw.trim().to_ascii_uppercase();
        let method = match upper.as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "PATCH" => HttpMethod::Patch,
            "DELETE" => HttpMethod::Delete,
            "HEAD" => HttpMethod::Head,
            "OPTIONS" => HttpMethod::Options,
            _ => {
                reqwest::Method::from_bytes(upper.as_bytes())
                    .map_err(|_| ConfigError::InvalidMethod(raw.to_string()))?;
                HttpMethod::Extension(upper)
            }
        };
        Ok(method)
    }

    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Extension(name) => name,
        }
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&HttpMethod> for reqwest::Method {
    type Error = ConfigError;

    fn try_from(method: &HttpMethod) -> Result<Self, Self::Error> {
        let mapped = match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
            HttpMethod::Extension(name) => reqwest::Method::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::InvalidMethod(name.clone()))?,
        };
        Ok(mapped)
    }
}
