//! Entry points that produce [`Test`]s for one target server.

use std::sync::Arc;

use reqwest::cookie::Jar;

use crate::error::ConfigError;
use crate::http::client::{ReqwestTransport, Transport};
use crate::http::request::{Auth, ClientOptions};
use crate::lifecycle::ServerHandle;
use crate::testing::Test;

/// Builds tests against one server handle. Every test resolves the handle
/// itself, so a factory is started and closed per test.
#[derive(Clone)]
pub struct Request {
    handle: ServerHandle,
    options: ClientOptions,
    transport: Arc<dyn Transport>,
    headers: Vec<(String, String)>,
    auth: Option<Auth>,
}

impl Request {
    pub fn new(handle: impl Into<ServerHandle>) -> Self {
        Self {
            handle: handle.into(),
            options: ClientOptions::default(),
            transport: Arc::new(ReqwestTransport::new()),
            headers: Vec::new(),
            auth: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Host used in place of `127.0.0.1` for running servers and factories.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.options.host = Some(host.into());
        self
    }

    /// Use `https` for running servers. Ignored for factories.
    pub fn secure(mut self, secure: bool) -> Self {
        self.options.secure = secure;
        self
    }

    pub fn method(&self, method: &str, path: &str) -> Result<Test, ConfigError> {
        let test = Test::new(
            &self.handle,
            method,
            path,
            self.options.clone(),
            Arc::clone(&self.transport),
        )?;
        Ok(test.with_defaults(&self.headers, self.auth.as_ref()))
    }

    pub fn get(&self, path: &str) -> Result<Test, ConfigError> {
        self.method("GET", path)
    }

    pub fn post(&self, path: &str) -> Result<Test, ConfigError> {
        self.method("POST", path)
    }

    pub fn put(&self, path: &str) -> Result<Test, ConfigError> {
        self.method("PUT", path)
    }

    pub fn patch(&self, path: &str) -> Result<Test, ConfigError> {
        self.method("PATCH", path)
    }

    pub fn delete(&self, path: &str) -> Result<Test, ConfigError> {
        self.method("DELETE", path)
    }

    pub fn head(&self, path: &str) -> Result<Test, ConfigError> {
        self.method("HEAD", path)
    }

    pub fn options_request(&self, path: &str) -> Result<Test, ConfigError> {
        self.method("OPTIONS", path)
    }
}

/// A [`Request`] whose tests share a cookie jar and default headers, so
/// session state set by one response is replayed on the next request.
#[derive(Clone)]
pub struct Agent {
    inner: Request,
}

impl Agent {
    pub fn new(handle: impl Into<ServerHandle>) -> Self {
        let jar = Arc::new(Jar::default());
        Self {
            inner: Request::new(handle)
                .with_transport(Arc::new(ReqwestTransport::with_cookie_store(jar))),
        }
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.inner = self.inner.options(options);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.inner = self.inner.host(host);
        self
    }

    /// Header sent with every test this agent creates.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.headers.push((name.into(), value.into()));
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.inner.auth = Some(Auth::Basic {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        self.inner.auth = Some(Auth::Bearer(token.into()));
        self
    }

    pub fn method(&self, method: &str, path: &str) -> Result<Test, ConfigError> {
        self.inner.method(method, path)
    }

    pub fn get(&self, path: &str) -> Result<Test, ConfigError> {
        self.inner.get(path)
    }

    pub fn post(&self, path: &str) -> Result<Test, ConfigError> {
        self.inner.post(path)
    }

    pub fn put(&self, path: &str) -> Result<Test, ConfigError> {
        self.inner.put(path)
    }

    pub fn patch(&self, path: &str) -> Result<Test, ConfigError> {
        self.inner.patch(path)
    }

    pub fn delete(&self, path: &str) -> Result<Test, ConfigError> {
        self.inner.delete(path)
    }

    pub fn head(&self, path: &str) -> Result<Test, ConfigError> {
        self.inner.head(path)
    }

    pub fn options_request(&self, path: &str) -> Result<Test, ConfigError> {
        self.inner.options_request(path)
    }
}
