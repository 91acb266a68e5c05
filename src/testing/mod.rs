//! # Testing & Assertions
//!
//! A [`Test`] is one in-flight request with an ordered list of
//! expectations. Completing it sends the request once, tears down any
//! server the test started, drains outstanding transport work and then
//! evaluates expectations in declaration order, stopping at the first
//! failure.

pub mod expectation;

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::OnceCell;

use crate::error::{ConfigError, TestError, TransportError};
use crate::http::client::{PendingTasks, Transport};
use crate::http::method::HttpMethod;
use crate::http::request::{Auth, ClientOptions, RequestSpec};
use crate::http::response::Response;
use crate::lifecycle::{Lifecycle, ServerHandle};

pub use expectation::{
    BodyMatcher, BoxError, Declaration, Expectation, HeaderMatcher, Predicate, PredicateOutput,
};

/// The settled result of a test: at most one error, and the response if
/// one was received.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub error: Option<TestError>,
    pub response: Option<Response>,
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Response, TestError> {
        match (self.error, self.response) {
            (Some(err), _) => Err(err),
            (None, Some(response)) => Ok(response),
            (None, None) => Err(TransportError::Aborted.into()),
        }
    }
}

pub struct Test {
    request: RequestSpec,
    lifecycle: Lifecycle,
    expectations: Vec<Expectation>,
    transport: Arc<dyn Transport>,
    pending: PendingTasks,
    outcome: OnceCell<Outcome>,
}

impl Test {
    /// Validates the method and resolves the target server. A factory
    /// handle is started here, before any request is sent.
    pub fn new(
        handle: &ServerHandle,
        method: &str,
        path: &str,
        options: ClientOptions,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        let method = HttpMethod::parse(method)?;
        let lifecycle = Lifecycle::resolve(handle, path, options.host.as_deref(), options.secure)?;
        let request = RequestSpec::new(method, lifecycle.url(), options);

        Ok(Self {
            request,
            lifecycle,
            expectations: Vec::new(),
            transport,
            pending: PendingTasks::new(),
            outcome: OnceCell::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }

    /// The request as it will be handed to the transport.
    pub fn request(&self) -> &RequestSpec {
        &self.request
    }

    pub fn method(&self) -> &HttpMethod {
        &self.request.method
    }

    pub fn expectations(&self) -> &[Expectation] {
        &self.expectations
    }

    // -- request shaping, forwarded to the transport

    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.query.push((key.into(), value.into()));
        self
    }

    pub fn send_text(mut self, body: impl Into<String>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    /// Sends `body` as JSON, defaulting the content type.
    pub fn send_json(mut self, body: &Value) -> Self {
        if !self.request.has_header("content-type") {
            self.request
                .headers
                .push(("content-type".into(), "application/json".into()));
        }
        self.request.body = Some(body.to_string());
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.request.auth = Some(Auth::Basic {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        self.request.auth = Some(Auth::Bearer(token.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.options.timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    pub fn redirects(mut self, max: usize) -> Self {
        self.request.options.redirects = max;
        self
    }

    pub fn accept_invalid_certs(mut self) -> Self {
        self.request.options.verify_tls = false;
        self
    }

    pub(crate) fn with_defaults(mut self, headers: &[(String, String)], auth: Option<&Auth>) -> Self {
        self.request.headers.extend(headers.iter().cloned());
        if self.request.auth.is_none() {
            self.request.auth = auth.cloned();
        }
        self
    }

    // -- expectations

    /// Appends the expectation(s) described by `declaration`.
    pub fn expect(mut self, declaration: impl Into<Declaration>) -> Self {
        self.expectations
            .extend(declaration.into().into_expectations());
        self
    }

    pub fn expect_status(self, status: u16) -> Self {
        self.expect(Declaration::Status(status))
    }

    pub fn expect_status_body(self, status: u16, body: impl Into<BodyMatcher>) -> Self {
        self.expect(Declaration::StatusBody(status, body.into()))
    }

    pub fn expect_body(self, body: impl Into<BodyMatcher>) -> Self {
        self.expect(Declaration::Body(body.into()))
    }

    pub fn expect_header(self, name: impl Into<String>, value: impl Into<HeaderMatcher>) -> Self {
        self.expect(Declaration::Header(name.into(), value.into()))
    }

    /// Appends a predicate. It fails the test by returning an error or
    /// panicking; any other return value passes.
    pub fn expect_with<F, R>(self, check: F) -> Self
    where
        F: Fn(&Response) -> R + Send + Sync + 'static,
        R: PredicateOutput,
    {
        self.expect(Declaration::predicate(check))
    }

    /// Appends `declaration` and completes the test with `callback`.
    pub async fn expect_and_end<F>(self, declaration: impl Into<Declaration>, callback: F) -> Self
    where
        F: FnOnce(Option<TestError>, Option<Response>),
    {
        let test = self.expect(declaration);
        test.end(callback).await;
        test
    }

    // -- completion

    /// Completes the test and hands the outcome to `callback`.
    pub async fn end<F>(&self, callback: F)
    where
        F: FnOnce(Option<TestError>, Option<Response>),
    {
        let outcome = self.run().await;
        callback(outcome.error, outcome.response);
    }

    /// Completes the test. The request is sent on the first call only;
    /// later calls observe the same outcome.
    pub async fn run(&self) -> Outcome {
        self.outcome.get_or_init(|| self.settle()).await.clone()
    }

    async fn settle(&self) -> Outcome {
        tracing::debug!(method = %self.request.method, url = %self.request.url, "sending request");
        let (response, mut transport_error) = match self
            .transport
            .send(self.request.clone(), &self.pending)
            .await
        {
            Ok(response) => (Some(response), None),
            Err(err) => (None, Some(err)),
        };

        if let Err(err) = self.lifecycle.close_if_owned().await {
            tracing::warn!(error = %err, "failed to close test server");
            if transport_error.is_none() {
                transport_error = Some(err.into());
            }
        }

        if let Err(err) = self.transport.drain(&self.pending).await {
            tracing::debug!(error = %err, "ignoring transport drain failure");
        }

        let error = assert_response(&self.expectations, response.as_ref(), transport_error);
        Outcome { error, response }
    }
}

impl IntoFuture for Test {
    type Output = Result<Response, TestError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.run().await.into_result() })
    }
}

/// Picks the single reported error: a transport error with no response,
/// else the first failing expectation, else any remaining transport error.
fn assert_response(
    expectations: &[Expectation],
    response: Option<&Response>,
    transport_error: Option<TestError>,
) -> Option<TestError> {
    let Some(response) = response else {
        return transport_error;
    };

    for (index, expectation) in expectations.iter().enumerate() {
        tracing::trace!(index, ?expectation, "evaluating expectation");
        if let Err(err) = expectation.evaluate(response) {
            return Some(err);
        }
    }

    transport_error
}
