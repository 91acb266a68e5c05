use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use http::StatusCode;
use regex::Regex;
use serde_json::Value;

use crate::error::{AssertionError, PredicatePanic, TestError};
use crate::http::response::{reason_phrase, Response};

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// A caller-supplied check run against the response.
pub type Predicate = Arc<dyn Fn(&Response) -> Result<(), BoxError> + Send + Sync>;

/// What a body expectation compares against.
#[derive(Debug, Clone)]
pub enum BodyMatcher {
    /// Deep equality with the parsed body.
    Json(Value),
    /// Matched against the raw response text.
    Pattern(Regex),
    /// Exact equality with the raw response text.
    Text(String),
}

impl From<Value> for BodyMatcher {
    fn from(value: Value) -> Self {
        BodyMatcher::Json(value)
    }
}

impl From<Regex> for BodyMatcher {
    fn from(pattern: Regex) -> Self {
        BodyMatcher::Pattern(pattern)
    }
}

impl From<&str> for BodyMatcher {
    fn from(text: &str) -> Self {
        BodyMatcher::Text(text.to_string())
    }
}

impl From<String> for BodyMatcher {
    fn from(text: String) -> Self {
        BodyMatcher::Text(text)
    }
}

#[derive(Debug, Clone)]
pub enum HeaderMatcher {
    Exact(String),
    Pattern(Regex),
}

impl From<&str> for HeaderMatcher {
    fn from(value: &str) -> Self {
        HeaderMatcher::Exact(value.to_string())
    }
}

impl From<String> for HeaderMatcher {
    fn from(value: String) -> Self {
        HeaderMatcher::Exact(value)
    }
}

impl From<Regex> for HeaderMatcher {
    fn from(pattern: Regex) -> Self {
        HeaderMatcher::Pattern(pattern)
    }
}

macro_rules! numeric_header_matcher {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for HeaderMatcher {
                fn from(value: $ty) -> Self {
                    HeaderMatcher::Exact(value.to_string())
                }
            }
        )*
    };
}

numeric_header_matcher!(i32, i64, u16, u32, u64, usize);

/// One entry in a test's expectation list.
#[derive(Clone)]
pub enum Expectation {
    Status(u16),
    Body(BodyMatcher),
    Header { name: String, value: HeaderMatcher },
    Predicate(Predicate),
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Status(status) => f.debug_tuple("Status").field(status).finish(),
            Expectation::Body(body) => f.debug_tuple("Body").field(body).finish(),
            Expectation::Header { name, value } => f
                .debug_struct("Header")
                .field("name", name)
                .field("value", value)
                .finish(),
            Expectation::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

impl Expectation {
    pub fn evaluate(&self, response: &Response) -> Result<(), TestError> {
        match self {
            Expectation::Status(expected) => check_status(*expected, response),
            Expectation::Body(matcher) => check_body(matcher, response),
            Expectation::Header { name, value } => check_header(name, value, response),
            Expectation::Predicate(predicate) => check_predicate(predicate, response),
        }
    }
}

fn check_status(expected: u16, response: &Response) -> Result<(), TestError> {
    let actual = response.status();
    if actual == expected {
        return Ok(());
    }

    Err(AssertionError::with_diff(
        format!(
            "expected {expected} \"{}\", got {actual} \"{}\"",
            reason_phrase(expected),
            reason_phrase(actual)
        ),
        Value::from(expected),
        Value::from(actual),
    )
    .into())
}

fn check_body(matcher: &BodyMatcher, response: &Response) -> Result<(), TestError> {
    match matcher {
        BodyMatcher::Json(expected) => {
            let actual = response
                .json()
                .cloned()
                .unwrap_or_else(|| Value::String(response.text().to_string()));
            if *expected == actual {
                return Ok(());
            }
            Err(AssertionError::with_diff(
                format!("expected {expected} response body, got {actual}"),
                expected.clone(),
                actual,
            )
            .into())
        }
        BodyMatcher::Pattern(pattern) => {
            let text = response.text();
            if pattern.is_match(text) {
                return Ok(());
            }
            Err(AssertionError::with_diff(
                format!("expected body {text:?} to match /{pattern}/"),
                Value::String(pattern.as_str().to_string()),
                Value::String(text.to_string()),
            )
            .into())
        }
        BodyMatcher::Text(expected) => {
            let text = response.text();
            if expected == text {
                return Ok(());
            }
            Err(AssertionError::with_diff(
                format!("expected {expected:?} response body, got {text:?}"),
                Value::String(expected.clone()),
                Value::String(text.to_string()),
            )
            .into())
        }
    }
}

fn check_header(name: &str, matcher: &HeaderMatcher, response: &Response) -> Result<(), TestError> {
    let Some(actual) = response.header(name) else {
        return Err(AssertionError::new(format!("expected \"{name}\" header field")).into());
    };

    match matcher {
        HeaderMatcher::Pattern(pattern) => {
            if pattern.is_match(&actual) {
                return Ok(());
            }
            Err(AssertionError::with_diff(
                format!("expected \"{name}\" matching /{pattern}/, got \"{actual}\""),
                Value::String(pattern.as_str().to_string()),
                Value::String(actual),
            )
            .into())
        }
        HeaderMatcher::Exact(expected) => {
            if *expected == actual {
                return Ok(());
            }
            Err(AssertionError::with_diff(
                format!("expected \"{name}\" of \"{expected}\", got \"{actual}\""),
                Value::String(expected.clone()),
                Value::String(actual),
            )
            .into())
        }
    }
}

fn check_predicate(predicate: &Predicate, response: &Response) -> Result<(), TestError> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| predicate(response)))
        .unwrap_or_else(|payload| Err(Box::new(PredicatePanic(panic_message(payload))) as BoxError));
    result.map_err(|err| TestError::Predicate(Arc::from(err)))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "predicate panicked".to_string()
    }
}

/// Return types accepted from predicate expectations. Only an error fails;
/// any other value passes.
pub trait PredicateOutput {
    fn into_check(self) -> Result<(), BoxError>;
}

impl PredicateOutput for () {
    fn into_check(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl PredicateOutput for bool {
    fn into_check(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<T, E> PredicateOutput for Result<T, E>
where
    E: Into<BoxError>,
{
    fn into_check(self) -> Result<(), BoxError> {
        self.map(|_| ()).map_err(Into::into)
    }
}

/// The argument shapes accepted when declaring an expectation, resolved
/// once into [`Expectation`]s.
#[derive(Clone)]
pub enum Declaration {
    Predicate(Predicate),
    Status(u16),
    /// Appends a status check followed by a body check.
    StatusBody(u16, BodyMatcher),
    Body(BodyMatcher),
    Header(String, HeaderMatcher),
}

impl Declaration {
    pub fn predicate<F, R>(check: F) -> Self
    where
        F: Fn(&Response) -> R + Send + Sync + 'static,
        R: PredicateOutput,
    {
        Declaration::Predicate(Arc::new(move |response: &Response| {
            check(response).into_check()
        }))
    }

    pub(crate) fn into_expectations(self) -> Vec<Expectation> {
        match self {
            Declaration::Predicate(predicate) => vec![Expectation::Predicate(predicate)],
            Declaration::Status(status) => vec![Expectation::Status(status)],
            Declaration::StatusBody(status, body) => {
                vec![Expectation::Status(status), Expectation::Body(body)]
            }
            Declaration::Body(body) => vec![Expectation::Body(body)],
            Declaration::Header(name, value) => vec![Expectation::Header { name, value }],
        }
    }
}

impl From<u16> for Declaration {
    fn from(status: u16) -> Self {
        Declaration::Status(status)
    }
}

impl From<StatusCode> for Declaration {
    fn from(status: StatusCode) -> Self {
        Declaration::Status(status.as_u16())
    }
}

impl<B: Into<BodyMatcher>> From<(u16, B)> for Declaration {
    fn from((status, body): (u16, B)) -> Self {
        Declaration::StatusBody(status, body.into())
    }
}

impl<B: Into<BodyMatcher>> From<(StatusCode, B)> for Declaration {
    fn from((status, body): (StatusCode, B)) -> Self {
        Declaration::StatusBody(status.as_u16(), body.into())
    }
}

impl<V: Into<HeaderMatcher>> From<(&str, V)> for Declaration {
    fn from((name, value): (&str, V)) -> Self {
        Declaration::Header(name.to_string(), value.into())
    }
}

impl<V: Into<HeaderMatcher>> From<(String, V)> for Declaration {
    fn from((name, value): (String, V)) -> Self {
        Declaration::Header(name, value.into())
    }
}

impl From<Value> for Declaration {
    fn from(body: Value) -> Self {
        Declaration::Body(body.into())
    }
}

impl From<Regex> for Declaration {
    fn from(pattern: Regex) -> Self {
        Declaration::Body(pattern.into())
    }
}

impl From<&str> for Declaration {
    fn from(text: &str) -> Self {
        Declaration::Body(text.into())
    }
}

impl From<String> for Declaration {
    fn from(text: String) -> Self {
        Declaration::Body(text.into())
    }
}
