//! Chained assertions for HTTP tests.
//!
//! Point a [`Request`] at a server, build a [`Test`] for one request,
//! append expectations and await it. Expectations run in the order they
//! were declared and the first failure is reported.
//!
//! ```rust,ignore
//! use serde_json::json;
//! use supercheck::{request, App};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = App::new(|_| http::Response::new("hello".into()));
//!
//!     request(app)
//!         .get("/")?
//!         .expect_status(200)
//!         .expect_header("Content-Length", 5)
//!         .expect_body(regex::Regex::new("^hel")?)
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! Servers come in three shapes (see [`ServerHandle`]): a bare address, a
//! server somebody else keeps running, or a factory such as [`App`] that
//! each test starts on an ephemeral port and closes once it settles.

pub mod agent;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod server;
pub mod testing;

pub use agent::{Agent, Request};
pub use error::{
    AssertionError, ConfigError, DrainError, PredicatePanic, ServerCloseError, TestError,
    TransportError,
};
pub use crate::http::client::{PendingTasks, ReqwestTransport, Transport};
pub use crate::http::request::ClientOptions;
pub use crate::http::response::{Response, ResponseBody};
pub use lifecycle::{Listen, RunningServer, ServerHandle};
pub use server::{App, Server};
pub use testing::{BodyMatcher, Declaration, Expectation, HeaderMatcher, Outcome, Test};

/// Starts building tests against `handle`.
pub fn request(handle: impl Into<ServerHandle>) -> Request {
    Request::new(handle)
}

/// Like [`request`], with cookies persisted across the agent's tests.
pub fn agent(handle: impl Into<ServerHandle>) -> Agent {
    Agent::new(handle)
}
