use std::error::Error as StdError;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{ConfigError, DrainError, TestError, TransportError};

use super::request::{Auth, ClientOptions, RequestSpec};
use super::response::Response;

/// Background work a transport started for one test. Each test owns its
/// own set and drains only that set once its response has settled.
#[derive(Default)]
pub struct PendingTasks {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PendingTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    pub fn len(&self) -> usize {
        match self.tasks.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Awaits every tracked task, reporting the first one that failed.
    pub async fn drain(&self) -> Result<(), DrainError> {
        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = match self.tasks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            tasks.drain(..).collect()
        };

        let mut first_error = None;
        for task in tasks {
            if let Err(err) = task.await {
                first_error.get_or_insert(DrainError(err.to_string()));
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// The HTTP client capability the assertion engine drives.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues the request and reads the full response. Background work is
    /// registered in `pending`, which belongs to the calling test.
    async fn send(&self, request: RequestSpec, pending: &PendingTasks) -> Result<Response, TestError>;

    /// Waits for the work registered in `pending` to settle.
    async fn drain(&self, pending: &PendingTasks) -> Result<(), DrainError> {
        pending.drain().await
    }
}

/// `reqwest`-backed transport. Each exchange runs on its own task so the
/// connection is driven to completion even when the caller stops waiting;
/// the task is tracked in the calling test's [`PendingTasks`].
#[derive(Default)]
pub struct ReqwestTransport {
    cookies: Option<Arc<Jar>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that stores and replays cookies across requests.
    pub fn with_cookie_store(jar: Arc<Jar>) -> Self {
        Self { cookies: Some(jar) }
    }

    fn build_client(&self, options: &ClientOptions) -> Result<Client, TransportError> {
        let redirect = if options.redirects == 0 {
            reqwest::redirect::Policy::none()
        } else {
            reqwest::redirect::Policy::limited(options.redirects)
        };
        let mut builder = Client::builder().redirect(redirect);

        if let Some(ms) = options.timeout_ms {
            if ms > 0 {
                builder = builder.timeout(Duration::from_millis(ms));
            }
        }

        if !options.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(jar) = &self.cookies {
            builder = builder.cookie_provider(Arc::clone(jar));
        }

        builder
            .build()
            .map_err(|err| TransportError::Request(format!("failed to build HTTP client: {err}")))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: RequestSpec, pending: &PendingTasks) -> Result<Response, TestError> {
        let client = self.build_client(&request.options)?;
        let builder = prepare(&client, request)?;

        let (tx, rx) = oneshot::channel();
        pending.track(tokio::spawn(async move {
            let _ = tx.send(exchange(builder).await);
        }));

        let response = rx.await.map_err(|_| TransportError::Aborted)??;
        Ok(response)
    }
}

fn prepare(client: &Client, request: RequestSpec) -> Result<reqwest::RequestBuilder, ConfigError> {
    let method = reqwest::Method::try_from(&request.method)?;
    let mut url = Url::parse(&request.url).map_err(|err| ConfigError::InvalidUrl {
        url: request.url.clone(),
        reason: err.to_string(),
    })?;

    if !request.query.is_empty() {
        let mut query_pairs = url.query_pairs_mut();
        for (key, value) in &request.query {
            query_pairs.append_pair(key, value);
        }
    }

    let mut builder = client
        .request(method, url)
        .headers(build_headers(&request.headers)?);

    match request.auth {
        Some(Auth::Basic { username, password }) => {
            builder = builder.basic_auth(username, Some(password));
        }
        Some(Auth::Bearer(token)) => {
            builder = builder.bearer_auth(token);
        }
        None => {}
    }

    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    Ok(builder)
}

pub(crate) fn build_headers(input: &[(String, String)]) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();

    for (key, value) in input {
        let header_name =
            HeaderName::from_bytes(key.as_bytes()).map_err(|err| ConfigError::InvalidHeader {
                name: key.clone(),
                reason: err.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|err| ConfigError::InvalidHeader {
            name: key.clone(),
            reason: err.to_string(),
        })?;
        headers.append(header_name, header_value);
    }

    Ok(headers)
}

async fn exchange(builder: reqwest::RequestBuilder) -> Result<Response, TransportError> {
    let response = builder.send().await.map_err(classify)?;

    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| TransportError::Body(err.to_string()))?;

    Ok(Response::new(status, headers, bytes))
}

/// Connect-phase failures are reported by their system error; anything
/// else keeps reqwest's own description.
fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::TimedOut;
    }
    if err.is_connect() {
        let mut source = err.source();
        while let Some(cause) = source {
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                return TransportError::from_io(io_err);
            }
            source = cause.source();
        }
    }
    TransportError::Request(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::method::HttpMethod;

    #[test]
    fn build_headers_keeps_repeated_fields() {
        let headers = build_headers(&[
            ("Accept".into(), "text/html".into()),
            ("accept".into(), "application/json".into()),
        ])
        .unwrap();
        assert_eq!(headers.get_all("accept").iter().count(), 2);
    }

    #[test]
    fn build_headers_rejects_bad_names() {
        let err = build_headers(&[("bad header".into(), "x".into())]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeader { .. }));
    }

    #[tokio::test]
    async fn refused_connection_maps_to_econnrefused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = ReqwestTransport::new();
        let pending = PendingTasks::new();
        let spec = RequestSpec::new(
            HttpMethod::Get,
            format!("http://{addr}/"),
            ClientOptions::default(),
        );
        let err = transport.send(spec, &pending).await.unwrap_err();
        assert!(matches!(
            err,
            TestError::Transport(TransportError::ConnectionRefused)
        ));
        assert_eq!(pending.len(), 1);
        assert!(transport.drain(&pending).await.is_ok());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn drain_only_waits_on_its_own_tasks() {
        let stuck = PendingTasks::new();
        stuck.track(tokio::spawn(std::future::pending::<()>()));

        let own = PendingTasks::new();
        own.track(tokio::spawn(async {}));

        assert!(own.drain().await.is_ok());
        assert_eq!(stuck.len(), 1);
    }

    #[tokio::test]
    async fn drain_reports_a_panicked_task() {
        let pending = PendingTasks::new();
        pending.track(tokio::spawn(async { panic!("socket leaked") }));
        assert!(pending.drain().await.is_err());
    }

    #[tokio::test]
    async fn invalid_url_is_a_config_error() {
        let transport = ReqwestTransport::new();
        let spec = RequestSpec::new(HttpMethod::Get, "not a url", ClientOptions::default());
        let err = transport.send(spec, &PendingTasks::new()).await.unwrap_err();
        assert!(matches!(err, TestError::Config(ConfigError::InvalidUrl { .. })));
    }
}
