use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
use regex::Regex;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use supercheck::{
    agent, request, App, Listen, RunningServer, ServerCloseError, ServerHandle, TestError,
    TransportError,
};

fn routes(req: HttpRequest<Bytes>) -> HttpResponse<Bytes> {
    let builder = HttpResponse::builder();
    let response = match req.uri().path() {
        "/" => builder
            .header(CONTENT_TYPE, "text/plain")
            .body(Bytes::from_static(b"hello world")),
        "/user" => builder
            .header(CONTENT_TYPE, "application/json")
            .header("X-Powered-By", "supercheck")
            .body(Bytes::from(json!({"name": "john", "id": 7}).to_string())),
        "/echo" => builder
            .header(CONTENT_TYPE, "application/json")
            .body(req.into_body()),
        "/old" => builder
            .status(StatusCode::FOUND)
            .header(LOCATION, "/")
            .body(Bytes::new()),
        "/login" => builder
            .header(SET_COOKIE, "session=abc123; Path=/")
            .body(Bytes::new()),
        "/me" => {
            let cookie = req
                .headers()
                .get(COOKIE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("")
                .to_string();
            builder.body(Bytes::from(cookie))
        }
        _ => builder.status(StatusCode::NOT_FOUND).body(Bytes::new()),
    };
    response.unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn app() -> App {
    App::new(routes)
}

/// Factory wrapper counting how often servers are started and closed.
struct Counted {
    app: App,
    listens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

struct CountedServer {
    inner: Box<dyn RunningServer>,
    closes: Arc<AtomicUsize>,
}

impl Listen for Counted {
    fn listen(&self, addr: SocketAddr) -> io::Result<Box<dyn RunningServer>> {
        self.listens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountedServer {
            inner: self.app.listen(addr)?,
            closes: Arc::clone(&self.closes),
        }))
    }
}

#[async_trait]
impl RunningServer for CountedServer {
    fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr()
    }

    async fn close(&self) -> Result<(), ServerCloseError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }
}

fn counted() -> (ServerHandle, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let listens = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));
    let handle = ServerHandle::Factory(Arc::new(Counted {
        app: app(),
        listens: Arc::clone(&listens),
        closes: Arc::clone(&closes),
    }));
    (handle, listens, closes)
}

#[tokio::test]
async fn factory_is_started_and_closed_per_test() {
    init_tracing();
    let (handle, listens, closes) = counted();

    let response = request(handle.clone())
        .get("/")
        .unwrap()
        .expect_status(200)
        .expect_body("hello world")
        .await
        .unwrap();
    assert_eq!(response.text(), "hello world");
    assert_eq!(listens.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let err = request(handle)
        .get("/missing")
        .unwrap()
        .expect_status(200)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), r#"expected 200 "OK", got 404 "Not Found""#);
    assert_eq!(listens.load(Ordering::SeqCst), 2);
    assert_eq!(closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn external_server_stays_up() {
    let server = Arc::new(app().spawn().unwrap());

    for _ in 0..2 {
        request(server.handle())
            .get("/")
            .unwrap()
            .expect(Regex::new("^hello").unwrap())
            .await
            .unwrap();
    }
    assert!(server.is_running());

    server.close().await.unwrap();
    assert!(!server.is_running());
    assert!(matches!(
        request(server.handle()).get("/"),
        Err(supercheck::ConfigError::InvalidServer)
    ));
}

#[tokio::test]
async fn json_body_and_headers() {
    let test = request(app())
        .get("/user")
        .unwrap()
        .expect_header("content-type", "application/json")
        .expect_header("X-Powered-By", Regex::new("check$").unwrap())
        .expect_status_body(200, json!({"id": 7, "name": "john"}));
    test.await.unwrap();

    let err = request(app())
        .get("/user")
        .unwrap()
        .expect_body(json!({"id": 8, "name": "john"}))
        .await
        .unwrap_err();
    let assertion = err.as_assertion().unwrap();
    assert_eq!(assertion.expected, Some(json!({"id": 8, "name": "john"})));
    assert_eq!(assertion.actual, Some(json!({"id": 7, "name": "john"})));
}

#[tokio::test]
async fn posted_json_is_forwarded() {
    request(app())
        .post("/echo")
        .unwrap()
        .send_json(&json!({"hello": "there"}))
        .expect_status(200)
        .expect_body(json!({"hello": "there"}))
        .await
        .unwrap();
}

#[tokio::test]
async fn redirects_are_not_followed_by_default() {
    request(app())
        .get("/old")
        .unwrap()
        .expect_status(302)
        .expect_header("Location", "/")
        .await
        .unwrap();

    request(app())
        .get("/old")
        .unwrap()
        .redirects(1)
        .expect_status_body(200, "hello world")
        .await
        .unwrap();
}

#[tokio::test]
async fn refused_connection_is_reported_without_running_expectations() {
    init_tracing();
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let mut seen = None;
    request(format!("http://{addr}"))
        .get("/")
        .unwrap()
        .expect_with(|_| -> () { panic!("must not run without a response") })
        .end(|err, response| seen = Some((err, response.is_none())))
        .await;

    let (err, no_response) = seen.unwrap();
    assert!(no_response);
    assert!(matches!(
        err,
        Some(TestError::Transport(TransportError::ConnectionRefused))
    ));
    assert_eq!(
        err.unwrap().to_string(),
        "ECONNREFUSED: Connection refused"
    );
}

/// Answers `/fast` and holds every other request open without replying.
async fn selective_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                if head.starts_with(b"GET /fast ") {
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
                        .await;
                } else {
                    std::future::pending::<()>().await;
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn in_flight_test_does_not_block_a_sibling() {
    let addr = selective_server().await;
    let shared = request(format!("http://{addr}"));

    let slow = shared.get("/slow").unwrap();
    let stalled = tokio::spawn(async move { slow.run().await });

    let outcome = tokio::time::timeout(
        Duration::from_secs(3),
        shared.get("/fast").unwrap().expect_status(200).run(),
    )
    .await
    .expect("sibling test finished while another was in flight");

    assert!(outcome.is_ok());
    assert!(!stalled.is_finished());
    stalled.abort();
}

#[tokio::test]
async fn agent_replays_cookies() {
    let server = Arc::new(app().spawn().unwrap());
    let agent = agent(server.handle()).set("X-Suite", "agent");

    agent.get("/login").unwrap().expect_status(200).await.unwrap();
    agent
        .get("/me")
        .unwrap()
        .expect_body("session=abc123")
        .await
        .unwrap();

    server.close().await.unwrap();
}
