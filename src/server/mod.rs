//! A minimal HTTP/1.1 server for tests, built from a closure.
//!
//! [`App`] is a listenable factory: handed to a test it is started on an
//! ephemeral port and closed when the test settles. [`App::spawn`] starts
//! one that the caller keeps and closes.

use std::convert::Infallible;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::ServerCloseError;
use crate::lifecycle::{Listen, RunningServer, ServerHandle};

type Handler = dyn Fn(Request<Bytes>) -> Response<Bytes> + Send + Sync;

#[derive(Clone)]
pub struct App {
    handler: Arc<Handler>,
}

impl App {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Request<Bytes>) -> Response<Bytes> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Starts the app on an ephemeral loopback port. The returned server
    /// is externally managed: tests pointed at it never close it.
    pub fn spawn(&self) -> io::Result<Server> {
        self.bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
    }

    /// Wraps the app as a factory handle, started fresh for every test.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle::Factory(Arc::new(self.clone()))
    }

    fn bind(&self, addr: SocketAddr) -> io::Result<Server> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

        let std_listener = std::net::TcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(std_listener)?
        };
        let addr = listener.local_addr()?;

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let task = runtime.spawn(serve(listener, Arc::clone(&self.handler), shutdown_rx));

        Ok(Server {
            addr,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }
}

impl Listen for App {
    fn listen(&self, addr: SocketAddr) -> io::Result<Box<dyn RunningServer>> {
        Ok(Box::new(self.bind(addr)?))
    }
}

impl From<App> for ServerHandle {
    fn from(app: App) -> Self {
        ServerHandle::Factory(Arc::new(app))
    }
}

pub struct Server {
    addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_running(&self) -> bool {
        let task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Wraps the server as an externally managed handle.
    pub fn handle(self: &Arc<Self>) -> ServerHandle {
        ServerHandle::Running(Arc::clone(self) as Arc<dyn RunningServer>)
    }
}

#[async_trait]
impl RunningServer for Server {
    fn local_addr(&self) -> Option<SocketAddr> {
        self.is_running().then_some(self.addr)
    }

    async fn close(&self) -> Result<(), ServerCloseError> {
        let task = {
            let mut task = match self.task.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            task.take().ok_or(ServerCloseError::NotRunning)?
        };

        let _ = self.shutdown.send(());
        task.await
            .map_err(|err| ServerCloseError::Io(err.to_string()))
    }
}

async fn serve(listener: TcpListener, handler: Arc<Handler>, mut shutdown: broadcast::Receiver<()>) {
    let mut connections = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.recv() => break,
        };

        let stream = match accepted {
            Ok((stream, _)) => stream,
            Err(err) => {
                tracing::debug!(error = %err, "test server failed to accept connection");
                continue;
            }
        };

        let handler = Arc::clone(&handler);
        connections.spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let handler = Arc::clone(&handler);
                async move { Ok::<_, Infallible>(dispatch(&*handler, req).await) }
            });

            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!(error = %err, "test server connection ended with error");
            }
        });

        while connections.try_join_next().is_some() {}
    }

    connections.shutdown().await;
}

async fn dispatch(handler: &Handler, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            tracing::debug!(error = %err, "test server failed to read request body");
            Bytes::new()
        }
    };

    handler(Request::from_parts(parts, bytes)).map(Full::new)
}
