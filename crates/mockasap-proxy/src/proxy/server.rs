//! ProxyServer struct and accept loop.
//!
//! A running proxy owns a listener task, a `TaskTracker` of connection tasks
//! and a lifecycle channel every connection watches. Stopping drains: the
//! listener closes, open connections finish their in-flight exchange, and
//! whatever is still open after the grace period is dropped.

use super::client::{create_http_client, HttpClient};
use super::connect::{handle_tunnelled, TunnelTarget};
use super::context::Scheme;
use super::handler::Dispatcher;
use super::network::create_listener;
use super::tls::CertificateAuthority;
use crate::config::Config;
use crate::error::ServerError;
use crate::stub::StubRegistry;
use anyhow::Context;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// State broadcast to every connection of a running proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    /// Finish in-flight exchanges, accept no new ones
    Draining,
    /// Drop everything now
    Closed,
}

/// The main proxy server struct.
pub struct ProxyServer {
    config: Arc<Config>,
    registry: Arc<StubRegistry>,
    http_client: HttpClient,
    authority: Option<Arc<CertificateAuthority>>,
    running: Mutex<Option<Running>>,
}

struct Running {
    local_addr: SocketAddr,
    lifecycle: watch::Sender<Lifecycle>,
    tasks: TaskTracker,
    accept_loop: JoinHandle<()>,
}

impl ProxyServer {
    /// Create a server. Nothing is bound until [`start`](Self::start).
    pub fn new(config: Config, registry: Arc<StubRegistry>) -> Result<Self, anyhow::Error> {
        config.validate()?;

        let authority = if config.tls.intercept {
            let authority = match (&config.tls.ca_cert_path, &config.tls.ca_key_path) {
                (Some(cert), Some(key)) => CertificateAuthority::from_pem_files(cert, key)
                    .context("failed to load interception CA")?,
                _ => CertificateAuthority::generate()
                    .context("failed to generate interception CA")?,
            };
            Some(Arc::new(authority))
        } else {
            None
        };

        let http_client = create_http_client(&config.upstream);

        Ok(Self {
            config: Arc::new(config),
            registry,
            http_client,
            authority,
            running: Mutex::new(None),
        })
    }

    pub fn registry(&self) -> &Arc<StubRegistry> {
        &self.registry
    }

    /// The interception CA, if HTTPS interception is enabled.
    pub fn authority(&self) -> Option<&Arc<CertificateAuthority>> {
        self.authority.as_ref()
    }

    /// Address of the running listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.local_addr)
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Must be called within a Tokio runtime. Returns once the listener is
    /// bound, so requests can be sent as soon as this returns.
    pub fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock();
        if let Some(existing) = running.as_ref() {
            return Err(ServerError::AlreadyRunning(existing.local_addr));
        }

        let listen_addr = self.config.listen_addr();
        let bind_error = |source| ServerError::Bind {
            addr: listen_addr.clone(),
            source,
        };
        let addr = listen_addr
            .to_socket_addrs()
            .map_err(bind_error)?
            .next()
            .ok_or_else(|| {
                bind_error(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "address did not resolve",
                ))
            })?;
        let listener = create_listener(addr).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let (lifecycle, lifecycle_rx) = watch::channel(Lifecycle::Running);
        let tasks = TaskTracker::new();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.registry),
            self.http_client.clone(),
            self.config.request_timeout(),
            local_addr,
            self.authority.clone(),
            lifecycle_rx,
            tasks.clone(),
        ));

        let accept_loop = tokio::spawn(accept_loop(listener, dispatcher));

        info!("Listening on http://{}", local_addr);
        if self.authority.is_some() {
            info!("HTTPS interception enabled");
        } else {
            info!("HTTPS interception disabled, CONNECT is tunnelled opaquely");
        }
        info!("Loaded {} stubs", self.registry.len());

        *running = Some(Running {
            local_addr,
            lifecycle,
            tasks,
            accept_loop,
        });
        Ok(local_addr)
    }

    /// Stop accepting, drain open connections, then release the port.
    ///
    /// Calling `stop` on a server that is not running does nothing.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return Ok(());
        };
        let Running {
            local_addr,
            lifecycle,
            tasks,
            accept_loop,
        } = running;

        info!("Stopping proxy on {}", local_addr);
        lifecycle.send_replace(Lifecycle::Draining);
        accept_loop.await?;

        tasks.close();
        let grace = self.config.shutdown_grace();
        if tokio::time::timeout(grace, tasks.wait()).await.is_err() {
            warn!(
                "{} connections still open after {:?}, closing them",
                tasks.len(),
                grace
            );
            lifecycle.send_replace(Lifecycle::Closed);
            if tokio::time::timeout(grace, tasks.wait()).await.is_err() {
                warn!("{} tasks ignored shutdown and were abandoned", tasks.len());
            }
        }
        lifecycle.send_replace(Lifecycle::Closed);

        info!("Proxy on {} stopped", local_addr);
        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, dispatcher: Arc<Dispatcher>) {
    let mut lifecycle = dispatcher.lifecycle();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    debug!("Accepted connection from {}", remote_addr);
                    let dispatcher = Arc::clone(&dispatcher);
                    dispatcher
                        .tasks()
                        .clone()
                        .spawn(serve_http1(stream, dispatcher, None));
                }
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
            },
            () = wait_until(&mut lifecycle, |state| *state != Lifecycle::Running) => break,
        }
    }
    // The listener is dropped here, freeing the port
}

/// Resolve once `done` holds for the current state, or the server is gone.
///
/// The guard `wait_for` returns is not `Send` and must not outlive this call.
pub(crate) async fn wait_until(
    lifecycle: &mut watch::Receiver<Lifecycle>,
    done: impl FnMut(&Lifecycle) -> bool,
) {
    let _ = lifecycle.wait_for(done).await;
}

/// Serve HTTP/1.1 on one client stream until it closes or the proxy stops.
///
/// `tunnel` is set for streams decrypted from a CONNECT tunnel; their requests
/// are rebuilt against the tunnel target and treated as HTTPS.
pub(crate) async fn serve_http1<I>(
    io: I,
    dispatcher: Arc<Dispatcher>,
    tunnel: Option<Arc<TunnelTarget>>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut lifecycle = dispatcher.lifecycle();
    let service = {
        let dispatcher = Arc::clone(&dispatcher);
        service_fn(move |req| {
            let dispatcher = Arc::clone(&dispatcher);
            let tunnel = tunnel.clone();
            async move {
                match tunnel {
                    None => dispatcher.handle(req, Scheme::Http).await,
                    Some(target) => handle_tunnelled(dispatcher, &target, req).await,
                }
            }
        })
    };

    let conn = http1::Builder::new()
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades();
    tokio::pin!(conn);

    let mut draining = false;
    if *lifecycle.borrow_and_update() != Lifecycle::Running {
        conn.as_mut().graceful_shutdown();
        draining = true;
    }

    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!("Connection ended with error: {}", e);
                }
                return;
            }
            changed = lifecycle.changed() => {
                if changed.is_err() {
                    return;
                }
                let state = *lifecycle.borrow_and_update();
                match state {
                    Lifecycle::Running => {}
                    Lifecycle::Draining if !draining => {
                        conn.as_mut().graceful_shutdown();
                        draining = true;
                    }
                    Lifecycle::Draining => {}
                    Lifecycle::Closed => {
                        debug!("Dropping connection on shutdown");
                        return;
                    }
                }
            }
        }
    }
}
