//! The listener (§4.7): binds the socket, admits connections through the
//! [`ConnectionTracker`], consults the optional rate limiter, and spawns a
//! [`Session`] per accepted connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::ServerConfig;
use crate::hooks::Collaborators;
use crate::reader::write_response;
use crate::response::Response;
use crate::session::{Session, SessionStream};
use crate::tracker::ConnectionTracker;

/// How long [`Server::shutdown`] waits for in-flight sessions to close on
/// their own (§4.7's "bounded grace period") before aborting whatever is
/// still running.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Accepts connections and drives each to completion via a [`Session`].
///
/// Cloning the collaborators and config into every spawned task (both are
/// cheap `Arc`/`Clone` bundles) keeps `Server` itself free of any lock an
/// accepted connection would need to wait on.
pub struct Server {
    config: Arc<ServerConfig>,
    collaborators: Collaborators,
    tracker: ConnectionTracker,
    active_sessions: Arc<AtomicUsize>,
    is_running: Arc<AtomicBool>,
    start_time: Mutex<Option<Instant>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    sessions: tokio::sync::Mutex<JoinSet<()>>,
}

impl Server {
    pub fn new(config: ServerConfig, collaborators: Collaborators) -> Self {
        let tracker =
            ConnectionTracker::new(config.max_connections, config.max_connections_per_ip);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Server {
            config: Arc::new(config),
            collaborators,
            tracker,
            active_sessions: Arc::new(AtomicUsize::new(0)),
            is_running: Arc::new(AtomicBool::new(false)),
            start_time: Mutex::new(None),
            shutdown_tx,
            shutdown_rx,
            sessions: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    pub fn active_session_count(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Whether [`Server::run`] has bound its listener and not yet completed
    /// a [`Server::shutdown`].
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn start_time(&self) -> Option<Instant> {
        *self.start_time.lock().unwrap()
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.config.bind_address, self.config.port)
    }

    /// Signals every running session to wind down at its next suspension
    /// point, stops accepting new connections, then waits up to
    /// [`SHUTDOWN_GRACE_PERIOD`] for sessions to flush their final response
    /// and close on their own. Whatever is still running once the grace
    /// period elapses is force-aborted. `is_running()` is `false` once this
    /// returns.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE_PERIOD;
        while self.active_session_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let mut sessions = self.sessions.lock().await;
        if !sessions.is_empty() {
            warn!(
                "{} session(s) still running after the shutdown grace period, force-closing",
                sessions.len()
            );
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }

        self.is_running.store(false, Ordering::Relaxed);
    }

    /// Binds and accepts connections until [`Server::shutdown`] is called or
    /// the listener itself fails.
    pub async fn run(&self) -> Result<()> {
        let addr = self.endpoint();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind SMTP listener on {addr}"))?;

        *self.start_time.lock().unwrap() = Some(Instant::now());
        self.is_running.store(true, Ordering::Relaxed);
        info!("SMTP server listening on {addr}");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown requested, no longer accepting connections");
                return Ok(());
            }

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, remote)) => self.spawn_session(stream, remote).await,
                        Err(e) => error!("Error accepting connection: {e}"),
                    }
                }
            }
        }
    }

    async fn spawn_session(&self, stream: TcpStream, remote: SocketAddr) {
        let local = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Could not determine local address for connection from {remote}: {e}");
                return;
            }
        };

        let handle = match self.tracker.try_acquire(remote.ip()) {
            Some(handle) => handle,
            None => {
                warn!("Connection admission denied for {remote}: capacity exhausted");
                tokio::spawn(reject_connection(stream, Response::too_many_connections()));
                return;
            }
        };

        let config = Arc::clone(&self.config);
        let collaborators = self.collaborators.clone();
        let active_sessions = Arc::clone(&self.active_sessions);
        let shutdown_rx = self.shutdown_rx.clone();

        let mut sessions = self.sessions.lock().await;
        while sessions.try_join_next().is_some() {}
        sessions.spawn(async move {
            if let Some(limiter) = &collaborators.rate_limiter {
                let key = remote.ip().to_string();
                if !limiter.is_allowed(&key).await {
                    warn!("Rate limit exceeded for {remote}");
                    reject_connection(
                        stream,
                        Response::service_not_available("Rate limit exceeded"),
                    )
                    .await;
                    drop(handle);
                    return;
                }
                limiter.record_request(&key).await;
            }

            let id = uuid::Uuid::new_v4().to_string();
            debug!("Session {id} accepted from {remote}");
            active_sessions.fetch_add(1, Ordering::Relaxed);

            let session = Session::new(
                id,
                remote,
                local,
                SessionStream::Plain(stream),
                handle,
                config,
                collaborators,
                shutdown_rx,
            );
            session.run().await;

            active_sessions.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

async fn reject_connection(mut stream: TcpStream, response: Response) {
    let _ = write_response(&mut stream, &response).await;
}
