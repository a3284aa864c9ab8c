#![forbid(unsafe_code)]

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn, error};
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinSet;

use crate::listener::access_log::AccessLog;
use crate::listener::connection::{handle_connection, peer_ip};
use crate::utils::config::{ConnectionMode, ServerConfig, LISTEN_BACKLOG};
use crate::utils::errors::Errors;

// ***************************************************************************
//                                Constants
// ***************************************************************************
// Pause after a failed accept so a persistent error (EMFILE) can't spin the loop.
pub const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

// ***************************************************************************
//                              Listener Struct
// ***************************************************************************
/** A bound listening socket plus everything needed to serve connections. */
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<ServerConfig>,
    access_log: Arc<AccessLog>,
}

impl Listener {
    // -----------------------------------------------------------------------
    // bind:
    // -----------------------------------------------------------------------
    /** Prepare the access log directory, resolve the configured address and
     * bind a listening socket with a backlog of LISTEN_BACKLOG.  Every error
     * here is fatal to the caller.
     */
    pub async fn bind(config: ServerConfig) -> Result<Self, Errors> {
        let access_log = AccessLog::create(&config.log_file, config.log_format)?;

        let address = config.address();
        let addr = lookup_host(address.as_str()).await
            .map_err(|_| Errors::AddressResolution(address.clone()))?
            .next()
            .ok_or_else(|| Errors::AddressResolution(address.clone()))?;

        let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
        socket.set_reuseaddr(true)?;
        socket.bind(addr).map_err(|e| Errors::SocketBind(address.clone(), e))?;
        let listener = socket.listen(LISTEN_BACKLOG).map_err(|e| Errors::SocketListen(address.clone(), e))?;
        let local_addr = listener.local_addr()?;

        info!("Server listening on {}...", local_addr);
        info!("Access log: {} ({}), read policy: {}, mode: {}",
              access_log.path().display(), access_log.format(), config.read_policy, config.connection_mode);

        Ok(Self { listener, local_addr, config: Arc::new(config), access_log: Arc::new(access_log) })
    }

    /** The address actually bound, which differs from the configured one
     * when port 0 was requested.
     */
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    // -----------------------------------------------------------------------
    // run_until:
    // -----------------------------------------------------------------------
    /** Accept connections until shutdown completes.  Accept failures are
     * logged and the loop keeps going.  In sequential mode each connection is
     * finished before the next accept; in concurrent mode every connection
     * gets its own task and in-flight tasks are drained before returning.
     */
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), Errors>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections on {}.", self.local_addr);
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                }
                accepted = self.listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            accept_failed(&e).await;
                            continue;
                        }
                    };

                    match self.config.connection_mode {
                        ConnectionMode::Sequential => {
                            serve(stream, &self.config, &self.access_log).await;
                        }
                        ConnectionMode::Concurrent => {
                            let config = Arc::clone(&self.config);
                            let access_log = Arc::clone(&self.access_log);
                            tasks.spawn(async move { serve(stream, &config, &access_log).await });
                        }
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Connection task failed: {}", e);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// start:
// ---------------------------------------------------------------------------
/** Bind and serve until the process receives SIGINT or SIGTERM. */
pub async fn start(config: ServerConfig) -> Result<(), Errors> {
    let listener = Listener::bind(config).await?;
    listener.run_until(shutdown_signal()).await
}

// ---------------------------------------------------------------------------
// serve:
// ---------------------------------------------------------------------------
// Handle one accepted connection; the stream is closed when it's dropped here.
async fn serve(stream: TcpStream, config: &ServerConfig, access_log: &AccessLog) {
    let client_ip = peer_ip(&stream);
    match handle_connection(stream, &client_ip, config, access_log).await {
        Ok(entry) => info!("Handled connection from {} (HTTP_code={})", entry.client_ip, entry.http_code),
        Err(e) => warn!("Connection from {} abandoned: {}", client_ip, e),
    }
}

// ---------------------------------------------------------------------------
// accept_failed:
// ---------------------------------------------------------------------------
async fn accept_failed(e: &io::Error) {
    error!("Socket accept failed: {}", e);
    tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
}

// ---------------------------------------------------------------------------
// shutdown_signal:
// ---------------------------------------------------------------------------
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => { sig.recv().await; }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    fn config_for(dir: &Path) -> ServerConfig {
        ServerConfig::new("127.0.0.1", 0, &dir.join("logs").join("server.log"))
    }

    async fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn bind_creates_log_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = config_for(tmp.path());
        let listener = Listener::bind(config.clone()).await.unwrap();
        assert!(config.log_file.parent().unwrap().is_dir());
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn second_bind_on_same_port_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let first = Listener::bind(config_for(tmp.path())).await.unwrap();

        let mut config = config_for(tmp.path());
        config.port = first.local_addr().port();
        assert!(matches!(Listener::bind(config).await, Err(Errors::SocketBind(_, _))));
    }

    #[tokio::test]
    async fn concurrent_mode_serves_overlapping_clients() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut config = config_for(tmp.path());
        config.connection_mode = ConnectionMode::Concurrent;
        let log_file = config.log_file.clone();

        let listener = Listener::bind(config).await.unwrap();
        let addr = listener.local_addr();
        let (tx, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(listener.run_until(async { let _ = rx.await; }));

        // An idle client must not block the others.
        let mut idle = TcpStream::connect(addr).await.unwrap();
        idle.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

        let mut clients = Vec::new();
        for _ in 0..4 {
            clients.push(tokio::spawn(exchange(addr, b"GET / HTTP/1.1\r\n\r\n")));
        }
        for c in clients {
            assert_eq!(c.await.unwrap(), crate::listener::response::canned_response());
        }

        idle.write_all(b"\r\n").await.unwrap();
        let mut response = Vec::new();
        idle.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, crate::listener::response::canned_response());

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(fs::read_to_string(&log_file).unwrap().lines().count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_failure_pauses_before_retrying() {
        let start = tokio::time::Instant::now();
        let e = io::Error::new(io::ErrorKind::Other, "Too many open files");
        accept_failed(&e).await;
        assert!(start.elapsed() >= ACCEPT_ERROR_PAUSE);
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let listener = Listener::bind(config_for(tmp.path())).await.unwrap();
        let addr = listener.local_addr();
        let (tx, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(listener.run_until(async { let _ = rx.await; }));

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
