use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::network::options::Config;
use crate::network::peer::PeerCore;
use crate::network::router::Router;
use crate::network::session_manager::SessionManager;
use crate::network::transport::{StreamReader, StreamWriter};
use crate::service::Shutdown;
use crate::{AppError, AppResult};

/// TCP acceptor.
pub struct TcpPeer {
    core: Arc<PeerCore>,
}

impl TcpPeer {
    pub fn new(config: Config) -> AppResult<Self> {
        Ok(Self {
            core: PeerCore::new(config)?,
        })
    }

    pub fn core(&self) -> &Arc<PeerCore> {
        &self.core
    }

    pub fn router(&self) -> &Arc<Router> {
        self.core.router()
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        self.core.session_manager()
    }

    /// Binds the listener and spawns the accept loop. Returns the bound
    /// address, which differs from the configured one when port 0 was asked
    /// for.
    pub async fn start(&self) -> AppResult<SocketAddr> {
        if let Some(callback) = &self.core.config().on_server_start {
            callback()?;
        }

        let addr = resolve_listen_addr(self.core.config())?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!("bind {} failed: {}", addr, e);
            AppError::from(e)
        })?;
        let local_addr = listener.local_addr()?;
        info!(
            "tcp server listening at {}, pid: {}",
            local_addr,
            std::process::id()
        );

        tokio::spawn(accept_loop(self.core.clone(), listener));
        Ok(local_addr)
    }

    /// Starts the peer and blocks until a shutdown signal arrives.
    pub async fn serve(&self) -> AppResult<()> {
        self.start().await?;
        self.core.run_until_shutdown().await;
        Ok(())
    }

    pub async fn close(&self) {
        self.core.close().await;
    }
}

async fn accept_loop(core: Arc<PeerCore>, listener: TcpListener) {
    let mut shutdown = Shutdown::new(core.subscribe_close());
    let mut backoff = 1u64;

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.recv() => break,
        };

        match accepted {
            Ok((stream, remote)) => {
                backoff = 1;
                if !core.admit(remote) {
                    continue;
                }
                if let Err(e) = tune_stream(&stream, core.config()) {
                    warn!(%remote, "socket tuning failed: {}", e);
                }

                let (read_half, write_half) = stream.into_split();
                core.start_session(
                    Box::new(StreamReader::new(read_half)),
                    Box::new(StreamWriter::new(write_half)),
                    remote,
                );
            }
            Err(e) => {
                if core.is_closed() {
                    break;
                }
                if backoff > 64 {
                    error!("accept failed repeatedly, giving up: {}", e);
                    break;
                }
                warn!("accept error: {}, retrying in {}s", e, backoff);
                time::sleep(Duration::from_secs(backoff)).await;
                backoff *= 2;
            }
        }
    }

    debug!("tcp accept loop exited");
}

fn tune_stream(stream: &TcpStream, config: &Config) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let socket = SockRef::from(stream);
    socket.set_keepalive(true)?;
    socket.set_recv_buffer_size(config.recv_buffer_size)?;
    socket.set_send_buffer_size(config.send_buffer_size)?;
    Ok(())
}

fn resolve_listen_addr(config: &Config) -> AppResult<SocketAddr> {
    let address = format!("{}:{}", config.host, config.port);
    let candidates = address
        .to_socket_addrs()
        .map_err(|e| AppError::Accept(format!("resolve {} failed: {}", address, e)))?;

    let addr = match config.network.as_str() {
        "tcp4" => candidates.into_iter().find(|a| a.is_ipv4()),
        "tcp6" => candidates.into_iter().find(|a| a.is_ipv6()),
        _ => candidates.into_iter().next(),
    };

    addr.ok_or_else(|| {
        AppError::Accept(format!(
            "no {} address for {}",
            config.network, address
        ))
    })
}
