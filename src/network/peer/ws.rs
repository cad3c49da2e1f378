use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info, warn};

use crate::network::options::Config;
use crate::network::peer::PeerCore;
use crate::network::router::Router;
use crate::network::session_manager::SessionManager;
use crate::network::transport::split_ws;
use crate::service::Shutdown;
use crate::{AppError, AppResult};

/// WebSocket acceptor; upgrades HTTP(S) connections on path `/`.
///
/// The transport already frames messages, but the session still treats the
/// content as a byte stream: message boundaries carry no meaning above the
/// LTD layer.
pub struct WsPeer {
    core: Arc<PeerCore>,
    cert_file: Option<PathBuf>,
    key_file: Option<PathBuf>,
}

impl WsPeer {
    pub fn new(
        config: Config,
        cert_file: Option<PathBuf>,
        key_file: Option<PathBuf>,
    ) -> AppResult<Self> {
        Ok(Self {
            core: PeerCore::new(config)?,
            cert_file,
            key_file,
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

    pub async fn start(&self) -> AppResult<SocketAddr> {
        if let Some(callback) = &self.core.config().on_server_start {
            callback()?;
        }

        // TLS only when both files are configured.
        let tls = match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => {
                info!(cert = %cert.display(), key = %key.display(), "websocket tls enabled");
                Some(load_tls_acceptor(cert, key)?)
            }
            _ => None,
        };

        let address = self.core.listen_address();
        let listener = TcpListener::bind(&address).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "websocket server listening at {}, pid: {}",
            local_addr,
            std::process::id()
        );

        tokio::spawn(accept_loop(self.core.clone(), listener, tls));
        Ok(local_addr)
    }

    pub async fn serve(&self) -> AppResult<()> {
        self.start().await?;
        self.core.run_until_shutdown().await;
        Ok(())
    }

    pub async fn close(&self) {
        self.core.close().await;
    }
}

async fn accept_loop(core: Arc<PeerCore>, listener: TcpListener, tls: Option<TlsAcceptor>) {
    let mut shutdown = Shutdown::new(core.subscribe_close());

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.recv() => break,
        };

        match accepted {
            Ok((stream, remote)) => {
                if !core.admit(remote) {
                    continue;
                }
                // The HTTP/TLS handshake happens per connection so a slow
                // client cannot stall the accept loop.
                let core = core.clone();
                let tls = tls.clone();
                tokio::spawn(async move {
                    match tls {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(tls_stream) => upgrade(core, tls_stream, remote).await,
                            Err(e) => warn!(%remote, "tls handshake failed: {}", e),
                        },
                        None => upgrade(core, stream, remote).await,
                    }
                });
            }
            Err(e) => {
                if core.is_closed() {
                    break;
                }
                warn!("websocket accept error: {}", e);
            }
        }
    }

    debug!("websocket accept loop exited");
}

async fn upgrade<S>(core: Arc<PeerCore>, stream: S, remote: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let path_check = |request: &Request, response: Response| {
        if request.uri().path() != "/" {
            let mut reject = ErrorResponse::new(None);
            *reject.status_mut() = StatusCode::NOT_FOUND;
            return Err(reject);
        }
        Ok(response)
    };

    match accept_hdr_async(stream, path_check).await {
        Ok(ws) => {
            let (reader, writer) = split_ws(ws);
            core.start_session(Box::new(reader), Box::new(writer), remote);
        }
        Err(e) => warn!(%remote, "websocket upgrade failed: {}", e),
    }
}

fn load_tls_acceptor(cert_file: &Path, key_file: &Path) -> AppResult<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_file)?))
        .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_file)?))?
        .ok_or_else(|| AppError::InvalidConfig("no private key in key file".to_string()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| AppError::InvalidConfig(format!("tls config: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
