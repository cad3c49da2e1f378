use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time;
use tracing::{error, info};

use crate::network::codec::{Datapack, LtdCodec};
use crate::network::options::Config;
use crate::network::router::Router;
use crate::network::session::Session;
use crate::network::session_manager::SessionManager;
use crate::network::transport::{TransportReader, TransportWriter};
use crate::AppResult;

/// Transport-independent half of an acceptor: the session registry, the
/// router, admission control and the close sequence.
pub struct PeerCore {
    config: Arc<Config>,
    datapack: Arc<dyn Datapack>,
    router: Arc<Router>,
    session_manager: Arc<SessionManager>,
    is_closed: AtomicBool,
    is_close_conn: AtomicBool,
    close_once: AtomicBool,
    notify_close: broadcast::Sender<()>,
}

impl PeerCore {
    pub fn new(config: Config) -> AppResult<Arc<Self>> {
        let datapack = config
            .datapack
            .clone()
            .unwrap_or_else(|| Arc::new(LtdCodec::from_config(&config)) as Arc<dyn Datapack>);
        config.validate(datapack.head_len())?;

        let (notify_close, _) = broadcast::channel(1);
        Ok(Arc::new(Self {
            config: Arc::new(config),
            datapack,
            router: Arc::new(Router::new()),
            session_manager: SessionManager::new(),
            is_closed: AtomicBool::new(false),
            is_close_conn: AtomicBool::new(false),
            close_once: AtomicBool::new(false),
            notify_close,
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub fn subscribe_close(&self) -> broadcast::Receiver<()> {
        self.notify_close.subscribe()
    }

    /// Admission control shared by every transport: no new sessions on a
    /// closed or closing peer, and none beyond the connection cap.
    pub(crate) fn admit(&self, remote: SocketAddr) -> bool {
        if self.is_closed.load(Ordering::Acquire) {
            info!(%remote, "reject conn, server is closed");
            return false;
        }
        if self.is_close_conn.load(Ordering::Acquire) {
            info!(%remote, "reject conn, server no longer accepts connections");
            return false;
        }
        let max = self.config.max_conn_num;
        if max > 0 && self.session_manager.len() >= max as usize {
            info!(%remote, "reject conn, max conn num reached");
            return false;
        }
        true
    }

    /// Allocates an id, registers the session and starts its task triad.
    pub(crate) fn start_session(
        self: &Arc<Self>,
        reader: Box<dyn TransportReader>,
        writer: Box<dyn TransportWriter>,
        remote: SocketAddr,
    ) -> Arc<Session> {
        let session = Session::new(
            self.session_manager.gen_session_id(),
            remote,
            self.config.clone(),
            self.datapack.clone(),
            self.router.clone(),
            Arc::downgrade(&self.session_manager),
        );
        self.session_manager.add(session.clone());
        session.run(reader, writer);
        session
    }

    /// Stops accepting, closes every session and fires the server-close
    /// callback, all bounded by `close_timeout`. Idempotent.
    pub async fn close(&self) {
        if self.close_once.swap(true, Ordering::SeqCst) {
            return;
        }

        self.is_closed.store(true, Ordering::Release);
        self.is_close_conn.store(true, Ordering::Release);
        let _ = self.notify_close.send(());

        let drain = async {
            self.session_manager.close_all().await;
            if let Some(callback) = &self.config.on_server_close {
                callback();
            }
        };

        match time::timeout(self.config.close_timeout, drain).await {
            Ok(()) => info!("close success"),
            Err(_) => error!("close timeout"),
        }
    }

    /// Blocks until SIGINT/SIGTERM or a programmatic close, then drives the
    /// close sequence.
    pub async fn run_until_shutdown(&self) {
        let mut close_rx = self.notify_close.subscribe();

        #[cfg(unix)]
        {
            let mut terminate =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received interrupt signal"),
                _ = terminate.recv() => info!("received terminate signal"),
                _ = close_rx.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received interrupt signal"),
                _ = close_rx.recv() => {}
            }
        }

        self.close().await;
    }
}
