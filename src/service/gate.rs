use std::path::PathBuf;

use tokio::runtime::Runtime;
use tracing::info;

use crate::network::{KcpPeer, TcpPeer, WsPeer};
use crate::service::global_config;
use crate::{AppError, AppResult};

/// Process bootstrap: builds the peers the file config enables, runs them on
/// the shared runtime and drives an orderly close on SIGINT/SIGTERM.
pub struct Gate;

impl Gate {
    pub fn start(rt: &Runtime) -> AppResult<()> {
        rt.block_on(Self::run())
    }

    async fn run() -> AppResult<()> {
        let config = global_config();

        let mut tcp_peer = None;
        let mut kcp_peer = None;
        let mut ws_peer = None;

        if config.tcp.enabled {
            let peer = TcpPeer::new(config.peer_config(
                &config.tcp.network,
                &config.tcp.host,
                config.tcp.port,
            ))?;
            peer.start().await?;
            tcp_peer = Some(peer);
        }

        if config.kcp.enabled {
            let peer = KcpPeer::new(
                config.peer_config("tcp4", &config.kcp.host, config.kcp.port),
                config.kcp_option(),
            )?;
            peer.start().await?;
            kcp_peer = Some(peer);
        }

        if config.ws.enabled {
            let non_empty = |s: &str| (!s.is_empty()).then(|| PathBuf::from(s));
            let peer = WsPeer::new(
                config.peer_config("tcp4", &config.ws.host, config.ws.port),
                non_empty(&config.ws.cert_file),
                non_empty(&config.ws.key_file),
            )?;
            peer.start().await?;
            ws_peer = Some(peer);
        }

        if tcp_peer.is_none() && kcp_peer.is_none() && ws_peer.is_none() {
            return Err(AppError::InvalidConfig(
                "no transport enabled".to_string(),
            ));
        }

        Self::wait_for_signal().await;

        if let Some(peer) = &tcp_peer {
            peer.close().await;
        }
        if let Some(peer) = &kcp_peer {
            peer.close().await;
        }
        if let Some(peer) = &ws_peer {
            peer.close().await;
        }

        info!("gate shutdown complete");
        Ok(())
    }

    async fn wait_for_signal() {
        #[cfg(unix)]
        {
            let mut terminate =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("install SIGTERM handler");
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received interrupt signal"),
                _ = terminate.recv() => info!("received terminate signal"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt signal");
        }
    }
}
