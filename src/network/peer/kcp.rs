use std::net::SocketAddr;
use std::sync::Arc;

use tokio_kcp::{KcpConfig, KcpListener, KcpNoDelayConfig};
use tracing::{debug, info, warn};

use crate::network::options::Config;
use crate::network::peer::PeerCore;
use crate::network::router::Router;
use crate::network::session_manager::SessionManager;
use crate::network::transport::{StreamReader, StreamWriter};
use crate::service::Shutdown;
use crate::{AppError, AppResult};

/// Reliable-UDP specific tuning, applied to every accepted conversation.
#[derive(Debug, Clone)]
pub struct KcpOption {
    /// Treat the conversation as a byte stream rather than datagrams.
    pub stream_mode: bool,
    /// Packets above this size are fragmented.
    pub mtu: usize,
    /// Send window, in packets.
    pub sndwnd: u16,
    /// Receive window, in packets.
    pub rcvwnd: u16,
    /// Forward-error-correction shard counts. Accepted for configuration
    /// compatibility; the underlying conversation currently transmits
    /// without FEC.
    pub data_shard: usize,
    pub parity_shard: usize,
    /// Aggressive retransmission mode.
    pub nodelay: bool,
    /// Internal flush interval in milliseconds.
    pub interval: i32,
    /// Fast retransmit after this many duplicate ACK spans; 0 disables.
    pub resend: i32,
    /// Disable congestion control.
    pub nc: bool,
}

impl Default for KcpOption {
    fn default() -> Self {
        Self {
            stream_mode: true,
            mtu: 1400,
            sndwnd: 1024,
            rcvwnd: 1024,
            data_shard: 10,
            parity_shard: 3,
            nodelay: true,
            interval: 40,
            resend: 2,
            nc: true,
        }
    }
}

impl KcpOption {
    pub fn with_stream_mode(mut self, stream_mode: bool) -> Self {
        self.stream_mode = stream_mode;
        self
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_window_size(mut self, sndwnd: u16, rcvwnd: u16) -> Self {
        self.sndwnd = sndwnd;
        self.rcvwnd = rcvwnd;
        self
    }

    pub fn with_fec(mut self, data_shard: usize, parity_shard: usize) -> Self {
        self.data_shard = data_shard;
        self.parity_shard = parity_shard;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool, interval: i32, resend: i32, nc: bool) -> Self {
        self.nodelay = nodelay;
        self.interval = interval;
        self.resend = resend;
        self.nc = nc;
        self
    }

    fn to_kcp_config(&self) -> KcpConfig {
        KcpConfig {
            mtu: self.mtu,
            nodelay: KcpNoDelayConfig {
                nodelay: self.nodelay,
                interval: self.interval,
                resend: self.resend,
                nc: self.nc,
            },
            wnd_size: (self.sndwnd, self.rcvwnd),
            stream: self.stream_mode,
            ..Default::default()
        }
    }
}

/// Reliable-UDP acceptor.
pub struct KcpPeer {
    core: Arc<PeerCore>,
    option: KcpOption,
}

impl KcpPeer {
    pub fn new(config: Config, option: KcpOption) -> AppResult<Self> {
        Ok(Self {
            core: PeerCore::new(config)?,
            option,
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

        let address = self.core.listen_address();
        let listener = KcpListener::bind(self.option.to_kcp_config(), address.as_str())
            .await
            .map_err(|e| AppError::Accept(format!("kcp bind {} failed: {}", address, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AppError::Accept(format!("kcp local addr: {}", e)))?;
        info!(
            "kcp server listening at {}, pid: {}",
            local_addr,
            std::process::id()
        );
        if self.option.data_shard > 0 || self.option.parity_shard > 0 {
            debug!(
                data_shard = self.option.data_shard,
                parity_shard = self.option.parity_shard,
                "fec shards configured, conversation runs without fec"
            );
        }

        tokio::spawn(accept_loop(self.core.clone(), listener));
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

async fn accept_loop(core: Arc<PeerCore>, mut listener: KcpListener) {
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
                let (read_half, write_half) = tokio::io::split(stream);
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
                warn!("kcp accept error: {}", e);
            }
        }
    }

    debug!("kcp accept loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_tuning() {
        let option = KcpOption::default();
        assert!(option.stream_mode);
        assert_eq!(option.mtu, 1400);
        assert_eq!((option.sndwnd, option.rcvwnd), (1024, 1024));
        assert_eq!((option.data_shard, option.parity_shard), (10, 3));
        assert_eq!((option.interval, option.resend), (40, 2));
    }

    #[test]
    fn builder_overrides_apply() {
        let option = KcpOption::default()
            .with_mtu(1200)
            .with_window_size(256, 256)
            .with_nodelay(false, 100, 0, false);
        let config = option.to_kcp_config();
        assert_eq!(config.mtu, 1200);
        assert_eq!(config.wnd_size, (256, 256));
        assert!(!config.nodelay.nodelay);
    }
}
