extern crate config as rs_config;

use std::path::Path;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::network::{Config, KcpOption};
use crate::AppResult;

pub static GLOBAL_CONFIG: OnceCell<GateConfig> = OnceCell::new();

pub fn global_config() -> &'static GateConfig {
    GLOBAL_CONFIG.get().expect("gate config not initialized")
}

/// File-backed configuration for the gate binary: which transports to start
/// and the session/codec parameters they share.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub session: SessionFileConfig,
    pub codec: CodecFileConfig,
    pub tcp: TcpFileConfig,
    pub kcp: KcpFileConfig,
    pub ws: WsFileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionFileConfig {
    pub max_conn_num: i32,
    pub recv_buffer_size: usize,
    /// 0 disables the read deadline.
    pub recv_deadline_secs: u64,
    pub recv_queue_size: usize,
    pub send_buffer_size: usize,
    /// 0 disables the write deadline.
    pub send_deadline_secs: u64,
    pub send_queue_size: usize,
    pub close_timeout_secs: u64,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            max_conn_num: -1,
            recv_buffer_size: 8 * 1024,
            recv_deadline_secs: 0,
            recv_queue_size: 128,
            send_buffer_size: 8 * 1024,
            send_deadline_secs: 0,
            send_queue_size: 128,
            close_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecFileConfig {
    pub whether_compress: bool,
    pub compress_threshold: usize,
    pub whether_crypto: bool,
    pub whether_checksum: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpFileConfig {
    pub enabled: bool,
    pub network: String,
    pub host: String,
    pub port: u16,
}

impl Default for TcpFileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            network: "tcp4".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KcpFileConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub stream_mode: bool,
    pub mtu: usize,
    pub sndwnd: u16,
    pub rcvwnd: u16,
    pub data_shard: usize,
    pub parity_shard: usize,
    pub nodelay: bool,
    pub interval: i32,
    pub resend: i32,
    pub nc: bool,
}

impl Default for KcpFileConfig {
    fn default() -> Self {
        let option = KcpOption::default();
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8002,
            stream_mode: option.stream_mode,
            mtu: option.mtu,
            sndwnd: option.sndwnd,
            rcvwnd: option.rcvwnd,
            data_shard: option.data_shard,
            parity_shard: option.parity_shard,
            nodelay: option.nodelay,
            interval: option.interval,
            resend: option.resend,
            nc: option.nc,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsFileConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub cert_file: String,
    pub key_file: String,
}

impl Default for WsFileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8003,
            cert_file: String::new(),
            key_file: String::new(),
        }
    }
}

impl GateConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<GateConfig> {
        let path_str = path.as_ref().to_string_lossy();
        let raw = rs_config::Config::builder()
            .add_source(rs_config::File::with_name(&path_str))
            .build()?;
        Ok(raw.try_deserialize()?)
    }

    /// Library-level config shared by the session/codec parameters, bound to
    /// one transport's address.
    pub fn peer_config(&self, network: &str, host: &str, port: u16) -> Config {
        let deadline = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
        Config::default()
            .with_network(network)
            .with_host(host)
            .with_port(port)
            .with_max_conn_num(self.session.max_conn_num)
            .with_recv_buffer_size(self.session.recv_buffer_size)
            .with_recv_deadline(deadline(self.session.recv_deadline_secs))
            .with_recv_queue_size(self.session.recv_queue_size)
            .with_send_buffer_size(self.session.send_buffer_size)
            .with_send_deadline(deadline(self.session.send_deadline_secs))
            .with_send_queue_size(self.session.send_queue_size)
            .with_close_timeout(Duration::from_secs(self.session.close_timeout_secs))
            .with_whether_compress(self.codec.whether_compress)
            .with_compress_threshold(self.codec.compress_threshold)
            .with_whether_crypto(self.codec.whether_crypto)
            .with_whether_checksum(self.codec.whether_checksum)
    }

    pub fn kcp_option(&self) -> KcpOption {
        KcpOption::default()
            .with_stream_mode(self.kcp.stream_mode)
            .with_mtu(self.kcp.mtu)
            .with_window_size(self.kcp.sndwnd, self.kcp.rcvwnd)
            .with_fec(self.kcp.data_shard, self.kcp.parity_shard)
            .with_nodelay(self.kcp.nodelay, self.kcp.interval, self.kcp.resend, self.kcp.nc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_the_library_config() {
        let gate = GateConfig::default();
        assert!(gate.tcp.enabled);
        assert!(!gate.kcp.enabled);
        assert!(!gate.ws.enabled);

        let config = gate.peer_config(&gate.tcp.network, &gate.tcp.host, gate.tcp.port);
        assert_eq!(config.recv_buffer_size, 8 * 1024);
        assert_eq!(config.recv_deadline, None);
        assert_eq!(config.close_timeout, Duration::from_secs(5));
        assert!(config.validate(10).is_ok());
    }

    #[test]
    fn deadline_zero_means_disabled() {
        let mut gate = GateConfig::default();
        gate.session.recv_deadline_secs = 30;
        let config = gate.peer_config("tcp4", "127.0.0.1", 9000);
        assert_eq!(config.recv_deadline, Some(Duration::from_secs(30)));
    }
}
