use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::network::codec::Datapack;
use crate::network::compress::{Compressor, Lz4Compressor};
use crate::network::session::Session;
use crate::{AppError, AppResult};

/// Fired when the listening socket is about to start; an error aborts startup.
pub type ServerStartCallback = Arc<dyn Fn() -> AppResult<()> + Send + Sync>;

/// Fired once the peer has closed every session.
pub type ServerCloseCallback = Arc<dyn Fn() + Send + Sync>;

/// Fired on connection establishment and on connection close. The close
/// callback runs before the session drains, so application code still holds a
/// live transport.
pub type ConnCallback = Arc<dyn Fn(&Arc<Session>) + Send + Sync>;

/// Fired after a message has been packed and written to the transport.
pub type SendCallback = Box<dyn FnOnce(&Arc<Session>) + Send>;

/// Peer and session configuration with the documented defaults.
///
/// One `Config` is shared by a peer and every session it accepts.
#[derive(Clone)]
pub struct Config {
    /// Reject new connections beyond this count; negative means unlimited.
    pub max_conn_num: i32,
    /// `tcp`, `tcp4` or `tcp6`.
    pub network: String,
    pub host: String,
    pub port: u16,
    /// Bound on the close drain; past it in-flight writes are abandoned.
    pub close_timeout: Duration,

    /// Transport read buffer. Also sizes the reassembly ring (twice this), so
    /// it bounds the largest frame a session can reassemble.
    pub recv_buffer_size: usize,
    /// Read deadline per transport read; `None` waits indefinitely.
    pub recv_deadline: Option<Duration>,
    pub recv_queue_size: usize,
    pub send_buffer_size: usize,
    /// Write deadline per frame write; `None` waits indefinitely.
    pub send_deadline: Option<Duration>,
    pub send_queue_size: usize,

    pub whether_compress: bool,
    /// Bodies at least this long are compressed; shorter ones are sent as-is.
    pub compress_threshold: usize,
    pub compressor: Option<Arc<dyn Compressor>>,
    pub whether_crypto: bool,
    pub whether_checksum: bool,
    /// Custom codec; defaults to the LTD codec built from the flags above.
    pub datapack: Option<Arc<dyn Datapack>>,

    pub on_server_start: Option<ServerStartCallback>,
    pub on_server_close: Option<ServerCloseCallback>,
    pub on_connected: Option<ConnCallback>,
    pub on_conn_close: Option<ConnCallback>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_conn_num: -1,
            network: "tcp4".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8001,
            close_timeout: Duration::from_secs(5),
            recv_buffer_size: 8 * 1024,
            recv_deadline: None,
            recv_queue_size: 128,
            send_buffer_size: 8 * 1024,
            send_deadline: None,
            send_queue_size: 128,
            whether_compress: false,
            compress_threshold: 0,
            compressor: Some(Arc::new(Lz4Compressor)),
            whether_crypto: false,
            whether_checksum: false,
            datapack: None,
            on_server_start: None,
            on_server_close: None,
            on_connected: None,
            on_conn_close: None,
        }
    }
}

impl Config {
    pub fn with_max_conn_num(mut self, max_conn_num: i32) -> Self {
        self.max_conn_num = max_conn_num;
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn with_recv_buffer_size(mut self, recv_buffer_size: usize) -> Self {
        self.recv_buffer_size = recv_buffer_size;
        self
    }

    pub fn with_recv_deadline(mut self, recv_deadline: Option<Duration>) -> Self {
        self.recv_deadline = recv_deadline;
        self
    }

    pub fn with_recv_queue_size(mut self, recv_queue_size: usize) -> Self {
        self.recv_queue_size = recv_queue_size;
        self
    }

    pub fn with_send_buffer_size(mut self, send_buffer_size: usize) -> Self {
        self.send_buffer_size = send_buffer_size;
        self
    }

    pub fn with_send_deadline(mut self, send_deadline: Option<Duration>) -> Self {
        self.send_deadline = send_deadline;
        self
    }

    pub fn with_send_queue_size(mut self, send_queue_size: usize) -> Self {
        self.send_queue_size = send_queue_size;
        self
    }

    pub fn with_whether_compress(mut self, whether_compress: bool) -> Self {
        self.whether_compress = whether_compress;
        self
    }

    pub fn with_compress_threshold(mut self, compress_threshold: usize) -> Self {
        self.compress_threshold = compress_threshold;
        self
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn with_whether_crypto(mut self, whether_crypto: bool) -> Self {
        self.whether_crypto = whether_crypto;
        self
    }

    pub fn with_whether_checksum(mut self, whether_checksum: bool) -> Self {
        self.whether_checksum = whether_checksum;
        self
    }

    pub fn with_datapack(mut self, datapack: Arc<dyn Datapack>) -> Self {
        self.datapack = Some(datapack);
        self
    }

    pub fn with_on_server_start(mut self, callback: ServerStartCallback) -> Self {
        self.on_server_start = Some(callback);
        self
    }

    pub fn with_on_server_close(mut self, callback: ServerCloseCallback) -> Self {
        self.on_server_close = Some(callback);
        self
    }

    pub fn with_on_connected(mut self, callback: ConnCallback) -> Self {
        self.on_connected = Some(callback);
        self
    }

    pub fn with_on_conn_close(mut self, callback: ConnCallback) -> Self {
        self.on_conn_close = Some(callback);
        self
    }

    /// Checks the invariants the session pipeline relies on. `head_len` is
    /// the resolved codec's prefix length.
    pub fn validate(&self, head_len: usize) -> AppResult<()> {
        if self.recv_buffer_size < head_len {
            return Err(AppError::InvalidConfig(format!(
                "recv_buffer_size {} below frame head length {}",
                self.recv_buffer_size, head_len
            )));
        }
        if self.recv_queue_size == 0 || self.send_queue_size == 0 {
            return Err(AppError::InvalidConfig(
                "queue sizes must be non-zero".to_string(),
            ));
        }
        if self.send_buffer_size == 0 {
            return Err(AppError::InvalidConfig(
                "send_buffer_size must be non-zero".to_string(),
            ));
        }
        match self.network.as_str() {
            "tcp" | "tcp4" | "tcp6" => Ok(()),
            other => Err(AppError::InvalidConfig(format!(
                "unsupported network: {}",
                other
            ))),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("max_conn_num", &self.max_conn_num)
            .field("network", &self.network)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("close_timeout", &self.close_timeout)
            .field("recv_buffer_size", &self.recv_buffer_size)
            .field("recv_deadline", &self.recv_deadline)
            .field("recv_queue_size", &self.recv_queue_size)
            .field("send_buffer_size", &self.send_buffer_size)
            .field("send_deadline", &self.send_deadline)
            .field("send_queue_size", &self.send_queue_size)
            .field("whether_compress", &self.whether_compress)
            .field("compress_threshold", &self.compress_threshold)
            .field("whether_crypto", &self.whether_crypto)
            .field("whether_checksum", &self.whether_checksum)
            .finish()
    }
}
