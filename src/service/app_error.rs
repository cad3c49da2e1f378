use std::io;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// framing errors
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("ring buffer overflow: need {need}, free {free}")]
    RingFull { need: usize, free: usize },

    #[error("ring buffer underflow: need {need}, buffered {buffered}")]
    RingEmpty { need: usize, buffered: usize },

    /// integrity errors
    #[error("no checksum flag")]
    NoChecksumFlag,

    #[error("verify checksum failed")]
    VerifyChecksum,

    /// crypto errors
    #[error("encrypt payload failed: {0}")]
    EncryptPayload(String),

    #[error("decrypt payload failed: {0}")]
    DecryptPayload(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    /// compression errors
    #[error("compress payload failed: {0}")]
    CompressPayload(String),

    #[error("decompress payload failed: {0}")]
    DecompressPayload(String),

    /// transport errors
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("read timeout")]
    ReadTimeout,

    #[error("write deadline exceeded")]
    WriteDeadline,

    #[error("accept error: {0}")]
    Accept(String),

    /// backpressure errors
    #[error("write timeout")]
    WriteTimeout,

    #[error("stop send message")]
    StopSend,

    /// routing errors
    #[error("router repeated")]
    RouterRepeated,

    #[error("handler not found: module {0}, action {1}")]
    HandlerNotFound(u8, u8),

    #[error("zero action not supported: {0}")]
    ZeroActionNotSupported(u8),

    #[error("session not found: {0}")]
    SessionNotFound(u64),

    /// configuration errors
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("tracing error: {0}")]
    TracingError(#[from] tracing::dispatcher::SetGlobalDefaultError),
}

impl AppError {
    /// True when the error came from the peer ending the stream or a socket
    /// level failure, as opposed to a protocol violation.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AppError::Io(_) | AppError::ReadTimeout | AppError::WriteDeadline
        )
    }
}
