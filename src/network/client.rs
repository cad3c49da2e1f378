use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::network::codec::{Datapack, LtdCodec};
use crate::network::message::{Message, ZERO_ACTION_EXCHANGE_KEY_RESPONSE, ZERO_ACTION_HEARTBEAT};
use crate::network::options::Config;
use crate::network::ring_buffer::RingBuffer;
use crate::security::{
    exchange_key_parse_response, exchange_key_request, Crypto, HandshakeState, Rc4Crypto,
};
use crate::{AppError, AppResult};

/// TCP client for the LTD protocol, used by tests and tooling.
///
/// Runs everything on the caller's task: writes pack inline, reads pull
/// transport bytes through a ring buffer and hand back complete messages in
/// arrival order.
pub struct Client {
    stream: TcpStream,
    datapack: Arc<dyn Datapack>,
    ring: RingBuffer,
    scratch: Vec<u8>,
    crypto: Option<Box<dyn Crypto>>,
    hmac_key: Option<Vec<u8>>,
    handshake: Option<HandshakeState>,
    pending: VecDeque<Message>,
}

impl Client {
    pub async fn connect(addr: SocketAddr, config: Config) -> AppResult<Self> {
        let datapack = config
            .datapack
            .clone()
            .unwrap_or_else(|| Arc::new(LtdCodec::from_config(&config)) as Arc<dyn Datapack>);

        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(%addr, "client connected");

        Ok(Self {
            stream,
            datapack,
            ring: RingBuffer::with_capacity(config.recv_buffer_size * 2),
            scratch: vec![0u8; config.recv_buffer_size],
            crypto: None,
            hmac_key: None,
            handshake: None,
            pending: VecDeque::new(),
        })
    }

    /// Packs and writes one message.
    pub async fn send(&mut self, message: Message) -> AppResult<()> {
        let crypto = self.crypto.as_mut().map(|c| c.as_mut() as &mut dyn Crypto);
        let frame = self
            .datapack
            .pack(&message, crypto, self.hmac_key.as_deref())?;
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    /// Returns the next message, reading from the transport as needed.
    pub async fn recv(&mut self) -> AppResult<Message> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(message);
            }

            let n = self.stream.read(&mut self.scratch).await?;
            if n == 0 {
                return Err(AppError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }
            self.ring.write_n(&self.scratch[..n])?;

            let crypto = self.crypto.as_mut().map(|c| c.as_mut() as &mut dyn Crypto);
            let messages = self
                .datapack
                .unpack(&mut self.ring, crypto, self.hmac_key.as_deref())?;
            self.pending.extend(messages);
        }
    }

    /// Runs the full key exchange: emits the request, waits for the
    /// response, installs the derived key. Data frames received while the
    /// exchange is in flight are kept for later `recv` calls.
    pub async fn exchange_key(&mut self) -> AppResult<()> {
        let (state, request) = exchange_key_request();
        self.handshake = Some(state);
        self.send(request).await?;

        let mut deferred = Vec::new();
        loop {
            let message = self.recv().await?;
            if message.is_zero() && message.action == ZERO_ACTION_EXCHANGE_KEY_RESPONSE {
                let state = self
                    .handshake
                    .take()
                    .ok_or_else(|| AppError::Handshake("no key exchange in flight".to_string()))?;
                let key = exchange_key_parse_response(&message.payload, &state)?;
                self.crypto = Some(Box::new(Rc4Crypto::new(&key)?));
                self.hmac_key = Some(key);
                debug!("client session key installed");
                break;
            }
            deferred.push(message);
        }

        for message in deferred.into_iter().rev() {
            self.pending.push_front(message);
        }
        Ok(())
    }

    pub fn has_session_key(&self) -> bool {
        self.crypto.is_some()
    }

    pub async fn send_heartbeat(&mut self, payload: impl Into<bytes::Bytes>) -> AppResult<()> {
        self.send(Message::zero(ZERO_ACTION_HEARTBEAT, payload)).await
    }

    pub async fn close(mut self) -> AppResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
