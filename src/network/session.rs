use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use crate::network::codec::Datapack;
use crate::network::message::{
    Message, SessionId, ZERO_ACTION_EXCHANGE_KEY_REQUEST, ZERO_ACTION_EXCHANGE_KEY_RESPONSE,
    ZERO_ACTION_HEARTBEAT,
};
use crate::network::options::{Config, SendCallback};
use crate::network::ring_buffer::RingBuffer;
use crate::network::router::Router;
use crate::network::session_manager::SessionManager;
use crate::network::transport::{TransportReader, TransportWriter};
use crate::security::{
    exchange_key_parse_response, exchange_key_request, exchange_key_response, Crypto,
    HandshakeState, Rc4Crypto,
};
use crate::utils::BufferPool;
use crate::{AppError, AppResult};

/// Bound on enqueueing into a full send queue.
const SEND_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(3);

/// Session lifecycle.
///
/// `Handshaking` is entered instead of `Ready` when encryption is required;
/// installing the negotiated key moves the session to `Ready`. Close drives
/// any state through `Draining` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    New = 0,
    Handshaking = 1,
    Ready = 2,
    Draining = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::New,
            1 => SessionState::Handshaking,
            2 => SessionState::Ready,
            3 => SessionState::Draining,
            _ => SessionState::Closed,
        }
    }
}

struct SendElement {
    message: Message,
    callback: Option<SendCallback>,
}

/// One connection: owns the transport through its three tasks, the bounded
/// receive/send queues, and the per-session crypto state.
///
/// The receive task reads transport bytes into the ring, drains complete
/// frames through the codec and feeds the receive queue. The dispatch task
/// routes data frames through the router and control frames through the
/// in-session handshake handler. The send task packs queued messages and
/// writes them out. Inbound dispatch order and outbound write order both
/// follow queue order.
pub struct Session {
    id: SessionId,
    remote_addr: SocketAddr,
    /// Handle back to the owning `Arc`, for callbacks and task spawning.
    self_ref: Weak<Session>,
    config: Arc<Config>,
    datapack: Arc<dyn Datapack>,
    router: Arc<Router>,
    manager: Weak<SessionManager>,

    send_tx: async_channel::Sender<SendElement>,
    send_rx: async_channel::Receiver<SendElement>,
    recv_tx: async_channel::Sender<Message>,
    recv_rx: async_channel::Receiver<Message>,
    close_tx: broadcast::Sender<()>,

    state: AtomicU8,
    stop_recv: AtomicBool,
    stop_send: AtomicBool,
    closed: AtomicBool,

    /// Installed once by the dispatch task when the key exchange completes;
    /// read by pack and unpack from then on.
    crypto: Mutex<Option<Box<dyn Crypto>>>,
    hmac_key: Mutex<Option<Vec<u8>>>,
    /// Initiator-side handshake state, taken when the response arrives.
    handshake: Mutex<Option<HandshakeState>>,

    outstanding_writes: AtomicUsize,
    /// Set when the send task exits; close stops waiting for the queue to
    /// drain once nobody is left to drain it.
    send_task_exited: AtomicBool,
    write_done: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        id: SessionId,
        remote_addr: SocketAddr,
        config: Arc<Config>,
        datapack: Arc<dyn Datapack>,
        router: Arc<Router>,
        manager: Weak<SessionManager>,
    ) -> Arc<Self> {
        let (send_tx, send_rx) = async_channel::bounded(config.send_queue_size);
        let (recv_tx, recv_rx) = async_channel::bounded(config.recv_queue_size);
        let (close_tx, _) = broadcast::channel(1);

        Arc::new_cyclic(|self_ref| Self {
            id,
            remote_addr,
            self_ref: self_ref.clone(),
            config,
            datapack,
            router,
            manager,
            send_tx,
            send_rx,
            recv_tx,
            recv_rx,
            close_tx,
            state: AtomicU8::new(SessionState::New as u8),
            stop_recv: AtomicBool::new(false),
            stop_send: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            crypto: Mutex::new(None),
            hmac_key: Mutex::new(None),
            handshake: Mutex::new(None),
            outstanding_writes: AtomicUsize::new(0),
            send_task_exited: AtomicBool::new(false),
            write_done: Notify::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Starts the receive, dispatch and send tasks.
    pub fn run(&self, reader: Box<dyn TransportReader>, writer: Box<dyn TransportWriter>) {
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };

        self.set_state(if self.config.whether_crypto {
            SessionState::Handshaking
        } else {
            SessionState::Ready
        });

        if let Some(callback) = &self.config.on_connected {
            callback(&this);
        }

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(Self::recv_loop(this.clone(), reader)));
        tasks.push(tokio::spawn(Self::dispatch_loop(this.clone())));
        tasks.push(tokio::spawn(Self::send_loop(this, writer)));

        debug!(session_id = self.id, remote = %self.remote_addr, "session running");
    }

    /// Queues a message for sending.
    pub async fn send(&self, message: Message) -> AppResult<()> {
        self.enqueue(message, None).await
    }

    /// Queues a message; the callback fires after the frame is written.
    pub async fn send_callback(&self, message: Message, callback: SendCallback) -> AppResult<()> {
        self.enqueue(message, Some(callback)).await
    }

    async fn enqueue(&self, message: Message, callback: Option<SendCallback>) -> AppResult<()> {
        if self.stop_send.load(Ordering::Acquire) {
            return Err(AppError::StopSend);
        }

        let element = SendElement { message, callback };
        match time::timeout(SEND_ENQUEUE_TIMEOUT, self.send_tx.send(element)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(AppError::StopSend),
            Err(_) => {
                error!(session_id = self.id, "send queue full, enqueue timed out");
                Err(AppError::WriteTimeout)
            }
        }
    }

    /// Emits a key-exchange request and stashes the private half until the
    /// peer responds.
    pub async fn initiate_key_exchange(&self) -> AppResult<()> {
        let (state, request) = exchange_key_request();
        *self.handshake.lock() = Some(state);
        self.send(request).await
    }

    /// Installs the negotiated key: fresh cipher instances for both
    /// directions plus the checksum key. The session is ready for data
    /// frames afterwards.
    pub fn install_session_key(&self, key: &[u8]) -> AppResult<()> {
        let crypto = Rc4Crypto::new(key)?;
        *self.crypto.lock() = Some(Box::new(crypto));
        *self.hmac_key.lock() = Some(key.to_vec());
        self.set_state(SessionState::Ready);
        Ok(())
    }

    /// Stops both directions, fires the close callbacks, waits for queued
    /// writes to flush (bounded by `close_timeout`), then releases the tasks
    /// and channels. Safe to call any number of times.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.set_state(SessionState::Draining);
        self.stop_recv.store(true, Ordering::Release);
        self.stop_send.store(true, Ordering::Release);

        // Callbacks fire before the drain wait so user code can still act on
        // a live transport.
        if let Some(callback) = &self.config.on_conn_close {
            if let Some(this) = self.self_ref.upgrade() {
                callback(&this);
            }
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.detach(self.id);
        }

        let deadline = Instant::now() + self.config.close_timeout;
        loop {
            let flushed =
                self.send_tx.is_empty() || self.send_task_exited.load(Ordering::Acquire);
            if flushed && self.outstanding_writes.load(Ordering::Acquire) == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    session_id = self.id,
                    queued = self.send_tx.len(),
                    "close timeout, abandoning in-flight writes"
                );
                break;
            }
            tokio::select! {
                _ = self.write_done.notified() => {}
                _ = time::sleep_until(deadline) => {}
            }
        }

        let _ = self.close_tx.send(());
        self.send_rx.close();
        self.recv_rx.close();
        self.set_state(SessionState::Closed);

        info!(session_id = self.id, remote = %self.remote_addr, "session closed");
    }

    async fn recv_loop(session: Arc<Session>, mut reader: Box<dyn TransportReader>) {
        let mut close_rx = session.close_tx.subscribe();
        let mut scratch = vec![0u8; session.config.recv_buffer_size];
        let mut ring = RingBuffer::with_capacity(session.config.recv_buffer_size * 2);

        'outer: loop {
            let read_result = tokio::select! {
                result = Self::read_with_deadline(
                    reader.as_mut(),
                    &mut scratch,
                    session.config.recv_deadline,
                ) => result,
                _ = close_rx.recv() => break,
            };

            if session.stop_recv.load(Ordering::Acquire) {
                break;
            }

            let n = match read_result {
                Ok(n) => n,
                Err(e) => {
                    error!(
                        session_id = session.id,
                        remote = %session.remote_addr,
                        "read failed: {}", e
                    );
                    break;
                }
            };

            if n == 0 {
                debug!(session_id = session.id, "closed by remote");
                break;
            }

            if let Err(e) = ring.write_n(&scratch[..n]) {
                error!(session_id = session.id, "receive ring overflow: {}", e);
                break;
            }

            let unpacked = {
                let mut crypto_guard = session.crypto.lock();
                let hmac_guard = session.hmac_key.lock();
                let crypto = crypto_guard.as_mut().map(|c| c.as_mut() as &mut dyn Crypto);
                session.datapack.unpack(&mut ring, crypto, hmac_guard.as_deref())
            };

            match unpacked {
                Ok(messages) => {
                    for mut message in messages {
                        message.session_id = session.id;
                        // Backpressure: a full receive queue blocks this task
                        // and therefore the transport.
                        if session.recv_tx.send(message).await.is_err() {
                            break 'outer;
                        }
                    }
                }
                Err(e) => {
                    error!(
                        session_id = session.id,
                        remote = %session.remote_addr,
                        "unpack failed: {}", e
                    );
                    break;
                }
            }
        }

        session.close().await;
    }

    async fn read_with_deadline(
        reader: &mut dyn TransportReader,
        buf: &mut [u8],
        deadline: Option<Duration>,
    ) -> AppResult<usize> {
        match deadline {
            Some(deadline) => time::timeout(deadline, reader.read(buf))
                .await
                .map_err(|_| AppError::ReadTimeout)?,
            None => reader.read(buf).await,
        }
    }

    async fn dispatch_loop(session: Arc<Session>) {
        let mut close_rx = session.close_tx.subscribe();

        loop {
            tokio::select! {
                received = session.recv_rx.recv() => {
                    let Ok(message) = received else { break };

                    let result = if message.is_zero() {
                        session.handle_zero(&message)
                    } else {
                        session.router.dispatch(&message)
                    };

                    match result {
                        Ok(Some(response)) => {
                            if let Err(e) = session.send(response).await {
                                error!(
                                    session_id = session.id,
                                    "send response failed: {}, message: {}", e, message
                                );
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(AppError::HandlerNotFound(module, action)) => {
                            warn!(
                                session_id = session.id,
                                module, action, "no handler bound"
                            );
                        }
                        Err(e) => {
                            error!(
                                session_id = session.id,
                                remote = %session.remote_addr,
                                "dispatch failed: {}, message: {}", e, message
                            );
                            break;
                        }
                    }
                }
                _ = close_rx.recv() => break,
            }
        }

        session.close().await;
    }

    /// Control-plane frames: key exchange and heartbeat.
    fn handle_zero(&self, message: &Message) -> AppResult<Option<Message>> {
        match message.action {
            ZERO_ACTION_EXCHANGE_KEY_REQUEST => {
                let (key, response) = exchange_key_response(&message.payload)?;
                self.install_session_key(&key)?;
                debug!(session_id = self.id, "session key installed");
                Ok(Some(response))
            }
            ZERO_ACTION_EXCHANGE_KEY_RESPONSE => {
                let state = self.handshake.lock().take().ok_or_else(|| {
                    AppError::Handshake("no key exchange in flight".to_string())
                })?;
                let key = exchange_key_parse_response(&message.payload, &state)?;
                self.install_session_key(&key)?;
                debug!(session_id = self.id, "session key installed");
                Ok(None)
            }
            ZERO_ACTION_HEARTBEAT => Ok(Some(message.clone())),
            other => Err(AppError::ZeroActionNotSupported(other)),
        }
    }

    async fn send_loop(session: Arc<Session>, mut writer: Box<dyn TransportWriter>) {
        let mut close_rx = session.close_tx.subscribe();

        loop {
            tokio::select! {
                element = session.send_rx.recv() => {
                    let Ok(element) = element else { break };

                    session.outstanding_writes.fetch_add(1, Ordering::AcqRel);
                    let result = session
                        .write_message(writer.as_mut(), &element.message)
                        .await;
                    session.outstanding_writes.fetch_sub(1, Ordering::AcqRel);
                    session.write_done.notify_waiters();

                    match result {
                        Ok(()) => {
                            if let Some(callback) = element.callback {
                                callback(&session);
                            }
                        }
                        Err(e) => {
                            error!(
                                session_id = session.id,
                                "write failed: {}, message: {}", e, element.message
                            );
                            break;
                        }
                    }
                }
                _ = close_rx.recv() => break,
            }
        }

        session.send_task_exited.store(true, Ordering::Release);
        session.write_done.notify_waiters();
        let _ = writer.shutdown().await;
        session.close().await;
    }

    async fn write_message(
        &self,
        writer: &mut dyn TransportWriter,
        message: &Message,
    ) -> AppResult<()> {
        let mut frame = BufferPool::global().acquire();
        {
            let mut crypto_guard = self.crypto.lock();
            let hmac_guard = self.hmac_key.lock();
            let crypto = crypto_guard.as_mut().map(|c| c.as_mut() as &mut dyn Crypto);
            self.datapack
                .pack_into(message, crypto, hmac_guard.as_deref(), &mut frame)?;
        }

        match self.config.send_deadline {
            Some(deadline) => time::timeout(deadline, writer.write_all(&frame))
                .await
                .map_err(|_| AppError::WriteDeadline)??,
            None => writer.write_all(&frame).await?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::codec::LtdCodec;
    use bytes::Bytes;

    fn bare_session(config: Config) -> Arc<Session> {
        let datapack = Arc::new(LtdCodec::from_config(&config));
        Session::new(
            7,
            "127.0.0.1:9000".parse().unwrap(),
            Arc::new(config),
            datapack,
            Arc::new(Router::new()),
            Weak::new(),
        )
    }

    #[tokio::test]
    async fn heartbeat_is_echoed_unchanged() {
        let session = bare_session(Config::default());
        let mut ping = Message::zero(ZERO_ACTION_HEARTBEAT, Bytes::from_static(b"beat"));
        ping.sn = 11;
        let echoed = session.handle_zero(&ping).unwrap().unwrap();
        assert_eq!(echoed, ping);
    }

    #[tokio::test]
    async fn unknown_zero_action_is_an_error() {
        let session = bare_session(Config::default());
        let bogus = Message::zero(200, Bytes::new());
        assert!(matches!(
            session.handle_zero(&bogus),
            Err(AppError::ZeroActionNotSupported(200))
        ));
    }

    #[tokio::test]
    async fn response_without_pending_exchange_is_rejected() {
        let session = bare_session(Config::default());
        let stray = Message::zero(ZERO_ACTION_EXCHANGE_KEY_RESPONSE, Bytes::from_static(b"{}"));
        assert!(matches!(
            session.handle_zero(&stray),
            Err(AppError::Handshake(_))
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let session = bare_session(Config::default());
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.send(Message::request(1, 1, 1, Bytes::new())).await,
            Err(AppError::StopSend)
        ));
    }
}
