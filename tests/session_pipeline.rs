use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::time::timeout;

use gatenet::network::{
    Config, Datapack, LtdCodec, Message, RingBuffer, Router, Session, SessionManager,
    SessionState, StreamReader, StreamWriter,
};
use gatenet::AppError;

fn build_session(
    manager: &Arc<SessionManager>,
    router: Arc<Router>,
    config: Config,
    reader: ReadHalf<DuplexStream>,
    writer: WriteHalf<DuplexStream>,
) -> Arc<Session> {
    let config = Arc::new(config);
    let datapack: Arc<dyn Datapack> = Arc::new(LtdCodec::from_config(&config));
    let session = Session::new(
        manager.gen_session_id(),
        "127.0.0.1:0".parse().unwrap(),
        config,
        datapack,
        router,
        Arc::downgrade(manager),
    );
    manager.add(session.clone());
    session.run(
        Box::new(StreamReader::new(reader)),
        Box::new(StreamWriter::new(writer)),
    );
    session
}

fn echo_router() -> Arc<Router> {
    let router = Arc::new(Router::new());
    router
        .add(
            1,
            1,
            Arc::new(|message: &Message| {
                Ok(Some(Message::response(message, 0, message.payload.clone())))
            }),
        )
        .unwrap();
    router
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn routed_echo_preserves_wire_order() {
    let manager = SessionManager::new();
    let (server_io, client_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    build_session(
        &manager,
        echo_router(),
        Config::default(),
        server_read,
        server_write,
    );

    let codec = LtdCodec::new(false, 0, None, false, false);
    let (mut client_read, mut client_write) = tokio::io::split(client_io);

    let total = 50u16;
    let mut wire = Vec::new();
    for sn in 0..total {
        let request = Message::request(sn, 1, 1, sn.to_be_bytes().to_vec());
        wire.extend_from_slice(&codec.pack(&request, None, None).unwrap());
    }
    client_write.write_all(&wire).await.unwrap();

    let mut ring = RingBuffer::with_capacity(1 << 16);
    let mut responses = Vec::new();
    let mut buf = [0u8; 4096];
    timeout(Duration::from_secs(5), async {
        while responses.len() < total as usize {
            let n = client_read.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed early");
            ring.write_n(&buf[..n]).unwrap();
            responses.extend(codec.unpack(&mut ring, None, None).unwrap());
        }
    })
    .await
    .expect("responses not delivered in time");

    for (i, response) in responses.iter().enumerate() {
        assert_eq!(response.sn, i as u16);
        assert_eq!(response.payload.as_ref(), (i as u16).to_be_bytes().as_slice());
    }
}

#[tokio::test]
async fn data_frame_before_handshake_fails_the_session() {
    let manager = SessionManager::new();
    let config = Config::default().with_whether_crypto(true);

    let (server_io, client_io) = tokio::io::duplex(1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let _hold_peer_open = client_io;

    let session = build_session(
        &manager,
        Arc::new(Router::new()),
        config,
        server_read,
        server_write,
    );
    assert_eq!(session.state(), SessionState::Handshaking);

    // The enqueue itself succeeds; the pack fails in the send task with a
    // crypto error and tears the session down.
    session
        .send(Message::request(1, 1, 1, Bytes::from_static(b"early")))
        .await
        .unwrap();
    wait_for(|| session.is_closed()).await;
}

#[tokio::test]
async fn handshake_then_encrypted_round_trip() {
    let manager = SessionManager::new();

    let server_router = echo_router();
    let client_router = Arc::new(Router::new());
    let (reply_tx, mut reply_rx) = tokio::sync::mpsc::unbounded_channel();
    client_router
        .add(
            1,
            1,
            Arc::new(move |message: &Message| {
                let _ = reply_tx.send(message.clone());
                Ok(None)
            }),
        )
        .unwrap();

    let config = Config::default()
        .with_whether_crypto(true)
        .with_whether_checksum(true);

    let (server_io, client_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let (client_read, client_write) = tokio::io::split(client_io);

    let server = build_session(
        &manager,
        server_router,
        config.clone(),
        server_read,
        server_write,
    );
    let client = build_session(
        &manager,
        client_router,
        config.clone(),
        client_read,
        client_write,
    );

    client.initiate_key_exchange().await.unwrap();
    wait_for(|| client.state() == SessionState::Ready && server.state() == SessionState::Ready)
        .await;

    for sn in [1u16, 2, 3] {
        client
            .send(Message::request(sn, 1, 1, Bytes::from_static(b"secret")))
            .await
            .unwrap();
        let reply = timeout(Duration::from_secs(5), reply_rx.recv())
            .await
            .expect("no reply")
            .expect("channel closed");
        assert_eq!(reply.sn, sn);
        assert_eq!(reply.payload.as_ref(), b"secret");
    }
}

#[tokio::test(start_paused = true)]
async fn send_queue_overflow_times_out() {
    let manager = SessionManager::new();
    // Tiny transport buffer that nobody drains: the first write blocks and
    // the queue behind it fills up.
    let (server_io, client_io) = tokio::io::duplex(64);
    let (server_read, server_write) = tokio::io::split(server_io);
    let _hold_peer_open = client_io;

    let session = build_session(
        &manager,
        Arc::new(Router::new()),
        Config::default().with_send_queue_size(4),
        server_read,
        server_write,
    );

    let payload = Bytes::from(vec![0u8; 1024]);
    let mut saw_timeout = false;
    for sn in 0..10u16 {
        match session.send(Message::request(sn, 1, 1, payload.clone())).await {
            Ok(()) => {}
            Err(AppError::WriteTimeout) => {
                saw_timeout = true;
                break;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(saw_timeout, "queue never overflowed");

    // Close abandons the stuck writes once the drain deadline passes.
    timeout(Duration::from_secs(30), session.close())
        .await
        .expect("close did not finish");
    assert!(session.is_closed());
}

#[tokio::test(start_paused = true)]
async fn recv_deadline_tears_down_an_idle_session() {
    let manager = SessionManager::new();
    let (server_io, client_io) = tokio::io::duplex(1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let _hold_peer_open = client_io;

    let session = build_session(
        &manager,
        Arc::new(Router::new()),
        Config::default().with_recv_deadline(Some(Duration::from_secs(1))),
        server_read,
        server_write,
    );

    wait_for(|| session.is_closed()).await;
    assert_eq!(session.state(), SessionState::Closed);
    assert!(manager.is_empty());
}

#[tokio::test]
async fn conn_close_callback_fires_exactly_once() {
    let manager = SessionManager::new();
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = closes.clone();

    let config = Config::default().with_on_conn_close(Arc::new(move |_session| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let (server_io, client_io) = tokio::io::duplex(1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let _hold_peer_open = client_io;

    let session = build_session(
        &manager,
        Arc::new(Router::new()),
        config,
        server_read,
        server_write,
    );

    session.close().await;
    session.close().await;
    // The tasks also drive close when they observe the close signal.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(manager.is_empty());
}

#[tokio::test]
async fn peer_eof_closes_the_session() {
    let manager = SessionManager::new();
    let (server_io, client_io) = tokio::io::duplex(1024);
    let (server_read, server_write) = tokio::io::split(server_io);

    let session = build_session(
        &manager,
        Arc::new(Router::new()),
        Config::default(),
        server_read,
        server_write,
    );

    drop(client_io);
    wait_for(|| session.is_closed()).await;
    assert!(manager.is_empty());
}
