//! Networking core: the LTD frame codec, the per-connection session with its
//! receive/dispatch/send task triad, the session registry, the module/action
//! router, and the transport acceptors.
//!
//! Transport bytes accumulate in the ring buffer until the codec can unpack
//! complete messages into the receive queue; dispatched responses enter the
//! send queue and are packed back onto the transport.

pub mod client;
pub mod codec;
pub mod compress;
pub mod message;
pub mod options;
pub mod peer;
pub mod ring_buffer;
pub mod router;
pub mod session;
pub mod session_manager;
pub mod transport;

pub use client::Client;
pub use codec::{Datapack, LtdCodec};
pub use compress::{Compressor, Lz4Compressor};
pub use message::{
    Message, SessionId, FLAG_CHECKSUM, FLAG_COMPRESS, FLAG_ENCRYPT, FLAG_ZERO,
    ZERO_ACTION_EXCHANGE_KEY_REQUEST, ZERO_ACTION_EXCHANGE_KEY_RESPONSE, ZERO_ACTION_HEARTBEAT,
};
pub use options::{Config, ConnCallback, SendCallback, ServerCloseCallback, ServerStartCallback};
pub use peer::{KcpOption, KcpPeer, PeerCore, TcpPeer, WsPeer};
pub use ring_buffer::RingBuffer;
pub use router::{router_id, HandlerFn, Router};
pub use session::{Session, SessionState};
pub use session_manager::SessionManager;
pub use transport::{
    split_ws, StreamReader, StreamWriter, TransportReader, TransportWriter, WsReader, WsWriter,
};
