//! Transport acceptors. TCP, KCP and WebSocket peers differ only in how they
//! bind, accept and tune connections; admission control, session wiring and
//! the shutdown path live in [`PeerCore`] and are shared by all three.

mod core;
pub mod kcp;
pub mod tcp;
pub mod ws;

pub use self::core::PeerCore;
pub use kcp::{KcpOption, KcpPeer};
pub use tcp::TcpPeer;
pub use ws::WsPeer;
