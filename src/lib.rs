pub mod network;
pub mod security;
pub mod service;
pub mod utils;

pub use network::{
    Client, Config, Datapack, KcpOption, KcpPeer, LtdCodec, Message, Router, Session, SessionId,
    SessionManager, SessionState, TcpPeer, WsPeer,
};
pub use service::{
    global_config, AppError, AppResult, Gate, GateConfig, Shutdown, GLOBAL_CONFIG,
};
