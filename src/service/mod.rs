mod app_error;
mod config;
mod gate;
mod shutdown;
mod tracing_config;

pub use app_error::{AppError, AppResult};
pub use config::{
    global_config, CodecFileConfig, GateConfig, KcpFileConfig, SessionFileConfig, TcpFileConfig,
    WsFileConfig, GLOBAL_CONFIG,
};
pub use gate::Gate;
pub use shutdown::Shutdown;
pub use tracing_config::{setup_local_tracing, setup_tracing};
