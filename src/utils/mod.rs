mod buffer_pool;

pub use buffer_pool::{BufferPool, PooledBuf};
