mod buffer;
mod task;

pub use buffer::{BufferPool, PooledBuffer};
pub use task::{PoolState, TaskFuture, TaskPool};
