pub mod frame;
pub mod pool;

pub use frame::Buffer;
pub use pool::BufferPool;
