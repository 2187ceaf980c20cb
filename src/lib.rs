pub mod pipeline;
pub mod pool;
