//! Queue consumers: the pool that drains deliveries and the processor that
//! turns each one into dispatched, tracked, reported workflow runs.

mod pool;
mod processor;

pub use pool::{run_workers, PoolConfig};
pub use processor::{Disposition, Processor, ProcessorConfig};
