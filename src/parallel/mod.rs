//! # Parallel Access Coordinator
//!
//! A fixed worker pool plus a chunked parallel map on top of it. The caller
//! blocks on task handles, so a parallel run looks synchronous; tasks never
//! wait on one another, which rules out dependency deadlocks.
//!
//! | Type | Role |
//! |------|------|
//! | [`WorkerPool`] | named threads, Running → Draining → Stopped |
//! | [`TaskHandle`] | `wait` / `wait_timeout` on one task |
//! | [`ParallelCoordinator`] | `process_in_parallel`, `update_component_type` |
//! | [`Pipeline`] | named stages, each awaited before the next |

pub mod coordinator;
pub mod pipeline;
pub mod pool;

pub use coordinator::{ParallelCoordinator, ParallelReport, WorkerContext};
pub use pipeline::{Pipeline, PipelineReport};
pub use pool::{PoolState, TaskHandle, WorkerPool};
