//! Cooperative priority task scheduler.
//!
//! Work is submitted as tasks tagged with a [`Priority`]; the scheduler
//! orders them by the deadline that priority implies, and a host timing
//! driver decides when the flush loop actually gets to run. Tasks cooperate
//! voluntarily: a long task polls [`Scheduler::should_yield`] and, when
//! told to stop, returns [`TaskResult::Pending`] with the rest of its work,
//! which resumes later under the original deadline. There is no preemption
//! and no parallelism; reentrancy (tasks scheduling, cancelling, or nesting
//! priority scopes mid-flush) is the supported form of "concurrency."

pub mod host;
pub mod mock;
pub mod queue;
pub mod scheduler;
pub mod task;

pub use host::{HostCallback, HostDriver};
pub use mock::MockHost;
pub use queue::TaskQueue;
pub use scheduler::{Scheduler, SchedulerStats};
pub use task::{Priority, TaskCallback, TaskId, TaskNode, TaskResult};
pub use task::{
    IDLE_TIMEOUT, IMMEDIATE_TIMEOUT, LOW_TIMEOUT, NORMAL_TIMEOUT, USER_BLOCKING_TIMEOUT,
};
