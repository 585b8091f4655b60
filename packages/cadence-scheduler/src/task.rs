use slotmap::new_key_type;

/// Timeout offsets in milliseconds, relative to a task's start time.
pub const IMMEDIATE_TIMEOUT: f64 = -1.0;
pub const USER_BLOCKING_TIMEOUT: f64 = 250.0;
pub const NORMAL_TIMEOUT: f64 = 5_000.0;
pub const LOW_TIMEOUT: f64 = 10_000.0;
/// Deliberately finite (max signed 31-bit integer, ~12.4 days) so an idle
/// deadline still compares and sorts against every other expiration time.
pub const IDLE_TIMEOUT: f64 = 1_073_741_823.0;

/// Urgency of a scheduled task. A priority has no intrinsic rank; its only
/// meaning is the deadline offset it produces via [`Priority::timeout`].
/// `Immediate` maps to an already-expired deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    Immediate,
    UserBlocking,
    #[default]
    Normal,
    Low,
    Idle,
}

impl Priority {
    /// Maps the conventional numeric levels 1-5. Anything unrecognized is
    /// normalized to `Normal` rather than rejected; scheduling misuse is
    /// never fatal.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Priority::Immediate,
            2 => Priority::UserBlocking,
            3 => Priority::Normal,
            4 => Priority::Low,
            5 => Priority::Idle,
            _ => Priority::Normal,
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            Priority::Immediate => 1,
            Priority::UserBlocking => 2,
            Priority::Normal => 3,
            Priority::Low => 4,
            Priority::Idle => 5,
        }
    }

    pub fn timeout(self) -> f64 {
        match self {
            Priority::Immediate => IMMEDIATE_TIMEOUT,
            Priority::UserBlocking => USER_BLOCKING_TIMEOUT,
            Priority::Normal => NORMAL_TIMEOUT,
            Priority::Low => LOW_TIMEOUT,
            Priority::Idle => IDLE_TIMEOUT,
        }
    }
}

pub type TaskCallback = Box<dyn FnOnce() -> TaskResult>;

/// What a task callback reports back to the flush loop.
///
/// `Pending` carries the unfinished remainder of the work; it re-enters the
/// queue with the same priority and the same expiration time as the task
/// that produced it, so yielding never pushes a task behind newer work with
/// a later deadline.
pub enum TaskResult {
    Done,
    Pending(TaskCallback),
}

new_key_type! {
    /// Stable handle to a queued task. Keys are generational, so a handle
    /// that outlives its task (cancelled, or already executed) simply stops
    /// resolving instead of dangling.
    pub struct TaskId;
}

/// Arena-resident node of the deadline-ordered ring. Ring links are arena
/// keys, never references; a node outside the ring has both links unset.
pub struct TaskNode {
    pub callback: TaskCallback,
    pub priority: Priority,
    pub expiration: f64,
    pub(crate) next: Option<TaskId>,
    pub(crate) prev: Option<TaskId>,
}

impl TaskNode {
    pub fn new(priority: Priority, expiration: f64, callback: TaskCallback) -> Self {
        Self {
            callback,
            priority,
            expiration,
            next: None,
            prev: None,
        }
    }
}
