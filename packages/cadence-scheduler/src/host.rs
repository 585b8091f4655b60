use std::rc::Rc;

/// The flush entry point a driver arms and later invokes. Cloneable so a
/// driver can stash it; the `bool` argument reports whether the requested
/// deadline had already passed when the driver finally delivered.
#[derive(Clone)]
pub struct HostCallback {
    inner: Rc<dyn Fn(bool)>,
}

impl HostCallback {
    pub fn new(f: impl Fn(bool) + 'static) -> Self {
        Self { inner: Rc::new(f) }
    }

    pub fn invoke(&self, did_timeout: bool) {
        (self.inner)(did_timeout)
    }
}

/// Contract between the scheduler and its host environment: a monotonic
/// clock, a single deferred-invocation slot, and a frame-budget signal.
///
/// At most one request is outstanding at a time; `request_callback` always
/// supersedes any prior request. Drivers must not invoke `flush`
/// synchronously from inside `request_callback`; if `deadline` is already
/// in the past they should deliver on their next wake without waiting for
/// any frame-aligned signal, and they report a missed deadline through the
/// callback's `did_timeout` argument.
pub trait HostDriver {
    /// Current time in milliseconds on the driver's monotonic clock.
    fn now(&self) -> f64;

    /// Arm exactly one pending invocation of `flush`, targeting `deadline`.
    fn request_callback(&self, flush: HostCallback, deadline: f64);

    /// Disarm the pending invocation, if any.
    fn cancel_callback(&self);

    /// True when the driver's own time budget for the current slice is
    /// exhausted.
    fn should_yield(&self) -> bool;

    /// Tune the driver's frame-duration heuristic, for drivers that have
    /// one. Out-of-range input is reported and ignored, never fatal.
    fn force_frame_rate(&self, fps: u32) {
        tracing::debug!(fps, "this host driver has no frame rate to force");
    }
}
