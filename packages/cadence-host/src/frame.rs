use cadence_scheduler::{HostCallback, HostDriver};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

const DEFAULT_FRAME_TIME: f64 = 33.0;
const MIN_FRAME_TIME: f64 = 8.0;
const MAX_FORCED_FPS: u32 = 125;

/// Frame-budget host driver. The embedder owns the frame pulse and the
/// post-paint dispatch slot and pulses this driver explicitly:
/// [`FrameHost::on_frame`] at every vsync-aligned tick, and
/// [`FrameHost::pump`] in the slot that runs after painting. In between,
/// [`FrameHost::needs_frame`] and [`FrameHost::needs_pump`] report whether
/// another pulse is wanted.
///
/// The frame duration starts at a conservative 33ms and adapts downward
/// when two consecutive frames arrive faster, so a 120Hz display gets a
/// 120Hz budget without configuration. `force_frame_rate` pins it.
#[derive(Clone)]
pub struct FrameHost {
    state: Rc<FrameState>,
}

struct FrameState {
    clock: Box<dyn Fn() -> f64>,
    armed: RefCell<Option<HostCallback>>,
    timeout_deadline: Cell<Option<f64>>,
    pump_scheduled: Cell<bool>,
    wants_frame: Cell<bool>,
    is_flushing: Cell<bool>,
    frame_deadline: Cell<f64>,
    previous_frame_time: Cell<f64>,
    active_frame_time: Cell<f64>,
    fps_locked: Cell<bool>,
}

impl FrameHost {
    pub fn new() -> Self {
        let start = Instant::now();
        Self::with_clock(move || start.elapsed().as_secs_f64() * 1000.0)
    }

    /// Builds a driver on an injected clock. Tests use this for a manually
    /// advanced virtual clock.
    pub fn with_clock(clock: impl Fn() -> f64 + 'static) -> Self {
        Self {
            state: Rc::new(FrameState {
                clock: Box::new(clock),
                armed: RefCell::new(None),
                timeout_deadline: Cell::new(None),
                pump_scheduled: Cell::new(false),
                wants_frame: Cell::new(false),
                is_flushing: Cell::new(false),
                frame_deadline: Cell::new(0.0),
                previous_frame_time: Cell::new(DEFAULT_FRAME_TIME),
                active_frame_time: Cell::new(DEFAULT_FRAME_TIME),
                fps_locked: Cell::new(false),
            }),
        }
    }

    /// Frame tick. Re-estimates the frame duration, extends the frame
    /// deadline, and schedules a pump for after the embedder has painted.
    pub fn on_frame(&self) {
        let s = &self.state;
        if s.armed.borrow().is_none() {
            s.wants_frame.set(false);
            return;
        }
        let frame_time = (s.clock)();

        // Two consecutive frames shorter than the current estimate mean the
        // display runs faster than we assume; adopt the longer of the two,
        // clamped so a timer glitch cannot produce an absurd budget.
        let active = s.active_frame_time.get();
        let next_frame_time = frame_time - s.frame_deadline.get() + active;
        if next_frame_time < active && s.previous_frame_time.get() < active && !s.fps_locked.get()
        {
            let next = next_frame_time.max(MIN_FRAME_TIME);
            s.active_frame_time.set(next.max(s.previous_frame_time.get()));
        } else {
            s.previous_frame_time.set(next_frame_time);
        }

        s.frame_deadline.set(frame_time + s.active_frame_time.get());
        s.pump_scheduled.set(true);
    }

    /// Post-paint dispatch. Delivers the armed flush with whatever budget
    /// remains in the current frame. When the budget is already gone but
    /// the request's own deadline has not passed, the request is held for
    /// the next frame instead; once the deadline has passed it is
    /// delivered regardless, flagged as timed out.
    ///
    /// Returns whether a flush was delivered.
    pub fn pump(&self) -> bool {
        let s = &self.state;
        if !s.pump_scheduled.replace(false) {
            return false;
        }
        let Some(flush) = s.armed.borrow_mut().take() else {
            return false;
        };
        let deadline = s.timeout_deadline.take();

        let now = (s.clock)();
        let mut did_timeout = false;
        if s.frame_deadline.get() <= now {
            match deadline {
                Some(d) if d <= now => did_timeout = true,
                _ => {
                    *s.armed.borrow_mut() = Some(flush);
                    s.timeout_deadline.set(deadline);
                    s.wants_frame.set(true);
                    return false;
                }
            }
        }

        s.is_flushing.set(true);
        let _guard = FlushingFlag(&s.is_flushing);
        flush.invoke(did_timeout);
        true
    }

    /// Whether the embedder should keep the frame pulse running.
    pub fn needs_frame(&self) -> bool {
        self.state.wants_frame.get()
    }

    /// Whether a pump is scheduled for the post-paint slot.
    pub fn needs_pump(&self) -> bool {
        self.state.pump_scheduled.get()
    }

    /// Current frame-duration estimate in milliseconds.
    pub fn active_frame_time(&self) -> f64 {
        self.state.active_frame_time.get()
    }
}

impl Default for FrameHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDriver for FrameHost {
    fn now(&self) -> f64 {
        (self.state.clock)()
    }

    fn request_callback(&self, flush: HostCallback, deadline: f64) {
        let s = &self.state;
        *s.armed.borrow_mut() = Some(flush);
        s.timeout_deadline.set(Some(deadline));
        if s.is_flushing.get() || deadline < 0.0 {
            // Mid-flush re-arms and already-expired deadlines skip the
            // frame alignment and go straight to the next pump.
            s.pump_scheduled.set(true);
        } else {
            s.wants_frame.set(true);
        }
    }

    fn cancel_callback(&self) {
        let s = &self.state;
        *s.armed.borrow_mut() = None;
        s.timeout_deadline.set(None);
        s.pump_scheduled.set(false);
    }

    fn should_yield(&self) -> bool {
        self.state.frame_deadline.get() <= (self.state.clock)()
    }

    fn force_frame_rate(&self, fps: u32) {
        let s = &self.state;
        if fps > MAX_FORCED_FPS {
            tracing::error!(
                fps,
                "forced frame rate out of range, expected a value between 0 and 125"
            );
            return;
        }
        if fps == 0 {
            s.active_frame_time.set(DEFAULT_FRAME_TIME);
            s.previous_frame_time.set(DEFAULT_FRAME_TIME);
            s.fps_locked.set(false);
        } else {
            s.active_frame_time.set((1000.0 / f64::from(fps)).floor());
            s.fps_locked.set(true);
        }
    }
}

struct FlushingFlag<'a>(&'a Cell<bool>);

impl Drop for FlushingFlag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
