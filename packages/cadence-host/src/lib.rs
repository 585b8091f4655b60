//! Concrete host timing drivers for the cadence scheduler.
//!
//! The portable core only speaks the `HostDriver` contract; this package
//! supplies the two implementations that cover real embeddings. `FrameHost`
//! is for hosts with a render loop: it budgets scheduler work against an
//! adaptive per-frame deadline. `TimerHost` is the headless fallback: a
//! plain background timer with no budget at all.

pub mod frame;
pub mod timer;

pub use frame::FrameHost;
pub use timer::{HostError, TimerHost};
