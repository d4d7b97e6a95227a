#![deny(missing_docs)]
//! Native std-thread port of the link layer's platform interfaces.
//!
//! * [`NativeTimers`] – one sleeping thread per armed timer.
//! * [`NativePlatform`] – virtual reset line with boot and restart hooks.
//! * [`CaptureBus`] – in-memory bus recording outbound frames; plays the
//!   peer's side through [`CaptureBus::announce`] and [`CaptureBus::inject`].

mod bus;
mod platform;
mod timers;

pub use bus::{CaptureBus, PeerProfile, Submission};
pub use platform::NativePlatform;
pub use timers::{NativeTimer, NativeTimers};
