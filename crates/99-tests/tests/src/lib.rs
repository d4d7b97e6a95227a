//! Cross-crate scenarios for the host link: the driver, the std runtime and
//! a simulated peer running on their own threads.

#[cfg(all(test, not(target_arch = "wasm32")))]
mod native_e2e;

#[cfg(all(test, not(target_arch = "wasm32")))]
mod serial_e2e;
