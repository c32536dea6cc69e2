//! Shared `tracing` setup for the upcheck binaries.

mod subscriber;

pub use subscriber::{LogFormat, init, init_with_level};
