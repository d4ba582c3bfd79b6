//! Three-process overload playground.
//!
//! A finite-capacity origin (bounded worker pool), an admission-controlling
//! proxy in front of it, and a rate-limited load client. The binaries under
//! `src/bin/` wire these modules to HTTP; the library holds the capacity
//! model itself plus the config and telemetry glue they share.

pub mod config;
pub mod pool;
pub mod service_time;
pub mod telemetry;
