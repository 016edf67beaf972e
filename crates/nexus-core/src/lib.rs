//! Foundational low-level utilities shared across Nexus crates.
//!
//! Provides the atomic file-write helper used by the local policy store and
//! the wall-clock helpers used when stamping persisted records.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{read_text_if_exists, write_text_atomic};
pub use time_utils::{current_unix_timestamp, current_unix_timestamp_ms};
