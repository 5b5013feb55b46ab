//! Stale-record classification.

pub mod detector;

pub use detector::{Action, Detection, detect_stale};
