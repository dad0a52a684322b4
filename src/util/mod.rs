//! Utility modules: retry, atomic file writes.

pub mod fs;
pub mod retry;
