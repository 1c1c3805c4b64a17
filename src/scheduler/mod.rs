//! Scheduler module
//!
//! Periodic background tasks. Currently only the job expiry sweep.

mod expiry;

pub use expiry::ExpirySweeper;
