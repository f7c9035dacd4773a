//! Low-level building blocks of the storage engine.

/// Two-slot buffering with a background flusher.
pub mod buffer;

/// Seqlock and completion latch.
pub mod concurrency;

/// Checksummed line logs.
pub mod log;
