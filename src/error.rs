//! Error types.
//!
//! Recoverable failures use Rust's `Result` pattern; programming errors
//! (invalid priority, double unlock, pending from no-task context) are fatal
//! assertions that halt through the platform panic handler.

/// Kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Nothing to take, lock contended, or no data/space available
    NotAvailable,
    /// Semaphore already at its maximum count
    Overflow,
    /// Queue has no item to read
    QueueEmpty,
    /// Queue has no free slot to write
    QueueFull,
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;
