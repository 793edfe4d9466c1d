//! Compile-time configuration.
//!
//! These constants control the resource limits and scheduling policy of the
//! kernel. Optional subsystems are selected with cargo features instead.

use crate::types::Priority;

/// Number of priority levels. The ready table holds one slot per level and
/// each task must be created at a distinct priority in
/// `0..CFG_MAX_PRIORITY`.
pub const CFG_MAX_PRIORITY: usize = 8;

/// Priorities below this limit form the cooperative band: they are never
/// scheduled over a running task, only from the main loop. Zero disables the
/// band. Meaningful only with the `preemption` feature.
pub const CFG_PREEMPT_LIMIT: Priority = 0;

/// System tick rate in Hz. Used by the port layer to program the tick timer.
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Sentinel placed at both ends of the kernel state (`state-guards` feature).
pub const CFG_GUARD_WORD: u32 = 0xFA57_C0DE;
