//! Hierarchical timing wheels for large timer populations.
//!
//! A [`Wheel`] quantizes time into fixed ticks and keeps pending timers in
//! a five-level bucket hierarchy: a 256-slot near wheel at tick
//! granularity plus four 64-slot overflow levels, together covering
//! deadlines up to `2^32 - 1` ticks ahead. Scheduling, cancelling, and
//! expiring a tick's worth of timers are all O(1) in the number of pending
//! timers; the cost of far-future timers is paid gradually, as cascades on
//! near-wheel rollover.
//!
//! Timers fire at most one tick late relative to the lattice — the wheel
//! trades per-timer precision for throughput. Pick the tick accordingly.
//!
//! Each wheel runs a driver thread that advances ticks and hands expired
//! batches to detached execution threads, so one slow callback cannot
//! stall the clock. Timer entities are pooled and recycled through a
//! generational slab, which keeps churn-heavy workloads (the
//! schedule-then-cancel pattern of I/O timeouts) allocation-free in steady
//! state and makes stale handles fail closed instead of corrupting state.
//! [`WheelShard`] spreads registrations over several independent wheels
//! when one lock becomes the bottleneck.
//!
//! ```no_run
//! use std::time::Duration;
//! use kronos::{Wheel, WheelConfig};
//!
//! let wheel = Wheel::spawn(WheelConfig::new(Duration::from_millis(10)))?;
//!
//! // Callback style: fires on an execution thread.
//! let handle = wheel.after_fn(Duration::from_millis(50), |at| {
//!     println!("fired at {at:?}");
//! });
//!
//! // Channel style: receive the firing instant.
//! let timer = wheel.after(Duration::from_millis(50));
//! let _fired_at = timer.recv()?;
//!
//! handle.stop();
//! wheel.shutdown();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod entry;
mod handle;
mod pool;
mod shard;
mod slab;
mod tick;
mod trace;
mod wheel;

pub use entry::TimerEntry;
pub use handle::{Ticker, Timer, TimerHandle};
pub use pool::{FreeListPool, TimerPool};
pub use shard::WheelShard;
pub use slab::{EntryIndex, TimerSlab};
pub use tick::{TickInstant, TickSpan};
pub use trace::init_tracing;
pub use wheel::{Wheel, WheelConfig, WheelError};
