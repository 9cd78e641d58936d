//! Sharding across independent wheels to spread lock contention.
//!
//! Each wheel in a shard has its own driver thread, lock, slab, and pool;
//! nothing is shared between them. Registrations are spread round-robin,
//! or pinned by an explicit affinity key when callers want related timers
//! on the same wheel. Operations on a handle always route back to the
//! wheel that issued it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use minstant::Instant;

use crate::handle::{Ticker, Timer, TimerHandle};
use crate::trace::info;
use crate::wheel::{Wheel, WheelConfig, WheelError};

/// A fixed set of independent wheels with shared-nothing state.
pub struct WheelShard {
    wheels: Vec<Wheel>,
    next: AtomicUsize,
}

impl std::fmt::Debug for WheelShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WheelShard").finish_non_exhaustive()
    }
}

impl WheelShard {
    /// Spawns `shards` wheels from one configuration. Each wheel gets the
    /// configured name with a `-N` suffix.
    ///
    /// # Errors
    ///
    /// Fails if `shards` is zero or the tick duration is zero.
    pub fn spawn(config: WheelConfig, shards: usize) -> Result<Self, WheelError> {
        if shards == 0 {
            return Err(WheelError::ZeroShards);
        }
        let base = config.name.clone().unwrap_or_else(|| "shard".to_owned());
        let wheels = (0..shards)
            .map(|i| Wheel::spawn(config.clone().with_name(format!("{base}-{i}"))))
            .collect::<Result<Vec<_>, _>>()?;
        info!(shard = %base, wheels = shards, "wheel shard started");
        Ok(Self {
            wheels,
            next: AtomicUsize::new(0),
        })
    }

    /// Spawns one wheel per available CPU.
    ///
    /// # Errors
    ///
    /// Fails if the tick duration is zero.
    pub fn spawn_per_cpu(config: WheelConfig) -> Result<Self, WheelError> {
        let shards = thread::available_parallelism().map_or(1, |n| n.get());
        Self::spawn(config, shards)
    }

    #[must_use]
    pub fn shards(&self) -> usize {
        self.wheels.len()
    }

    /// The wheel an affinity key pins to. Equal keys always land on the
    /// same wheel.
    #[must_use]
    pub fn wheel_for_key(&self, key: u64) -> &Wheel {
        &self.wheels[(key % self.wheels.len() as u64) as usize]
    }

    /// Next wheel in round-robin order.
    fn next_wheel(&self) -> &Wheel {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        &self.wheels[n % self.wheels.len()]
    }

    /// Registers a callback on the next wheel in round-robin order.
    pub fn schedule<F>(&self, after: Duration, period: Duration, f: F) -> TimerHandle
    where
        F: FnMut(Instant) + Send + 'static,
    {
        self.next_wheel().schedule(after, period, f)
    }

    /// Registers a callback on the wheel `key` pins to.
    pub fn schedule_with_key<F>(
        &self,
        key: u64,
        after: Duration,
        period: Duration,
        f: F,
    ) -> TimerHandle
    where
        F: FnMut(Instant) + Send + 'static,
    {
        self.wheel_for_key(key).schedule(after, period, f)
    }

    /// One-shot convenience on the next wheel in round-robin order.
    pub fn after_fn<F>(&self, after: Duration, f: F) -> TimerHandle
    where
        F: FnMut(Instant) + Send + 'static,
    {
        self.next_wheel().after_fn(after, f)
    }

    /// Periodic convenience on the next wheel in round-robin order.
    pub fn tick_fn<F>(&self, period: Duration, f: F) -> TimerHandle
    where
        F: FnMut(Instant) + Send + 'static,
    {
        self.next_wheel().tick_fn(period, f)
    }

    /// A channel-delivering one-shot [`Timer`] on the next wheel.
    #[must_use]
    pub fn after(&self, after: Duration) -> Timer {
        self.next_wheel().after(after)
    }

    /// A channel-delivering [`Ticker`] on the next wheel.
    #[must_use]
    pub fn ticker(&self, period: Duration) -> Ticker {
        self.next_wheel().ticker(period)
    }

    /// Total resident timers across all wheels. Each wheel is counted
    /// under its own lock; the sum is a snapshot, not an atomic census.
    #[must_use]
    pub fn timers(&self) -> usize {
        self.wheels.iter().map(Wheel::timers).sum()
    }

    /// Entities created fresh rather than recycled, summed over all pools.
    #[must_use]
    pub fn pool_fresh_count(&self) -> u64 {
        self.wheels.iter().map(Wheel::pool_fresh_count).sum()
    }

    /// Stops every driver and waits for all of them.
    pub fn shutdown(self) {
        for wheel in self.wheels {
            wheel.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_shards_is_rejected() {
        let err = WheelShard::spawn(WheelConfig::default(), 0).unwrap_err();
        assert!(matches!(err, WheelError::ZeroShards));
    }

    #[test]
    fn affinity_key_is_stable() {
        let shard =
            WheelShard::spawn(WheelConfig::new(Duration::from_millis(10)), 4).unwrap();
        let a = shard.wheel_for_key(7).name().to_owned();
        let b = shard.wheel_for_key(7).name().to_owned();
        assert_eq!(a, b);
        shard.shutdown();
    }

    #[test]
    fn round_robin_spreads_registrations() {
        let shard =
            WheelShard::spawn(WheelConfig::new(Duration::from_millis(10)), 3).unwrap();
        let handles: Vec<_> = (0..3)
            .map(|_| shard.after_fn(Duration::from_secs(60), |_| {}))
            .collect();
        for wheel in &shard.wheels {
            assert_eq!(wheel.timers(), 1);
        }
        assert_eq!(shard.timers(), 3);
        for h in handles {
            assert!(h.stop());
            h.release();
        }
        shard.shutdown();
    }
}
