//! The wheel core: bucket hierarchy, cascade, tick driver, execution.
//!
//! One wheel owns five bucket levels — a near wheel of 256 slots covering
//! one full rotation at tick granularity, and four overflow levels of 64
//! slots each, together spanning the whole 64-bit deadline space (clamped
//! at `2^32 - 1` ticks ahead). A dedicated driver thread advances the tick
//! counter, cascades overflow buckets down on rollover like a multi-radix
//! counter, and hands each due near-wheel slot to an independent execution
//! thread so a slow callback can never stall tick advancement.
//!
//! All bucket and state mutation happens under a single per-wheel mutex.
//! The tick counter is additionally published through an atomic so
//! observers that only need an approximate value skip the lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant as StdInstant};

use minstant::Instant;

use crate::entry::{BucketId, Callback, TimerState};
use crate::handle::TimerHandle;
use crate::pool::{FreeListPool, TimerPool};
use crate::slab::{BucketList, EntryIndex, TimerSlab};
use crate::tick::{TickInstant, TickSpan};
use crate::trace::{debug, error, info, warn};

const TVR_BITS: u32 = 8;
const TVN_BITS: u32 = 6;
const TVR_SIZE: usize = 1 << TVR_BITS;
const TVN_SIZE: usize = 1 << TVN_BITS;
const TVR_MASK: u64 = TVR_SIZE as u64 - 1;
const TVN_MASK: u64 = TVN_SIZE as u64 - 1;
const OVERFLOW_LEVELS: usize = 4;

/// Furthest schedulable distance; longer delays are clamped to this.
const MAX_TICKS_AHEAD: u64 = u32::MAX as u64;

static NEXT_WHEEL_ID: AtomicU64 = AtomicU64::new(0);

/// Wheel construction error.
#[derive(Debug, thiserror::Error)]
pub enum WheelError {
    /// The tick duration must be non-zero; it defines the lattice.
    #[error("tick duration must be non-zero")]
    ZeroTick,
    /// A shard must contain at least one wheel.
    #[error("shard count must be non-zero")]
    ZeroShards,
}

/// Wheel configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct WheelConfig {
    /// Tick duration: the wheel's time quantum. Immutable per wheel.
    pub tick: Duration,
    /// Diagnostic name; auto-generated (`wheel-N`) when absent.
    pub name: Option<String>,
    /// Advisory threshold on `tick x in-flight batches` before warning
    /// about execution backlog.
    pub backlog_warn: Duration,
    /// Advisory threshold on single-callback runtime before warning.
    pub slow_callback_warn: Duration,
}

impl WheelConfig {
    /// Configuration with the given tick and default thresholds.
    #[must_use]
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    /// Builder-style setter for the diagnostic name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder-style setter for the backlog advisory threshold.
    #[must_use]
    pub const fn with_backlog_warn(mut self, threshold: Duration) -> Self {
        self.backlog_warn = threshold;
        self
    }

    /// Builder-style setter for the slow-callback advisory threshold.
    #[must_use]
    pub const fn with_slow_callback_warn(mut self, threshold: Duration) -> Self {
        self.slow_callback_warn = threshold;
        self
    }
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            name: None,
            backlog_warn: Duration::from_millis(50),
            slow_callback_warn: Duration::from_millis(10),
        }
    }
}

/// Everything guarded by the wheel's mutex.
struct WheelState {
    slab: TimerSlab,
    pool: Box<dyn TimerPool>,
    tv1: [BucketList; TVR_SIZE],
    tvn: [[BucketList; TVN_SIZE]; OVERFLOW_LEVELS],
    resident: usize,
}

/// Shared wheel internals; handles and the driver thread keep an `Arc`.
pub(crate) struct WheelShared {
    name: String,
    tick: Duration,
    backlog_warn: Duration,
    slow_callback_warn: Duration,
    /// Monotonic tick counter. Written only under the lock, readable
    /// without it for approximate observations.
    jiffies: AtomicU64,
    /// Execution batches currently running or queued to run.
    in_flight: AtomicUsize,
    state: Mutex<WheelState>,
}

/// A due timer detached from its bucket, en route to execution.
struct Fired {
    idx: EntryIndex,
    generation: u32,
    period: TickSpan,
    callback: Callback,
}

/// Picks the (level, slot) for a deadline seen from the current tick, and
/// returns the possibly clamped deadline.
///
/// Level 0 is the near wheel. A deadline already behind the tick (driver
/// fell behind, or a sub-tick delay) is forced into the near-wheel slot
/// that drains on the next tick.
fn select_bucket(deadline: u64, jiffies: u64) -> (usize, usize, u64) {
    let distance = deadline.wrapping_sub(jiffies);
    if distance < TVR_SIZE as u64 {
        (0, (deadline & TVR_MASK) as usize, deadline)
    } else if distance < 1 << (TVR_BITS + TVN_BITS) {
        (1, ((deadline >> TVR_BITS) & TVN_MASK) as usize, deadline)
    } else if distance < 1 << (TVR_BITS + 2 * TVN_BITS) {
        (
            2,
            ((deadline >> (TVR_BITS + TVN_BITS)) & TVN_MASK) as usize,
            deadline,
        )
    } else if distance < 1 << (TVR_BITS + 3 * TVN_BITS) {
        (
            3,
            ((deadline >> (TVR_BITS + 2 * TVN_BITS)) & TVN_MASK) as usize,
            deadline,
        )
    } else if (distance as i64) < 0 {
        (0, (jiffies & TVR_MASK) as usize, deadline)
    } else {
        let deadline = if distance > MAX_TICKS_AHEAD {
            jiffies.wrapping_add(MAX_TICKS_AHEAD)
        } else {
            deadline
        };
        (
            4,
            ((deadline >> (TVR_BITS + 3 * TVN_BITS)) & TVN_MASK) as usize,
            deadline,
        )
    }
}

impl WheelState {
    fn bucket(&mut self, id: BucketId) -> (&mut BucketList, &mut TimerSlab) {
        let WheelState { slab, tv1, tvn, .. } = self;
        let list = match id.level {
            0 => &mut tv1[id.slot as usize],
            l => &mut tvn[l as usize - 1][id.slot as usize],
        };
        (list, slab)
    }

    /// Links an entity into the bucket its deadline maps to. The entity
    /// must be detached; marks it `Pending`.
    fn add_internal(&mut self, idx: EntryIndex, jiffies: u64) {
        let deadline = self
            .slab
            .get(idx)
            .expect("entity missing from slab")
            .deadline;
        let (level, slot, deadline) = select_bucket(deadline.get(), jiffies);
        let id = BucketId {
            level: level as u8,
            slot: slot as u16,
        };
        let (list, slab) = self.bucket(id);
        list.push_back(slab, idx);
        let e = self.slab.get_mut(idx).expect("entity missing from slab");
        e.deadline = TickInstant::new(deadline);
        e.bucket = Some(id);
        e.state = TimerState::Pending;
    }

    /// Registers a resident entity; double-add is an invariant breach.
    fn add_timer(&mut self, shared: &WheelShared, idx: EntryIndex) {
        if self
            .slab
            .get(idx)
            .expect("entity missing from slab")
            .bucket
            .is_some()
        {
            shared.fatal("timer added while already resident in a bucket");
        }
        self.add_internal(idx, shared.jiffies.load(Ordering::Relaxed));
        self.resident += 1;
    }

    /// Cancels a resident entity. True on `Stopped` (idempotent) and on a
    /// successful unlink; false once firing is committed or in flight.
    fn del_timer(&mut self, idx: EntryIndex) -> bool {
        let Some(e) = self.slab.get(idx) else {
            return false;
        };
        if e.state == TimerState::Stopped {
            return true;
        }
        let Some(id) = e.bucket else {
            return false;
        };
        let (list, slab) = self.bucket(id);
        list.remove(slab, idx);
        let e = self.slab.get_mut(idx).expect("entity missing from slab");
        e.bucket = None;
        e.state = TimerState::Stopped;
        self.resident -= 1;
        true
    }

    /// Drains one overflow bucket, redistributing every entity by its now
    /// smaller remaining distance.
    fn cascade(&mut self, level: usize, slot: usize, jiffies: u64) {
        while let Some(idx) = self.tvn[level][slot].front() {
            {
                let WheelState { slab, tvn, .. } = self;
                tvn[level][slot].remove(slab, idx);
            }
            if let Some(e) = self.slab.get_mut(idx) {
                e.bucket = None;
            }
            self.add_internal(idx, jiffies);
        }
    }

    /// Exhaustive scan of every bucket level; the slow ground truth the
    /// resident counter must agree with.
    fn census(&self) -> usize {
        fn list_len(list: &BucketList, slab: &TimerSlab) -> usize {
            let mut n = 0;
            let mut cur = list.front();
            while let Some(idx) = cur {
                n += 1;
                cur = slab.get(idx).and_then(|e| e.next);
            }
            n
        }
        let mut n = 0;
        for list in &self.tv1 {
            n += list_len(list, &self.slab);
        }
        for level in &self.tvn {
            for list in level {
                n += list_len(list, &self.slab);
            }
        }
        n
    }
}

impl WheelShared {
    fn new(name: String, config: &WheelConfig, pool: Box<dyn TimerPool>) -> Self {
        Self {
            name,
            tick: config.tick,
            backlog_warn: config.backlog_warn,
            slow_callback_warn: config.slow_callback_warn,
            jiffies: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            state: Mutex::new(WheelState {
                slab: TimerSlab::new(),
                pool,
                tv1: [BucketList::EMPTY; TVR_SIZE],
                tvn: [[BucketList::EMPTY; TVN_SIZE]; OVERFLOW_LEVELS],
                resident: 0,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, WheelState> {
        self.state.lock().expect("wheel mutex poisoned")
    }

    #[cold]
    fn fatal(&self, msg: &str) -> ! {
        error!(wheel = %self.name, "{}", msg);
        panic!("invariant violation: {msg} (wheel {})", self.name);
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn tick_duration(&self) -> Duration {
        self.tick
    }

    pub(crate) fn current_tick(&self) -> u64 {
        self.jiffies.load(Ordering::Acquire)
    }

    pub(crate) fn timers(&self) -> usize {
        self.lock_state().resident
    }

    pub(crate) fn pool_fresh_count(&self) -> u64 {
        self.lock_state().pool.fresh_count()
    }

    pub(crate) fn timers_in_buckets(&self) -> usize {
        self.lock_state().census()
    }

    /// Creates and registers an entity; the returned handle routes all
    /// later operations back to this wheel.
    pub(crate) fn schedule(
        self: Arc<Self>,
        after: Duration,
        period: Duration,
        callback: Callback,
    ) -> TimerHandle {
        let after = TickSpan::quantize(after, self.tick);
        let period = TickSpan::quantize(period, self.tick);

        let mut st = self.lock_state();
        let idx = {
            let WheelState { slab, pool, .. } = &mut *st;
            pool.get(slab)
        };
        match st.slab.get(idx) {
            Some(e) if e.is_pristine() => {}
            _ => {
                drop(st);
                self.fatal("pool handed out a non-pristine timer entity");
            }
        }
        let generation = st.slab.generation(idx).expect("slot just occupied");
        let jiffies = self.jiffies.load(Ordering::Relaxed);
        let e = st.slab.get_mut(idx).expect("slot just occupied");
        e.deadline = TickInstant::new(jiffies) + after;
        e.period = period;
        e.callback = Some(callback);
        st.add_timer(&self, idx);
        drop(st);

        TimerHandle::new(self, idx, generation)
    }

    pub(crate) fn stop_timer(&self, idx: EntryIndex, generation: u32) -> bool {
        let mut st = self.lock_state();
        if st.slab.generation(idx) != Some(generation) {
            return false;
        }
        st.del_timer(idx)
    }

    pub(crate) fn reset_timer(
        &self,
        idx: EntryIndex,
        generation: u32,
        after: Duration,
        period: Duration,
    ) -> bool {
        let mut st = self.lock_state();
        if st.slab.generation(idx) != Some(generation) {
            return false;
        }
        if !st.del_timer(idx) {
            return false;
        }
        let jiffies = self.jiffies.load(Ordering::Relaxed);
        let e = st.slab.get_mut(idx).expect("generation checked");
        e.deadline = TickInstant::new(jiffies) + TickSpan::quantize(after, self.tick);
        e.period = TickSpan::quantize(period, self.tick);
        st.add_timer(self, idx);
        true
    }

    /// Returns the entity to the pool. Releasing a resident entity or one
    /// whose firing is still in flight is fatal: a recycled entity still
    /// linked into a live bucket would corrupt that bucket on reuse.
    pub(crate) fn release_timer(&self, idx: EntryIndex, generation: u32) {
        let violation;
        {
            let mut st = self.lock_state();
            if st.slab.generation(idx) != Some(generation) {
                debug!(wheel = %self.name, "release on a stale handle ignored");
                return;
            }
            let e = st.slab.get(idx).expect("generation checked");
            if e.bucket.is_some() {
                violation = "timer released while still resident in a bucket";
            } else if e.state == TimerState::Ready {
                violation = "timer released while its firing is in flight";
            } else {
                let e = st.slab.get_mut(idx).expect("generation checked");
                e.state = TimerState::Pooled;
                e.callback = None;
                let WheelState { slab, pool, .. } = &mut *st;
                pool.put(slab, idx);
                return;
            }
        }
        self.fatal(violation);
    }
}

/// Decrements the in-flight batch counter even if a callback panics.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One tick: cascade if the near wheel wrapped, advance, drain the due
/// near-wheel slot, dispatch the batch.
fn on_tick(shared: &Arc<WheelShared>) {
    let batch = {
        let mut st = shared.lock_state();
        let jiffies = shared.jiffies.load(Ordering::Relaxed);
        let index = (jiffies & TVR_MASK) as usize;

        if index == 0 {
            // Multi-radix carry: each level cascades only when the one
            // below drained its slot 0.
            for level in 0..OVERFLOW_LEVELS {
                let slot =
                    ((jiffies >> (TVR_BITS + level as u32 * TVN_BITS)) & TVN_MASK) as usize;
                st.cascade(level, slot, jiffies);
                if slot != 0 {
                    break;
                }
            }
        }

        shared.jiffies.store(jiffies + 1, Ordering::Release);

        let mut batch = Vec::new();
        while let Some(idx) = st.tv1[index].front() {
            {
                let WheelState { slab, tv1, .. } = &mut *st;
                tv1[index].remove(slab, idx);
            }
            let generation = st.slab.generation(idx).expect("resident entity");
            let e = st.slab.get_mut(idx).expect("resident entity");
            e.state = TimerState::Ready;
            e.bucket = None;
            let period = e.period;
            let callback = e.callback.take();
            st.resident -= 1;
            if let Some(callback) = callback {
                batch.push(Fired {
                    idx,
                    generation,
                    period,
                    callback,
                });
            }
        }
        batch
    };

    let in_flight = shared.in_flight.load(Ordering::Relaxed);
    let backlog = shared
        .tick
        .saturating_mul(u32::try_from(in_flight).unwrap_or(u32::MAX));
    if backlog > shared.backlog_warn {
        warn!(wheel = %shared.name, in_flight, "execution backlog over advisory threshold");
    }

    if batch.is_empty() {
        return;
    }

    shared.in_flight.fetch_add(1, Ordering::AcqRel);
    let exec = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("{}-fire", shared.name))
        .spawn(move || run_batch(&exec, batch))
        .expect("failed to spawn timer execution thread");
}

/// Runs one detached batch. The lock is held only around state
/// transitions, never across a callback.
fn run_batch(shared: &WheelShared, batch: Vec<Fired>) {
    let _guard = InFlightGuard(&shared.in_flight);
    for fired in batch {
        let Fired {
            idx,
            generation,
            period,
            mut callback,
        } = fired;

        {
            let mut st = shared.lock_state();
            // Released out from under us between drain and execution.
            if st.slab.generation(idx) != Some(generation) {
                continue;
            }
            st.slab.get_mut(idx).expect("generation checked").state = TimerState::Running;
        }

        let start = Instant::now();
        callback(start);
        let took = start.elapsed();
        if took > shared.slow_callback_warn {
            warn!(
                wheel = %shared.name,
                took_us = took.as_micros() as u64,
                "slow timer callback"
            );
        }

        if !period.is_zero() {
            let mut st = shared.lock_state();
            if st.slab.generation(idx) == Some(generation) {
                let e = st.slab.get_mut(idx).expect("generation checked");
                // Anchor on the previous deadline, not the tick counter:
                // execution latency must not accumulate into the period.
                // A re-add already behind schedule fires next tick and
                // catches up.
                e.deadline = e.deadline + period;
                e.callback = Some(callback);
                st.add_timer(shared, idx);
            }
        }
        // One-shot: stays Running; the callback and its captures drop here.
    }
}

/// Driver loop: wait out each tick boundary or a shutdown signal.
///
/// Waits target absolute boundaries, so a slow tick is followed by
/// back-to-back catch-up ticks instead of accumulating drift.
fn run_driver(shared: &Arc<WheelShared>, shutdown: &Receiver<()>) {
    let tick = shared.tick;
    let mut next = StdInstant::now() + tick;
    loop {
        let wait = next.saturating_duration_since(StdInstant::now());
        match shutdown.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        on_tick(shared);
        next += tick;
    }
    info!(wheel = %shared.name, tick = shared.current_tick(), "wheel driver stopped");
}

/// A hierarchical timing wheel with its own driver thread.
///
/// Dropping the wheel signals the driver to stop without waiting for it;
/// use [`Wheel::shutdown`] to join. Entities still pending at shutdown are
/// abandoned, never fired.
pub struct Wheel {
    shared: Arc<WheelShared>,
    shutdown_tx: Sender<()>,
    driver: Option<JoinHandle<()>>,
}

impl fmt::Debug for Wheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wheel").finish_non_exhaustive()
    }
}

impl Wheel {
    /// Spawns a wheel with the default free-list pool.
    ///
    /// # Errors
    ///
    /// Fails if the configured tick duration is zero.
    pub fn spawn(config: WheelConfig) -> Result<Self, WheelError> {
        Self::spawn_with_pool(config, Box::new(FreeListPool::new()))
    }

    /// Spawns a wheel with a caller-supplied entity pool.
    ///
    /// # Errors
    ///
    /// Fails if the configured tick duration is zero.
    ///
    /// # Panics
    ///
    /// Panics if the driver thread cannot be spawned.
    pub fn spawn_with_pool(
        config: WheelConfig,
        pool: Box<dyn TimerPool>,
    ) -> Result<Self, WheelError> {
        if config.tick.is_zero() {
            return Err(WheelError::ZeroTick);
        }
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("wheel-{}", NEXT_WHEEL_ID.fetch_add(1, Ordering::Relaxed)));
        let shared = Arc::new(WheelShared::new(name, &config, pool));

        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let driver_shared = Arc::clone(&shared);
        let driver = thread::Builder::new()
            .name(format!("{}-driver", shared.name))
            .spawn(move || run_driver(&driver_shared, &shutdown_rx))
            .expect("failed to spawn wheel driver thread");

        info!(
            wheel = %shared.name,
            tick_us = config.tick.as_micros() as u64,
            "wheel started"
        );

        Ok(Self {
            shared,
            shutdown_tx,
            driver: Some(driver),
        })
    }

    /// Registers a callback to fire once after `after`, then every
    /// `period` if `period` is non-zero. Delays are quantized to the tick.
    pub fn schedule<F>(&self, after: Duration, period: Duration, f: F) -> TimerHandle
    where
        F: FnMut(Instant) + Send + 'static,
    {
        Arc::clone(&self.shared).schedule(after, period, Box::new(f))
    }

    /// One-shot convenience: fire `f` once after `after`.
    pub fn after_fn<F>(&self, after: Duration, f: F) -> TimerHandle
    where
        F: FnMut(Instant) + Send + 'static,
    {
        self.schedule(after, Duration::ZERO, f)
    }

    /// Periodic convenience: fire `f` every `period`, first after `period`.
    pub fn tick_fn<F>(&self, period: Duration, f: F) -> TimerHandle
    where
        F: FnMut(Instant) + Send + 'static,
    {
        self.schedule(period, period, f)
    }

    /// Resident timer count (entities currently linked into buckets).
    #[must_use]
    pub fn timers(&self) -> usize {
        self.shared.timers()
    }

    /// Exhaustive bucket scan; diagnostic, O(resident).
    #[must_use]
    pub fn timers_in_buckets(&self) -> usize {
        self.shared.timers_in_buckets()
    }

    /// Approximate current tick, readable without the wheel lock.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.shared.current_tick()
    }

    /// Entities the pool had to create fresh rather than recycle.
    #[must_use]
    pub fn pool_fresh_count(&self) -> u64 {
        self.shared.pool_fresh_count()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        self.shared.tick_duration()
    }

    /// Stops the driver after the current tick and waits for it. Already
    /// dispatched execution batches run to completion on their own
    /// threads; pending entities are abandoned.
    pub fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
    }
}

impl Drop for Wheel {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl fmt::Display for Wheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wheel {} tick {:?} timers {} tick-count {}",
            self.shared.name,
            self.shared.tick,
            self.timers(),
            self.current_tick()
        )
    }
}
