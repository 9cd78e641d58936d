//! Timer handles and the channel-facing convenience wrappers.
//!
//! A [`TimerHandle`] is the raw control surface returned by
//! [`Wheel::schedule`]: stop, reset, release. It carries the slab index and
//! the generation observed at registration, so operations on a handle whose
//! entity was recycled fail closed instead of touching the new occupant.
//!
//! [`Timer`] and [`Ticker`] wrap a handle together with a bounded channel
//! the firing is delivered on, for callers that want to `recv` an instant
//! rather than register a callback.

use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use minstant::Instant;

use crate::slab::EntryIndex;
use crate::wheel::{Wheel, WheelShared};

/// Control handle for one registered timer.
///
/// Deliberately not `Clone`: exactly one handle per registration, so
/// release cannot race itself.
pub struct TimerHandle {
    shared: Arc<WheelShared>,
    idx: EntryIndex,
    generation: u32,
}

impl TimerHandle {
    pub(crate) fn new(shared: Arc<WheelShared>, idx: EntryIndex, generation: u32) -> Self {
        Self {
            shared,
            idx,
            generation,
        }
    }

    /// Cancels the timer. Returns `true` if it is now guaranteed not to
    /// fire (including when it was already stopped); `false` once its
    /// firing is committed or the entity was released and recycled.
    pub fn stop(&self) -> bool {
        self.shared.stop_timer(self.idx, self.generation)
    }

    /// Atomically cancels and re-registers with a new delay and period.
    /// Returns `false` without rescheduling when the cancel fails.
    pub fn reset(&self, after: Duration, period: Duration) -> bool {
        self.shared.reset_timer(self.idx, self.generation, after, period)
    }

    /// Returns the entity to its wheel's pool for reuse.
    ///
    /// The timer must not be pending: stop it first (or let a one-shot
    /// fire). Releasing through a stale handle is a silent no-op.
    ///
    /// # Panics
    ///
    /// Panics if the entity is still linked into a bucket or its firing is
    /// in flight; reusing such an entity would corrupt the wheel.
    pub fn release(self) {
        self.shared.release_timer(self.idx, self.generation);
    }

    /// Name of the wheel this timer lives on.
    #[must_use]
    pub fn wheel_name(&self) -> &str {
        self.shared.name()
    }
}

fn send_instant(tx: &SyncSender<Instant>, at: Instant) {
    // Lossy on a full channel, like a receiver that fell behind deserves.
    match tx.try_send(at) {
        Ok(()) | Err(TrySendError::Full(_)) => {}
        Err(TrySendError::Disconnected(_)) => {}
    }
}

/// A one-shot timer that delivers its firing instant on a channel.
pub struct Timer {
    rx: Receiver<Instant>,
    handle: TimerHandle,
}

impl Timer {
    /// The delivery channel; holds at most one undelivered firing.
    #[must_use]
    pub fn channel(&self) -> &Receiver<Instant> {
        &self.rx
    }

    /// Blocks until the timer fires.
    ///
    /// A timer still pending when its wheel shuts down is abandoned, not
    /// cancelled: its callback stays alive and `recv` keeps blocking.
    /// Stop or release the timer to unblock receivers before shutdown.
    ///
    /// # Errors
    ///
    /// Fails once the callback has been dropped with no firing left to
    /// deliver: the timer was released, or it already fired and the
    /// instant was consumed.
    pub fn recv(&self) -> Result<Instant, mpsc::RecvError> {
        self.rx.recv()
    }

    /// See [`TimerHandle::stop`].
    pub fn stop(&self) -> bool {
        self.handle.stop()
    }

    /// Re-arms the timer to fire once after `after`.
    pub fn reset(&self, after: Duration) -> bool {
        self.handle.reset(after, Duration::ZERO)
    }

    /// Stops the timer and returns its entity to the pool.
    pub fn release(self) {
        self.handle.stop();
        self.handle.release();
    }
}

/// A periodic timer that delivers firing instants on a channel.
///
/// The channel holds one undelivered instant; further firings are dropped
/// until the receiver catches up, so a slow receiver observes a reduced
/// rate rather than an unbounded backlog.
pub struct Ticker {
    rx: Receiver<Instant>,
    handle: TimerHandle,
}

impl Ticker {
    /// The delivery channel.
    #[must_use]
    pub fn channel(&self) -> &Receiver<Instant> {
        &self.rx
    }

    /// Blocks until the next firing.
    ///
    /// A ticker still pending at wheel shutdown is abandoned and never
    /// fires again; see [`Timer::recv`] for the teardown contract.
    ///
    /// # Errors
    ///
    /// Fails once the ticker was released and no undelivered firing
    /// remains.
    pub fn recv(&self) -> Result<Instant, mpsc::RecvError> {
        self.rx.recv()
    }

    /// See [`TimerHandle::stop`].
    pub fn stop(&self) -> bool {
        self.handle.stop()
    }

    /// Re-arms with a new period, first firing one period from now.
    pub fn reset(&self, period: Duration) -> bool {
        self.handle.reset(period, period)
    }

    /// Stops the ticker and returns its entity to the pool.
    pub fn release(self) {
        self.handle.stop();
        self.handle.release();
    }
}

impl Wheel {
    /// A one-shot [`Timer`] that fires once after `after`.
    #[must_use]
    pub fn after(&self, after: Duration) -> Timer {
        let (tx, rx) = mpsc::sync_channel(1);
        let handle = self.schedule(after, Duration::ZERO, move |at| send_instant(&tx, at));
        Timer { rx, handle }
    }

    /// A [`Ticker`] firing every `period`, first one period from now.
    #[must_use]
    pub fn ticker(&self, period: Duration) -> Ticker {
        let (tx, rx) = mpsc::sync_channel(1);
        let handle = self.schedule(period, period, move |at| send_instant(&tx, at));
        Ticker { rx, handle }
    }

    /// Blocks the calling thread for `after`, at tick granularity.
    pub fn sleep(&self, after: Duration) {
        let timer = self.after(after);
        let _ = timer.recv();
        timer.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (tx, rx) = mpsc::sync_channel(1);
        send_instant(&tx, Instant::now());
        send_instant(&tx, Instant::now());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn disconnected_channel_is_ignored() {
        let (tx, rx) = mpsc::sync_channel(1);
        drop(rx);
        send_instant(&tx, Instant::now());
    }
}
