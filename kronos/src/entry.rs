//! The schedulable timer entity and its lifecycle states.

use core::fmt;

use minstant::Instant;

use crate::slab::EntryIndex;
use crate::tick::{TickInstant, TickSpan};

/// Boxed timer callback; arguments are whatever the closure captured at
/// registration time. Receives the firing instant.
pub(crate) type Callback = Box<dyn FnMut(Instant) + Send>;

/// Lifecycle state of a timer entity.
///
/// ```text
///            add                 drain              exec
///  Stopped --------> Pending ----------> Ready ----------> Running
///     ^                 |                                  |      |
///     |      stop       |                      re-add      |      | release
///     +-----------------+          Pending <---------------+      v
///                                  (periodic)                   Pooled
/// ```
///
/// `Pooled -> Stopped` happens on pool withdrawal. An executed one-shot
/// stays `Running` until released: its firing is committed, so `stop` on it
/// reports `false`, while `release` accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerState {
    /// Not resident: freshly built, withdrawn from the pool, or cancelled.
    Stopped,
    /// Linked into exactly one bucket, waiting for its slot to drain.
    Pending,
    /// Drained from its bucket, execution dispatched but not started.
    Ready,
    /// Callback invocation in progress (or finished, for a one-shot).
    Running,
    /// Returned to the pool; must not be touched until withdrawn again.
    Pooled,
}

/// Identifies the bucket an entity is currently linked into.
///
/// Level 0 is the near wheel (256 slots); levels 1..=4 are the overflow
/// wheels (64 slots each). Non-owning: the wheel's bucket arrays own the
/// list heads, this is only a back-reference for O(1) removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BucketId {
    pub level: u8,
    pub slot: u16,
}

/// One schedulable unit, stored in the wheel's slab.
///
/// Invariant: `bucket.is_some()` iff `state == Pending`, and the entity is
/// then linked into exactly that one bucket via `prev`/`next`.
pub struct TimerEntry {
    pub(crate) deadline: TickInstant,
    pub(crate) period: TickSpan,
    pub(crate) state: TimerState,
    pub(crate) bucket: Option<BucketId>,
    pub(crate) prev: Option<EntryIndex>,
    pub(crate) next: Option<EntryIndex>,
    pub(crate) callback: Option<Callback>,
}

impl TimerEntry {
    /// A pristine entity: `Stopped`, detached, nothing captured.
    #[must_use]
    pub fn blank() -> Self {
        Self {
            deadline: TickInstant::new(0),
            period: TickSpan::ZERO,
            state: TimerState::Stopped,
            bucket: None,
            prev: None,
            next: None,
            callback: None,
        }
    }

    /// True when the entity is in the state the pool contract requires on
    /// withdrawal: `Stopped`, no bucket membership, no residual links or
    /// callback.
    #[must_use]
    pub(crate) fn is_pristine(&self) -> bool {
        self.state == TimerState::Stopped
            && self.bucket.is_none()
            && self.prev.is_none()
            && self.next.is_none()
            && self.callback.is_none()
    }
}

impl fmt::Debug for TimerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEntry")
            .field("deadline", &self.deadline)
            .field("period", &self.period)
            .field("state", &self.state)
            .field("bucket", &self.bucket)
            .field("prev", &self.prev)
            .field("next", &self.next)
            .field("callback", &self.callback.as_ref().map(|_| "fn"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_is_pristine() {
        assert!(TimerEntry::blank().is_pristine());
    }

    #[test]
    fn captured_callback_breaks_pristine() {
        let mut e = TimerEntry::blank();
        e.callback = Some(Box::new(|_| {}));
        assert!(!e.is_pristine());
    }
}
