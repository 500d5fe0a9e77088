//! Per-link state: the `LinkState` watch channel, the busy guard and the backoff counter
//!
//! The busy flag is what keeps reconnect attempts for one link from overlapping.
//! It is claimed with a compare-exchange, so "check busy, then set busy" is a
//! single step even if the runtime ever grows more than one worker thread.

use super::backoff::{next_delay, BackoffCursor, BackoffPolicy};
use crate::protocol::Component;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Connection state of one link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => f.write_str("disconnected"),
            LinkState::Connecting => f.write_str("connecting"),
            LinkState::Connected => f.write_str("connected"),
        }
    }
}

/// Point-in-time view of a link, for logs and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub component: Component,
    pub state: LinkState,
    pub busy: bool,
    pub attempt: u32,
    pub connects: u64,
}

/// Shared state of one link.
///
/// Only the owning link mutates it; the supervisor and bridge read it.
pub struct LinkHandle {
    component: Component,
    state: watch::Sender<LinkState>,
    busy: AtomicBool,
    attempt: AtomicU32,
    policy: BackoffPolicy,
    /// Bumped on every transition into `Connected`
    epoch: AtomicU64,
}

impl LinkHandle {
    pub fn new(component: Component, policy: BackoffPolicy) -> Arc<Self> {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Arc::new(Self {
            component,
            state,
            busy: AtomicBool::new(false),
            attempt: AtomicU32::new(0),
            policy,
            epoch: AtomicU64::new(0),
        })
    }

    pub fn component(&self) -> Component {
        self.component
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// A link is due for a reconnect when it is down and no attempt is in flight.
    pub fn needs_reconnect(&self) -> bool {
        self.state() == LinkState::Disconnected && !self.is_busy()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Identifies the current connection; stale observers compare against it.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            component: self.component,
            state: self.state(),
            busy: self.is_busy(),
            attempt: self.attempt.load(Ordering::Acquire),
            connects: self.epoch(),
        }
    }

    /// Claim the busy flag. `None` means an attempt is already in flight.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                debug!(link = %self.component, "Reconnect attempt claimed");
                BusyGuard {
                    handle: Arc::clone(self),
                }
            })
    }

    /// Move to `next`, logging the transition. Returns the previous state.
    pub fn transition(&self, next: LinkState) -> LinkState {
        if next == LinkState::Connected {
            self.epoch.fetch_add(1, Ordering::AcqRel);
        }
        let previous = self.state.send_replace(next);
        log_state_transition(self.component, previous, next);
        previous
    }

    /// Drop to `Disconnected` if the connection identified by `epoch` is still current.
    ///
    /// Returns false when a newer connection (or no connection) is in place, in
    /// which case nothing changes.
    pub fn mark_lost(&self, epoch: u64, reason: &str) -> bool {
        if self.epoch() != epoch || !self.is_connected() {
            debug!(link = %self.component, reason, "Ignoring failure from a stale connection");
            return false;
        }
        warn!(link = %self.component, reason, "Link lost");
        self.transition(LinkState::Disconnected);
        true
    }

    pub fn cursor(&self) -> BackoffCursor {
        BackoffCursor {
            attempt: self.attempt.load(Ordering::Acquire),
            policy: self.policy,
        }
    }

    /// Delay before the next retry, from the current cursor
    pub fn next_delay(&self) -> Duration {
        next_delay(&self.cursor())
    }

    pub fn record_failure(&self) {
        let _ = self
            .attempt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_add(1));
    }

    pub fn reset_backoff(&self) {
        self.attempt.store(0, Ordering::Release);
    }
}

impl fmt::Debug for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkHandle")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Releases the busy flag when dropped, on every exit path of an attempt.
#[derive(Debug)]
pub struct BusyGuard {
    handle: Arc<LinkHandle>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.handle.busy.store(false, Ordering::Release);
        debug!(link = %self.handle.component, "Reconnect attempt released");
    }
}

fn log_state_transition(component: Component, from: LinkState, to: LinkState) {
    match (from, to) {
        (LinkState::Connecting, LinkState::Connected) => {
            info!(link = %component, "Link established");
        }
        (LinkState::Connected, LinkState::Disconnected) => {
            warn!(link = %component, "Link dropped");
        }
        (from, to) if from == to => {}
        (from, to) => {
            debug!(link = %component, %from, %to, "Link state changed");
        }
    }
}
