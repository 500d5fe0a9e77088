//! Generic self-healing link state machine
//!
//! A link is driven `Disconnected -> Connecting -> Connected` by a connect loop
//! that retries forever with exponential backoff. Each concrete link (wireless,
//! broker) implements [`LinkDriver`] to supply its connect sequence; the loop,
//! the busy guard and the liveness announcements are shared.
//!
//! ```text
//!              establish() ok
//!  Connecting ───────────────▶ Connected
//!      ▲  │                        │ write/publish/pump/notify failure
//!      │  │ establish() err        ▼
//!      │  └──────────────────▶ Disconnected ── supervisor tick ──┐
//!      └──────── sleep(next_delay) ◀────────────────────────────┘
//! ```

pub mod backoff;
pub mod state;

pub use backoff::{next_delay, BackoffCursor, BackoffPolicy};
pub use state::{BusyGuard, LinkHandle, LinkSnapshot, LinkState};

use crate::codec::CodecError;
use crate::protocol::{Component, LivenessState};
use crate::transport::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// Errors raised by link operations. None of them is fatal to the process.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("No peer advertising '{0}' found within the scan window")]
    PeerNotFound(String),
    #[error("Characteristic {0} not found on peer")]
    CharacteristicMissing(Uuid),
    #[error("Link not connected - current state: {state}")]
    NotConnected { state: LinkState },
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Where liveness records go. The broker link is the only real sink.
#[async_trait]
pub trait LivenessSink: Send + Sync {
    async fn announce(&self, component: Component, state: LivenessState);
}

/// Link-specific half of the state machine
#[async_trait]
pub trait LinkDriver: Send + Sync + 'static {
    fn handle(&self) -> &Arc<LinkHandle>;

    /// Run the connect sequence. Must leave the link ready for traffic on `Ok`.
    async fn establish(&self) -> Result<(), LinkError>;

    /// Tear down whatever a failed `establish` left half-open.
    async fn release(&self) {}

    /// Publish this link's liveness record.
    async fn announce(&self, state: LivenessState);

    /// Called once per successful connect, after the link is `Connected`.
    fn on_connected(self: Arc<Self>) {}
}

/// Start a connect loop for `driver` unless one is already in flight.
///
/// The busy flag is claimed before the task is spawned, so a supervisor tick
/// that runs before the task is first polled still sees the link as busy.
pub fn spawn_attempt<D: LinkDriver>(driver: &Arc<D>) -> Option<JoinHandle<()>> {
    let guard = driver.handle().try_acquire()?;
    let driver = Arc::clone(driver);
    Some(tokio::spawn(connect_loop(driver, guard)))
}

/// Run a connect loop inline; returns false if another attempt holds the link.
pub async fn attempt_connect<D: LinkDriver>(driver: Arc<D>) -> bool {
    match driver.handle().try_acquire() {
        Some(guard) => {
            connect_loop(driver, guard).await;
            true
        }
        None => false,
    }
}

/// Retry until connected. Holds the busy guard for its whole lifetime.
async fn connect_loop<D: LinkDriver>(driver: Arc<D>, _guard: BusyGuard) {
    let handle = Arc::clone(driver.handle());
    let component = handle.component();

    loop {
        handle.transition(LinkState::Connecting);
        let attempt = handle.cursor().attempt;
        info!(link = %component, attempt, "Connecting");

        match driver
            .establish()
            .instrument(crate::link_span!(component, attempt))
            .await
        {
            Ok(()) => {
                handle.reset_backoff();
                handle.transition(LinkState::Connected);
                driver.announce(LivenessState::Online).await;
                Arc::clone(&driver).on_connected();
                return;
            }
            Err(e) => {
                let delay = handle.next_delay();
                warn!(
                    link = %component,
                    attempt,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Connect attempt failed"
                );
                driver.release().await;
                handle.transition(LinkState::Disconnected);
                driver.announce(LivenessState::Offline).await;
                tokio::time::sleep(delay).await;
                handle.record_failure();
            }
        }
    }
}
