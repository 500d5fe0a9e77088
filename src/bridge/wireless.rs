//! Wireless (BLE) link
//!
//! Connect sequence: scan for the serial number, connect, bind the write and
//! notify characteristics, subscribe, then write the startup command if one is
//! still pending. Decoded notifications are pushed to whoever registered with
//! [`WirelessLink::register_notifications`].

use crate::codec::FrameCodec;
use crate::link::{LinkDriver, LinkError, LinkHandle, LinkState, LivenessSink};
use crate::protocol::{Component, LivenessState, Message};
use crate::transport::{
    Characteristic, NotificationStream, WirelessConnection, WirelessTransport,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Peer identity and GATT layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirelessSettings {
    /// Matched against the advertised name
    pub serial_number: String,
    pub write_uuid: Uuid,
    pub notify_uuid: Uuid,
    pub scan_window: Duration,
}

struct Session<C> {
    connection: Arc<C>,
    write: Characteristic,
}

pub struct WirelessLink<W: WirelessTransport> {
    handle: Arc<LinkHandle>,
    transport: W,
    settings: WirelessSettings,
    codec: Arc<dyn FrameCodec>,
    liveness: Arc<dyn LivenessSink>,
    /// Connection opened by the current attempt; bound characteristics arrive later
    connection: Mutex<Option<Arc<W::Connection>>>,
    session: Mutex<Option<Session<W::Connection>>>,
    /// Subscribed stream waiting for its consumer task
    pending: Mutex<Option<NotificationStream>>,
    /// Encoded startup command; taken by the first connect that writes it
    startup: Mutex<Option<Vec<u8>>>,
    notifications: OnceLock<mpsc::UnboundedSender<Message>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<W: WirelessTransport> WirelessLink<W> {
    pub fn new(
        handle: Arc<LinkHandle>,
        transport: W,
        settings: WirelessSettings,
        codec: Arc<dyn FrameCodec>,
        liveness: Arc<dyn LivenessSink>,
    ) -> Self {
        Self {
            handle,
            transport,
            settings,
            codec,
            liveness,
            connection: Mutex::new(None),
            session: Mutex::new(None),
            pending: Mutex::new(None),
            startup: Mutex::new(None),
            notifications: OnceLock::new(),
        }
    }

    pub fn transport(&self) -> &W {
        &self.transport
    }

    /// Queue the one-shot startup command. Re-arming replaces an unsent command.
    pub fn arm_startup(&self, frame: Vec<u8>) {
        *lock(&self.startup) = Some(frame);
    }

    pub fn startup_pending(&self) -> bool {
        lock(&self.startup).is_some()
    }

    /// Route decoded notifications to `sender`. Only the first registration wins.
    pub fn register_notifications(&self, sender: mpsc::UnboundedSender<Message>) -> bool {
        self.notifications.set(sender).is_ok()
    }

    /// Write one frame to the device.
    ///
    /// A transport failure drops the link to `Disconnected`; the error is
    /// returned for callers that care and may be ignored.
    pub async fn write(&self, frame: &[u8]) -> Result<(), LinkError> {
        let epoch = self.handle.epoch();
        let state = self.handle.state();
        if state != LinkState::Connected {
            return Err(LinkError::NotConnected { state });
        }

        let (connection, characteristic) = {
            let session = lock(&self.session);
            let session = session
                .as_ref()
                .ok_or(LinkError::NotConnected { state })?;
            (Arc::clone(&session.connection), session.write)
        };

        match connection.write(&characteristic, frame).await {
            Ok(()) => {
                debug!(link = %Component::Ble, bytes = frame.len(), "Frame written");
                Ok(())
            }
            Err(e) => {
                self.fail(epoch, "write failed").await;
                Err(e.into())
            }
        }
    }

    fn bind(
        &self,
        characteristics: &[Characteristic],
    ) -> Result<(Characteristic, Characteristic), LinkError> {
        let write = characteristics
            .iter()
            .find(|c| c.uuid == self.settings.write_uuid && c.can_write)
            .copied()
            .ok_or(LinkError::CharacteristicMissing(self.settings.write_uuid))?;
        let notify = characteristics
            .iter()
            .find(|c| c.uuid == self.settings.notify_uuid && c.can_notify)
            .copied()
            .ok_or(LinkError::CharacteristicMissing(self.settings.notify_uuid))?;
        Ok((write, notify))
    }

    async fn send_startup(
        &self,
        connection: &W::Connection,
        characteristic: &Characteristic,
    ) -> Result<(), LinkError> {
        let Some(frame) = lock(&self.startup).take() else {
            return Ok(());
        };

        match connection.write(characteristic, &frame).await {
            Ok(()) => {
                info!(link = %Component::Ble, "Startup command sent");
                Ok(())
            }
            Err(e) => {
                // Not sent, so the next connect tries again
                *lock(&self.startup) = Some(frame);
                Err(e.into())
            }
        }
    }

    /// Drop the connection of `epoch` if it is still the current one.
    async fn fail(&self, epoch: u64, reason: &str) {
        if !self.handle.mark_lost(epoch, reason) {
            return;
        }
        // Release the radio before publishing offline
        if let Some(connection) = self.take_connection() {
            if let Err(e) = connection.disconnect().await {
                debug!(link = %Component::Ble, error = %e, "Disconnect after failure");
            }
        }
        self.announce(LivenessState::Offline).await;
    }

    fn take_connection(&self) -> Option<Arc<W::Connection>> {
        lock(&self.session).take();
        lock(&self.pending).take();
        lock(&self.connection).take()
    }

    fn dispatch(&self, bytes: &[u8]) -> Result<(), LinkError> {
        match self.codec.decode(bytes) {
            Ok((name, payload)) => {
                let message = Message::new(name, payload);
                match self.notifications.get() {
                    Some(sender) if sender.send(message).is_ok() => {}
                    _ => debug!(link = %Component::Ble, "No notification consumer, dropping"),
                }
                Ok(())
            }
            Err(e) if e.is_unknown_frame() => {
                warn!(link = %Component::Ble, error = %e, "Dropping notification");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn consume_notifications(self: Arc<Self>, mut stream: NotificationStream, epoch: u64) {
        let mut state = self.handle.subscribe();
        debug!(link = %Component::Ble, epoch, "Notification listener started");

        loop {
            tokio::select! {
                item = stream.next() => {
                    let reason = match item {
                        Some(Ok(bytes)) => match self.dispatch(&bytes) {
                            Ok(()) => continue,
                            Err(e) => {
                                warn!(link = %Component::Ble, error = %e, "Undecodable notification");
                                "undecodable notification"
                            }
                        },
                        Some(Err(e)) => {
                            warn!(link = %Component::Ble, error = %e, "Notification stream error");
                            "notification stream error"
                        }
                        None => "notification stream ended",
                    };
                    self.fail(epoch, reason).await;
                    break;
                }
                changed = state.changed() => {
                    let superseded = changed.is_err()
                        || self.handle.epoch() != epoch
                        || !self.handle.is_connected();
                    if superseded {
                        break;
                    }
                }
            }
        }

        debug!(link = %Component::Ble, epoch, "Notification listener stopped");
    }
}

#[async_trait]
impl<W: WirelessTransport> LinkDriver for WirelessLink<W> {
    fn handle(&self) -> &Arc<LinkHandle> {
        &self.handle
    }

    async fn establish(&self) -> Result<(), LinkError> {
        let peer = self
            .transport
            .scan(&self.settings.serial_number, self.settings.scan_window)
            .await?
            .ok_or_else(|| LinkError::PeerNotFound(self.settings.serial_number.clone()))?;
        debug!(link = %Component::Ble, address = %peer.address, "Peer found");

        let connection = Arc::new(self.transport.connect(&peer).await?);
        *lock(&self.connection) = Some(Arc::clone(&connection));

        let characteristics = connection.discover_characteristics().await?;
        let (write, notify) = self.bind(&characteristics)?;

        let stream = connection.subscribe(&notify).await?;
        *lock(&self.pending) = Some(stream);

        self.send_startup(&connection, &write).await?;

        *lock(&self.session) = Some(Session {
            connection,
            write,
        });
        Ok(())
    }

    async fn release(&self) {
        if let Some(connection) = self.take_connection() {
            if let Err(e) = connection.disconnect().await {
                debug!(link = %Component::Ble, error = %e, "Release disconnect failed");
            }
        }
    }

    async fn announce(&self, state: LivenessState) {
        self.liveness.announce(Component::Ble, state).await;
    }

    fn on_connected(self: Arc<Self>) {
        let Some(stream) = lock(&self.pending).take() else {
            return;
        };
        let epoch = self.handle.epoch();
        tokio::spawn(self.consume_notifications(stream, epoch));
    }
}

impl<W: WirelessTransport> WirelessLink<W> {
    /// Disconnect for shutdown
    pub async fn disconnect(&self) {
        self.handle.transition(LinkState::Disconnected);
        self.release().await;
    }
}
