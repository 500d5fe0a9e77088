//! Supervisor and heartbeat
//!
//! The supervisor is the only thing that starts reconnect attempts. Every tick
//! it spawns a connect loop for each link that is down and idle, then drives
//! one step of the broker session so control commands are seen even when
//! nothing else is happening. The heartbeat runs on its own cadence and
//! re-announces every connected link.

use crate::bridge::{Bridge, BrokerLink, InboundOutcome, WirelessLink, WirelessSettings};
use crate::codec::FrameCodec;
use crate::config::BridgeConfig;
use crate::error::BridgeResult;
use crate::link::{spawn_attempt, LinkDriver, LinkHandle, LivenessSink};
use crate::protocol::{Component, LivenessRecord};
use crate::transport::{BrokerTransport, WirelessTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub tick: Duration,
    pub heartbeat: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            heartbeat: Duration::from_secs(30),
        }
    }
}

/// What one supervisor tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub broker_attempt: bool,
    pub wireless_attempt: bool,
    /// Result of the broker pump step, if it processed a message
    pub inbound: Option<InboundOutcome>,
}

pub struct Supervisor<W: WirelessTransport, B: BrokerTransport> {
    wireless: Arc<WirelessLink<W>>,
    broker: Arc<BrokerLink<B>>,
    bridge: Arc<Bridge<W, B>>,
    settings: SupervisorSettings,
}

impl<W: WirelessTransport, B: BrokerTransport> Supervisor<W, B> {
    pub fn new(
        wireless: Arc<WirelessLink<W>>,
        broker: Arc<BrokerLink<B>>,
        bridge: Arc<Bridge<W, B>>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            wireless,
            broker,
            bridge,
            settings,
        }
    }

    /// Wire up both links, the codec and the bridge from configuration.
    ///
    /// The startup command, if any, is encoded here and armed on the wireless
    /// link; it goes out on the first successful wireless connect.
    pub fn from_config(config: &BridgeConfig, wireless: W, broker: B) -> BridgeResult<Self> {
        let topics = config.topics()?;
        let codec: Arc<dyn FrameCodec> = Arc::new(config.frame_codec()?);
        let policy = config.backoff_policy();

        let broker = Arc::new(BrokerLink::new(
            LinkHandle::new(Component::Mqtt, policy),
            broker,
            config.session_options()?,
            topics,
        ));
        let liveness: Arc<dyn LivenessSink> = broker.clone();

        let wireless = Arc::new(WirelessLink::new(
            LinkHandle::new(Component::Ble, policy),
            wireless,
            WirelessSettings {
                serial_number: config.ble.serial_number.clone(),
                write_uuid: config.ble.write_uuid,
                notify_uuid: config.ble.notify_uuid,
                scan_window: config.scan_window(),
            },
            Arc::clone(&codec),
            liveness,
        ));

        if let Some(startup) = config.startup_message() {
            let frame = codec.encode(&startup.name, &startup.payload)?;
            wireless.arm_startup(frame);
        }

        let bridge = Bridge::new(Arc::clone(&wireless), Arc::clone(&broker), codec);
        let settings = SupervisorSettings {
            tick: config.tick_interval(),
            heartbeat: config.heartbeat_interval(),
        };
        Ok(Self::new(wireless, broker, bridge, settings))
    }

    pub fn wireless(&self) -> &Arc<WirelessLink<W>> {
        &self.wireless
    }

    pub fn broker(&self) -> &Arc<BrokerLink<B>> {
        &self.broker
    }

    pub fn bridge(&self) -> &Arc<Bridge<W, B>> {
        &self.bridge
    }

    pub fn settings(&self) -> SupervisorSettings {
        self.settings
    }

    /// One supervisor step: start overdue reconnects, then pump the broker once.
    pub async fn tick(&self) -> TickReport {
        let broker_attempt = self.broker.handle().needs_reconnect()
            && spawn_attempt(&self.broker).is_some();
        let wireless_attempt = self.wireless.handle().needs_reconnect()
            && spawn_attempt(&self.wireless).is_some();

        if broker_attempt || wireless_attempt {
            debug!(broker_attempt, wireless_attempt, "Reconnect attempts scheduled");
        }

        TickReport {
            broker_attempt,
            wireless_attempt,
            inbound: self.broker.pump_once().await,
        }
    }

    /// Re-announce every connected link. Returns how many records were published.
    pub async fn heartbeat_once(&self) -> usize {
        announce_connected(&self.broker, self.wireless.handle()).await
    }

    /// Heartbeat on its own task; the first beat is immediate.
    pub fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let broker = Arc::clone(&self.broker);
        let wireless = Arc::clone(self.wireless.handle());
        let period = self.settings.heartbeat;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let published = announce_connected(&broker, &wireless).await;
                debug!(published, "Heartbeat");
            }
        })
    }

    /// Run until `shutdown` turns true, then shut down cleanly.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let relay = self.bridge.attach();
        let heartbeat = self.spawn_heartbeat();

        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            tick_ms = self.settings.tick.as_millis() as u64,
            heartbeat_secs = self.settings.heartbeat.as_secs(),
            "Supervisor running"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        heartbeat.abort();
        self.shutdown().await;
        if let Some(relay) = relay {
            relay.abort();
        }
    }

    /// Announce both links offline, then close the wireless connection and the broker session.
    pub async fn shutdown(&self) {
        info!("Shutting down bridge");
        for component in [Component::Ble, Component::Mqtt] {
            if !self
                .broker
                .publish_liveness(LivenessRecord::offline(component))
                .await
            {
                warn!(link = %component, "Offline record not published");
            }
        }
        self.wireless.disconnect().await;
        self.broker.disconnect().await;
    }
}

async fn announce_connected<B: BrokerTransport>(
    broker: &BrokerLink<B>,
    wireless: &LinkHandle,
) -> usize {
    let mut published = 0;
    if broker.handle().is_connected()
        && broker
            .publish_liveness(LivenessRecord::online(Component::Mqtt))
            .await
    {
        published += 1;
    }
    if wireless.is_connected()
        && broker
            .publish_liveness(LivenessRecord::online(Component::Ble))
            .await
    {
        published += 1;
    }
    published
}
