//! btleplug-backed BLE central
//!
//! Uses the first adapter the platform reports. Scanning is unfiltered at the
//! radio level; peers are matched on their advertised local name.

use crate::transport::{
    close_on_disconnect, Characteristic, NotificationStream, Peer, TransportError,
    WirelessConnection, WirelessTransport,
};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic as GattCharacteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// How often the peripheral list is re-read while scanning
const SCAN_POLL: Duration = Duration::from_millis(500);

fn ble_error(e: btleplug::Error) -> TransportError {
    TransportError::ConnectionFailed(Box::new(e))
}

/// Stable identifier used to find the peripheral again after the scan
fn peer_address(peripheral: &Peripheral) -> String {
    format!("{:?}", peripheral.id())
}

pub struct BtleplugCentral {
    adapter: Adapter,
}

impl BtleplugCentral {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await.map_err(ble_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(ble_error)?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::ConnectionFailedStr("No BLE adapter found".into()))?;

        if let Ok(info) = adapter.adapter_info().await {
            info!(adapter = %info, "Using BLE adapter");
        }
        Ok(Self { adapter })
    }

    async fn find_named(&self, name_filter: &str) -> Result<Option<Peripheral>, TransportError> {
        for peripheral in self.adapter.peripherals().await.map_err(ble_error)? {
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };
            if properties
                .local_name
                .as_deref()
                .is_some_and(|name| name.contains(name_filter))
            {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl WirelessTransport for BtleplugCentral {
    type Connection = BtleplugConnection;

    async fn scan(
        &self,
        name_filter: &str,
        window: Duration,
    ) -> Result<Option<Peer>, TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(ble_error)?;

        let deadline = Instant::now() + window;
        let found = loop {
            if let Some(peripheral) = self.find_named(name_filter).await? {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(SCAN_POLL).await;
        };

        if let Err(e) = self.adapter.stop_scan().await {
            debug!(error = %e, "Stopping scan failed");
        }

        let Some(peripheral) = found else {
            return Ok(None);
        };
        let name = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|p| p.local_name);
        Ok(Some(Peer {
            address: peer_address(&peripheral),
            name,
        }))
    }

    async fn connect(&self, peer: &Peer) -> Result<Self::Connection, TransportError> {
        let peripherals = self.adapter.peripherals().await.map_err(ble_error)?;
        let peripheral = peripherals
            .into_iter()
            .find(|p| peer_address(p) == peer.address)
            .ok_or_else(|| {
                TransportError::ConnectionFailedStr(format!("Peer {} vanished", peer.address))
            })?;

        peripheral.connect().await.map_err(ble_error)?;
        Ok(BtleplugConnection {
            adapter: self.adapter.clone(),
            peripheral,
        })
    }
}

pub struct BtleplugConnection {
    /// Source of disconnect events; BlueZ value streams never end on their own
    adapter: Adapter,
    peripheral: Peripheral,
}

impl BtleplugConnection {
    fn gatt_characteristic(&self, characteristic: &Characteristic) -> Option<GattCharacteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic.uuid)
    }
}

#[async_trait]
impl WirelessConnection for BtleplugConnection {
    async fn discover_characteristics(&self) -> Result<Vec<Characteristic>, TransportError> {
        self.peripheral.discover_services().await.map_err(ble_error)?;
        Ok(self
            .peripheral
            .characteristics()
            .into_iter()
            .map(|c| Characteristic {
                uuid: c.uuid,
                service: c.service_uuid,
                can_write: c
                    .properties
                    .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE),
                can_notify: c
                    .properties
                    .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE),
            })
            .collect())
    }

    async fn subscribe(
        &self,
        characteristic: &Characteristic,
    ) -> Result<NotificationStream, TransportError> {
        let gatt = self.gatt_characteristic(characteristic).ok_or_else(|| {
            TransportError::SubscriptionFailed(
                format!("characteristic {} not discovered", characteristic.uuid).into(),
            )
        })?;

        let peripheral_id = self.peripheral.id();
        let disconnected = self
            .adapter
            .events()
            .await
            .map_err(|e| TransportError::SubscriptionFailed(Box::new(e)))?
            .filter_map(move |event| {
                futures::future::ready(match event {
                    CentralEvent::DeviceDisconnected(id) if id == peripheral_id => Some(()),
                    _ => None,
                })
            });

        // Take the stream before enabling notifications so none are missed
        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::SubscriptionFailed(Box::new(e)))?;
        self.peripheral
            .subscribe(&gatt)
            .await
            .map_err(|e| TransportError::SubscriptionFailed(Box::new(e)))?;

        let uuid = characteristic.uuid;
        let values = notifications
            .filter(move |n| futures::future::ready(n.uuid == uuid))
            .map(|n| Ok(Bytes::from(n.value)))
            .boxed();
        Ok(close_on_disconnect(values, disconnected))
    }

    async fn write(
        &self,
        characteristic: &Characteristic,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let gatt = self.gatt_characteristic(characteristic).ok_or_else(|| {
            TransportError::WriteFailed(
                format!("characteristic {} not discovered", characteristic.uuid).into(),
            )
        })?;
        self.peripheral
            .write(&gatt, data, WriteType::WithResponse)
            .await
            .map_err(|e| TransportError::WriteFailed(Box::new(e)))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await.map_err(ble_error)
    }
}
