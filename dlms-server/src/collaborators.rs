//! Services the gateway depends on but does not implement
//!
//! A [`MeterDirectory`] maps what a dialing meter tells us (its number, or
//! just its IP address) to the backend's meter id. A [`TelemetrySink`]
//! receives every value read from a meter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dlms_core::{DataObject, ObisCode};
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::mpsc;

/// Backend identifier of a meter
pub type MeterId = String;

/// Value received from a meter
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub meter_id: MeterId,
    /// Object the value belongs to; `None` for a response no request of ours asked for
    pub obis: Option<ObisCode>,
    pub value: DataObject,
    pub timestamp: DateTime<Utc>,
}

/// Resolves dialing meters to backend ids
#[async_trait]
pub trait MeterDirectory: Send + Sync {
    /// Meter announced by number in the calling AP title
    async fn lookup_by_number(&self, number: &str) -> Option<MeterId>;

    /// Meter known to dial in from `address`
    async fn lookup_by_address(&self, address: IpAddr) -> Option<MeterId>;
}

/// Destination of meter readings
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn receive(&self, telemetry: Telemetry);
}

/// Directory backed by fixed tables, typically loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticMeterDirectory {
    by_number: HashMap<String, MeterId>,
    by_address: HashMap<IpAddr, MeterId>,
}

impl StaticMeterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a meter by number and optionally by the address it dials from
    pub fn insert(&mut self, number: impl Into<String>, meter_id: impl Into<MeterId>, address: Option<IpAddr>) {
        let meter_id = meter_id.into();
        if let Some(address) = address {
            self.by_address.insert(address, meter_id.clone());
        }
        self.by_number.insert(number.into(), meter_id);
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }
}

#[async_trait]
impl MeterDirectory for StaticMeterDirectory {
    async fn lookup_by_number(&self, number: &str) -> Option<MeterId> {
        self.by_number.get(number).cloned()
    }

    async fn lookup_by_address(&self, address: IpAddr) -> Option<MeterId> {
        self.by_address.get(&address).cloned()
    }
}

/// Sink that writes every reading to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTelemetrySink;

#[async_trait]
impl TelemetrySink for LogTelemetrySink {
    async fn receive(&self, telemetry: Telemetry) {
        match telemetry.obis {
            Some(obis) => log::info!(
                "meter {} {} = {} at {}",
                telemetry.meter_id,
                obis,
                telemetry.value,
                telemetry.timestamp.to_rfc3339()
            ),
            None => log::info!(
                "meter {} unsolicited value {} at {}",
                telemetry.meter_id,
                telemetry.value,
                telemetry.timestamp.to_rfc3339()
            ),
        }
    }
}

/// Sink forwarding readings into a channel
#[derive(Debug, Clone)]
pub struct ChannelTelemetrySink {
    sender: mpsc::UnboundedSender<Telemetry>,
}

impl ChannelTelemetrySink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Telemetry>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TelemetrySink for ChannelTelemetrySink {
    async fn receive(&self, telemetry: Telemetry) {
        if self.sender.send(telemetry).is_err() {
            log::debug!("telemetry receiver dropped");
        }
    }
}
