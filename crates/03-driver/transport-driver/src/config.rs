//! Link configuration.
//!
//! Every field has a default matching the stock firmware build, so a config
//! file only needs to name what it changes.

use crate::error::{DriverError, DriverResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use transport::{
    BusKind, ChipId, RAW_TP_BIDIRECTIONAL, RAW_TP_ESP_TO_HOST, RAW_TP_HOST_TO_ESP,
};

/// Upper bound on concurrently registered serial connections.
pub const MAX_SERIAL_INTF: usize = 2;
/// Receive queue depth of each serial connection.
pub const SERIAL_QUEUE_DEPTH: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub bus: BusKind,
    /// Chip the host firmware was built for; any other peer is refused.
    pub expected_chip: ChipId,
    /// Host capability bitmap advertised in the handshake reply.
    pub host_capabilities: u8,
    /// Verify header checksums on received frames.
    pub checksum: bool,
    pub bring_up: BringUpConfig,
    pub flow_control: FlowControlConfig,
    pub serial: SerialConfig,
    pub stats: StatsConfig,
    pub raw_throughput: RawThroughputConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bus: BusKind::Spi,
            expected_chip: ChipId::Esp32,
            host_capabilities: 0,
            checksum: true,
            bring_up: BringUpConfig::default(),
            flow_control: FlowControlConfig::default(),
            serial: SerialConfig::default(),
            stats: StatsConfig::default(),
            raw_throughput: RawThroughputConfig::default(),
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> DriverResult<()> {
        let bring_up = &self.bring_up;
        if bring_up.init_timeout_ms == 0 {
            return Err(DriverError::InvalidConfig("bring_up.init_timeout_ms must be non-zero"));
        }
        if bring_up.repulse_every == 0 {
            return Err(DriverError::InvalidConfig("bring_up.repulse_every must be non-zero"));
        }

        let flow = &self.flow_control;
        if flow.policy == FlowPolicy::BlockWithTimeout && flow.timeout_ms == 0 {
            return Err(DriverError::InvalidConfig(
                "flow_control.timeout_ms must be non-zero for block_with_timeout",
            ));
        }
        if flow.policy != FlowPolicy::Off && flow.low_threshold > flow.high_threshold {
            return Err(DriverError::InvalidConfig(
                "flow_control.low_threshold exceeds high_threshold",
            ));
        }

        let serial = &self.serial;
        if serial.max_connections == 0 || serial.max_connections > MAX_SERIAL_INTF {
            return Err(DriverError::InvalidConfig("serial.max_connections must be 1 or 2"));
        }
        if serial.queue_depth == 0 {
            return Err(DriverError::InvalidConfig("serial.queue_depth must be non-zero"));
        }
        if serial.max_message_len == 0 {
            return Err(DriverError::InvalidConfig("serial.max_message_len must be non-zero"));
        }

        let raw_tp = &self.raw_throughput;
        // TEST-interface RX feeds the report even with the generator off.
        if raw_tp.report_interval_s == 0 {
            return Err(DriverError::InvalidConfig(
                "raw_throughput.report_interval_s must be non-zero",
            ));
        }
        if raw_tp.enabled {
            if raw_tp.pkt_len == 0 || raw_tp.pkt_len > self.bus.max_payload_size() {
                return Err(DriverError::InvalidConfig(
                    "raw_throughput.pkt_len must fit one bus payload",
                ));
            }
        }
        Ok(())
    }
}

/// Peer reset and handshake timing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BringUpConfig {
    /// Deadline for the peer's INIT event; expiry restarts the host.
    pub init_timeout_ms: u64,
    /// Time between reset line transitions while pulsing.
    pub reset_hold_ms: u64,
    /// Quiet period after a pulse before bus traffic resumes.
    pub reset_settle_ms: u64,
    /// Delay between "TX ready" polls.
    pub poll_interval_ms: u64,
    /// Polls before bring-up is declared failed.
    pub max_retry: u32,
    /// Re-pulse the reset line after this many failed polls.
    pub repulse_every: u32,
}

impl Default for BringUpConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: 10_000,
            reset_hold_ms: 50,
            reset_settle_ms: 1_000,
            poll_interval_ms: 1_000,
            max_retry: 1_000,
            repulse_every: 10,
        }
    }
}

impl BringUpConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn reset_hold(&self) -> Duration {
        Duration::from_millis(self.reset_hold_ms)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// How STA uplink traffic reacts while the peer has asked the host to pause.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPolicy {
    /// No gating; throttle requests are tracked but never enforced.
    #[default]
    Off,
    /// Fail at once while paused.
    Drop,
    /// Wait until the peer resumes.
    Block,
    /// Wait up to `timeout_ms`, then drop.
    BlockWithTimeout,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowControlConfig {
    pub policy: FlowPolicy,
    pub timeout_ms: u64,
    /// Peer queue level at which it clears flow control.
    pub low_threshold: u8,
    /// Peer queue level at which it starts flow control.
    pub high_threshold: u8,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            policy: FlowPolicy::Off,
            timeout_ms: 100,
            low_threshold: 60,
            high_threshold: 80,
        }
    }
}

impl FlowControlConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Thresholds advertised to the peer; zero when flow control is off.
    pub fn advertised_thresholds(&self) -> (u8, u8) {
        match self.policy {
            FlowPolicy::Off => (0, 0),
            _ => (self.low_threshold, self.high_threshold),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub max_connections: usize,
    pub queue_depth: usize,
    /// Largest reassembled message accepted before the accumulator is dropped.
    pub max_message_len: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            max_connections: MAX_SERIAL_INTF,
            queue_depth: SERIAL_QUEUE_DEPTH,
            max_message_len: 64 * 1024,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Period of the packet statistics log line; zero disables it.
    pub report_interval_ms: u64,
}

/// Direction of the raw throughput test traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawTpDirection {
    #[default]
    EspToHost,
    HostToEsp,
    Bidirectional,
}

impl RawTpDirection {
    pub fn bits(self) -> u8 {
        match self {
            RawTpDirection::EspToHost => RAW_TP_ESP_TO_HOST,
            RawTpDirection::HostToEsp => RAW_TP_HOST_TO_ESP,
            RawTpDirection::Bidirectional => RAW_TP_BIDIRECTIONAL,
        }
    }

    /// Whether the host generates test traffic.
    pub fn host_sends(self) -> bool {
        matches!(self, RawTpDirection::HostToEsp | RawTpDirection::Bidirectional)
    }

    pub fn label(self) -> &'static str {
        match self {
            RawTpDirection::EspToHost => "s2h",
            RawTpDirection::HostToEsp => "h2s",
            RawTpDirection::Bidirectional => "bi-dir",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawThroughputConfig {
    pub enabled: bool,
    pub direction: RawTpDirection,
    pub report_interval_s: u64,
    pub pkt_len: usize,
}

impl Default for RawThroughputConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            direction: RawTpDirection::EspToHost,
            report_interval_s: 10,
            pkt_len: 1460,
        }
    }
}
