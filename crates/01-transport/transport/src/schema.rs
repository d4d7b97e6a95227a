//! Wire-visible constants shared by the host and the radio co-processor.
//!
//! Values in this module are part of the link ABI: interface numbering, header
//! flags, private-channel tags, and chip identifiers must match the peer
//! firmware byte for byte.

use crate::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest frame an SPI transfer carries.
pub const MAX_SPI_BUFFER_SIZE: usize = 1600;
/// Largest frame an SDIO transfer carries.
pub const MAX_SDIO_BUFFER_SIZE: usize = 1536;
/// Size of the packed payload header preceding every frame.
pub const PAYLOAD_HEADER_LEN: usize = 12;

/// More fragments of the same message follow this one.
pub const FLAG_MORE_FRAGMENT: u8 = 1 << 0;
/// Frame was sent to wake the host.
pub const FLAG_WAKEUP_PKT: u8 = 1 << 1;

/// Private packet type carrying an event.
pub const PRIV_PACKET_TYPE_EVENT: u8 = 0x33;
/// Private packet type carrying data.
pub const PRIV_PACKET_TYPE_DATA: u8 = 0x34;
/// Private event announcing peer start-up (and the host's answer).
pub const PRIV_EVENT_INIT: u8 = 0x22;
/// Upper bound on the TLV body of an INIT event.
pub const MAX_INIT_EVENT_LEN: usize = 64;

/// Peer TLV: capability bitmap.
pub const TAG_PEER_CAPABILITY: u8 = 0x11;
/// Peer TLV: firmware chip id.
pub const TAG_PEER_CHIP_ID: u8 = 0x12;
/// Peer TLV: raw throughput test flags.
pub const TAG_PEER_TEST_RAW_TP: u8 = 0x13;
/// Peer TLV: peer RX queue depth.
pub const TAG_PEER_RX_Q_SIZE: u8 = 0x14;
/// Peer TLV: peer TX queue depth.
pub const TAG_PEER_TX_Q_SIZE: u8 = 0x15;

/// Host TLV: host capability bitmap.
pub const TAG_HOST_CAPABILITIES: u8 = 0x44;
/// Host TLV: chip id the host accepted.
pub const TAG_HOST_RCVD_CHIP_ID: u8 = 0x45;
/// Host TLV: raw throughput direction.
pub const TAG_HOST_TEST_RAW_TP: u8 = 0x46;
/// Host TLV: queue level at which the peer starts throttling.
pub const TAG_HOST_FLOW_CTL_START: u8 = 0x47;
/// Host TLV: queue level at which the peer stops throttling.
pub const TAG_HOST_FLOW_CTL_CLEAR: u8 = 0x48;

pub const CAP_WLAN_SDIO: u8 = 1 << 0;
pub const CAP_BT_UART: u8 = 1 << 1;
pub const CAP_BT_SDIO: u8 = 1 << 2;
pub const CAP_BLE_ONLY: u8 = 1 << 3;
pub const CAP_BR_EDR_ONLY: u8 = 1 << 4;
pub const CAP_WLAN_SPI: u8 = 1 << 5;
pub const CAP_BT_SPI: u8 = 1 << 6;
pub const CAP_CHECKSUM_ENABLED: u8 = 1 << 7;

pub const RAW_TP_NONE: u8 = 0;
pub const RAW_TP_ENABLED: u8 = 1 << 0;
pub const RAW_TP_ESP_TO_HOST: u8 = 1 << 1;
pub const RAW_TP_HOST_TO_ESP: u8 = 1 << 2;
pub const RAW_TP_BIDIRECTIONAL: u8 = 1 << 3;

/// Raw chip id reported when the peer is unknown.
pub const CHIP_UNRECOGNIZED: u8 = 0xFF;

/// Logical traffic classes multiplexed over the bus.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IfType {
    Invalid = 0,
    Sta = 1,
    Ap = 2,
    Serial = 3,
    Hci = 4,
    Priv = 5,
    Test = 6,
    Eth = 7,
}

impl IfType {
    /// Number of interface slots (the `MAX` sentinel of the wire enum).
    pub const COUNT: usize = 8;

    /// Index into fixed per-interface tables.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for IfType {
    type Error = TransportError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Ok(match raw {
            0 => IfType::Invalid,
            1 => IfType::Sta,
            2 => IfType::Ap,
            3 => IfType::Serial,
            4 => IfType::Hci,
            5 => IfType::Priv,
            6 => IfType::Test,
            7 => IfType::Eth,
            other => return Err(TransportError::UnknownInterface(other)),
        })
    }
}

impl fmt::Display for IfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IfType::Invalid => "invalid",
            IfType::Sta => "sta",
            IfType::Ap => "ap",
            IfType::Serial => "serial",
            IfType::Hci => "hci",
            IfType::Priv => "priv",
            IfType::Test => "test",
            IfType::Eth => "eth",
        };
        f.write_str(name)
    }
}

/// Physical bus between host and peer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Spi,
    Sdio,
}

impl BusKind {
    /// Largest frame (header included) the bus moves in one transfer.
    pub fn max_buffer_size(self) -> usize {
        match self {
            BusKind::Spi => MAX_SPI_BUFFER_SIZE,
            BusKind::Sdio => MAX_SDIO_BUFFER_SIZE,
        }
    }

    /// Largest payload that fits behind the header.
    pub fn max_payload_size(self) -> usize {
        self.max_buffer_size() - PAYLOAD_HEADER_LEN
    }
}

/// Peer request carried in the header's two throttle bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleCmd {
    /// No change requested.
    NoChange,
    /// Peer is congested: stop host-to-peer Wi-Fi traffic.
    On,
    /// Peer recovered: resume host-to-peer Wi-Fi traffic.
    Off,
}

impl ThrottleCmd {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            1 => ThrottleCmd::On,
            2 => ThrottleCmd::Off,
            _ => ThrottleCmd::NoChange,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            ThrottleCmd::NoChange => 0,
            ThrottleCmd::On => 1,
            ThrottleCmd::Off => 2,
        }
    }
}

/// Transmit queue a frame is scheduled on by the bus layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxPriority {
    Serial = 0,
    Bt = 1,
    Others = 2,
}

impl TxPriority {
    pub fn for_interface(if_type: IfType) -> Self {
        match if_type {
            IfType::Serial => TxPriority::Serial,
            IfType::Hci => TxPriority::Bt,
            _ => TxPriority::Others,
        }
    }
}

/// Co-processor families the host knows how to drive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChipId {
    #[default]
    Esp32,
    Esp32s2,
    Esp32c3,
    Esp32s3,
    Esp32c2,
    Esp32c6,
}

impl ChipId {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(ChipId::Esp32),
            0x02 => Some(ChipId::Esp32s2),
            0x05 => Some(ChipId::Esp32c3),
            0x09 => Some(ChipId::Esp32s3),
            0x0C => Some(ChipId::Esp32c2),
            0x0D => Some(ChipId::Esp32c6),
            _ => None,
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            ChipId::Esp32 => 0x00,
            ChipId::Esp32s2 => 0x02,
            ChipId::Esp32c3 => 0x05,
            ChipId::Esp32s3 => 0x09,
            ChipId::Esp32c2 => 0x0C,
            ChipId::Esp32c6 => 0x0D,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChipId::Esp32 => "esp32",
            ChipId::Esp32s2 => "esp32s2",
            ChipId::Esp32c3 => "esp32c3",
            ChipId::Esp32s3 => "esp32s3",
            ChipId::Esp32c2 => "esp32c2",
            ChipId::Esp32c6 => "esp32c6",
        }
    }

    /// Printable name for any raw id, known or not.
    pub fn name_of(raw: u8) -> &'static str {
        ChipId::from_raw(raw).map_or("unsupported", ChipId::name)
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_numbers_match_wire_enum() {
        for raw in 0..IfType::COUNT as u8 {
            let if_type = IfType::try_from(raw).expect("known interface");
            assert_eq!(if_type.as_u8(), raw);
        }
        assert_eq!(
            IfType::try_from(8),
            Err(TransportError::UnknownInterface(8))
        );
    }

    #[test]
    fn chip_ids_map_both_ways() {
        for chip in [
            ChipId::Esp32,
            ChipId::Esp32s2,
            ChipId::Esp32c3,
            ChipId::Esp32s3,
            ChipId::Esp32c2,
            ChipId::Esp32c6,
        ] {
            assert_eq!(ChipId::from_raw(chip.raw()), Some(chip));
        }
        assert_eq!(ChipId::from_raw(CHIP_UNRECOGNIZED), None);
        assert_eq!(ChipId::name_of(0x07), "unsupported");
    }

    #[test]
    fn payload_budget_follows_bus() {
        assert_eq!(BusKind::Spi.max_payload_size(), 1588);
        assert_eq!(BusKind::Sdio.max_payload_size(), 1524);
    }

    #[test]
    fn throttle_bits_ignore_reserved_bits() {
        assert_eq!(ThrottleCmd::from_bits(0b1111_1101), ThrottleCmd::On);
        assert_eq!(ThrottleCmd::from_bits(2), ThrottleCmd::Off);
        assert_eq!(ThrottleCmd::from_bits(3), ThrottleCmd::NoChange);
    }
}
