//! Bus-agnostic transport engine for the host side of a split-MCU link.
//!
//! [`Transport`] owns the link state machine, the per-interface channel
//! table, flow control, the serial reassembler and packet telemetry. It
//! talks to hardware only through the collaborator traits in
//! [`transport::hal`].

mod channel;
mod config;
mod engine;
mod error;
mod flow_control;
mod handshake;
mod raw_tp;
mod serial;
mod state;
mod stats;

pub use channel::{Channel, RxFn, TxFn};
pub use config::{
    BringUpConfig, FlowControlConfig, FlowPolicy, LinkConfig, RawTpDirection,
    RawThroughputConfig, SerialConfig, StatsConfig, MAX_SERIAL_INTF, SERIAL_QUEUE_DEPTH,
};
pub use engine::{Collaborators, Transport, UpCallback};
pub use error::{DriverError, DriverResult, ErrorKind};
pub use flow_control::{elapsed_us, FlowControl, ALLOW_WIFI};
pub use handshake::{capability_features, PeerInfo};
pub use raw_tp::{pattern_frame, ThroughputReport, RAW_TP_PATTERN};
pub use serial::{SerialHandle, SerialNotify, SerialState};
pub use state::TransportState;
pub use stats::PacketStatsSnapshot;
