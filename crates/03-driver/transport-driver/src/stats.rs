//! Packet counters for the STA data path.

use std::sync::atomic::{AtomicU32, Ordering};

/// Point-in-time copy of [`PacketStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketStatsSnapshot {
    pub sta_rx_in: u32,
    pub sta_rx_out: u32,
    pub sta_tx_in_pass: u32,
    pub sta_tx_trans_in: u32,
    pub sta_tx_flowctrl_drop: u32,
    pub sta_tx_out: u32,
    pub sta_tx_out_drop: u32,
    pub sta_flow_ctrl_on: u32,
    pub sta_flow_ctrl_off: u32,
}

impl PacketStatsSnapshot {
    /// One-line report in the layout the firmware tools grep for.
    pub fn report_line(&self) -> String {
        format!(
            "STA: s2h{{in[{}] out[{}]}} h2s{{in(flowctrl_drop[{}] in[{} or {}]) out(ok[{}] drop[{}])}} flwctl{{on[{}] off[{}]}}",
            self.sta_rx_in,
            self.sta_rx_out,
            self.sta_tx_flowctrl_drop,
            self.sta_tx_in_pass,
            self.sta_tx_trans_in,
            self.sta_tx_out,
            self.sta_tx_out_drop,
            self.sta_flow_ctrl_on,
            self.sta_flow_ctrl_off,
        )
    }
}

#[derive(Debug, Default)]
pub(crate) struct PacketStats {
    pub(crate) sta_rx_in: AtomicU32,
    pub(crate) sta_rx_out: AtomicU32,
    pub(crate) sta_tx_in_pass: AtomicU32,
    pub(crate) sta_tx_trans_in: AtomicU32,
    pub(crate) sta_tx_flowctrl_drop: AtomicU32,
    pub(crate) sta_tx_out: AtomicU32,
    pub(crate) sta_tx_out_drop: AtomicU32,
    pub(crate) sta_flow_ctrl_on: AtomicU32,
    pub(crate) sta_flow_ctrl_off: AtomicU32,
}

pub(crate) fn bump(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PacketStats {
    pub(crate) fn snapshot(&self) -> PacketStatsSnapshot {
        let load = |counter: &AtomicU32| counter.load(Ordering::Relaxed);
        PacketStatsSnapshot {
            sta_rx_in: load(&self.sta_rx_in),
            sta_rx_out: load(&self.sta_rx_out),
            sta_tx_in_pass: load(&self.sta_tx_in_pass),
            sta_tx_trans_in: load(&self.sta_tx_trans_in),
            sta_tx_flowctrl_drop: load(&self.sta_tx_flowctrl_drop),
            sta_tx_out: load(&self.sta_tx_out),
            sta_tx_out_drop: load(&self.sta_tx_out_drop),
            sta_flow_ctrl_on: load(&self.sta_flow_ctrl_on),
            sta_flow_ctrl_off: load(&self.sta_flow_ctrl_off),
        }
    }

    pub(crate) fn log_report(&self) {
        log::info!("{}", self.snapshot().report_line());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_line_lists_every_counter() {
        let stats = PacketStats::default();
        bump(&stats.sta_rx_in);
        bump(&stats.sta_rx_in);
        bump(&stats.sta_tx_out_drop);
        bump(&stats.sta_flow_ctrl_on);
        let line = stats.snapshot().report_line();
        assert_eq!(
            line,
            "STA: s2h{in[2] out[0]} h2s{in(flowctrl_drop[0] in[0 or 0]) out(ok[0] drop[1])} flwctl{on[1] off[0]}"
        );
    }
}
