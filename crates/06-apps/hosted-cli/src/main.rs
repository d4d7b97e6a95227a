//! Command-line loopback harness for the host link.
//!
//! Brings a transport up against an in-memory bus whose "peer" is played by
//! the harness itself, pushes STA and serial traffic through it and prints
//! what went over the wire.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use runtime_native::{CaptureBus, NativePlatform, NativeTimers, PeerProfile, Submission};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use transport::{BufferHandle, ChipId, IfType, PoolStats, ThrottleCmd, FLAG_MORE_FRAGMENT};
use transport_codecs::PayloadHeader;
use transport_driver::{
    Collaborators, DriverError, FlowPolicy, LinkConfig, PacketStatsSnapshot, PeerInfo, RxFn,
    Transport,
};

/// Text rendering helpers used by the CLI commands.
mod render {
    use runtime_native::Submission;
    use std::collections::BTreeMap;
    use std::fmt::Write;
    use transport::{IfType, PoolStats};
    use transport_driver::{capability_features, PeerInfo};

    /// One line describing the accepted peer, plus its feature list if any.
    pub fn peer(info: &PeerInfo) -> String {
        let queue = |size: Option<u8>| size.map_or_else(|| "-".to_string(), |s| s.to_string());
        let mut out = format!(
            "peer: {} caps[{:#04x}] raw_tp[{:#04x}] rx_q[{}] tx_q[{}]\n",
            info.chip,
            info.capabilities,
            info.raw_tp,
            queue(info.rx_queue_size),
            queue(info.tx_queue_size)
        );
        let features = capability_features(info.capabilities);
        if !features.is_empty() {
            writeln!(out, "features: {}", features.join(", ")).expect("write features");
        }
        out
    }

    /// Frames and payload bytes per interface, in interface order.
    pub fn traffic(submissions: &[Submission]) -> String {
        let mut per_if: BTreeMap<IfType, (usize, usize)> = BTreeMap::new();
        for sub in submissions {
            let entry = per_if.entry(sub.if_type).or_default();
            entry.0 += 1;
            entry.1 += sub.len;
        }
        let mut out = String::new();
        for (if_type, (frames, bytes)) in per_if {
            writeln!(out, "{:<8} frames[{frames}] bytes[{bytes}]", if_type.to_string())
                .expect("write traffic");
        }
        if out.is_empty() {
            out.push_str("no traffic\n");
        }
        out
    }

    pub fn pool(stats: &PoolStats) -> String {
        format!(
            "pool: fresh[{}] reuse[{}] free[{}] live[{}]\n",
            stats.num_fresh_alloc, stats.num_reuse, stats.num_free, stats.live_blocks
        )
    }
}

/// Exercise the host link against a simulated peer.
#[derive(Parser, Debug)]
#[command(author, version, about = "Loopback harness for the host link", long_about = None)]
struct Cli {
    /// JSON link configuration; every field is optional.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration as JSON.
    Config,
    /// Bring the link up and push traffic through it.
    Loopback(LoopbackArgs),
}

#[derive(Args, Debug, Clone)]
struct LoopbackArgs {
    /// Chip the simulated peer announces (defaults to the expected chip).
    #[arg(long, value_enum)]
    peer_chip: Option<ChipArg>,
    /// Drive bring-up through a virtual reset line.
    #[arg(long)]
    reset_line: bool,
    /// Number of STA frames to send.
    #[arg(long, default_value_t = 8)]
    packets: u32,
    /// STA payload length in bytes.
    #[arg(long, default_value_t = 256)]
    payload: usize,
    /// Have the peer throttle the host before this STA frame.
    #[arg(long, value_name = "INDEX")]
    throttle_at: Option<u32>,
    /// Serial message the peer sends; repeatable.
    #[arg(long = "serial", value_name = "TEXT")]
    serial: Vec<String>,
    /// Serial fragment size used by the peer.
    #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(u16).range(1..))]
    fragment: u16,
}

impl Default for LoopbackArgs {
    fn default() -> Self {
        Self {
            peer_chip: None,
            reset_line: false,
            packets: 8,
            payload: 256,
            throttle_at: None,
            serial: Vec::new(),
            fragment: 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ChipArg {
    Esp32,
    Esp32s2,
    Esp32c3,
    Esp32s3,
    Esp32c2,
    Esp32c6,
}

impl From<ChipArg> for ChipId {
    fn from(arg: ChipArg) -> Self {
        match arg {
            ChipArg::Esp32 => ChipId::Esp32,
            ChipArg::Esp32s2 => ChipId::Esp32s2,
            ChipArg::Esp32c3 => ChipId::Esp32c3,
            ChipArg::Esp32s3 => ChipId::Esp32s3,
            ChipArg::Esp32c2 => ChipId::Esp32c2,
            ChipArg::Esp32c6 => ChipId::Esp32c6,
        }
    }
}

/// Everything a loopback run observed.
#[derive(Debug)]
struct Summary {
    peer: PeerInfo,
    sent: Vec<Submission>,
    echoed: usize,
    flow_dropped: u32,
    serial: Vec<String>,
    stats: PacketStatsSnapshot,
    pool: PoolStats,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Loopback(args) => {
            let summary = run_loopback(config, &args)?;
            print!("{}", render::peer(&summary.peer));
            print!("{}", render::traffic(&summary.sent));
            println!(
                "sta echoed[{}] flow-control drops[{}]",
                summary.echoed, summary.flow_dropped
            );
            for message in &summary.serial {
                println!("serial <- {message:?}");
            }
            println!("{}", summary.stats.report_line());
            print!("{}", render::pool(&summary.pool));
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<LinkConfig> {
    let config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str::<LinkConfig>(&text)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => LinkConfig::default(),
    };
    config.validate().context("invalid link configuration")?;
    Ok(config)
}

fn run_loopback(config: LinkConfig, args: &LoopbackArgs) -> Result<Summary> {
    if args.throttle_at.is_some() && config.flow_control.policy == FlowPolicy::Block {
        bail!("--throttle-at would block forever under the `block` policy");
    }

    let bus = Arc::new(CaptureBus::new(config.bus));
    let profile = PeerProfile::new(args.peer_chip.map_or(config.expected_chip, ChipId::from));

    let mut platform = NativePlatform::new()
        .with_sleep_scale(1000)
        .on_restart(|reason| log::warn!("peer would be restarted here: {reason}"));
    if args.reset_line {
        let bus = Arc::clone(&bus);
        platform = platform.with_reset_line().on_peer_boot(move || {
            if let Err(err) = bus.announce(&profile) {
                log::error!("peer announcement failed: {err}");
            }
        });
    }

    let transport = Transport::setup(
        config,
        Collaborators {
            bus: bus.clone(),
            platform: Arc::new(platform),
            timers: Arc::new(NativeTimers::new()),
        },
        None,
    )
    .context("transport setup failed")?;

    let result = exercise(&transport, &bus, &profile, args);
    transport.teardown();
    result
}

fn exercise(
    transport: &Transport,
    bus: &CaptureBus,
    profile: &PeerProfile,
    args: &LoopbackArgs,
) -> Result<Summary> {
    transport.reconfigure().context("bring-up failed")?;
    if !args.reset_line {
        bus.announce(profile).context("peer announcement failed")?;
    }
    let Some(peer) = transport.peer_info().filter(|_| transport.is_tx_ready()) else {
        bail!(
            "peer announcing {} was refused (expected {})",
            profile.chip,
            transport.config().expected_chip
        );
    };

    let echoed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&echoed);
    let rx: RxFn = Arc::new(move |buf: BufferHandle| {
        counter.fetch_add(1, Ordering::Relaxed);
        buf.release();
    });
    let (sta, sta_tx) = transport.add_channel(IfType::Sta, false, rx)?;

    let payload: Vec<u8> = (0..args.payload).map(|i| i as u8).collect();
    let mut flow_dropped = 0;
    for index in 0..args.packets {
        if args.throttle_at == Some(index) {
            bus.inject(&throttle(ThrottleCmd::On), &[])?;
        }
        match sta_tx(&payload) {
            Ok(()) => {}
            Err(DriverError::FlowControlDrop) => flow_dropped += 1,
            Err(err) => return Err(err).context("sta transmit failed"),
        }
    }
    if args.throttle_at.is_some() {
        bus.inject(&throttle(ThrottleCmd::Off), &[])?;
    }

    // The peer loops every STA frame straight back.
    let mut sent = bus.take_submissions();
    for sub in sent.iter().filter(|sub| sub.if_type == IfType::Sta) {
        let len = u16::try_from(sub.len).context("frame too long")?;
        bus.inject(&PayloadHeader::new(IfType::Sta, 0, len), sub.payload())?;
    }

    let serial = exchange_serial(transport, bus, args)?;
    sent.extend(bus.take_submissions());

    let pool = transport.remove_channel(&sta)?;
    Ok(Summary {
        peer,
        sent,
        echoed: echoed.load(Ordering::Relaxed),
        flow_dropped,
        serial,
        stats: transport.packet_stats(),
        pool,
    })
}

/// Plays each message in from the peer, fragmented, and echoes it back.
fn exchange_serial(
    transport: &Transport,
    bus: &CaptureBus,
    args: &LoopbackArgs,
) -> Result<Vec<String>> {
    if args.serial.is_empty() {
        return Ok(Vec::new());
    }
    let serial_rx: RxFn = Arc::new(|_buf: BufferHandle| {});
    let (channel, _tx) = transport.add_channel(IfType::Serial, false, serial_rx)?;
    let handle = transport.serial_init(None)?;
    let mut received = Vec::with_capacity(args.serial.len());
    for message in &args.serial {
        if message.is_empty() {
            log::warn!("skipping empty serial message");
            continue;
        }
        let fragments: Vec<&[u8]> = message.as_bytes().chunks(args.fragment.into()).collect();
        let last = fragments.len() - 1;
        for (index, fragment) in fragments.iter().enumerate() {
            let len = u16::try_from(fragment.len()).context("fragment too long")?;
            let mut header = PayloadHeader::new(IfType::Serial, handle.if_num(), len);
            if index < last {
                header.flags = FLAG_MORE_FRAGMENT;
            }
            bus.inject(&header, fragment)?;
        }
        let reply = handle
            .read_timeout(Duration::from_secs(1))
            .context("serial message never arrived")?;
        handle.write(reply.payload())?;
        received.push(String::from_utf8_lossy(&reply.into_vec()).into_owned());
    }
    handle.close()?;
    transport.remove_channel(&channel)?;
    Ok(received)
}

fn throttle(cmd: ThrottleCmd) -> PayloadHeader {
    let mut header = PayloadHeader::new(IfType::Sta, 0, 0);
    header.throttle = cmd;
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use transport::TxPriority;

    fn sample_peer() -> PeerInfo {
        PeerInfo {
            chip: ChipId::Esp32c6,
            capabilities: 0x03,
            raw_tp: 0,
            rx_queue_size: Some(20),
            tx_queue_size: None,
        }
    }

    fn submission(if_type: IfType, len: usize) -> Submission {
        Submission {
            if_type,
            if_num: 0,
            len,
            offset: 12,
            zero_copy: false,
            priority: TxPriority::for_interface(if_type),
            pkt_type: 0,
            flags: 0,
            frame: vec![0; 12 + len],
        }
    }

    #[test]
    fn peer_render_matches_expectation() {
        assert_snapshot!(render::peer(&sample_peer()), @r"
        peer: esp32c6 caps[0x03] raw_tp[0x00] rx_q[20] tx_q[-]
        features: WLAN, BT/BLE, HCI over UART
        ");
    }

    #[test]
    fn traffic_render_groups_by_interface() {
        let subs = [
            submission(IfType::Serial, 8),
            submission(IfType::Sta, 100),
            submission(IfType::Priv, 17),
            submission(IfType::Sta, 50),
        ];
        assert_snapshot!(render::traffic(&subs), @r"
        sta      frames[2] bytes[150]
        serial   frames[1] bytes[8]
        priv     frames[1] bytes[17]
        ");
        assert_eq!(render::traffic(&[]), "no traffic\n");
    }

    #[test]
    fn default_loopback_echoes_everything() {
        let args = LoopbackArgs {
            serial: vec!["AT+GMR\r\n".into(), "a longer message than one fragment".into()],
            fragment: 8,
            ..LoopbackArgs::default()
        };
        let summary = run_loopback(LinkConfig::default(), &args).expect("loopback");
        assert_eq!(summary.peer.chip, ChipId::Esp32);
        assert_eq!(summary.echoed, 8);
        assert_eq!(summary.flow_dropped, 0);
        assert_eq!(
            summary.serial,
            vec!["AT+GMR\r\n", "a longer message than one fragment"]
        );
        assert_eq!(summary.stats.sta_tx_out, 8);
        assert_eq!(summary.stats.sta_rx_out, 8);
        assert_eq!(summary.pool.live_blocks, 0);
        let serial_out = summary
            .sent
            .iter()
            .filter(|sub| sub.if_type == IfType::Serial)
            .count();
        assert_eq!(serial_out, 2);
    }

    #[test]
    fn throttled_run_drops_under_drop_policy() {
        let mut config = LinkConfig::default();
        config.flow_control.policy = FlowPolicy::Drop;
        let args = LoopbackArgs {
            packets: 4,
            throttle_at: Some(2),
            ..LoopbackArgs::default()
        };
        let summary = run_loopback(config, &args).expect("loopback");
        assert_eq!(summary.flow_dropped, 2);
        assert_eq!(summary.echoed, 2);
        assert_eq!(summary.stats.sta_flow_ctrl_on, 1);
        assert_eq!(summary.stats.sta_flow_ctrl_off, 1);
    }

    #[test]
    fn mismatched_peer_is_reported() {
        let args = LoopbackArgs {
            peer_chip: Some(ChipArg::Esp32s3),
            ..LoopbackArgs::default()
        };
        let err = run_loopback(LinkConfig::default(), &args).expect_err("refused");
        assert!(err.to_string().contains("esp32s3"), "{err}");
    }

    #[test]
    fn block_policy_refuses_throttle_injection() {
        let mut config = LinkConfig::default();
        config.flow_control.policy = FlowPolicy::Block;
        let args = LoopbackArgs {
            throttle_at: Some(0),
            ..LoopbackArgs::default()
        };
        assert!(run_loopback(config, &args).is_err());
    }

    #[test]
    fn partial_config_file_fills_defaults() {
        let dir = std::env::temp_dir().join(format!("hosted-cli-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("link.json");
        fs::write(&path, r#"{ "bus": "sdio", "flow_control": { "policy": "drop" } }"#)
            .expect("write config");
        let config = load_config(Some(&path)).expect("config");
        assert_eq!(config.bus, transport::BusKind::Sdio);
        assert_eq!(config.flow_control.policy, FlowPolicy::Drop);
        assert_eq!(config.serial, LinkConfig::default().serial);
        fs::remove_dir_all(&dir).expect("cleanup");
    }

    #[test]
    fn cli_parses_repeated_serial_messages() {
        let cli = Cli::try_parse_from([
            "hosted-cli",
            "loopback",
            "--serial",
            "one",
            "--serial",
            "two",
            "--peer-chip",
            "esp32c3",
        ])
        .expect("parse");
        let Command::Loopback(args) = cli.command else {
            panic!("expected loopback");
        };
        assert_eq!(args.serial, vec!["one", "two"]);
        assert_eq!(args.peer_chip, Some(ChipArg::Esp32c3));
        assert_eq!(args.fragment, 16);
    }
}
