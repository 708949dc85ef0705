//! Albor Space 5G NR MAC Scheduler Application
//!
//! Runs the slot scheduler of one cell against a synthetic traffic policy
//! and a PHY stand-in that feeds back random HARQ-ACK and CRC results.

mod config;
mod phy_stub;
mod traffic;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::slot::SlotPoint;
use common::types::CellId;
use common::utils::time::slot_duration;
use interfaces::phy_config::UePhyConfig;
use layers::mac::{MacConfig, MacLayer, SlotReport};

use config::GnbConfig;
use phy_stub::{Feedback, PhyStub};
use traffic::{TrafficConfig, TrafficPolicy, TrafficStats};

/// Albor Space 5G NR MAC scheduler
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML, or TOML with a .toml extension)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Number of synthetic UEs
    #[arg(long, default_value = "4")]
    nof_ues: u16,

    /// Run time in seconds, 0 runs until Ctrl-C
    #[arg(long, default_value = "0")]
    duration_s: u64,

    /// Probability of a NACK or CRC failure
    #[arg(long, default_value = "0.1")]
    nack_prob: f64,

    /// Log every non-empty slot result as JSON
    #[arg(long)]
    dump_slots: bool,

    /// Seed of the traffic and feedback generators
    #[arg(long, default_value = "0")]
    seed: u64,
}

/// Scheduler counters
#[derive(Debug, Default, Clone, Copy)]
struct SchedStats {
    slots: u64,
    dl: u64,
    ul: u64,
    rar: u64,
    msg3: u64,
    si: u64,
    failed: u64,
    ues_connected: usize,
    traffic: TrafficStats,
}

impl SchedStats {
    fn add(&mut self, report: &SlotReport) {
        self.slots += 1;
        self.dl += report.nof_dl as u64;
        self.ul += report.nof_ul as u64;
        self.rar += report.nof_rar as u64;
        self.msg3 += report.nof_msg3 as u64;
        self.si += u64::from(report.si);
        self.failed += report.nof_failed as u64;
    }
}

/// Slot loop: applies feedback, asks the traffic policy for decisions, runs
/// the scheduler and hands the slot to the PHY
async fn run_scheduler(
    mac: Arc<MacLayer>,
    mut policy: TrafficPolicy,
    slot_tx: mpsc::Sender<SlotPoint>,
    mut feedback_rx: mpsc::UnboundedReceiver<Feedback>,
    stats: Arc<RwLock<SchedStats>>,
    running: Arc<RwLock<bool>>,
) -> Result<()> {
    let scs = mac.config().scs;
    let mut ticker = tokio::time::interval(slot_duration(scs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut slot = SlotPoint::new(scs, 0);

    while *running.read().await {
        ticker.tick().await;

        let decisions = {
            let mut sched = mac.lock().await?;
            while let Ok(feedback) = feedback_rx.try_recv() {
                policy.apply_feedback(&mut sched, feedback);
            }
            policy.new_slot(slot, &mut sched)
        };

        let report = mac.run_slot(slot, &decisions).await?;
        {
            let mut stats = stats.write().await;
            stats.add(&report);
            stats.traffic = policy.stats();
            stats.ues_connected = policy.nof_connected();
        }

        if slot_tx.send(slot).await.is_err() {
            warn!("PHY stub is gone, stopping the slot loop");
            break;
        }
        slot += 1;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => GnbConfig::from_file(path)?,
        None => GnbConfig::default(),
    };

    // Initialize logging
    let directive = args.log_level.clone().unwrap_or_else(|| config.log.filter_directive());
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&directive));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor Space 5G NR MAC scheduler");
    info!("Configuration file: {}", args.config.as_deref().unwrap_or("<defaults>"));

    if !(0.0..=1.0).contains(&args.nack_prob) {
        return Err(anyhow::anyhow!("Invalid NACK probability: {}", args.nack_prob));
    }

    let pci = config.pci()?;
    let scs = config.scs()?;
    let bwp = config.bwp_config()?;

    info!("Cell configuration:");
    info!("  PCI: {}", pci.0);
    info!("  DL ARFCN: {}, band: {}", config.cell_cfg.dl_arfcn, config.cell_cfg.band);
    info!("  Bandwidth: {} MHz ({} PRBs)", config.cell_cfg.channel_bandwidth_mhz, bwp.rb_width);
    info!("  Subcarrier spacing: {} kHz", scs.khz());
    info!("  CORESET#0 index: {}", config.cell_cfg.pdcch.common.coreset0_index);

    let ue_phy = Arc::new(UePhyConfig::new(bwp.pdcch.clone()));
    let mac_config = MacConfig {
        cell_id: CellId(pci.0),
        scs,
        cc: 0,
        bwp,
        sched: config.sched.core.clone(),
    };

    // Initialize MAC layer
    let mut mac_layer = MacLayer::new(mac_config)?;
    mac_layer.initialize().await?;
    let mac_layer = Arc::new(mac_layer);

    let traffic_cfg = TrafficConfig { nof_ues: args.nof_ues, seed: args.seed, ..Default::default() };
    let policy = TrafficPolicy::new(traffic_cfg, ue_phy);

    let running = Arc::new(RwLock::new(true));
    let stats = Arc::new(RwLock::new(SchedStats::default()));
    let (slot_tx, slot_rx) = mpsc::channel(64);
    let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();

    // PHY stand-in
    let phy_handle = {
        let phy = PhyStub::new(args.nack_prob, args.dump_slots, args.seed.wrapping_add(1));
        tokio::spawn(phy.run(mac_layer.clone(), slot_rx, feedback_tx))
    };

    let mut sched_handle = tokio::spawn(run_scheduler(
        mac_layer.clone(),
        policy,
        slot_tx,
        feedback_rx,
        stats.clone(),
        running.clone(),
    ));

    info!("MAC scheduler running with {} UEs", args.nof_ues);

    // Start statistics reporting
    let stats_handle = {
        let stats = stats.clone();
        let running = running.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            interval.tick().await;

            while *running.read().await {
                interval.tick().await;

                let s = *stats.read().await;
                info!("Scheduler Statistics:");
                info!("  Slots: {}, SIB1: {}, RAR: {}, Msg3: {}", s.slots, s.si, s.rar, s.msg3);
                info!("  DL grants: {}, UL grants: {}, failed: {}", s.dl, s.ul, s.failed);
                info!("  UEs connected: {}, RACH attempts: {}, attaches: {}",
                      s.ues_connected, s.traffic.rach_attempts, s.traffic.connected);
                info!("  DL acked: {} kbit, UL received: {} kbit, DL NACKs: {}, UL CRC failures: {}",
                      s.traffic.dl_acked_bits / 1000, s.traffic.ul_received_bits / 1000,
                      s.traffic.dl_nacks, s.traffic.ul_crc_failures);
            }
        })
    };

    let run_time = match args.duration_s {
        0 => Duration::from_secs(365 * 24 * 3600),
        secs => Duration::from_secs(secs),
    };

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = tokio::time::sleep(run_time) => {
            info!("Run time of {} s elapsed", args.duration_s);
        }
        result = &mut sched_handle => {
            match result {
                Ok(Ok(())) => warn!("Slot loop stopped unexpectedly"),
                Ok(Err(e)) => error!("Slot loop failed: {}", e),
                Err(e) => error!("Slot loop panicked: {}", e),
            }
        }
    }

    // Shutdown
    info!("Shutting down MAC scheduler");
    *running.write().await = false;

    // Wait for tasks to complete
    if !sched_handle.is_finished() {
        let _ = tokio::time::timeout(Duration::from_secs(5), sched_handle).await;
    }
    match tokio::time::timeout(Duration::from_secs(5), phy_handle).await {
        Ok(Ok(phy_stats)) => info!("PHY stub handled {} slots, {} bytes", phy_stats.nof_slots, phy_stats.nof_bytes),
        _ => warn!("PHY stub did not stop in time"),
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), stats_handle).await;

    let s = *stats.read().await;
    info!("Final: {} slots, {} DL / {} UL grants, {} failed, {} UEs connected",
          s.slots, s.dl, s.ul, s.failed, s.ues_connected);
    info!("MAC scheduler shutdown complete");
    Ok(())
}
