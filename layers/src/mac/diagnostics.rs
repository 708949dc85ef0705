//! Scheduling decision logs
//!
//! Human readable summaries of a scheduling pass. Read-only over the slot UEs
//! and the resource grid.

use super::bwp::BwpParams;
use super::res_grid::BwpResGrid;
use super::slot_ue::SlotUe;
use common::dci::RntiType;
use common::slot::SlotPoint;
use common::types::Rnti;
use interfaces::message_types::SchAlloc;
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::{debug, info, Level};

/// Slot UEs of one scheduling pass, by RNTI
pub type SlotUeMap<'a> = BTreeMap<Rnti, SlotUe<'a>>;

/// Log the UEs considered in `pdcch_slot`
pub fn log_sched_slot_ues(pdcch_slot: SlotPoint, cc: u32, slot_ues: &SlotUeMap<'_>) {
    if !tracing::enabled!(Level::DEBUG) || slot_ues.is_empty() {
        return;
    }
    debug!("{}", format_slot_ues(pdcch_slot, cc, slot_ues));
}

fn format_slot_ues(pdcch_slot: SlotPoint, cc: u32, slot_ues: &SlotUeMap<'_>) -> String {
    let ues: Vec<String> = slot_ues
        .values()
        .map(|ue| format!("{{rnti={}, dl_bs={}, ul_bs={}}}", ue.rnti, ue.dl_bytes, ue.ul_bytes))
        .collect();
    format!("SCHED: UE candidates, pdcch_slot={}, cc={}: [{}]", pdcch_slot, cc, ues.join(", "))
}

/// Log every DCI placed in `pdcch_slot`
pub fn log_sched_bwp_result(pdcch_slot: SlotPoint, grid: &BwpResGrid, slot_ues: &SlotUeMap<'_>, bwp: &BwpParams) {
    let with_debug = tracing::enabled!(Level::DEBUG);
    for (level, line) in format_bwp_result(pdcch_slot, grid, slot_ues, bwp, with_debug) {
        if level == Level::DEBUG {
            debug!("{}", line);
        } else {
            info!("{}", line);
        }
    }
}

fn find_pdsch(grid: &BwpResGrid, slot: SlotPoint, rnti: Rnti, rnti_type: RntiType) -> Option<&SchAlloc> {
    grid.get(slot)?
        .dl
        .pdsch
        .iter()
        .find(|pdsch| pdsch.rnti == rnti && pdsch.rnti_type == rnti_type)
}

fn prbs_of(pdsch: Option<&SchAlloc>) -> String {
    match pdsch {
        Some(pdsch) => {
            let (start, stop) = pdsch.first_prb_run();
            format!("[{}, {})", start, stop)
        }
        None => "[]".to_string(),
    }
}

/// Summary lines of `pdcch_slot`, DEBUG lines are only formatted when
/// `with_debug` is set
pub(crate) fn format_bwp_result(
    pdcch_slot: SlotPoint,
    grid: &BwpResGrid,
    slot_ues: &SlotUeMap<'_>,
    bwp: &BwpParams,
    with_debug: bool,
) -> Vec<(Level, String)> {
    let mut lines = Vec::new();
    let Some(result) = grid.get(pdcch_slot) else {
        return lines;
    };
    let cc = bwp.cc;
    let pdsch_slot = pdcch_slot + bwp.cfg.pdsch_k0;

    for pdcch in &result.dl.pdcch_dl {
        let dci = &pdcch.dci;
        let mut line = String::new();
        match dci.ctx.rnti_type {
            RntiType::C => {
                let Some((ue, h)) = slot_ues.get(&dci.ctx.rnti).and_then(|ue| ue.h_dl.map(|h| (ue, h))) else {
                    continue;
                };
                let lcids = find_pdsch(grid, ue.pdsch_slot, ue.rnti, RntiType::C)
                    .map(|pdsch| pdsch.lcids.iter().map(|lcid| lcid.to_string()).collect::<Vec<_>>().join(", "))
                    .unwrap_or_default();
                let _ = write!(
                    line,
                    "SCHED: DL {}, cc={}, rnti={}, pid={}, cs={}, f={}, prbs={}, nrtx={}, dai={}, lcids=[{}], \
                     tbs={}, bs={}, pdsch_slot={}, ack_slot={}",
                    if h.nof_retx() == 0 { "tx" } else { "retx" },
                    cc,
                    ue.rnti,
                    dci.pid,
                    dci.ctx.coreset_id,
                    dci.ctx.format,
                    h.grant(),
                    h.nof_retx(),
                    dci.dai,
                    lcids,
                    h.tbs() / 8,
                    ue.dl_bytes,
                    ue.pdsch_slot,
                    ue.uci_slot
                );
                lines.push((Level::INFO, line));
            }
            RntiType::Ra => {
                let nof_grants = result
                    .dl
                    .rar
                    .iter()
                    .find(|rar| rar.ra_rnti == dci.ctx.rnti)
                    .map_or(0, |rar| rar.grants.len());
                let msg3_slot = bwp
                    .msg3_delay()
                    .map(|delay| (pdcch_slot + delay).to_string())
                    .unwrap_or_else(|_| "n/a".to_string());
                let _ = write!(
                    line,
                    "SCHED: RAR, cc={}, ra-rnti={}, prbs={}, pdsch_slot={}, msg3_slot={}, nof_grants={}",
                    cc,
                    dci.ctx.rnti,
                    prbs_of(find_pdsch(grid, pdsch_slot, dci.ctx.rnti, RntiType::Ra)),
                    pdsch_slot,
                    msg3_slot,
                    nof_grants
                );
                lines.push((Level::INFO, line));
            }
            RntiType::Si if with_debug => {
                let _ = write!(
                    line,
                    "SCHED: SI{}, cc={}, prbs={}, pdsch_slot={}",
                    if dci.sii == 0 { "B" } else { " message" },
                    cc,
                    prbs_of(find_pdsch(grid, pdsch_slot, Rnti::SI, RntiType::Si)),
                    pdsch_slot
                );
                lines.push((Level::DEBUG, line));
            }
            RntiType::Si | RntiType::Tc => {}
        }
    }

    for pdcch in &result.dl.pdcch_ul {
        let dci = &pdcch.dci;
        let ue = slot_ues.get(&dci.ctx.rnti).and_then(|ue| ue.h_ul.map(|h| (ue, h)));
        let line = match (dci.ctx.rnti_type, ue) {
            (RntiType::C, Some((ue, h))) => format!(
                "SCHED: UL {}, cc={}, rnti={}, pid={}, cs={}, f={}, nrtx={}, tbs={}, bs={}, pusch_slot={}",
                if h.nof_retx() == 0 { "tx" } else { "retx" },
                cc,
                ue.rnti,
                dci.pid,
                dci.ctx.coreset_id,
                dci.ctx.format,
                h.nof_retx(),
                h.tbs() / 8,
                ue.ul_bytes,
                ue.pusch_slot
            ),
            (RntiType::Tc, Some((ue, h))) => format!(
                "SCHED: UL Msg3, cc={}, tc-rnti={}, pid={}, nrtx={}, f={}, pusch_slot={}",
                cc,
                ue.rnti,
                dci.pid,
                h.nof_retx(),
                dci.ctx.format,
                ue.pusch_slot
            ),
            _ => "SCHED: unknown rnti format".to_string(),
        };
        lines.push((Level::INFO, line));
    }

    lines
}
