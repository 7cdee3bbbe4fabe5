//! Link-time adjuster
//!
//! Requests extra controller airtime for the A2DP active phone while another link
//! competes for it. A budget is only sent when it differs from the one last applied to
//! that link.

use crate::{ControllerCommand, constants::LINK_TIME_BOOST, rdm::RecordHandle, service::Service};
use heapless::Vec;

impl Service {
    /// Whether a pairing, search or reconnect competes with the TWS link for airtime
    fn tws_reconnecting(&self) -> bool {
        let inputs = &self.scan.inputs;
        inputs.pair_mode || inputs.tws_search || inputs.reconnect || inputs.reconnecting
    }

    fn link_time_budgets(&self) -> Vec<(RecordHandle, u8), 2> {
        let mut budgets = Vec::new();
        let Some(active) = self.rdm.a2dp_active() else {
            return budgets;
        };
        let second = self.rdm.a2dp_second();
        let stream_open = |h: RecordHandle| {
            self.rdm
                .get(h)
                .is_some_and(|r| r.a2dp.priority.stream_open)
        };
        let in_call = self
            .rdm
            .hfp_active()
            .and_then(|h| self.rdm.get(h))
            .is_some_and(|r| r.hfp.state.in_call());

        let active_budget = if in_call {
            0
        } else if second.is_some_and(stream_open) {
            LINK_TIME_BOOST
        } else if stream_open(active) && self.tws_reconnecting() {
            LINK_TIME_BOOST
        } else {
            0
        };
        budgets.push((active, active_budget)).ok();
        if let Some(second) = second {
            budgets.push((second, 0)).ok();
        }
        budgets
    }

    /// One pass of the link-time adjuster
    pub(crate) fn link_adjust_tick(&mut self) {
        for (handle, budget) in self.link_time_budgets() {
            let Some(record) = self.rdm.get_mut(handle) else {
                continue;
            };
            if record.power.link_time == budget {
                continue;
            }
            record.power.link_time = budget;
            if let Some(acl) = record.acl_handle {
                defmt::info!("[LINK] 0x{:04x} link time {}", acl, budget);
                self.outbox.command(ControllerCommand::AdjustLinkTime { handle: acl, budget });
            }
        }
    }
}
