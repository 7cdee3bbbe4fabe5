//! Power/Link Scheduler
//!
//! Two periodic ticks drive the radio power policy:
//!
//! - the sniff controller ([`sniff`]) puts idle links into sniff and pulls busy ones out
//! - the link-time adjuster ([`link_adjust`]) hands controller airtime to the phone whose
//!   audio matters when links compete

mod link_adjust;
mod sniff;

pub use sniff::sniff_interval_slots;

use crate::{
    Message, ServiceError,
    constants::{LINK_ADJUST_INTERVAL_MS, SNIFF_CHECK_INTERVAL_MS},
    service::Service,
    timer::{Millis, TimerId, TimerKind},
};

/// Link mode reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub enum LinkMode {
    /// Active mode
    #[default]
    Active,
    /// Sniff mode
    Sniff,
}

/// State of the TWS link that holds phones out of sniff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub struct TwsLinkState {
    /// Relay traffic in flight on the TWS link
    pub busy: bool,
    /// TWS role switch in progress
    pub switching: bool,
}

impl Service {
    /// Arm the periodic power ticks the configuration asks for
    pub(crate) fn start_power_timers(&mut self, now: Millis) -> Result<(), ServiceError> {
        let sniff = TimerId::global(TimerKind::SniffTick);
        if self.config.sniff_enable {
            self.timers.ensure_periodic(sniff, now, SNIFF_CHECK_INTERVAL_MS)?;
        } else {
            self.timers.cancel(sniff);
        }
        self.timers.ensure_periodic(
            TimerId::global(TimerKind::LinkAdjustTick),
            now,
            LINK_ADJUST_INTERVAL_MS,
        )
    }
}

/// Message handler for [`MessageTag::Power`](crate::message::MessageTag::Power)
pub(crate) fn handle_power(service: &mut Service, message: Message, now: Millis) -> Result<(), ServiceError> {
    match message {
        Message::ModeChanged {
            handle,
            mode,
            interval,
        } => service.mode_changed(handle, mode, interval, now),
        Message::LinkActivity { handle, count } => {
            let record = service.rdm.find_by_acl(handle).ok_or(ServiceError::NotFound)?;
            if let Some(record) = service.rdm.get_mut(record) {
                record.power.activity = count;
            }
            Ok(())
        }
        Message::TwsLinkBusy(busy) => {
            service.tws_link.busy = busy;
            Ok(())
        }
        Message::TwsSwitching(switching) => {
            service.tws_link.switching = switching;
            Ok(())
        }
        Message::AdjustLinkTime => {
            service.link_adjust_tick();
            Ok(())
        }
        _ => Err(ServiceError::InvalidArgument),
    }
}
