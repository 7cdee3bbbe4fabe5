//! Sniff controller
//!
//! Every tick walks the connected links. A link whose rx/tx counter moved is pulled out
//! of sniff; a link idle longer than the configured threshold is asked to enter sniff.
//! The TWS link only sniffs once every phone does.

use super::LinkMode;
use crate::{
    ControllerCommand, ServiceError,
    constants::{
        BASEBAND_SLOT_US, SNIFF_ENTER_TIMEOUT_MS, SNIFF_FAST_INTERVAL_MS,
        SNIFF_TWS_FOLLOW_MAX_SLOTS, SNIFF_TWS_FOLLOW_MIN_SLOTS,
    },
    hfp::ScoState,
    rdm::{DeviceKind, RecordHandle, SnoopRole, TwsRole},
    service::Service,
    timer::{Millis, TimerId, TimerKind},
};

/// Convert a sniff interval in ms to baseband slots
#[must_use]
pub const fn sniff_interval_slots(interval_ms: u16) -> u16 {
    (interval_ms as u32 * 1000 / BASEBAND_SLOT_US) as u16
}

impl Service {
    /// The active phone link while it carries call audio
    fn holds_call_audio(&self, handle: RecordHandle) -> bool {
        self.rdm.active_phone() == Some(handle)
            && self
                .rdm
                .get(handle)
                .is_some_and(|r| matches!(r.hfp.sco, ScoState::Phone | ScoState::Hfp))
    }

    /// Sniff interval requested for a link, in slots.
    ///
    /// With two phones the TWS link and the active phone use the fast interval. With one
    /// phone the TWS link follows the active phone, and a non-active snoop master drops to
    /// the fast interval once the active phone sniffs slower.
    pub(crate) fn sniff_interval(&self, handle: RecordHandle, tws_link: bool) -> u16 {
        let mut interval_ms = self.config.sniff_interval_ms;
        let phones = self.rdm.connected_count(DeviceKind::Phone);
        let active_phone = self.rdm.active_phone();
        let is_active_link = active_phone == Some(handle);
        let snoop_master = self
            .rdm
            .get(handle)
            .is_some_and(|r| r.snoop_role == SnoopRole::Master);

        if phones > 1 && (tws_link || is_active_link) {
            interval_ms = interval_ms.min(SNIFF_FAST_INTERVAL_MS);
        } else if tws_link || (phones > 1 && snoop_master && !is_active_link) {
            let active_interval = active_phone
                .and_then(|h| self.rdm.get(h))
                .map(|r| r.power.interval);
            if let Some(active_interval) = active_interval {
                let follows = if tws_link {
                    SNIFF_TWS_FOLLOW_MIN_SLOTS < active_interval
                        && active_interval < SNIFF_TWS_FOLLOW_MAX_SLOTS
                } else {
                    active_interval > SNIFF_TWS_FOLLOW_MAX_SLOTS
                };
                if follows {
                    interval_ms = SNIFF_FAST_INTERVAL_MS;
                }
            }
        }
        sniff_interval_slots(interval_ms)
    }

    /// One pass of the sniff controller
    pub(crate) fn sniff_tick(&mut self, now: Millis) {
        if !self.config.sniff_enable {
            return;
        }
        let only_check_entering = self.tws_link.switching || self.rdm.local_role() == TwsRole::Slave;
        let mut tws_record = None;
        let mut phone_active = false;

        for handle in self.rdm.handles() {
            let Some(record) = self.rdm.get(handle) else {
                continue;
            };
            let Some(acl) = record.acl_handle else {
                continue;
            };
            if record.snoop_role == SnoopRole::Slave {
                continue;
            }
            let tws_link = !record.is_phone();
            let security_changed = record.security_changed;
            let snoop_master = record.snoop_role == SnoopRole::Master;
            let mut power = record.power;

            if power.mode == LinkMode::Active
                && power.entering
                && now.saturating_sub(power.entering_time) > Millis::from(SNIFF_ENTER_TIMEOUT_MS)
            {
                defmt::info!("[SNIFF] 0x{:04x} sniff request unanswered, retry allowed", acl);
                power.entering = false;
            }

            if !only_check_entering {
                if tws_link {
                    tws_record = Some(handle);
                }
                if !tws_link && power.mode != LinkMode::Sniff {
                    phone_active = true;
                }

                if tws_link && self.tws_link.busy {
                    power.idle_start = now;
                } else if !tws_link && !security_changed {
                    power.idle_start = now;
                } else if power.activity != power.observed_activity {
                    power.observed_activity = power.activity;
                    power.idle_start = now;
                    if power.mode == LinkMode::Sniff && !power.exiting {
                        defmt::info!("[SNIFF] 0x{:04x} busy, exit sniff", acl);
                        power.exiting = true;
                        self.command(ControllerCommand::ExitSniffMode { handle: acl });
                    }
                } else if snoop_master && self.holds_call_audio(handle) {
                    power.idle_start = now;
                } else if power.mode == LinkMode::Active
                    && !power.entering
                    && now.saturating_sub(power.idle_start) > Millis::from(self.config.idle_enter_sniff_ms)
                {
                    let interval = self.sniff_interval(handle, tws_link);
                    power.entering = true;
                    power.idle_start = now;
                    power.entering_time = now;
                    defmt::info!("[SNIFF] 0x{:04x} enter sniff, interval {}", acl, interval);
                    self.command(ControllerCommand::SniffMode {
                        handle: acl,
                        interval,
                    });
                }
            }

            if let Some(record) = self.rdm.get_mut(handle) {
                record.power = power;
            }
        }

        if only_check_entering || !phone_active {
            return;
        }
        if let Some(record) = tws_record.and_then(|h| self.rdm.get_mut(h)) {
            record.power.idle_start = now;
            match record.acl_handle {
                Some(acl) if record.power.mode == LinkMode::Sniff => {
                    defmt::info!("[SNIFF] Phone active, TWS link 0x{:04x} exits sniff", acl);
                    self.outbox.command(ControllerCommand::ExitSniffMode { handle: acl });
                }
                _ => {}
            }
        }
    }

    /// Controller reported a mode change on a link
    pub(crate) fn mode_changed(
        &mut self,
        acl: u16,
        mode: LinkMode,
        interval: u16,
        now: Millis,
    ) -> Result<(), ServiceError> {
        let handle = self.rdm.find_by_acl(acl).ok_or(ServiceError::NotFound)?;
        let record = self.rdm.get_mut(handle).ok_or(ServiceError::NotFound)?;
        record.power.mode = mode;
        record.power.interval = interval;
        record.power.entering = false;
        record.power.exiting = false;
        record.power.idle_start = now;
        let snoop_role = record.snoop_role;
        defmt::info!("[SNIFF] 0x{:04x} now {} interval {}", acl, mode, interval);

        if mode == LinkMode::Active && record.pending_disconnect.after_sniff_exit {
            record.pending_disconnect.after_sniff_exit = false;
            self.timers
                .cancel(TimerId::owned(TimerKind::DisconnectWait, handle));
            defmt::info!("[SNIFF] 0x{:04x} left sniff, disconnecting", acl);
            self.command(ControllerCommand::Disconnect { handle: acl });
            return Ok(());
        }

        if self.rdm.local_role() == TwsRole::Slave || snoop_role == SnoopRole::Slave {
            return Ok(());
        }

        match mode {
            LinkMode::Sniff if self.tws_link.switching || self.holds_call_audio(handle) => {
                defmt::info!("[SNIFF] 0x{:04x} sniff during switch or call, exiting", acl);
                if let Some(record) = self.rdm.get_mut(handle) {
                    record.power.exiting = true;
                }
                self.command(ControllerCommand::ExitSniffMode { handle: acl });
            }
            LinkMode::Active if snoop_role == SnoopRole::Master => self.sniff_tick(now),
            _ => {}
        }
        Ok(())
    }
}
