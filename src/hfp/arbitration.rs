//! Dual-phone HFP arbitration
//!
//! A phone entering call activity asks to become the HFP active device. It only gets
//! there if the current active phone is idle or the request is forced; otherwise it
//! waits in the pending tier and takes over when the active phone leaves its call.

use super::{ActiveTier, CallState, HfpEvent, HfpStackEvent, ScoState, transition};
use crate::{
    BluetoothAddress, ControllerCommand, Notification, ServiceError,
    rdm::{RecordHandle, TwsRole},
    service::Service,
};

/// Event the other phone re-reports while this one is idle
fn idle_report(other: CallState) -> Option<HfpEvent> {
    match other {
        CallState::Init | CallState::Linked => None,
        CallState::Incoming => Some(HfpEvent::CallIncoming),
        CallState::Outgoing => Some(HfpEvent::CallOutgoing),
        CallState::Alerted => Some(HfpEvent::CallAlerted),
        CallState::Ongoing => Some(HfpEvent::CallOngoing),
        CallState::ThreeWayIn => Some(HfpEvent::Call3WayIn),
        CallState::Multiparty => Some(HfpEvent::CallMultiparty),
        CallState::ScoEstablished => Some(HfpEvent::ScoConnected),
    }
}

impl Service {
    /// Feed one stack event to a phone and report the result
    pub(crate) fn hfp_stack_event(
        &mut self,
        record: RecordHandle,
        event: HfpStackEvent,
    ) -> Result<(), ServiceError> {
        let current = self.rdm.get(record).ok_or(ServiceError::NotFound)?;
        let old = current.hfp.state;
        let step = transition(old, current.hfp.calls, current.hfp.sco, event);

        if step.status.is_none() && self.reports_sco(record) {
            match event {
                HfpStackEvent::ScoEstablished => {
                    self.hfp_report_codec(record);
                    self.hfp_report(record, HfpEvent::ScoConnected);
                }
                HfpStackEvent::ScoReleased => self.hfp_report(record, HfpEvent::ScoDisconnected),
                _ => {}
            }
        }

        if let Some(current) = self.rdm.get_mut(record) {
            current.hfp.calls = step.calls;
            current.hfp.sco = step.sco;
        }
        defmt::debug!("[HFP] {} calls {} sco {}", event, step.calls, step.sco);

        if let Some((state, outward)) = step.status {
            defmt::info!("[HFP] {} -> {} ({})", old, state, event);
            self.hfp_set_state(record, state);
            self.hfp_call_status(record, outward, state);
        }
        Ok(())
    }

    /// HFP service level connection established
    pub(crate) fn hfp_connected(&mut self, record: RecordHandle) {
        if self.rdm.get(record).is_some_and(|r| r.hfp.state == CallState::Init) {
            self.hfp_set_state(record, CallState::Linked);
        }
    }

    /// HFP disconnected: the phone's call state is gone with it
    pub(crate) fn hfp_disconnected(&mut self, record: RecordHandle) {
        let Some(current) = self.rdm.get(record) else {
            return;
        };
        let old = current.hfp.state;
        let was_active = self.rdm.hfp_active() == Some(record);

        self.hfp_set_state(record, CallState::Init);
        if let Some(current) = self.rdm.get_mut(record) {
            if current.hfp.sco == ScoState::Phone {
                current.hfp.sco = ScoState::Init;
            }
            current.hfp.calls = Default::default();
        }
        // a phone switched off mid-call never reports the call exit
        if old.in_call() && was_active {
            self.hfp_call_status(record, HfpEvent::CallExit, CallState::Init);
        }
    }

    /// Store the negotiated voice codec
    pub(crate) fn hfp_codec(
        &mut self,
        record: RecordHandle,
        codec_id: u8,
        sample_rate_khz: u8,
    ) -> Result<(), ServiceError> {
        let current = self.rdm.get_mut(record).ok_or(ServiceError::NotFound)?;
        current.hfp.codec.codec_id = codec_id;
        current.hfp.codec.sample_rate_khz = sample_rate_khz;
        defmt::info!("[HFP] {} codec {} {} kHz", current.address, codec_id, sample_rate_khz);
        if self.reports_sco(record) {
            self.hfp_report_codec(record);
        }
        Ok(())
    }

    /// User makes a phone the HFP active device
    pub(crate) fn hfp_switch_active(&mut self, addr: BluetoothAddress) -> Result<(), ServiceError> {
        let record = self.rdm.find(addr).ok_or(ServiceError::NotFound)?;
        self.hfp_activate(record, true, true)
    }

    /// Move call audio between the phone and the headset.
    ///
    /// With a second phone in a call, the switch hands the active role to it instead.
    pub(crate) fn hfp_switch_sound_source(&mut self) -> Result<(), ServiceError> {
        let active = self.rdm.hfp_active().ok_or(ServiceError::NotFound)?;
        let second_in_call = self
            .rdm
            .hfp_second()
            .filter(|&h| self.rdm.get(h).is_some_and(|r| r.hfp.state.in_call()));
        let current = self.rdm.get(active).ok_or(ServiceError::NotFound)?;
        let (state, sco) = (current.hfp.state, current.hfp.sco);
        let acl = current.acl_handle.ok_or(ServiceError::NotFound)?;

        if sco == ScoState::Hfp {
            if let Some(second) = second_in_call {
                self.hfp_activate(second, true, true)?;
            }
            if let Some(current) = self.rdm.get_mut(active) {
                current.hfp.sco = ScoState::Disconnect;
            }
            defmt::info!("[HFP] Sound source to phone, 0x{:04x}", acl);
            self.command(ControllerCommand::DisconnectSco { handle: acl });
            return Ok(());
        }

        if let Some(second) = second_in_call {
            return self.hfp_activate(second, true, true);
        }
        // ringing phones open their own SCO; only reclaim one the phone already holds
        if state.is_talking() || (state.is_setup() && sco == ScoState::Phone) {
            defmt::info!("[HFP] Sound source to headset, 0x{:04x}", acl);
            self.command(ControllerCommand::CreateSco { handle: acl });
        }
        Ok(())
    }

    fn hfp_set_state(&mut self, record: RecordHandle, state: CallState) {
        let Some(current) = self.rdm.get_mut(record) else {
            return;
        };
        let old = current.hfp.state;
        current.hfp.state = state;
        let result = match (old.in_call(), state.in_call()) {
            (false, true) => self.hfp_activate(record, true, false),
            (true, false) => self.hfp_activate(record, false, false),
            _ => Ok(()),
        };
        if let Err(error) = result {
            defmt::warn!("[HFP] Active update failed: {}", error);
        }
    }

    fn set_tier(&mut self, record: RecordHandle, tier: ActiveTier) {
        if let Some(current) = self.rdm.get_mut(record) {
            if current.hfp.tier != tier {
                defmt::info!("[HFP] {} {} -> {}", current.address, current.hfp.tier, tier);
                current.hfp.tier = tier;
            }
        }
    }

    /// Ask for (or give up) the HFP active role
    pub(crate) fn hfp_activate(
        &mut self,
        record: RecordHandle,
        activate: bool,
        force: bool,
    ) -> Result<(), ServiceError> {
        let current = self
            .rdm
            .get(record)
            .filter(|r| r.is_phone() && r.is_connected())
            .ok_or(ServiceError::NotFound)?;
        let (state, tier) = (current.hfp.state, current.hfp.tier);
        let other = self
            .rdm
            .iter()
            .find(|&(h, r)| h != record && r.is_phone() && r.is_connected())
            .map(|(h, r)| (h, r.hfp.state, r.hfp.tier));

        let Some((other, other_state, other_tier)) = other else {
            let tier = if activate {
                ActiveTier::Actived
            } else {
                ActiveTier::Deactive
            };
            self.set_tier(record, tier);
            return Ok(());
        };

        if activate {
            if !state.in_call() && !force {
                return Ok(());
            }
            if other_tier == ActiveTier::Actived && other_state.in_call() && !force {
                self.set_tier(record, ActiveTier::Pending);
            } else if tier != ActiveTier::Actived {
                self.set_tier(record, ActiveTier::Actived);
                if other_state.in_call() {
                    self.set_tier(other, ActiveTier::Pending);
                    self.hfp_active_changed(record, other);
                } else {
                    self.set_tier(other, ActiveTier::Deactive);
                }
            }
            return Ok(());
        }

        match other_tier {
            ActiveTier::Actived => self.set_tier(record, ActiveTier::Deactive),
            ActiveTier::Pending => {
                self.set_tier(other, ActiveTier::Actived);
                self.set_tier(record, ActiveTier::Deactive);
                self.hfp_active_changed(other, record);
            }
            ActiveTier::Deactive => {
                let tier = if state == CallState::Init {
                    ActiveTier::Deactive
                } else {
                    ActiveTier::Pending
                };
                self.set_tier(record, tier);
            }
        }
        Ok(())
    }

    /// The active phone changed while the previous one still had call activity
    fn hfp_active_changed(&mut self, active: RecordHandle, previous: RecordHandle) {
        let (Some(now_active), Some(before)) = (self.rdm.get(active), self.rdm.get(previous)) else {
            return;
        };
        let (state, sco, acl) = (now_active.hfp.state, now_active.hfp.sco, now_active.acl_handle);
        let (active_addr, previous_addr) = (now_active.address, before.address);
        defmt::info!("[HFP] Active phone {} -> {}", previous_addr, active_addr);
        self.notify(Notification::HfpActiveChanged {
            active: active_addr,
            previous: previous_addr,
        });

        if sco == ScoState::Hfp {
            self.hfp_report_codec(active);
            self.hfp_report(active, HfpEvent::ScoConnected);
        } else if state.is_talking() || (state.is_setup() && sco == ScoState::Phone) {
            if let Some(acl) = acl {
                self.command(ControllerCommand::CreateSco { handle: acl });
            }
        }
    }

    /// Report a call status change, taking the other phone's calls into account
    fn hfp_call_status(&mut self, record: RecordHandle, event: HfpEvent, state: CallState) {
        let Some(second) = self.rdm.hfp_second() else {
            if state == CallState::ScoEstablished {
                self.hfp_report_codec(record);
            }
            self.hfp_report(record, event);
            return;
        };
        let other = if record == second {
            self.rdm.hfp_active()
        } else {
            Some(second)
        };
        let Some(other) = other else {
            self.hfp_report(record, event);
            return;
        };
        let other_state = self.rdm.get(other).map(|r| r.hfp.state).unwrap_or_default();
        defmt::debug!("[HFP] Status {} state {} other {}", event, state, other_state);

        use CallState as S;
        match state {
            S::Init | S::Linked => match idle_report(other_state) {
                Some(other_event) => self.hfp_report(other, other_event),
                None => self.hfp_report(record, event),
            },
            S::Incoming | S::Outgoing | S::Alerted => match other_state {
                S::Init | S::Linked => self.hfp_report(record, event),
                S::ThreeWayIn | S::Multiparty => self.hfp_report(record, HfpEvent::CallMultiparty),
                _ if matches!(state, S::Outgoing | S::Alerted) => {
                    self.hfp_report(record, HfpEvent::Call3WayOut);
                }
                _ => self.hfp_report(record, HfpEvent::Call3WayIn),
            },
            S::Ongoing => match other_state {
                S::Init | S::Linked => self.hfp_report(record, event),
                S::Incoming | S::Outgoing | S::Alerted => self.hfp_report(record, HfpEvent::Call3WayIn),
                _ => self.hfp_report(record, HfpEvent::CallMultiparty),
            },
            S::ScoEstablished => {
                if record != second {
                    self.hfp_report_codec(record);
                    self.hfp_report(record, event);
                }
            }
            S::ThreeWayIn | S::Multiparty => self.hfp_report(record, event),
        }
    }

    /// SCO events of a record reach the application
    fn reports_sco(&self, record: RecordHandle) -> bool {
        self.rdm.hfp_active() == Some(record)
            || self.rdm.get(record).is_some_and(|r| r.tws_role == TwsRole::Slave)
    }

    fn hfp_report_codec(&mut self, record: RecordHandle) {
        if let Some(codec) = self.rdm.get(record).map(|r| r.hfp.codec) {
            self.hfp_report(
                record,
                HfpEvent::CodecInfo {
                    codec_id: codec.codec_id,
                    sample_rate_khz: codec.sample_rate_khz,
                },
            );
        }
    }

    fn hfp_report(&mut self, record: RecordHandle, event: HfpEvent) {
        if let Some(addr) = self.rdm.get(record).map(|r| r.address) {
            defmt::info!("[HFP] {} {}", addr, event);
            self.notify(Notification::Hfp { addr, event });
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        BluetoothAddress, ControllerCommand, Message, Notification, Service, ServiceConfig,
        constants::{HFP_CODEC_CVSD, HFP_DEFAULT_SAMPLE_RATE_KHZ},
        hfp::{ActiveTier, CallIndicator, CallState, HfpEvent, ScoState},
        rdm::Profile,
    };

    fn addr(last: u8) -> BluetoothAddress {
        BluetoothAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, last])
    }

    fn running() -> Service {
        let mut service = Service::new(ServiceConfig::default()).unwrap();
        service.handle(Message::Init, 0).unwrap();
        service.take_commands();
        service
    }

    fn phone(service: &mut Service, last: u8, acl: u16) {
        service
            .handle(
                Message::AclConnected {
                    addr: addr(last),
                    handle: acl,
                },
                0,
            )
            .unwrap();
        service
            .handle(
                Message::ProfileConnected {
                    handle: acl,
                    profile: Profile::Hfp,
                },
                0,
            )
            .unwrap();
        service.take_notifications();
        service.take_commands();
    }

    fn indicate(service: &mut Service, acl: u16, indicator: CallIndicator) {
        service
            .handle(
                Message::HfpIndicator {
                    handle: acl,
                    indicator,
                },
                0,
            )
            .unwrap();
    }

    fn sco(service: &mut Service, acl: u16, established: bool) {
        service
            .handle(
                Message::HfpSco {
                    handle: acl,
                    established,
                },
                0,
            )
            .unwrap();
    }

    fn hfp_events(service: &mut Service) -> heapless::Vec<(u8, HfpEvent), 16> {
        service
            .take_notifications()
            .iter()
            .filter_map(|n| match n {
                Notification::Hfp { addr, event } => Some((addr.as_bytes()[5], *event)),
                _ => None,
            })
            .collect()
    }

    fn tier(service: &Service, last: u8) -> ActiveTier {
        let record = service.rdm.find(addr(last)).unwrap();
        service.rdm.get(record).unwrap().hfp.tier
    }

    #[test]
    fn test_connect_links_phone() {
        let mut service = running();
        phone(&mut service, 1, 0x40);
        let record = service.rdm.find(addr(1)).unwrap();
        assert_eq!(service.rdm.get(record).unwrap().hfp.state, CallState::Linked);
    }

    #[test]
    fn test_single_phone_call() {
        let mut service = running();
        phone(&mut service, 1, 0x40);

        indicate(&mut service, 0x40, CallIndicator::CallSetup(1));
        assert_eq!(hfp_events(&mut service).as_slice(), &[(1, HfpEvent::CallIncoming)]);
        assert_eq!(tier(&service, 1), ActiveTier::Actived);

        indicate(&mut service, 0x40, CallIndicator::Call(1));
        indicate(&mut service, 0x40, CallIndicator::CallSetup(0));
        assert_eq!(hfp_events(&mut service).as_slice(), &[(1, HfpEvent::CallOngoing)]);

        indicate(&mut service, 0x40, CallIndicator::Call(0));
        assert_eq!(hfp_events(&mut service).as_slice(), &[(1, HfpEvent::CallExit)]);
        assert_eq!(tier(&service, 1), ActiveTier::Deactive);
    }

    #[test]
    fn test_sco_without_call_reports_codec() {
        let mut service = running();
        phone(&mut service, 1, 0x40);

        sco(&mut service, 0x40, true);
        assert_eq!(
            hfp_events(&mut service).as_slice(),
            &[
                (
                    1,
                    HfpEvent::CodecInfo {
                        codec_id: HFP_CODEC_CVSD,
                        sample_rate_khz: HFP_DEFAULT_SAMPLE_RATE_KHZ
                    }
                ),
                (1, HfpEvent::ScoConnected)
            ]
        );
    }

    #[test]
    fn test_second_call_waits_then_takes_over() {
        let mut service = running();
        phone(&mut service, 1, 0x40);
        phone(&mut service, 2, 0x41);

        indicate(&mut service, 0x40, CallIndicator::Call(1));
        assert_eq!(tier(&service, 1), ActiveTier::Actived);
        hfp_events(&mut service);

        indicate(&mut service, 0x41, CallIndicator::CallSetup(1));
        assert_eq!(tier(&service, 2), ActiveTier::Pending);
        assert_eq!(hfp_events(&mut service).as_slice(), &[(2, HfpEvent::Call3WayIn)]);

        indicate(&mut service, 0x40, CallIndicator::Call(0));
        assert_eq!(tier(&service, 1), ActiveTier::Deactive);
        assert_eq!(tier(&service, 2), ActiveTier::Actived);
        let notifications = service.take_notifications();
        assert!(notifications.contains(&Notification::HfpActiveChanged {
            active: addr(2),
            previous: addr(1)
        }));
        // the idle phone re-reports the ringing one
        assert!(notifications.contains(&Notification::Hfp {
            addr: addr(2),
            event: HfpEvent::CallIncoming
        }));
    }

    #[test]
    fn test_sco_of_pending_phone_not_reported() {
        let mut service = running();
        phone(&mut service, 1, 0x40);
        phone(&mut service, 2, 0x41);
        indicate(&mut service, 0x40, CallIndicator::Call(1));
        indicate(&mut service, 0x41, CallIndicator::Call(1));
        assert_eq!(tier(&service, 2), ActiveTier::Pending);
        hfp_events(&mut service);

        sco(&mut service, 0x41, true);
        assert!(hfp_events(&mut service).is_empty());
        let record = service.rdm.find(addr(2)).unwrap();
        assert_eq!(service.rdm.get(record).unwrap().hfp.sco, ScoState::Hfp);

        sco(&mut service, 0x40, true);
        let events = hfp_events(&mut service);
        assert_eq!(events.last(), Some(&(1, HfpEvent::ScoConnected)));
    }

    #[test]
    fn test_forced_switch_moves_audio() {
        let mut service = running();
        phone(&mut service, 1, 0x40);
        phone(&mut service, 2, 0x41);
        indicate(&mut service, 0x40, CallIndicator::Call(1));
        indicate(&mut service, 0x41, CallIndicator::Call(1));
        service.take_notifications();

        service
            .handle(Message::HfpSwitchActive { addr: addr(2) }, 0)
            .unwrap();
        assert_eq!(tier(&service, 2), ActiveTier::Actived);
        assert_eq!(tier(&service, 1), ActiveTier::Pending);
        assert!(service.take_notifications().contains(&Notification::HfpActiveChanged {
            active: addr(2),
            previous: addr(1)
        }));
        assert!(
            service
                .take_commands()
                .contains(&ControllerCommand::CreateSco { handle: 0x41 })
        );
    }

    #[test]
    fn test_switch_sound_source() {
        let mut service = running();
        phone(&mut service, 1, 0x40);
        indicate(&mut service, 0x40, CallIndicator::Call(1));
        sco(&mut service, 0x40, true);
        service.take_commands();

        service.handle(Message::HfpSwitchSoundSource, 0).unwrap();
        assert_eq!(
            service.take_commands().as_slice(),
            &[ControllerCommand::DisconnectSco { handle: 0x40 }]
        );

        sco(&mut service, 0x40, false);
        let record = service.rdm.find(addr(1)).unwrap();
        assert_eq!(service.rdm.get(record).unwrap().hfp.sco, ScoState::Phone);

        service.handle(Message::HfpSwitchSoundSource, 0).unwrap();
        assert_eq!(
            service.take_commands().as_slice(),
            &[ControllerCommand::CreateSco { handle: 0x40 }]
        );
    }

    #[test]
    fn test_disconnect_mid_call_reports_exit() {
        let mut service = running();
        phone(&mut service, 1, 0x40);
        indicate(&mut service, 0x40, CallIndicator::Call(1));
        hfp_events(&mut service);

        service
            .handle(
                Message::ProfileDisconnected {
                    handle: 0x40,
                    profile: Profile::Hfp,
                },
                0,
            )
            .unwrap();
        let record = service.rdm.find(addr(1)).unwrap();
        assert_eq!(service.rdm.get(record).unwrap().hfp.state, CallState::Init);
        assert!(hfp_events(&mut service).contains(&(1, HfpEvent::CallExit)));
    }
}
