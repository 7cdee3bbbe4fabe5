use super::Service;
use crate::{
    BluetoothAddress, ControllerCommand, Message, Notification, ServiceError,
    constants::{DISCONNECT_WAIT_MS, HCI_CONNECTION_TIMEOUT, HCI_LIMITED_RESOURCES, MAX_RECORDS},
    power::LinkMode,
    rdm::{DeviceKind, PendingDisconnect, Profile, ProfileState, RecordHandle, TwsRole},
    timer::{Millis, TimerId, TimerKind},
};

/// Incoming page remembered until the ACL link completes or fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub(crate) struct ConnectRequest {
    pub(crate) addr: BluetoothAddress,
    pub(crate) class_of_device: u32,
}

/// Message handler for [`MessageTag::Connection`](crate::message::MessageTag::Connection)
pub(crate) fn handle_connection(
    service: &mut Service,
    message: Message,
    now: Millis,
) -> Result<(), ServiceError> {
    match message {
        Message::ConnectRequest {
            addr,
            class_of_device,
        } => service.connect_request(addr, class_of_device),
        Message::AclConnected { addr, handle } => service.acl_connected(addr, handle, now),
        Message::AclConnectFailed { addr, reason } => {
            defmt::warn!("[RDM] Connect to {} failed: 0x{:02x}", addr, reason);
            service.take_connect_request(addr);
            service.scan.inputs.connect_pending = false;
            service.notify(Notification::ConnectFailed { addr, reason });
            service.schedule_scan_update(now)
        }
        Message::AclDisconnected { handle, reason } => service.acl_disconnected(handle, reason, now),
        Message::SecurityChanged { handle } => {
            let record = service.record_by_acl(handle)?;
            record.security_changed = true;
            Ok(())
        }
        Message::RoleChanged { addr, role } => service.rdm.set_controller_role(addr, role),
        Message::RemoteName { addr, name } => {
            let handle = service.rdm.find(addr).ok_or(ServiceError::NotFound)?;
            if let Some(record) = service.rdm.get_mut(handle) {
                record.set_name(&name);
            }
            service.notify(Notification::RemoteName { addr, name });
            Ok(())
        }
        Message::RssiRead { handle, rssi } => {
            service.record_by_acl(handle)?.power.rssi = rssi;
            Ok(())
        }
        Message::LinkQualityRead { handle, quality } => {
            service.record_by_acl(handle)?.power.link_quality = quality;
            Ok(())
        }
        Message::DeviceInfo {
            handle,
            vendor_id,
            class_of_device,
        } => {
            let record = service.record_by_acl(handle)?;
            if vendor_id.is_some() {
                record.vendor_id = vendor_id;
            }
            if class_of_device != 0 {
                record.class_of_device = class_of_device;
            }
            Ok(())
        }
        Message::ProfileConnected { handle, profile } => service.profile_connected(handle, profile, now),
        Message::ProfileDisconnected { handle, profile } => service.profile_disconnected(handle, profile),
        Message::SetTwsRole { handle, role } => {
            let record = service.rdm.find_by_acl(handle).ok_or(ServiceError::NotFound)?;
            service.rdm.set_tws_role(record, role)?;
            service.schedule_scan_update(now)
        }
        Message::SetSnoopRole { handle, role } => {
            let record = service.rdm.find_by_acl(handle).ok_or(ServiceError::NotFound)?;
            service.rdm.set_snoop_role(record, role)
        }
        Message::SetResume { addr, halted } => {
            let handle = service.rdm.find(addr).ok_or(ServiceError::NotFound)?;
            let record = service.rdm.get_mut(handle).ok_or(ServiceError::NotFound)?;
            record.resume.halted = halted;
            Ok(())
        }
        Message::Connect { addr } => {
            if service.rdm.find(addr).is_some() {
                return Err(ServiceError::AlreadyExists);
            }
            if service.scan.inputs.connect_pending {
                return Err(ServiceError::Busy);
            }
            if service.no_room_for_phone() {
                defmt::info!("[RDM] No room to connect {}", addr);
                return Err(ServiceError::OutOfResources);
            }
            defmt::info!("[RDM] Connecting to {}", addr);
            service.scan.inputs.connect_pending = true;
            service.command(ControllerCommand::Connect { addr });
            service.schedule_scan_update(now)
        }
        Message::Disconnect { addr } => service.request_disconnect(addr, now),
        _ => Err(ServiceError::InvalidArgument),
    }
}

impl Service {
    fn record_by_acl(&mut self, acl: u16) -> Result<&mut crate::rdm::ConnectionRecord, ServiceError> {
        let handle = self.rdm.find_by_acl(acl).ok_or(ServiceError::NotFound)?;
        self.rdm.get_mut(handle).ok_or(ServiceError::NotFound)
    }

    fn take_connect_request(&mut self, addr: BluetoothAddress) -> Option<ConnectRequest> {
        let index = self.connect_requests.iter().position(|r| r.addr == addr)?;
        Some(self.connect_requests.remove(index))
    }

    /// Whether a page from a new device has to be refused
    fn no_room_for_phone(&self) -> bool {
        if self.rdm.iter().count() >= MAX_RECORDS {
            return true;
        }
        let phones = self.rdm.connected_count(DeviceKind::Phone);
        phones >= usize::from(self.config.max_phones)
            && (self.rdm.tws_connected() || !self.config.support_tws)
    }

    fn connect_request(&mut self, addr: BluetoothAddress, class_of_device: u32) -> Result<(), ServiceError> {
        if self.rdm.find(addr).is_some() {
            defmt::warn!("[RDM] Page from tracked device {}", addr);
            return Err(ServiceError::AlreadyExists);
        }
        if self.no_room_for_phone() {
            defmt::info!("[RDM] Refusing {}, no room", addr);
            self.command(ControllerCommand::RejectConnection {
                addr,
                reason: HCI_LIMITED_RESOURCES,
            });
            return Ok(());
        }

        self.take_connect_request(addr);
        if self.connect_requests.is_full() {
            self.connect_requests.remove(0);
        }
        self.connect_requests
            .push(ConnectRequest {
                addr,
                class_of_device,
            })
            .ok();
        self.command(ControllerCommand::AcceptConnection { addr });
        Ok(())
    }

    fn acl_connected(&mut self, addr: BluetoothAddress, acl: u16, now: Millis) -> Result<(), ServiceError> {
        let resumed = self.rdm.retained(addr).is_some();
        let request = self.take_connect_request(addr);
        self.scan.inputs.connect_pending = false;
        let handle = match self.rdm.add(addr, acl, now) {
            Ok(handle) => handle,
            Err(error) => {
                // the controller link exists but nothing can track it
                defmt::warn!("[RDM] No record for {}, dropping 0x{:04x}", addr, acl);
                self.command(ControllerCommand::Disconnect { handle: acl });
                self.notify(Notification::ConnectFailed {
                    addr,
                    reason: HCI_LIMITED_RESOURCES,
                });
                self.schedule_scan_update(now)?;
                return Err(error);
            }
        };

        let saved = self.saved_volume(addr);
        if let Some(record) = self.rdm.get_mut(handle) {
            // a resumed record already carries the volumes it was released with
            if saved.found || !resumed {
                record.music_volume = saved.music;
                record.call_volume = saved.call;
            }
            if let Some(request) = request {
                record.class_of_device = request.class_of_device;
            }
        }

        self.notify(Notification::Connected { addr, handle: acl });
        self.schedule_scan_update(now)
    }

    fn acl_disconnected(&mut self, acl: u16, reason: u8, now: Millis) -> Result<(), ServiceError> {
        let handle = self.rdm.find_by_acl(acl).ok_or(ServiceError::NotFound)?;
        let profiles = self.rdm.get(handle).ok_or(ServiceError::NotFound)?.profiles;
        for profile in [Profile::A2dp, Profile::Avrcp, Profile::Hfp] {
            if profiles.is_connected(profile) {
                self.profile_going_down(handle, profile);
            }
        }

        let record = self.rdm.get_mut(handle).ok_or(ServiceError::NotFound)?;
        if reason == HCI_CONNECTION_TIMEOUT {
            record.resume.timeout_disconnected = true;
        }
        record.profiles = ProfileState::default();
        record.acl_handle = None;
        let (addr, music, call) = (record.address, record.music_volume, record.call_volume);
        let phone = record.is_phone();

        if phone {
            self.save_volume(addr, music, call);
        }
        self.rdm.remove(addr, &mut self.timers)?;
        defmt::info!("[RDM] {} disconnected, reason 0x{:02x}", addr, reason);
        self.notify(Notification::Disconnected { addr, reason });
        self.link_adjust_tick();
        self.schedule_scan_update(now)
    }

    /// Profile teardown hooks; run while the profile flag is still set
    fn profile_going_down(&mut self, handle: RecordHandle, profile: Profile) {
        match profile {
            Profile::A2dp => self.a2dp_disconnected(handle),
            Profile::Avrcp => self.a2dp_avrcp_disconnected(handle),
            Profile::Hfp => self.hfp_disconnected(handle),
            _ => {}
        }
    }

    fn profile_connected(&mut self, acl: u16, profile: Profile, now: Millis) -> Result<(), ServiceError> {
        if profile == Profile::Acl {
            return Err(ServiceError::InvalidArgument);
        }
        let handle = self.rdm.set_profile_connected(acl, profile, true)?;
        match profile {
            Profile::Avrcp => self.a2dp_avrcp_connected(handle, now)?,
            Profile::Hfp => self.hfp_connected(handle),
            _ => {}
        }
        if let Some(record) = self.rdm.get(handle) {
            let addr = record.address;
            self.notify(Notification::ProfileConnected { addr, profile });
        }
        Ok(())
    }

    fn profile_disconnected(&mut self, acl: u16, profile: Profile) -> Result<(), ServiceError> {
        if profile == Profile::Acl {
            return Err(ServiceError::InvalidArgument);
        }
        let handle = self.rdm.find_by_acl(acl).ok_or(ServiceError::NotFound)?;
        let record = self.rdm.get(handle).ok_or(ServiceError::NotFound)?;
        if !record.profiles.is_connected(profile) {
            return Err(ServiceError::AlreadyInState);
        }
        let addr = record.address;
        let last_instance = record.profiles.instances(profile) == 1;

        if last_instance {
            self.profile_going_down(handle, profile);
        }
        self.rdm.set_profile_connected(acl, profile, false)?;
        self.notify(Notification::ProfileDisconnected { addr, profile });
        Ok(())
    }

    /// Disconnect a device once it is safe to.
    ///
    /// A link in sniff is brought back to active first; a streaming phone is paused
    /// first. The disconnect itself is issued when that completes, or when
    /// `DISCONNECT_WAIT_MS` passes without it.
    pub(crate) fn request_disconnect(
        &mut self,
        addr: BluetoothAddress,
        now: Millis,
    ) -> Result<(), ServiceError> {
        let handle = self.rdm.find(addr).ok_or(ServiceError::NotFound)?;
        let record = self.rdm.get_mut(handle).ok_or(ServiceError::NotFound)?;
        let acl = record.acl_handle.ok_or(ServiceError::NotFound)?;
        if record.pending_disconnect.any() {
            return Err(ServiceError::Busy);
        }

        if record.power.mode == LinkMode::Sniff {
            defmt::info!("[RDM] {} in sniff, disconnect after exit", addr);
            record.pending_disconnect.after_sniff_exit = true;
            record.power.exiting = true;
            self.outbox.command(ControllerCommand::ExitSniffMode { handle: acl });
        } else if record.tws_role == TwsRole::None
            && record.profiles.is_connected(Profile::Avrcp)
            && record.a2dp.priority.stream_open
        {
            defmt::info!("[RDM] {} streaming, disconnect after pause", addr);
            record.pending_disconnect.after_avrcp_pause = true;
            self.outbox.command(ControllerCommand::AvrcpPause { handle: acl });
        } else {
            self.outbox.command(ControllerCommand::Disconnect { handle: acl });
            return Ok(());
        }
        self.timers.start(
            TimerId::owned(TimerKind::DisconnectWait, handle),
            now,
            DISCONNECT_WAIT_MS,
        )
    }

    /// Give up waiting for a sniff exit or a pause and disconnect anyway
    pub(crate) fn disconnect_wait_expired(&mut self, handle: RecordHandle) -> Result<(), ServiceError> {
        let record = self.rdm.get_mut(handle).ok_or(ServiceError::NotFound)?;
        if !record.pending_disconnect.any() {
            return Ok(());
        }
        record.pending_disconnect = PendingDisconnect::default();
        let acl = record.acl_handle.ok_or(ServiceError::NotFound)?;
        defmt::warn!("[RDM] 0x{:04x} disconnect wait expired, disconnecting", acl);
        self.outbox.command(ControllerCommand::Disconnect { handle: acl });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        BluetoothAddress, ControllerCommand, Message, Notification, Service, ServiceConfig,
        ServiceError,
        a2dp::MediaState,
        constants::HCI_LIMITED_RESOURCES,
        power::LinkMode,
        rdm::{Profile, TwsRole},
    };

    fn addr(last: u8) -> BluetoothAddress {
        BluetoothAddress::new([0x22, 0x33, 0x44, 0x55, 0x66, last])
    }

    fn running() -> Service {
        let mut service = Service::new(ServiceConfig::default()).unwrap();
        service.handle(Message::Init, 0).unwrap();
        service.take_commands();
        service.take_notifications();
        service
    }

    fn connect(service: &mut Service, last: u8, acl: u16) {
        service
            .handle(
                Message::AclConnected {
                    addr: addr(last),
                    handle: acl,
                },
                0,
            )
            .unwrap();
    }

    fn profile(service: &mut Service, acl: u16, profile: Profile) {
        service
            .handle(Message::ProfileConnected { handle: acl, profile }, 0)
            .unwrap();
    }

    fn disconnect(service: &mut Service, acl: u16, reason: u8) {
        service
            .handle(Message::AclDisconnected { handle: acl, reason }, 100)
            .unwrap();
    }

    #[test]
    fn test_connect_and_disconnect_notify() {
        let mut service = running();
        connect(&mut service, 1, 0x40);
        disconnect(&mut service, 0x40, 0x13);

        let notifications = service.take_notifications();
        assert_eq!(
            notifications.first(),
            Some(&Notification::Connected {
                addr: addr(1),
                handle: 0x40
            })
        );
        assert!(notifications.contains(&Notification::Disconnected {
            addr: addr(1),
            reason: 0x13
        }));
        assert!(service.rdm.find(addr(1)).is_none());
        assert!(service.rdm.retained(addr(1)).is_none());
    }

    #[test]
    fn test_supervision_timeout_retains_record() {
        let mut service = running();
        connect(&mut service, 1, 0x40);
        service
            .handle(
                Message::SetVolume {
                    addr: addr(1),
                    music: Some(4),
                    call: Some(2),
                },
                0,
            )
            .unwrap();
        disconnect(&mut service, 0x40, 0x08);

        let retained = service.rdm.retained(addr(1)).unwrap();
        assert!(retained.resume.timeout_disconnected);
        assert_eq!(retained.music_volume, 4);

        connect(&mut service, 1, 0x41);
        let record = service.rdm.get(service.rdm.find(addr(1)).unwrap()).unwrap();
        assert_eq!((record.music_volume, record.call_volume), (4, 2));
    }

    #[test]
    fn test_new_device_gets_default_volumes() {
        let mut service = running();
        connect(&mut service, 1, 0x40);
        let record = service.rdm.get(service.rdm.find(addr(1)).unwrap()).unwrap();
        assert_eq!((record.music_volume, record.call_volume), (15, 10));
    }

    #[test]
    fn test_disconnect_clears_profiles_and_call() {
        let mut service = running();
        connect(&mut service, 1, 0x40);
        profile(&mut service, 0x40, Profile::A2dp);
        profile(&mut service, 0x40, Profile::Hfp);
        service
            .handle(
                Message::A2dpMedia {
                    handle: 0x40,
                    state: MediaState::Start,
                },
                0,
            )
            .unwrap();
        disconnect(&mut service, 0x40, 0x13);
        assert!(service.rdm.a2dp_active().is_none());
        assert!(service.rdm.hfp_active().is_none());
        assert_eq!(service.rdm.iter().count(), 0);
    }

    #[test]
    fn test_profile_events_for_unknown_state() {
        let mut service = running();
        connect(&mut service, 1, 0x40);
        assert_eq!(
            service.handle(
                Message::ProfileDisconnected {
                    handle: 0x40,
                    profile: Profile::Hfp
                },
                0
            ),
            Err(ServiceError::AlreadyInState)
        );
        assert_eq!(
            service.handle(
                Message::ProfileConnected {
                    handle: 0x40,
                    profile: Profile::Acl
                },
                0
            ),
            Err(ServiceError::InvalidArgument)
        );

        profile(&mut service, 0x40, Profile::Spp);
        profile(&mut service, 0x40, Profile::Spp);
        service
            .handle(
                Message::ProfileDisconnected {
                    handle: 0x40,
                    profile: Profile::Spp,
                },
                0,
            )
            .unwrap();
        let record = service.rdm.get(service.rdm.find(addr(1)).unwrap()).unwrap();
        assert_eq!(record.profiles().instances(Profile::Spp), 1);
    }

    #[test]
    fn test_connect_once_at_a_time() {
        let mut service = running();
        service.handle(Message::Connect { addr: addr(1) }, 0).unwrap();
        assert_eq!(
            service.handle(Message::Connect { addr: addr(2) }, 0),
            Err(ServiceError::Busy)
        );
        assert!(
            service
                .take_commands()
                .contains(&ControllerCommand::Connect { addr: addr(1) })
        );

        connect(&mut service, 1, 0x40);
        assert!(!service.scan.inputs.connect_pending);
        assert_eq!(
            service.handle(Message::Connect { addr: addr(1) }, 0),
            Err(ServiceError::AlreadyExists)
        );
    }

    #[test]
    fn test_disconnect_waits_for_sniff_exit() {
        let mut service = running();
        connect(&mut service, 1, 0x40);
        service
            .handle(
                Message::ModeChanged {
                    handle: 0x40,
                    mode: LinkMode::Sniff,
                    interval: 800,
                },
                0,
            )
            .unwrap();
        service.take_commands();

        service.handle(Message::Disconnect { addr: addr(1) }, 10).unwrap();
        assert_eq!(
            service.take_commands().as_slice(),
            &[ControllerCommand::ExitSniffMode { handle: 0x40 }]
        );
        assert_eq!(
            service.handle(Message::Disconnect { addr: addr(1) }, 20),
            Err(ServiceError::Busy)
        );

        service
            .handle(
                Message::ModeChanged {
                    handle: 0x40,
                    mode: LinkMode::Active,
                    interval: 0,
                },
                30,
            )
            .unwrap();
        assert!(
            service
                .take_commands()
                .contains(&ControllerCommand::Disconnect { handle: 0x40 })
        );
    }

    #[test]
    fn test_disconnect_pauses_stream_first() {
        let mut service = running();
        connect(&mut service, 1, 0x40);
        profile(&mut service, 0x40, Profile::A2dp);
        profile(&mut service, 0x40, Profile::Avrcp);
        service
            .handle(
                Message::A2dpMedia {
                    handle: 0x40,
                    state: MediaState::Start,
                },
                0,
            )
            .unwrap();
        service.take_commands();

        service.handle(Message::Disconnect { addr: addr(1) }, 10).unwrap();
        assert!(
            service
                .take_commands()
                .contains(&ControllerCommand::AvrcpPause { handle: 0x40 })
        );

        service
            .handle(
                Message::A2dpMedia {
                    handle: 0x40,
                    state: MediaState::Suspend,
                },
                20,
            )
            .unwrap();
        assert!(
            service
                .take_commands()
                .contains(&ControllerCommand::Disconnect { handle: 0x40 })
        );
    }

    #[test]
    fn test_link_beyond_pool_is_dropped() {
        let mut service = running();
        connect(&mut service, 1, 0x40);
        connect(&mut service, 2, 0x41);
        connect(&mut service, 3, 0x42);
        assert_eq!(
            service.handle(Message::Connect { addr: addr(4) }, 0),
            Err(ServiceError::OutOfResources)
        );
        service.take_commands();
        service.take_notifications();

        assert_eq!(
            service.handle(
                Message::AclConnected {
                    addr: addr(4),
                    handle: 0x50,
                },
                0,
            ),
            Err(ServiceError::OutOfResources)
        );
        assert!(
            service
                .take_commands()
                .contains(&ControllerCommand::Disconnect { handle: 0x50 })
        );
        assert!(service.take_notifications().contains(&Notification::ConnectFailed {
            addr: addr(4),
            reason: HCI_LIMITED_RESOURCES
        }));
        assert!(service.rdm.find(addr(4)).is_none());
        assert_eq!(service.rdm.iter().count(), 3);
    }

    #[test]
    fn test_disconnect_forced_when_pause_ignored() {
        let mut service = running();
        connect(&mut service, 1, 0x40);
        profile(&mut service, 0x40, Profile::A2dp);
        profile(&mut service, 0x40, Profile::Avrcp);
        service
            .handle(
                Message::A2dpMedia {
                    handle: 0x40,
                    state: MediaState::Start,
                },
                0,
            )
            .unwrap();
        service.handle(Message::Disconnect { addr: addr(1) }, 10).unwrap();
        assert!(
            service
                .take_commands()
                .contains(&ControllerCommand::AvrcpPause { handle: 0x40 })
        );

        service.run_timers(500);
        assert!(
            !service
                .take_commands()
                .contains(&ControllerCommand::Disconnect { handle: 0x40 })
        );

        service.run_timers(1010);
        assert!(
            service
                .take_commands()
                .contains(&ControllerCommand::Disconnect { handle: 0x40 })
        );
        let phone = service.rdm.find(addr(1)).unwrap();
        assert!(!service.rdm.get(phone).unwrap().pending_disconnect.any());
    }

    #[test]
    fn test_disconnect_forced_when_sniff_exit_lost() {
        let mut service = running();
        connect(&mut service, 1, 0x40);
        service
            .handle(
                Message::ModeChanged {
                    handle: 0x40,
                    mode: LinkMode::Sniff,
                    interval: 800,
                },
                0,
            )
            .unwrap();
        service.handle(Message::Disconnect { addr: addr(1) }, 10).unwrap();
        service.take_commands();

        service.run_timers(1010);
        assert!(
            service
                .take_commands()
                .contains(&ControllerCommand::Disconnect { handle: 0x40 })
        );
    }

    #[test]
    fn test_tws_peer_disconnects_without_pause() {
        let mut service = running();
        connect(&mut service, 3, 0x42);
        profile(&mut service, 0x42, Profile::Avrcp);
        let peer = service.rdm.find(addr(3)).unwrap();
        service.rdm.set_tws_role(peer, TwsRole::Master).unwrap();
        service.rdm.get_mut(peer).unwrap().a2dp.priority.stream_open = true;
        service.take_commands();

        service.handle(Message::Disconnect { addr: addr(3) }, 0).unwrap();
        assert_eq!(
            service.take_commands().as_slice(),
            &[ControllerCommand::Disconnect { handle: 0x42 }]
        );
    }

    #[test]
    fn test_page_refused_without_room() {
        let mut service = running();
        connect(&mut service, 1, 0x40);
        connect(&mut service, 2, 0x41);
        connect(&mut service, 3, 0x42);
        let peer = service.rdm.find(addr(3)).unwrap();
        service.rdm.set_tws_role(peer, TwsRole::Master).unwrap();
        service.take_commands();

        service
            .handle(
                Message::ConnectRequest {
                    addr: addr(4),
                    class_of_device: 0x5A_020C,
                },
                0,
            )
            .unwrap();
        assert_eq!(
            service.take_commands().as_slice(),
            &[ControllerCommand::RejectConnection {
                addr: addr(4),
                reason: HCI_LIMITED_RESOURCES
            }]
        );
        assert!(service.connect_requests.is_empty());
    }

    #[test]
    fn test_page_accepted_and_class_kept() {
        let mut service = running();
        service
            .handle(
                Message::ConnectRequest {
                    addr: addr(1),
                    class_of_device: 0x10_0104,
                },
                0,
            )
            .unwrap();
        assert_eq!(
            service.take_commands().as_slice(),
            &[ControllerCommand::AcceptConnection { addr: addr(1) }]
        );

        connect(&mut service, 1, 0x40);
        assert!(service.connect_requests.is_empty());
        let record = service.rdm.get(service.rdm.find(addr(1)).unwrap()).unwrap();
        assert!(record.is_pc());
    }

    #[test]
    fn test_metadata_updates() {
        let mut service = running();
        connect(&mut service, 1, 0x40);
        service
            .handle_all(
                [
                    Message::SecurityChanged { handle: 0x40 },
                    Message::RssiRead {
                        handle: 0x40,
                        rssi: -60,
                    },
                    Message::DeviceInfo {
                        handle: 0x40,
                        vendor_id: Some(0x004C),
                        class_of_device: 0,
                    },
                    Message::RemoteName {
                        addr: addr(1),
                        name: heapless::String::try_from("iPhone").unwrap(),
                    },
                ],
                0,
            )
            .unwrap();
        let record = service.rdm.get(service.rdm.find(addr(1)).unwrap()).unwrap();
        assert!(record.security_changed);
        assert_eq!(record.power().rssi, -60);
        assert!(record.is_ios());
        assert_eq!(record.name(), "iPhone");
        assert_eq!(
            service.handle(Message::RssiRead { handle: 0x99, rssi: 0 }, 0),
            Err(ServiceError::NotFound)
        );
    }
}
