//! Remote Device Manager
//!
//! Canonical store of the Connection Records. Records live in a fixed slot arena and
//! are referenced by [`RecordHandle`] (slot index plus generation) everywhere else, so a
//! handle that outlived its record simply fails to resolve.

mod record;
mod select;

pub use record::{
    A2dpState, AvrcpVolume, ConnectionRecord, ControllerRole, DeviceSnapshot, HfpCodec,
    HfpState, PendingDisconnect, PowerState, Profile, ProfileState, ResumeFlags, RetainedRecord,
    SnoopRole, TwsRole,
};

use crate::{
    BluetoothAddress, ServiceError,
    constants::MAX_RECORDS,
    timer::{Millis, TimerRegistry},
};
use heapless::Vec;

/// Stable reference to a Connection Record slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, defmt::Format)]
pub struct RecordHandle {
    index: u8,
    generation: u16,
}

impl RecordHandle {
    pub(crate) const fn from_parts(index: u8, generation: u16) -> Self {
        Self { index, generation }
    }

    /// Slot index
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }
}

/// Which records `connected_count` counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum DeviceKind {
    /// Every connected record
    All,
    /// Connected phones
    Phone,
    /// The connected TWS peer
    Tws,
}

/// Outcome of [`DeviceManager::remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Removal {
    /// Slot released
    Freed,
    /// Reduced record kept for resume
    Retained,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Free,
    Live(ConnectionRecord),
    Retained(RetainedRecord),
}

#[derive(Debug)]
struct SlotEntry {
    generation: u16,
    slot: Slot,
}

/// Connection Record pool and process-wide TWS role
#[derive(Debug)]
pub struct DeviceManager {
    slots: [SlotEntry; MAX_RECORDS],
    local_role: TwsRole,
    tws_connected: bool,
    retain_sequence: u32,
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceManager {
    /// Create an empty pool
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| SlotEntry {
                generation: 0,
                slot: Slot::Free,
            }),
            local_role: TwsRole::None,
            tws_connected: false,
            retain_sequence: 0,
        }
    }

    /// Create a record for a newly connected ACL link.
    ///
    /// A retained record for the same address is resumed (its volumes carry over);
    /// otherwise a free slot is used, and when none is left the oldest retained slot is
    /// recycled.
    ///
    /// # Errors
    /// `AlreadyExists` if the address is already tracked, `OutOfResources` if no slot can
    /// be used
    pub fn add(
        &mut self,
        address: BluetoothAddress,
        acl_handle: u16,
        now: Millis,
    ) -> Result<RecordHandle, ServiceError> {
        if self.find(address).is_some() {
            return Err(ServiceError::AlreadyExists);
        }

        let index = self
            .slots
            .iter()
            .position(|e| matches!(&e.slot, Slot::Retained(r) if r.address == address))
            .or_else(|| self.slots.iter().position(|e| e.slot == Slot::Free))
            .or_else(|| self.oldest_retained())
            .ok_or_else(|| {
                defmt::warn!("[RDM] No slot for {}", address);
                ServiceError::OutOfResources
            })?;

        let mut record = ConnectionRecord::new(address, acl_handle, now);
        if let Slot::Retained(retained) = &self.slots[index].slot {
            if retained.address == address {
                record.music_volume = retained.music_volume;
                record.call_volume = retained.call_volume;
            } else {
                defmt::info!("[RDM] Recycling retained slot of {}", retained.address);
            }
        }

        let entry = &mut self.slots[index];
        entry.slot = Slot::Live(record);
        let handle = RecordHandle::from_parts(index as u8, entry.generation);
        defmt::info!("[RDM] Added {} handle 0x{:04x} slot {}", address, acl_handle, index);
        Ok(handle)
    }

    fn oldest_retained(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, e)| match &e.slot {
                Slot::Retained(r) => Some((i, r.sequence)),
                _ => None,
            })
            .min_by_key(|&(_, sequence)| sequence)
            .map(|(i, _)| i)
    }

    /// Release the record of a fully disconnected device.
    ///
    /// Timers owned by the record are cancelled before the slot changes. A record with a
    /// resume condition leaves a reduced record behind.
    ///
    /// # Errors
    /// `NotFound` if the address is not tracked, `Busy` while any profile (ACL included)
    /// is still connected
    pub fn remove(
        &mut self,
        address: BluetoothAddress,
        timers: &mut TimerRegistry,
    ) -> Result<Removal, ServiceError> {
        let handle = self.find(address).ok_or(ServiceError::NotFound)?;
        let record = self.get(handle).ok_or(ServiceError::NotFound)?;
        if record.profiles.any_connected() {
            return Err(ServiceError::Busy);
        }
        let was_tws = !record.is_phone();
        let resume = record.resume;
        let (music_volume, call_volume) = (record.music_volume, record.call_volume);

        let cancelled = timers.cancel_owned_by(handle);
        if cancelled > 0 {
            defmt::debug!("[RDM] Cancelled {} timers of {}", cancelled, address);
        }
        if was_tws {
            self.local_role = TwsRole::None;
            self.tws_connected = false;
        }

        let removal = if resume.any() {
            self.retain_sequence = self.retain_sequence.wrapping_add(1);
            let retained = RetainedRecord {
                address,
                resume,
                music_volume,
                call_volume,
                sequence: self.retain_sequence,
            };
            self.slots[handle.index()].slot = Slot::Retained(retained);
            Removal::Retained
        } else {
            self.slots[handle.index()].slot = Slot::Free;
            Removal::Freed
        };
        let entry = &mut self.slots[handle.index()];
        entry.generation = entry.generation.wrapping_add(1);
        defmt::info!("[RDM] Removed {} ({})", address, removal);
        Ok(removal)
    }

    /// Drop a retained record, e.g. when the link key is deleted
    pub fn forget(&mut self, address: BluetoothAddress) -> bool {
        for entry in &mut self.slots {
            if matches!(&entry.slot, Slot::Retained(r) if r.address == address) {
                entry.slot = Slot::Free;
                return true;
            }
        }
        false
    }

    /// Resolve a handle
    #[must_use]
    pub fn get(&self, handle: RecordHandle) -> Option<&ConnectionRecord> {
        let entry = self.slots.get(handle.index())?;
        match &entry.slot {
            Slot::Live(record) if entry.generation == handle.generation => Some(record),
            _ => None,
        }
    }

    /// Resolve a handle for mutation
    pub fn get_mut(&mut self, handle: RecordHandle) -> Option<&mut ConnectionRecord> {
        let entry = self.slots.get_mut(handle.index())?;
        match &mut entry.slot {
            Slot::Live(record) if entry.generation == handle.generation => Some(record),
            _ => None,
        }
    }

    /// Live records in pool order
    pub fn iter(&self) -> impl Iterator<Item = (RecordHandle, &ConnectionRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| match &entry.slot {
                Slot::Live(record) => Some((RecordHandle::from_parts(i as u8, entry.generation), record)),
                _ => None,
            })
    }

    /// Handles of the live records in pool order
    #[must_use]
    pub fn handles(&self) -> Vec<RecordHandle, MAX_RECORDS> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    /// Find a live record by address
    #[must_use]
    pub fn find(&self, address: BluetoothAddress) -> Option<RecordHandle> {
        self.iter()
            .find(|(_, record)| record.address == address)
            .map(|(handle, _)| handle)
    }

    /// Find a live record by ACL connection handle
    #[must_use]
    pub fn find_by_acl(&self, acl_handle: u16) -> Option<RecordHandle> {
        self.iter()
            .find(|(_, record)| record.acl_handle == Some(acl_handle))
            .map(|(handle, _)| handle)
    }

    /// Find a live record by ACL handle whose profile is connected
    #[must_use]
    pub fn find_by_profile(&self, acl_handle: u16, profile: Profile) -> Option<RecordHandle> {
        self.find_by_acl(acl_handle).filter(|&handle| {
            self.get(handle)
                .is_some_and(|record| record.profiles.is_connected(profile))
        })
    }

    /// Reduced record kept for an address
    #[must_use]
    pub fn retained(&self, address: BluetoothAddress) -> Option<&RetainedRecord> {
        self.slots.iter().find_map(|entry| match &entry.slot {
            Slot::Retained(r) if r.address == address => Some(r),
            _ => None,
        })
    }

    /// Set a profile connected flag, or move a multi-instance counter
    ///
    /// # Errors
    /// `NotFound` for an unknown ACL handle, `AlreadyInState` if the flag already has the
    /// value or a counter would go below zero
    pub fn set_profile_connected(
        &mut self,
        acl_handle: u16,
        profile: Profile,
        connected: bool,
    ) -> Result<RecordHandle, ServiceError> {
        let handle = self.find_by_acl(acl_handle).ok_or(ServiceError::NotFound)?;
        let record = self.get_mut(handle).ok_or(ServiceError::NotFound)?;
        record.profiles.set(profile, connected)?;
        defmt::debug!(
            "[RDM] {} {} {}",
            record.address,
            profile,
            if connected { "connected" } else { "disconnected" }
        );
        Ok(handle)
    }

    /// Count ACL-connected records of a kind
    #[must_use]
    pub fn connected_count(&self, kind: DeviceKind) -> usize {
        self.iter()
            .filter(|(_, record)| record.is_connected())
            .filter(|(_, record)| match kind {
                DeviceKind::All => true,
                DeviceKind::Phone => record.is_phone(),
                DeviceKind::Tws => !record.is_phone(),
            })
            .count()
    }

    /// Set the TWS role of a record.
    ///
    /// A role other than none becomes the process-wide local role; clearing the role of
    /// the TWS record resets it.
    ///
    /// # Errors
    /// `NotFound`, `AlreadyInState` if unchanged, `AlreadyExists` if another record holds
    /// the same master/slave role
    pub fn set_tws_role(&mut self, handle: RecordHandle, role: TwsRole) -> Result<(), ServiceError> {
        let current = self.get(handle).ok_or(ServiceError::NotFound)?.tws_role;
        if current == role {
            return Err(ServiceError::AlreadyInState);
        }
        if matches!(role, TwsRole::Master | TwsRole::Slave)
            && self
                .iter()
                .any(|(other, record)| other != handle && record.tws_role == role)
        {
            return Err(ServiceError::AlreadyExists);
        }

        let record = self.get_mut(handle).ok_or(ServiceError::NotFound)?;
        record.tws_role = role;
        let address = record.address;
        if role == TwsRole::None {
            self.local_role = TwsRole::None;
            self.tws_connected = false;
        } else {
            self.local_role = role;
            self.tws_connected = true;
        }
        defmt::info!("[RDM] {} TWS role {} -> {}", address, current, role);
        Ok(())
    }

    /// Set the snoop role of a record
    ///
    /// # Errors
    /// `NotFound`, `AlreadyInState` if unchanged
    pub fn set_snoop_role(&mut self, handle: RecordHandle, role: SnoopRole) -> Result<(), ServiceError> {
        let record = self.get_mut(handle).ok_or(ServiceError::NotFound)?;
        if record.snoop_role == role {
            return Err(ServiceError::AlreadyInState);
        }
        record.snoop_role = role;
        Ok(())
    }

    /// Record the baseband role after a role change
    ///
    /// # Errors
    /// `NotFound` for an unknown address
    pub fn set_controller_role(
        &mut self,
        address: BluetoothAddress,
        role: ControllerRole,
    ) -> Result<(), ServiceError> {
        let handle = self.find(address).ok_or(ServiceError::NotFound)?;
        let record = self.get_mut(handle).ok_or(ServiceError::NotFound)?;
        record.controller_role = role;
        Ok(())
    }

    /// Local role in the TWS pair
    #[must_use]
    pub fn local_role(&self) -> TwsRole {
        self.local_role
    }

    /// Whether a TWS peer is connected
    #[must_use]
    pub fn tws_connected(&self) -> bool {
        self.tws_connected
    }

    /// Whether any phone streams or has a call
    #[must_use]
    pub fn need_high_performance(&self) -> bool {
        self.iter().any(|(_, record)| record.is_busy_with_audio())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{TimerId, TimerKind};

    fn addr(last: u8) -> BluetoothAddress {
        BluetoothAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, last])
    }

    fn release(rdm: &mut DeviceManager, timers: &mut TimerRegistry, address: BluetoothAddress) -> Removal {
        let acl = rdm.get(rdm.find(address).unwrap()).unwrap().acl_handle().unwrap();
        rdm.set_profile_connected(acl, Profile::Acl, false).unwrap();
        rdm.remove(address, timers).unwrap()
    }

    #[test]
    fn test_add_and_find() {
        let mut rdm = DeviceManager::new();
        let handle = rdm.add(addr(1), 0x40, 0).unwrap();

        assert_eq!(rdm.find(addr(1)), Some(handle));
        assert_eq!(rdm.find_by_acl(0x40), Some(handle));
        assert_eq!(rdm.find_by_profile(0x40, Profile::Acl), Some(handle));
        assert_eq!(rdm.find_by_profile(0x40, Profile::A2dp), None);
        assert_eq!(rdm.find(addr(2)), None);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut rdm = DeviceManager::new();
        rdm.add(addr(1), 0x40, 0).unwrap();
        assert_eq!(rdm.add(addr(1), 0x41, 0), Err(ServiceError::AlreadyExists));
        assert_eq!(rdm.connected_count(DeviceKind::All), 1);
    }

    #[test]
    fn test_pool_exhausted() {
        let mut rdm = DeviceManager::new();
        for i in 0..MAX_RECORDS {
            rdm.add(addr(i as u8), 0x40 + i as u16, 0).unwrap();
        }
        assert_eq!(rdm.add(addr(9), 0x50, 0), Err(ServiceError::OutOfResources));
    }

    #[test]
    fn test_remove_requires_all_profiles_down() {
        let mut rdm = DeviceManager::new();
        let mut timers = TimerRegistry::new();
        rdm.add(addr(1), 0x40, 0).unwrap();
        rdm.set_profile_connected(0x40, Profile::A2dp, true).unwrap();

        assert_eq!(rdm.remove(addr(1), &mut timers), Err(ServiceError::Busy));
        rdm.set_profile_connected(0x40, Profile::A2dp, false).unwrap();
        assert_eq!(rdm.remove(addr(1), &mut timers), Err(ServiceError::Busy));
        rdm.set_profile_connected(0x40, Profile::Acl, false).unwrap();
        assert_eq!(rdm.remove(addr(1), &mut timers), Ok(Removal::Freed));
        assert_eq!(rdm.remove(addr(1), &mut timers), Err(ServiceError::NotFound));
    }

    #[test]
    fn test_remove_cancels_owned_timers_and_invalidates_handle() {
        let mut rdm = DeviceManager::new();
        let mut timers = TimerRegistry::new();
        let handle = rdm.add(addr(1), 0x40, 0).unwrap();
        let id = TimerId::owned(TimerKind::AvrcpVolume, handle);
        timers.start(id, 0, 50).unwrap();

        release(&mut rdm, &mut timers, addr(1));
        assert!(!timers.is_armed(id));
        assert!(rdm.get(handle).is_none());

        let reused = rdm.add(addr(2), 0x41, 0).unwrap();
        assert_eq!(reused.index(), handle.index());
        assert_ne!(reused, handle);
        assert!(rdm.get(handle).is_none());
    }

    #[test]
    fn test_retained_record_keeps_volume() {
        let mut rdm = DeviceManager::new();
        let mut timers = TimerRegistry::new();
        let handle = rdm.add(addr(1), 0x40, 0).unwrap();
        {
            let record = rdm.get_mut(handle).unwrap();
            record.resume.timeout_disconnected = true;
            record.music_volume = 9;
            record.call_volume = 4;
        }
        assert_eq!(release(&mut rdm, &mut timers, addr(1)), Removal::Retained);
        assert_eq!(rdm.retained(addr(1)).unwrap().music_volume, 9);
        assert_eq!(rdm.find(addr(1)), None);

        let handle = rdm.add(addr(1), 0x42, 0).unwrap();
        let record = rdm.get(handle).unwrap();
        assert_eq!((record.music_volume, record.call_volume), (9, 4));
        assert!(rdm.retained(addr(1)).is_none());
    }

    #[test]
    fn test_oldest_retained_slot_recycled() {
        let mut rdm = DeviceManager::new();
        let mut timers = TimerRegistry::new();
        for i in 0..MAX_RECORDS {
            let handle = rdm.add(addr(i as u8), 0x40 + i as u16, 0).unwrap();
            rdm.get_mut(handle).unwrap().resume.halted = true;
        }
        release(&mut rdm, &mut timers, addr(1));
        release(&mut rdm, &mut timers, addr(0));

        let handle = rdm.add(addr(7), 0x50, 0).unwrap();
        assert_eq!(handle.index(), 1);
        assert!(rdm.retained(addr(1)).is_none());
        assert!(rdm.retained(addr(0)).is_some());
    }

    #[test]
    fn test_no_two_records_share_an_address() {
        let mut rdm = DeviceManager::new();
        let mut timers = TimerRegistry::new();
        let sequence = [1u8, 2, 1, 3, 2, 1, 4];
        for (step, &last) in sequence.iter().enumerate() {
            if rdm.find(addr(last)).is_some() {
                release(&mut rdm, &mut timers, addr(last));
            } else {
                rdm.add(addr(last), 0x40 + step as u16, 0).ok();
            }
            let mut seen: Vec<BluetoothAddress, MAX_RECORDS> = Vec::new();
            for (_, record) in rdm.iter() {
                assert!(!seen.contains(&record.address()));
                seen.push(record.address()).unwrap();
            }
        }
    }

    #[test]
    fn test_tws_role_updates_local_role() {
        let mut rdm = DeviceManager::new();
        let peer = rdm.add(addr(1), 0x40, 0).unwrap();
        let phone = rdm.add(addr(2), 0x41, 0).unwrap();

        rdm.set_tws_role(peer, TwsRole::Master).unwrap();
        assert_eq!(rdm.local_role(), TwsRole::Master);
        assert!(rdm.tws_connected());
        assert_eq!(rdm.set_tws_role(peer, TwsRole::Master), Err(ServiceError::AlreadyInState));
        assert_eq!(rdm.set_tws_role(phone, TwsRole::Master), Err(ServiceError::AlreadyExists));
        assert_eq!(rdm.connected_count(DeviceKind::Phone), 1);
        assert_eq!(rdm.connected_count(DeviceKind::Tws), 1);

        rdm.set_tws_role(peer, TwsRole::None).unwrap();
        assert_eq!(rdm.local_role(), TwsRole::None);
        assert!(!rdm.tws_connected());
    }

    #[test]
    fn test_profile_flag_does_not_touch_role() {
        let mut rdm = DeviceManager::new();
        let peer = rdm.add(addr(1), 0x40, 0).unwrap();
        rdm.set_tws_role(peer, TwsRole::Slave).unwrap();
        rdm.set_profile_connected(0x40, Profile::A2dp, true).unwrap();
        assert_eq!(rdm.get(peer).unwrap().tws_role(), TwsRole::Slave);
        assert_eq!(rdm.local_role(), TwsRole::Slave);
    }

    #[test]
    fn test_multi_instance_profile_via_manager() {
        let mut rdm = DeviceManager::new();
        rdm.add(addr(1), 0x40, 0).unwrap();
        rdm.set_profile_connected(0x40, Profile::Map, true).unwrap();
        assert_eq!(
            rdm.set_profile_connected(0x40, Profile::Pbap, false),
            Err(ServiceError::AlreadyInState)
        );
        assert_eq!(
            rdm.set_profile_connected(0x99, Profile::Map, true),
            Err(ServiceError::NotFound)
        );
    }
}
