//! Saved Volume Table
//!
//! A small FIFO of per-device volumes that outlives the Connection Records. When a
//! device disconnects its volumes are saved here; when it connects again they are
//! restored. A full table drops its oldest entry and shifts the rest down.
//!
//! The table is persisted through [`KeyValueStore`] as consecutive 8-byte entries
//! (address, music volume, call volume).

use crate::{
    BluetoothAddress, Message, ServiceError,
    constants::{BD_ADDR_LENGTH, SAVED_VOLUME_CAPACITY, VOLUME_ENTRY_LENGTH, VOLUME_STORE_KEY},
    service::Service,
    timer::Millis,
};
use heapless::Vec;

/// Key-value persistence provided by the integrator
pub trait KeyValueStore {
    /// Read the value of `key` into `buf`, returning the number of bytes read
    fn get(&mut self, key: &str, buf: &mut [u8]) -> Option<usize>;

    /// Replace the value of `key`
    ///
    /// # Errors
    /// Any error of the underlying storage
    fn set(&mut self, key: &str, bytes: &[u8]) -> Result<(), ServiceError>;
}

/// One saved entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct SavedVolume {
    /// Device address
    pub address: BluetoothAddress,
    /// Music volume
    pub music: u8,
    /// Call volume
    pub call: u8,
}

/// Result of a lookup; unknown addresses get the defaults with `found == false`
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct VolumeLookup {
    /// Music volume
    pub music: u8,
    /// Call volume
    pub call: u8,
    /// Whether the address had an entry
    pub found: bool,
}

/// Fixed-capacity FIFO of saved volumes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SavedVolumeTable<const K: usize> {
    entries: Vec<SavedVolume, K>,
}

impl<const K: usize> SavedVolumeTable<K> {
    /// Bytes needed to persist a full table
    pub const ENCODED_LENGTH: usize = K * VOLUME_ENTRY_LENGTH;

    /// Empty table
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Saved entries, oldest first
    #[must_use]
    pub fn entries(&self) -> &[SavedVolume] {
        &self.entries
    }

    /// Number of saved entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is saved
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Save the volumes of an address.
    ///
    /// A known address is updated in place. A new one is appended; when the table is
    /// full the oldest entry is evicted first.
    pub fn save(&mut self, address: BluetoothAddress, music: u8, call: u8) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.address == address) {
            entry.music = music;
            entry.call = call;
            return;
        }
        if self.entries.is_full() && !self.entries.is_empty() {
            let evicted = self.entries.remove(0);
            defmt::debug!("[VOLUME] Evicting {}", evicted.address);
        }
        self.entries
            .push(SavedVolume {
                address,
                music,
                call,
            })
            .ok();
    }

    /// Volumes of an address, or the defaults when it has no entry
    #[must_use]
    pub fn lookup(&self, address: BluetoothAddress, default_music: u8, default_call: u8) -> VolumeLookup {
        match self.entries.iter().find(|e| e.address == address) {
            Some(entry) => VolumeLookup {
                music: entry.music,
                call: entry.call,
                found: true,
            },
            None => VolumeLookup {
                music: default_music,
                call: default_call,
                found: false,
            },
        }
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Write the table into `buf`, returning the number of bytes used
    ///
    /// # Errors
    /// `OutOfResources` if `buf` cannot hold every entry
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, ServiceError> {
        let len = self.entries.len() * VOLUME_ENTRY_LENGTH;
        if buf.len() < len {
            return Err(ServiceError::OutOfResources);
        }
        for (entry, chunk) in self.entries.iter().zip(buf.chunks_exact_mut(VOLUME_ENTRY_LENGTH)) {
            chunk[..BD_ADDR_LENGTH].copy_from_slice(entry.address.as_bytes());
            chunk[BD_ADDR_LENGTH] = entry.music;
            chunk[BD_ADDR_LENGTH + 1] = entry.call;
        }
        Ok(len)
    }

    /// Rebuild a table from persisted bytes.
    ///
    /// All-zero addresses mark unused entries and are skipped; entries beyond the
    /// capacity are ignored.
    ///
    /// # Errors
    /// `InvalidArgument` if the length is not a whole number of entries
    pub fn decode(bytes: &[u8]) -> Result<Self, ServiceError> {
        if bytes.len() % VOLUME_ENTRY_LENGTH != 0 {
            return Err(ServiceError::InvalidArgument);
        }
        let mut table = Self::new();
        for chunk in bytes.chunks_exact(VOLUME_ENTRY_LENGTH) {
            let address = BluetoothAddress::try_from(&chunk[..BD_ADDR_LENGTH])?;
            if address.is_zero() {
                continue;
            }
            if table.entries.is_full() {
                break;
            }
            table.save(address, chunk[BD_ADDR_LENGTH], chunk[BD_ADDR_LENGTH + 1]);
        }
        Ok(table)
    }
}

impl Service {
    /// Restore the saved volume table from persistence
    ///
    /// # Errors
    /// `InvalidArgument` if the stored value is malformed
    pub fn load_volumes<S: KeyValueStore>(&mut self, store: &mut S) -> Result<(), ServiceError> {
        let mut buf = [0u8; SavedVolumeTable::<SAVED_VOLUME_CAPACITY>::ENCODED_LENGTH];
        let Some(len) = store.get(VOLUME_STORE_KEY, &mut buf) else {
            defmt::debug!("[VOLUME] Nothing persisted");
            return Ok(());
        };
        let bytes = buf.get(..len).ok_or(ServiceError::InvalidArgument)?;
        self.volumes = SavedVolumeTable::decode(bytes)?;
        self.volumes_dirty = false;
        defmt::info!("[VOLUME] Restored {} entries", self.volumes.len());
        Ok(())
    }

    /// Write the saved volume table back if it changed since the last write
    ///
    /// # Errors
    /// Whatever the store returns; the table stays dirty so the next call retries
    pub fn persist_volumes<S: KeyValueStore>(&mut self, store: &mut S) -> Result<(), ServiceError> {
        if !self.volumes_dirty {
            return Ok(());
        }
        let mut buf = [0u8; SavedVolumeTable::<SAVED_VOLUME_CAPACITY>::ENCODED_LENGTH];
        let len = self.volumes.encode(&mut buf)?;
        store.set(VOLUME_STORE_KEY, &buf[..len])?;
        self.volumes_dirty = false;
        defmt::debug!("[VOLUME] Persisted {} entries", self.volumes.len());
        Ok(())
    }

    /// Saved or default volumes of an address
    pub(crate) fn saved_volume(&self, address: BluetoothAddress) -> VolumeLookup {
        self.volumes.lookup(
            address,
            self.config.default_music_volume,
            self.config.default_call_volume,
        )
    }

    /// Keep the volumes of a device that is going away
    pub(crate) fn save_volume(&mut self, address: BluetoothAddress, music: u8, call: u8) {
        self.volumes.save(address, music, call);
        self.volumes_dirty = true;
    }
}

/// Message handler for [`MessageTag::Volume`](crate::message::MessageTag::Volume)
pub(crate) fn handle_volume(service: &mut Service, message: Message, _now: Millis) -> Result<(), ServiceError> {
    match message {
        Message::SetVolume { addr, music, call } => {
            let current = match service.rdm.find(addr).and_then(|h| service.rdm.get_mut(h)) {
                Some(record) => {
                    if let Some(music) = music {
                        record.music_volume = music;
                    }
                    if let Some(call) = call {
                        record.call_volume = call;
                    }
                    (record.music_volume, record.call_volume)
                }
                None => {
                    let saved = service.saved_volume(addr);
                    (music.unwrap_or(saved.music), call.unwrap_or(saved.call))
                }
            };
            defmt::debug!("[VOLUME] {} music {} call {}", addr, current.0, current.1);
            service.save_volume(addr, current.0, current.1);
            Ok(())
        }
        Message::ClearVolumes => {
            service.volumes.clear();
            service.volumes_dirty = true;
            defmt::info!("[VOLUME] Table cleared");
            Ok(())
        }
        _ => Err(ServiceError::InvalidArgument),
    }
}
