//! Connection Record
//!
//! One record per tracked remote device. The record is owned by the
//! [`DeviceManager`](super::DeviceManager) slot it lives in; every other component
//! refers to it through a [`RecordHandle`](super::RecordHandle).

use crate::{
    BluetoothAddress, ServiceError,
    a2dp::A2dpPriority,
    constants::{
        HFP_CODEC_CVSD, HFP_DEFAULT_SAMPLE_RATE_KHZ, IOS_VENDOR_ID, MAJOR_CLASS_COMPUTER,
        MAX_DEVICE_NAME_LENGTH,
    },
    hfp::{ActiveTier, CallCounters, CallState, ScoState},
    power::LinkMode,
    timer::Millis,
};
use heapless::String;

/// Profiles tracked per record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, defmt::Format)]
pub enum Profile {
    /// ACL link itself
    Acl,
    /// Advanced Audio Distribution Profile
    A2dp,
    /// Audio/Video Remote Control Profile
    Avrcp,
    /// Hands-Free Profile
    Hfp,
    /// Human Interface Device
    Hid,
    /// Serial Port Profile (multi-instance)
    Spp,
    /// Phone Book Access Profile (multi-instance)
    Pbap,
    /// Message Access Profile (multi-instance)
    Map,
}

impl Profile {
    /// Profiles that may have more than one logical channel per device
    #[must_use]
    pub const fn is_multi_instance(self) -> bool {
        matches!(self, Self::Spp | Self::Pbap | Self::Map)
    }
}

/// Per-profile connected state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub struct ProfileState {
    acl: bool,
    a2dp: bool,
    avrcp: bool,
    hfp: bool,
    hid: bool,
    spp: u8,
    pbap: u8,
    map: u8,
}

impl ProfileState {
    /// Whether a profile is connected (any instance for multi-instance profiles)
    #[must_use]
    pub fn is_connected(&self, profile: Profile) -> bool {
        match profile {
            Profile::Acl => self.acl,
            Profile::A2dp => self.a2dp,
            Profile::Avrcp => self.avrcp,
            Profile::Hfp => self.hfp,
            Profile::Hid => self.hid,
            Profile::Spp => self.spp > 0,
            Profile::Pbap => self.pbap > 0,
            Profile::Map => self.map > 0,
        }
    }

    /// Open instances of a multi-instance profile
    #[must_use]
    pub fn instances(&self, profile: Profile) -> u8 {
        match profile {
            Profile::Spp => self.spp,
            Profile::Pbap => self.pbap,
            Profile::Map => self.map,
            other => u8::from(self.is_connected(other)),
        }
    }

    /// Whether anything, ACL included, is still connected
    #[must_use]
    pub fn any_connected(&self) -> bool {
        self.acl || self.a2dp || self.avrcp || self.hfp || self.hid || self.spp > 0 || self.pbap > 0 || self.map > 0
    }

    pub(crate) fn set(&mut self, profile: Profile, connected: bool) -> Result<(), ServiceError> {
        let flag = match profile {
            Profile::Acl => &mut self.acl,
            Profile::A2dp => &mut self.a2dp,
            Profile::Avrcp => &mut self.avrcp,
            Profile::Hfp => &mut self.hfp,
            Profile::Hid => &mut self.hid,
            Profile::Spp => return Self::count(&mut self.spp, connected),
            Profile::Pbap => return Self::count(&mut self.pbap, connected),
            Profile::Map => return Self::count(&mut self.map, connected),
        };
        if *flag == connected {
            return Err(ServiceError::AlreadyInState);
        }
        *flag = connected;
        Ok(())
    }

    fn count(counter: &mut u8, connected: bool) -> Result<(), ServiceError> {
        *counter = if connected {
            counter.checked_add(1).ok_or(ServiceError::OutOfResources)?
        } else {
            counter.checked_sub(1).ok_or(ServiceError::AlreadyInState)?
        };
        Ok(())
    }
}

/// Role this device plays on a TWS link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub enum TwsRole {
    /// Not a TWS link (a phone)
    #[default]
    None,
    /// Local device is the TWS master
    Master,
    /// Local device is the TWS slave
    Slave,
    /// TWS link established, role not decided yet
    Pending,
}

/// Snoop relay role of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub enum SnoopRole {
    /// Not snooped
    #[default]
    None,
    /// Link is relayed to the TWS slave
    Master,
    /// Replicated link observed by the TWS slave
    Slave,
}

/// Baseband role on the ACL link itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub enum ControllerRole {
    /// Local controller is the link master
    Master,
    /// Local controller is the link slave
    #[default]
    Slave,
}

/// A2DP arbitration state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub struct A2dpState {
    /// Selected as the audible source
    pub active: bool,
    /// Priority bits
    pub priority: A2dpPriority,
    /// Stream start timestamp
    pub start_time: Millis,
    /// Stream stop timestamp
    pub stop_time: Millis,
    /// Stream start seen before AVRCP could confirm playback
    pub pending_ahead_start: bool,
}

/// HFP codec in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct HfpCodec {
    /// Codec id (1 = CVSD, 2 = mSBC)
    pub codec_id: u8,
    /// Sample rate in kHz
    pub sample_rate_khz: u8,
}

impl Default for HfpCodec {
    fn default() -> Self {
        Self {
            codec_id: HFP_CODEC_CVSD,
            sample_rate_khz: HFP_DEFAULT_SAMPLE_RATE_KHZ,
        }
    }
}

/// HFP call state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub struct HfpState {
    /// Call state
    pub state: CallState,
    /// Active selection tier
    pub tier: ActiveTier,
    /// SCO ownership
    pub sco: ScoState,
    /// Aggregate AG call indicators
    pub calls: CallCounters,
    /// Negotiated codec
    pub codec: HfpCodec,
}

/// Sniff and link scheduling state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub struct PowerState {
    /// Current link mode
    pub mode: LinkMode,
    /// Sniff interval in slots
    pub interval: u16,
    /// Sniff requested, waiting for the mode change
    pub entering: bool,
    /// Sniff exit requested, waiting for the mode change
    pub exiting: bool,
    /// When sniff was requested
    pub entering_time: Millis,
    /// Start of the current idle period
    pub idle_start: Millis,
    /// Latest rx/tx activity counter reported by the controller
    pub activity: u32,
    /// Activity counter seen by the last sniff tick
    pub observed_activity: u32,
    /// Link-time budget applied to the controller
    pub link_time: u8,
    /// Last RSSI reading
    pub rssi: i8,
    /// Last link quality reading
    pub link_quality: u8,
}

/// AVRCP absolute volume deferral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub struct AvrcpVolume {
    /// Last requested volume
    pub last_requested: Option<u8>,
    /// Volume waiting for the delay timer
    pub pending: Option<u8>,
    /// Requests that replaced a pending one
    pub filtered: u8,
}

/// Deferred ACL teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub struct PendingDisconnect {
    /// Disconnect once the link leaves sniff
    pub after_sniff_exit: bool,
    /// Disconnect once the stream suspends after the AVRCP pause
    pub after_avrcp_pause: bool,
}

impl PendingDisconnect {
    /// Any deferred disconnect
    #[must_use]
    pub fn any(&self) -> bool {
        self.after_sniff_exit || self.after_avrcp_pause
    }
}

/// Conditions that keep a reduced record after the ACL is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub struct ResumeFlags {
    /// Link was lost to a supervision timeout
    pub timeout_disconnected: bool,
    /// Link was halted on purpose and may be resumed
    pub halted: bool,
}

impl ResumeFlags {
    /// Any retain condition
    #[must_use]
    pub fn any(&self) -> bool {
        self.timeout_disconnected || self.halted
    }
}

/// Per-device state of a tracked remote device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub(crate) address: BluetoothAddress,
    pub(crate) acl_handle: Option<u16>,
    pub(crate) profiles: ProfileState,
    pub(crate) a2dp: A2dpState,
    pub(crate) avrcp_volume: AvrcpVolume,
    pub(crate) avrcp_play_pended: bool,
    pub(crate) hfp: HfpState,
    pub(crate) tws_role: TwsRole,
    pub(crate) snoop_role: SnoopRole,
    pub(crate) controller_role: ControllerRole,
    pub(crate) power: PowerState,
    pub(crate) pending_disconnect: PendingDisconnect,
    pub(crate) resume: ResumeFlags,
    pub(crate) security_changed: bool,
    pub(crate) name: String<MAX_DEVICE_NAME_LENGTH>,
    pub(crate) vendor_id: Option<u16>,
    pub(crate) class_of_device: u32,
    pub(crate) a2dp_codec: Option<u8>,
    pub(crate) music_volume: u8,
    pub(crate) call_volume: u8,
}

impl ConnectionRecord {
    pub(crate) fn new(address: BluetoothAddress, acl_handle: u16, now: Millis) -> Self {
        let mut profiles = ProfileState::default();
        profiles.acl = true;
        Self {
            address,
            acl_handle: Some(acl_handle),
            profiles,
            a2dp: A2dpState::default(),
            avrcp_volume: AvrcpVolume::default(),
            avrcp_play_pended: false,
            hfp: HfpState::default(),
            tws_role: TwsRole::None,
            snoop_role: SnoopRole::None,
            controller_role: ControllerRole::default(),
            power: PowerState {
                idle_start: now,
                ..PowerState::default()
            },
            pending_disconnect: PendingDisconnect::default(),
            resume: ResumeFlags::default(),
            security_changed: false,
            name: String::new(),
            vendor_id: None,
            class_of_device: 0,
            a2dp_codec: None,
            music_volume: 0,
            call_volume: 0,
        }
    }

    /// Remote address
    #[must_use]
    pub fn address(&self) -> BluetoothAddress {
        self.address
    }

    /// ACL connection handle while connected
    #[must_use]
    pub fn acl_handle(&self) -> Option<u16> {
        self.acl_handle
    }

    /// Profile connected state
    #[must_use]
    pub fn profiles(&self) -> &ProfileState {
        &self.profiles
    }

    /// A2DP arbitration state
    #[must_use]
    pub fn a2dp(&self) -> &A2dpState {
        &self.a2dp
    }

    /// HFP state
    #[must_use]
    pub fn hfp(&self) -> &HfpState {
        &self.hfp
    }

    /// Power state
    #[must_use]
    pub fn power(&self) -> &PowerState {
        &self.power
    }

    /// TWS role of this link
    #[must_use]
    pub fn tws_role(&self) -> TwsRole {
        self.tws_role
    }

    /// Snoop role of this link
    #[must_use]
    pub fn snoop_role(&self) -> SnoopRole {
        self.snoop_role
    }

    /// Whether the record is a phone rather than the TWS peer
    #[must_use]
    pub fn is_phone(&self) -> bool {
        self.tws_role == TwsRole::None
    }

    /// Whether the ACL link is up
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.profiles.acl
    }

    /// Device name, empty until resolved
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Phone reported the Apple PnP vendor id
    #[must_use]
    pub fn is_ios(&self) -> bool {
        self.vendor_id == Some(IOS_VENDOR_ID)
    }

    /// Class of device major class is "computer"
    #[must_use]
    pub fn is_pc(&self) -> bool {
        ((self.class_of_device >> 8) & 0x1F) as u8 == MAJOR_CLASS_COMPUTER
    }

    /// Phone has an open stream or a call in progress
    #[must_use]
    pub fn is_busy_with_audio(&self) -> bool {
        self.is_phone() && (self.a2dp.priority.stream_open || self.hfp.state.in_call())
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name.clear();
        for c in name.chars() {
            if self.name.push(c).is_err() {
                break;
            }
        }
    }

    /// Copyable view of the record for other tasks
    #[must_use]
    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            address: self.address,
            acl_handle: self.acl_handle,
            profiles: self.profiles,
            a2dp_active: self.a2dp.active,
            a2dp_priority: self.a2dp.priority.bits(),
            call_state: self.hfp.state,
            hfp_tier: self.hfp.tier,
            sco: self.hfp.sco,
            tws_role: self.tws_role,
            link_mode: self.power.mode,
            rssi: self.power.rssi,
            music_volume: self.music_volume,
            call_volume: self.call_volume,
        }
    }
}

/// Point-in-time copy of a Connection Record
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct DeviceSnapshot {
    /// Remote address
    pub address: BluetoothAddress,
    /// ACL connection handle
    pub acl_handle: Option<u16>,
    /// Connected profiles
    pub profiles: ProfileState,
    /// Selected A2DP source
    pub a2dp_active: bool,
    /// A2DP priority bits
    pub a2dp_priority: u8,
    /// Call state
    pub call_state: CallState,
    /// HFP selection tier
    pub hfp_tier: ActiveTier,
    /// SCO ownership
    pub sco: ScoState,
    /// TWS role
    pub tws_role: TwsRole,
    /// Link mode
    pub link_mode: LinkMode,
    /// Last RSSI reading
    pub rssi: i8,
    /// Music volume
    pub music_volume: u8,
    /// Call volume
    pub call_volume: u8,
}

/// What survives of a record released with a retain condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct RetainedRecord {
    /// Remote address
    pub address: BluetoothAddress,
    /// Retain conditions
    pub resume: ResumeFlags,
    /// Music volume at release
    pub music_volume: u8,
    /// Call volume at release
    pub call_volume: u8,
    pub(crate) sequence: u32,
}
