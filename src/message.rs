//! Messages of the owner task
//!
//! Everything that reaches the engine, whether a controller event, a profile event, an
//! application command or a control message, is a [`Message`]. Each message carries a
//! [`MessageTag`] and is dispatched to the single handler registered for that tag.

use crate::{
    BluetoothAddress, ControllerCommand, ServiceConfig, ServiceError,
    a2dp::{MediaState, PlayStatus},
    constants::MAX_DEVICE_NAME_LENGTH,
    hfp::CallIndicator,
    power::LinkMode,
    rdm::{ControllerRole, Profile, SnoopRole, TwsRole},
    scan::ScanInput,
    service::Service,
    timer::Millis,
};
use heapless::{FnvIndexMap, String};

/// Dispatch key of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, defmt::Format)]
pub enum MessageTag {
    /// Lifecycle and core bookkeeping, handled by the core itself
    Control,
    /// ACL and profile connection events
    Connection,
    /// A2DP stream events
    A2dp,
    /// AVRCP events
    Avrcp,
    /// HFP call events
    Hfp,
    /// Scan policy inputs
    Scan,
    /// Link mode and TWS link events
    Power,
    /// Saved volume updates
    Volume,
}

impl MessageTag {
    /// Profile tags, dropped while the service is suspended
    #[must_use]
    pub const fn is_profile(self) -> bool {
        matches!(self, Self::A2dp | Self::Avrcp | Self::Hfp)
    }
}

/// Message delivered to the owner task
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Start processing
    Init,
    /// Stop processing profile messages
    Suspend,
    /// Resume after `Suspend`
    Resume,
    /// Drain the queue and stop
    Exit,
    /// Replace the configuration
    UpdateConfig(ServiceConfig),
    /// A controller command reported a failure
    CommandFailed {
        /// Failed command
        command: ControllerCommand,
        /// HCI status code
        status: u8,
    },

    /// Remote device is paging us
    ConnectRequest {
        /// Remote address
        addr: BluetoothAddress,
        /// Class of device from the page
        class_of_device: u32,
    },
    /// ACL link established
    AclConnected {
        /// Remote address
        addr: BluetoothAddress,
        /// ACL connection handle
        handle: u16,
    },
    /// ACL connection attempt failed
    AclConnectFailed {
        /// Remote address
        addr: BluetoothAddress,
        /// HCI status code
        reason: u8,
    },
    /// ACL link released
    AclDisconnected {
        /// ACL connection handle
        handle: u16,
        /// HCI reason code
        reason: u8,
    },
    /// Encryption/authentication completed
    SecurityChanged {
        /// ACL connection handle
        handle: u16,
    },
    /// Baseband role changed
    RoleChanged {
        /// Remote address
        addr: BluetoothAddress,
        /// New local role
        role: ControllerRole,
    },
    /// Remote name resolved
    RemoteName {
        /// Remote address
        addr: BluetoothAddress,
        /// Name bytes
        name: String<MAX_DEVICE_NAME_LENGTH>,
    },
    /// RSSI read completed
    RssiRead {
        /// ACL connection handle
        handle: u16,
        /// RSSI in dBm
        rssi: i8,
    },
    /// Link quality read completed
    LinkQualityRead {
        /// ACL connection handle
        handle: u16,
        /// Link quality
        quality: u8,
    },
    /// Device identification learned from SDP/EIR
    DeviceInfo {
        /// ACL connection handle
        handle: u16,
        /// PnP vendor id
        vendor_id: Option<u16>,
        /// Class of device
        class_of_device: u32,
    },
    /// Profile connected
    ProfileConnected {
        /// ACL connection handle
        handle: u16,
        /// Profile
        profile: Profile,
    },
    /// Profile disconnected
    ProfileDisconnected {
        /// ACL connection handle
        handle: u16,
        /// Profile
        profile: Profile,
    },
    /// TWS role of a link decided
    SetTwsRole {
        /// ACL connection handle
        handle: u16,
        /// Role of the local device on that link
        role: TwsRole,
    },
    /// Snoop role of a link changed
    SetSnoopRole {
        /// ACL connection handle
        handle: u16,
        /// Snoop role
        role: SnoopRole,
    },
    /// Keep a reduced record for resume when this link goes down
    SetResume {
        /// Remote address
        addr: BluetoothAddress,
        /// Link was halted on purpose
        halted: bool,
    },
    /// Application asks to connect
    Connect {
        /// Remote address
        addr: BluetoothAddress,
    },
    /// Application asks to disconnect
    Disconnect {
        /// Remote address
        addr: BluetoothAddress,
    },

    /// A2DP stream lifecycle
    A2dpMedia {
        /// ACL connection handle
        handle: u16,
        /// New stream state
        state: MediaState,
    },
    /// User paused playback on a phone
    A2dpUserPause {
        /// ACL connection handle
        handle: u16,
    },
    /// Re-assert the active stream
    A2dpCheckState,
    /// Negotiated A2DP codec
    A2dpCodec {
        /// ACL connection handle
        handle: u16,
        /// Codec type
        codec: u8,
    },

    /// AVRCP play state notification
    AvrcpPlayState {
        /// ACL connection handle
        handle: u16,
        /// Playing
        playing: bool,
    },
    /// AVRCP `GetPlayStatus` response
    AvrcpPlayStatus {
        /// ACL connection handle
        handle: u16,
        /// Play status
        status: PlayStatus,
    },
    /// Phone set the absolute volume
    AvrcpSetAbsoluteVolume {
        /// ACL connection handle
        handle: u16,
        /// Volume (0..127)
        volume: u8,
    },

    /// AG call indicator changed
    HfpIndicator {
        /// ACL connection handle
        handle: u16,
        /// Indicator and value
        indicator: CallIndicator,
    },
    /// SCO link established or released
    HfpSco {
        /// ACL connection handle
        handle: u16,
        /// Established
        established: bool,
    },
    /// Negotiated HFP codec
    HfpCodec {
        /// ACL connection handle
        handle: u16,
        /// Codec id
        codec_id: u8,
        /// Sample rate in kHz
        sample_rate_khz: u8,
    },
    /// User makes a phone the active HFP device
    HfpSwitchActive {
        /// Remote address
        addr: BluetoothAddress,
    },
    /// Move call audio between the phone and the headset
    HfpSwitchSoundSource,

    /// Scan policy input changed
    Scan(ScanInput),
    /// Re-run the scan policy now
    ScanRefresh {
        /// Rewrite every controller setting
        force: bool,
    },

    /// Link mode changed
    ModeChanged {
        /// ACL connection handle
        handle: u16,
        /// New mode
        mode: LinkMode,
        /// Sniff interval in slots
        interval: u16,
    },
    /// rx/tx activity counter of a link
    LinkActivity {
        /// ACL connection handle
        handle: u16,
        /// Monotonic counter
        count: u32,
    },
    /// TWS link carries traffic that must not be delayed by sniff
    TwsLinkBusy(bool),
    /// TWS role switch in progress
    TwsSwitching(bool),
    /// Apply link-time budgets now
    AdjustLinkTime,

    /// Volume changed on a tracked device
    SetVolume {
        /// Remote address
        addr: BluetoothAddress,
        /// Music volume
        music: Option<u8>,
        /// Call volume
        call: Option<u8>,
    },
    /// Clear the saved volume table
    ClearVolumes,
}

impl Message {
    /// Dispatch key
    #[must_use]
    pub fn tag(&self) -> MessageTag {
        match self {
            Self::Init | Self::Suspend | Self::Resume | Self::Exit => MessageTag::Control,
            Self::UpdateConfig(_) | Self::CommandFailed { .. } => MessageTag::Control,
            Self::ConnectRequest { .. }
            | Self::AclConnected { .. }
            | Self::AclConnectFailed { .. }
            | Self::AclDisconnected { .. }
            | Self::SecurityChanged { .. }
            | Self::RoleChanged { .. }
            | Self::RemoteName { .. }
            | Self::RssiRead { .. }
            | Self::LinkQualityRead { .. }
            | Self::DeviceInfo { .. }
            | Self::ProfileConnected { .. }
            | Self::ProfileDisconnected { .. }
            | Self::SetTwsRole { .. }
            | Self::SetSnoopRole { .. }
            | Self::SetResume { .. }
            | Self::Connect { .. }
            | Self::Disconnect { .. } => MessageTag::Connection,
            Self::A2dpMedia { .. }
            | Self::A2dpUserPause { .. }
            | Self::A2dpCheckState
            | Self::A2dpCodec { .. } => MessageTag::A2dp,
            Self::AvrcpPlayState { .. }
            | Self::AvrcpPlayStatus { .. }
            | Self::AvrcpSetAbsoluteVolume { .. } => MessageTag::Avrcp,
            Self::HfpIndicator { .. }
            | Self::HfpSco { .. }
            | Self::HfpCodec { .. }
            | Self::HfpSwitchActive { .. }
            | Self::HfpSwitchSoundSource => MessageTag::Hfp,
            Self::Scan(_) | Self::ScanRefresh { .. } => MessageTag::Scan,
            Self::ModeChanged { .. }
            | Self::LinkActivity { .. }
            | Self::TwsLinkBusy(_)
            | Self::TwsSwitching(_)
            | Self::AdjustLinkTime => MessageTag::Power,
            Self::SetVolume { .. } | Self::ClearVolumes => MessageTag::Volume,
        }
    }
}

/// Handler invoked for every message of one tag
pub type Handler = fn(&mut Service, Message, Millis) -> Result<(), ServiceError>;

/// One handler per message tag
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: FnvIndexMap<MessageTag, Handler, 8>,
}

impl HandlerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: FnvIndexMap::new(),
        }
    }

    /// Register the handler of a tag
    ///
    /// # Errors
    /// `AlreadyExists` if the tag already has a handler, `InvalidArgument` for the
    /// control tag
    pub fn register(&mut self, tag: MessageTag, handler: Handler) -> Result<(), ServiceError> {
        if tag == MessageTag::Control {
            return Err(ServiceError::InvalidArgument);
        }
        if self.handlers.contains_key(&tag) {
            return Err(ServiceError::AlreadyExists);
        }
        self.handlers
            .insert(tag, handler)
            .map(|_| ())
            .map_err(|_| ServiceError::OutOfResources)
    }

    /// Handler of a tag
    #[must_use]
    pub fn get(&self, tag: MessageTag) -> Option<Handler> {
        self.handlers.get(&tag).copied()
    }

    /// First tag of `required` without a handler
    #[must_use]
    pub fn missing(&self, required: &[MessageTag]) -> Option<MessageTag> {
        required
            .iter()
            .copied()
            .find(|tag| !self.handlers.contains_key(tag))
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}
