#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![allow(clippy::too_many_lines)]

pub mod a2dp;
mod address;
pub mod api;
pub mod config;
pub mod constants;
pub mod hci;
pub mod hfp;
pub mod message;
pub mod power;
pub mod processor;
pub mod rdm;
pub mod scan;
mod service;
pub mod timer;
pub mod volume;

use crate::constants::{MAX_HOST_COMMANDS, MAX_MESSAGES, MAX_NOTIFICATIONS, MAX_RECORDS, MAX_REQUESTS};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use heapless::{String, Vec};

pub use address::BluetoothAddress;
pub use api::PostError;
pub use config::ServiceConfig;
pub use hci::{ControllerCommand, HostController};
pub use message::Message;
pub use rdm::{DeviceSnapshot, Profile, RecordHandle};
pub use service::{Lifecycle, Service};
pub use volume::KeyValueStore;

/// Inbound queue of the owner task
pub(crate) static MESSAGE_CHANNEL: Channel<CriticalSectionRawMutex, Message, MAX_MESSAGES> =
    Channel::new();

pub(crate) static REQUEST_CHANNEL: Channel<CriticalSectionRawMutex, Request, MAX_REQUESTS> =
    Channel::new();

pub(crate) static RESPONSE_CHANNEL: Channel<CriticalSectionRawMutex, Response, MAX_REQUESTS> =
    Channel::new();

/// Commands produced by handlers, executed by the controller command processor
pub(crate) static CONTROLLER_COMMAND_CHANNEL: Channel<
    CriticalSectionRawMutex,
    ControllerCommand,
    MAX_HOST_COMMANDS,
> = Channel::new();

pub(crate) static NOTIFICATION_CHANNEL: Channel<
    CriticalSectionRawMutex,
    Notification,
    MAX_NOTIFICATIONS,
> = Channel::new();

/// Error kinds returned by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum ServiceError {
    /// Address, handle or record not tracked
    NotFound,
    /// Duplicate registration or record
    AlreadyExists,
    /// A setter was called with the value already held
    AlreadyInState,
    /// Dependent state still present, or another operation is outstanding
    Busy,
    /// A bounded table or queue is full
    OutOfResources,
    /// Malformed parameter
    InvalidArgument,
    /// The owner task has not been initialized or has stopped
    NotInitialized,
    /// A controller command reported a failure status
    ControllerFailure(u8),
}

/// Events raised to the application layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// ACL link established and record created
    Connected {
        /// Remote address
        addr: BluetoothAddress,
        /// ACL connection handle
        handle: u16,
    },
    /// Outgoing or incoming connection attempt failed
    ConnectFailed {
        /// Remote address
        addr: BluetoothAddress,
        /// HCI reason code
        reason: u8,
    },
    /// ACL link released
    Disconnected {
        /// Remote address
        addr: BluetoothAddress,
        /// HCI reason code
        reason: u8,
    },
    /// A profile connected on a tracked device
    ProfileConnected {
        /// Remote address
        addr: BluetoothAddress,
        /// Profile
        profile: Profile,
    },
    /// A profile disconnected on a tracked device
    ProfileDisconnected {
        /// Remote address
        addr: BluetoothAddress,
        /// Profile
        profile: Profile,
    },
    /// A2DP stream event for one device
    A2dp {
        /// Remote address
        addr: BluetoothAddress,
        /// Stream event
        event: a2dp::A2dpEvent,
    },
    /// Call status event for one phone
    Hfp {
        /// Remote address
        addr: BluetoothAddress,
        /// Call status event
        event: hfp::HfpEvent,
    },
    /// The active HFP phone changed while the previous one still had call activity
    HfpActiveChanged {
        /// New active phone
        active: BluetoothAddress,
        /// Previous active phone
        previous: BluetoothAddress,
    },
    /// AVRCP absolute volume to apply locally
    AbsoluteVolume {
        /// Remote address
        addr: BluetoothAddress,
        /// Volume (0..127)
        volume: u8,
    },
    /// Remote name resolved
    RemoteName {
        /// Remote address
        addr: BluetoothAddress,
        /// Device name
        name: String<{ constants::MAX_DEVICE_NAME_LENGTH }>,
    },
    /// Applied visibility changed
    ScanChanged {
        /// Inquiry scan enabled
        discoverable: bool,
        /// Page scan enabled
        connectable: bool,
    },
}

/// API requests answered by the owner task
#[derive(Debug, Clone)]
pub(crate) enum Request {
    /// Current A2DP active device
    ActiveA2dp,
    /// Current HFP active device
    ActiveHfp,
    /// Snapshot of one tracked device
    Device(BluetoothAddress),
    /// Snapshots of every tracked device
    ConnectedDevices,
    /// Last applied scan state
    ScanState,
    /// Saved volume of an address
    SavedVolume(BluetoothAddress),
}

/// API responses sent back from the owner task
#[derive(Debug, Clone)]
pub(crate) enum Response {
    /// Active device, if any
    ActiveDevice(Option<BluetoothAddress>),
    /// Snapshot of one device
    Device(DeviceSnapshot),
    /// Snapshots of every tracked device
    Devices(Vec<DeviceSnapshot, MAX_RECORDS>),
    /// Last applied scan state
    Scan(scan::ScanSnapshot),
    /// Saved or default volume
    Volume(volume::VolumeLookup),
    /// Error occurred
    Error(ServiceError),
}
