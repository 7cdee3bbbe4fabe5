//! Host Controller Boundary
//!
//! Handlers never talk to the controller. They queue [`ControllerCommand`] values,
//! which the command processor hands to the integrator's [`HostController`].
//! Failures come back as [`Message::CommandFailed`].
//!
//! Inbound, the connection-level HCI events are translated from `bt_hci` events by
//! [`translate_event`]. Profile and vendor events are posted as messages directly.

use crate::{
    BluetoothAddress, Message,
    config::ScanType,
    constants::{self, MAX_DEVICE_NAME_LENGTH},
};
use bt_hci::{
    cmd,
    controller::{ControllerCmdSync, ExternalController},
    event,
    transport::Transport,
};
use heapless::String;

/// Command produced by a handler for the host controller or the profile stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum ControllerCommand {
    /// `Write_Scan_Enable`
    WriteScanEnable {
        /// Inquiry scan
        inquiry: bool,
        /// Page scan
        page: bool,
    },
    /// `Write_Current_IAC_LAP` with a single access code
    WriteCurrentIac {
        /// Inquiry access code
        lap: [u8; 3],
    },
    /// `Write_Inquiry_Scan_Activity`
    WriteInquiryScanActivity {
        /// Interval in slots
        interval: u16,
        /// Window in slots
        window: u16,
    },
    /// `Write_Inquiry_Scan_Type`
    WriteInquiryScanType(ScanType),
    /// `Write_Page_Scan_Activity`
    WritePageScanActivity {
        /// Interval in slots
        interval: u16,
        /// Window in slots
        window: u16,
    },
    /// `Write_Page_Scan_Type`
    WritePageScanType(ScanType),
    /// Page a remote device
    Connect {
        /// Remote address
        addr: BluetoothAddress,
    },
    /// Accept an incoming page
    AcceptConnection {
        /// Remote address
        addr: BluetoothAddress,
    },
    /// Refuse an incoming page
    RejectConnection {
        /// Remote address
        addr: BluetoothAddress,
        /// HCI reason code
        reason: u8,
    },
    /// Tear down an ACL link
    Disconnect {
        /// ACL connection handle
        handle: u16,
    },
    /// Put a link into sniff
    SniffMode {
        /// ACL connection handle
        handle: u16,
        /// Sniff interval in slots
        interval: u16,
    },
    /// Bring a link back to active mode
    ExitSniffMode {
        /// ACL connection handle
        handle: u16,
    },
    /// Vendor link-time budget
    AdjustLinkTime {
        /// ACL connection handle
        handle: u16,
        /// Budget, 0 for none
        budget: u8,
    },
    /// AVRCP `GetPlayStatus`
    AvrcpGetPlayStatus {
        /// ACL connection handle
        handle: u16,
    },
    /// AVRCP pause pass-through
    AvrcpPause {
        /// ACL connection handle
        handle: u16,
    },
    /// Route call audio to the headset
    CreateSco {
        /// ACL connection handle
        handle: u16,
    },
    /// Leave call audio on the phone
    DisconnectSco {
        /// ACL connection handle
        handle: u16,
    },
}

/// Executes queued commands.
///
/// `Err` carries the HCI status code; it is posted back as [`Message::CommandFailed`].
#[allow(async_fn_in_trait)]
pub trait HostController {
    /// Execute one command
    async fn execute(&mut self, command: ControllerCommand) -> Result<(), u8>;
}

/// Status reported when the transport failed before the controller answered
pub const TRANSPORT_FAILURE: u8 = 0x1F;

/// Execute the link control commands `bt_hci` covers.
///
/// Returns `None` for commands the integrator has to execute itself (scan and sniff
/// settings, vendor and profile commands).
pub async fn execute_link_control<T: Transport + 'static, const SLOTS: usize>(
    controller: &ExternalController<T, SLOTS>,
    command: ControllerCommand,
) -> Option<Result<(), u8>> {
    let result = match command {
        ControllerCommand::Connect { addr } => {
            let create_conn = cmd::link_control::CreateConnection::new(
                addr.into(),
                constants::DEFAULT_PACKET_TYPES,
                constants::PAGE_SCAN_REPETITION_MODE_R1,
                constants::RESERVED_FIELD,
                constants::NO_CLOCK_OFFSET,
                constants::ALLOW_ROLE_SWITCH,
            );
            controller.exec(&create_conn).await
        }
        ControllerCommand::Disconnect { handle } => {
            let disconnect = cmd::link_control::Disconnect::new(
                bt_hci::param::ConnHandle::new(handle),
                bt_hci::param::DisconnectReason::RemoteUserTerminatedConn,
            );
            controller.exec(&disconnect).await
        }
        _ => return None,
    };
    Some(result.map_err(|e| {
        defmt::warn!("[HCI] {} failed: {:?}", command, defmt::Debug2Format(&e));
        TRANSPORT_FAILURE
    }))
}

fn copy_name(raw: &[u8]) -> String<MAX_DEVICE_NAME_LENGTH> {
    let len = raw
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(raw.len())
        .min(MAX_DEVICE_NAME_LENGTH);
    let mut name = String::new();
    match core::str::from_utf8(&raw[..len]) {
        Ok(s) => {
            name.push_str(s).ok();
        }
        Err(e) => {
            // keep the valid prefix of a name cut inside a multi-byte character
            if let Ok(s) = core::str::from_utf8(&raw[..e.valid_up_to()]) {
                name.push_str(s).ok();
            }
        }
    }
    name
}

/// Translate a connection-level HCI event into a message for the owner task
#[must_use]
pub fn translate_event(event: &event::Event<'_>) -> Option<Message> {
    match *event {
        event::Event::ConnectionComplete(ref complete) => {
            let addr: BluetoothAddress = complete.bd_addr.try_into().ok()?;
            match complete.status.to_result() {
                Ok(()) => Some(Message::AclConnected {
                    addr,
                    handle: complete.handle.raw(),
                }),
                Err(_) => Some(Message::AclConnectFailed {
                    addr,
                    reason: complete.status.into_inner(),
                }),
            }
        }
        event::Event::DisconnectionComplete(ref complete) => {
            if complete.status.to_result().is_ok() {
                Some(Message::AclDisconnected {
                    handle: complete.handle.raw(),
                    reason: complete.reason.into_inner(),
                })
            } else {
                None
            }
        }
        event::Event::RemoteNameRequestComplete(ref complete) => {
            if complete.status.to_result().is_ok() {
                let addr = complete.bd_addr.try_into().ok()?;
                Some(Message::RemoteName {
                    addr,
                    name: copy_name(&complete.remote_name),
                })
            } else {
                None
            }
        }
        _ => {
            defmt::debug!("[HCI] Untranslated event: {:?}", defmt::Debug2Format(event));
            None
        }
    }
}
