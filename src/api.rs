//! `Duetbird` API Functions
//!
//! Application code talks to the owner task through these functions. Events are posted
//! with [`post`], state is read with the ask-pattern queries below, and notifications
//! are pulled with [`next_notification`].
//!
//! Queries are answered from the owner task's state between two messages, so a reply
//! always reflects a fully handled message.
//!
//! # Usage
//!
//! ```rust,ignore
//! use duetbird::{Message, api};
//!
//! api::post(Message::Init)?;
//!
//! if let Some(phone) = api::active_a2dp_device().await? {
//!     let volume = api::saved_volume(phone).await?;
//! }
//! ```

use crate::{
    BluetoothAddress, DeviceSnapshot, MESSAGE_CHANNEL, Message, NOTIFICATION_CHANNEL,
    Notification, REQUEST_CHANNEL, RESPONSE_CHANNEL, Request, Response, ServiceError,
    constants::MAX_RECORDS, scan::ScanSnapshot, volume::VolumeLookup,
};
use embassy_sync::channel::TrySendError;
use heapless::Vec;

/// The message queue was full; the message is handed back
#[derive(Debug, Clone, PartialEq)]
pub struct PostError(pub Message);

/// Post a message to the owner task without waiting
///
/// # Errors
///
/// Returns the message if the queue is full.
pub fn post(message: Message) -> Result<(), PostError> {
    MESSAGE_CHANNEL.try_send(message).map_err(|e| match e {
        TrySendError::Full(message) => {
            defmt::warn!("[API] Message queue full");
            PostError(message)
        }
    })
}

/// Post a message, waiting for room in the queue
pub async fn post_wait(message: Message) {
    MESSAGE_CHANNEL.sender().send(message).await;
}

async fn ask(request: Request) -> Response {
    REQUEST_CHANNEL.sender().send(request).await;
    RESPONSE_CHANNEL.receiver().receive().await
}

/// Address of the A2DP active device.
///
/// # Errors
///
/// Returns `NotInitialized` before `Init` or after `Exit`.
pub async fn active_a2dp_device() -> Result<Option<BluetoothAddress>, ServiceError> {
    match ask(Request::ActiveA2dp).await {
        Response::ActiveDevice(active) => Ok(active),
        Response::Error(e) => Err(e),
        _ => Err(ServiceError::InvalidArgument),
    }
}

/// Address of the HFP active device.
///
/// # Errors
///
/// Returns `NotInitialized` before `Init` or after `Exit`.
pub async fn active_hfp_device() -> Result<Option<BluetoothAddress>, ServiceError> {
    match ask(Request::ActiveHfp).await {
        Response::ActiveDevice(active) => Ok(active),
        Response::Error(e) => Err(e),
        _ => Err(ServiceError::InvalidArgument),
    }
}

/// Snapshot of one tracked device.
///
/// # Errors
///
/// Returns `NotFound` if the address is not tracked.
pub async fn device_snapshot(address: BluetoothAddress) -> Result<DeviceSnapshot, ServiceError> {
    match ask(Request::Device(address)).await {
        Response::Device(snapshot) => Ok(snapshot),
        Response::Error(e) => Err(e),
        _ => Err(ServiceError::InvalidArgument),
    }
}

/// Snapshots of every device with an ACL link.
///
/// # Errors
///
/// Returns `NotInitialized` before `Init` or after `Exit`.
pub async fn connected_devices() -> Result<Vec<DeviceSnapshot, MAX_RECORDS>, ServiceError> {
    match ask(Request::ConnectedDevices).await {
        Response::Devices(devices) => Ok(devices),
        Response::Error(e) => Err(e),
        _ => Err(ServiceError::InvalidArgument),
    }
}

/// Visibility last written to the controller and its inputs.
///
/// # Errors
///
/// Returns `NotInitialized` before `Init` or after `Exit`.
pub async fn scan_state() -> Result<ScanSnapshot, ServiceError> {
    match ask(Request::ScanState).await {
        Response::Scan(snapshot) => Ok(snapshot),
        Response::Error(e) => Err(e),
        _ => Err(ServiceError::InvalidArgument),
    }
}

/// Saved volume of an address, or the configured defaults.
///
/// # Errors
///
/// Returns `NotInitialized` before `Init` or after `Exit`.
pub async fn saved_volume(address: BluetoothAddress) -> Result<VolumeLookup, ServiceError> {
    match ask(Request::SavedVolume(address)).await {
        Response::Volume(lookup) => Ok(lookup),
        Response::Error(e) => Err(e),
        _ => Err(ServiceError::InvalidArgument),
    }
}

/// Drop profile messages until [`resume`].
///
/// # Errors
///
/// Returns the message if the queue is full.
pub fn suspend() -> Result<(), PostError> {
    post(Message::Suspend)
}

/// Resume after [`suspend`].
///
/// # Errors
///
/// Returns the message if the queue is full.
pub fn resume() -> Result<(), PostError> {
    post(Message::Resume)
}

/// Stop the owner task once the message is reached; later messages are dropped.
pub async fn shutdown() {
    post_wait(Message::Exit).await;
}

/// Wait for the next notification
pub async fn next_notification() -> Notification {
    NOTIFICATION_CHANNEL.receiver().receive().await
}

/// Take a pending notification, if any
#[must_use]
pub fn try_notification() -> Option<Notification> {
    NOTIFICATION_CHANNEL.try_receive().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Service, ServiceConfig, rdm::Profile};
    use embassy_futures::{block_on, join::join};

    fn addr(last: u8) -> BluetoothAddress {
        BluetoothAddress::new([0x01, 0x02, 0x03, 0x04, 0x05, last])
    }

    async fn answer_one(service: &Service) {
        let request = REQUEST_CHANNEL.receiver().receive().await;
        RESPONSE_CHANNEL
            .sender()
            .send(service.process_api_request(request))
            .await;
    }

    // one test owns the request channels; parallel tests would steal each other's replies
    #[test]
    fn test_queries_through_channels() {
        let mut service = Service::new(ServiceConfig::default()).unwrap();

        let (result, ()) = block_on(join(active_a2dp_device(), answer_one(&service)));
        assert_eq!(result, Err(ServiceError::NotInitialized));

        service.handle(Message::Init, 0).unwrap();
        service
            .handle_all(
                [
                    Message::AclConnected {
                        addr: addr(1),
                        handle: 0x40,
                    },
                    Message::ProfileConnected {
                        handle: 0x40,
                        profile: Profile::A2dp,
                    },
                ],
                0,
            )
            .unwrap();

        let (result, ()) = block_on(join(active_a2dp_device(), answer_one(&service)));
        assert_eq!(result, Ok(Some(addr(1))));

        let (result, ()) = block_on(join(active_hfp_device(), answer_one(&service)));
        assert_eq!(result, Ok(None));

        let (result, ()) = block_on(join(device_snapshot(addr(9)), answer_one(&service)));
        assert_eq!(result.err(), Some(ServiceError::NotFound));

        let (result, ()) = block_on(join(connected_devices(), answer_one(&service)));
        assert_eq!(result.map(|devices| devices.len()), Ok(1));

        let (result, ()) = block_on(join(saved_volume(addr(2)), answer_one(&service)));
        assert!(!result.unwrap().found);
    }

    #[test]
    fn test_post_and_notifications() {
        post(Message::Init).unwrap();
        let received = MESSAGE_CHANNEL.try_receive().unwrap();
        assert!(matches!(received, Message::Init));

        NOTIFICATION_CHANNEL
            .try_send(Notification::ScanChanged {
                discoverable: true,
                connectable: true,
            })
            .unwrap();
        assert_eq!(
            block_on(next_notification()),
            Notification::ScanChanged {
                discoverable: true,
                connectable: true,
            }
        );
        assert_eq!(try_notification(), None);
    }
}
