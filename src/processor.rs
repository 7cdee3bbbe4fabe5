//! Processor Tasks - owner loop, controller command execution and HCI event intake
//!
//! The owner loop is the only code that touches [`Service`]. It waits on three things
//! at once: the message queue, the ask-pattern request queue and the earliest timer
//! deadline. After every step it drains the outbox, forwarding controller commands to
//! the command processor and notifications to the application.
//!
//! # Usage
//!
//! ```rust,ignore
//! use duetbird::{ServiceConfig, processor};
//!
//! // controller: your HostController, store: your KeyValueStore
//! processor::run(ServiceConfig::default(), &mut controller, &mut store).await?;
//! ```
//!
//! With a `bt_hci` controller, spawn [`hci_event_processor`] as well so connection
//! events reach the owner task.
//!
//! # Generic Parameters
//!
//! * `T: Transport` - The HCI transport layer (UART, USB, etc.)
//! * `SLOTS` - Maximum number of controller command slots (typically 4-8)
//! * `BUFFER_SIZE` - Size of HCI read buffer in bytes (512+ recommended)

use crate::{
    CONTROLLER_COMMAND_CHANNEL, MESSAGE_CHANNEL, Message, NOTIFICATION_CHANNEL, REQUEST_CHANNEL,
    RESPONSE_CHANNEL, ServiceConfig, ServiceError,
    hci::{HostController, translate_event},
    service::Service,
    volume::KeyValueStore,
};
use bt_hci::{
    ControllerToHostPacket,
    controller::{Controller, ExternalController},
    transport::Transport,
};
use embassy_futures::select::{Either, Either3, select, select3};
use embassy_time::{Instant, Timer};

/// Read HCI packets and post the connection events the engine understands
pub async fn hci_event_processor<
    T: Transport + 'static,
    const SLOTS: usize,
    const BUFFER_SIZE: usize,
>(
    controller: &'static ExternalController<T, SLOTS>,
) {
    let mut read_buffer = [0u8; BUFFER_SIZE];

    loop {
        match controller.read(&mut read_buffer).await {
            Ok(ControllerToHostPacket::Event(event)) => {
                defmt::debug!("[PROCESSOR] HCI event: {:?}", defmt::Debug2Format(&event));
                if let Some(message) = translate_event(&event) {
                    MESSAGE_CHANNEL.sender().send(message).await;
                }
            }
            Ok(_) => {}
            Err(e) => {
                defmt::warn!("[PROCESSOR] HCI read error: {:?}", defmt::Debug2Format(&e));
            }
        }
    }
}

/// Execute queued controller commands; failures are posted back to the owner
pub async fn command_processor<C: HostController>(controller: &mut C) {
    let receiver = CONTROLLER_COMMAND_CHANNEL.receiver();
    loop {
        let command = receiver.receive().await;
        if let Err(status) = controller.execute(command).await {
            defmt::warn!("[PROCESSOR] {} failed: 0x{:02x}", command, status);
            MESSAGE_CHANNEL
                .sender()
                .send(Message::CommandFailed { command, status })
                .await;
        }
    }
}

async fn flush<S: KeyValueStore>(service: &mut Service, store: &mut S) {
    for command in service.take_commands() {
        CONTROLLER_COMMAND_CHANNEL.sender().send(command).await;
    }
    for notification in service.take_notifications() {
        if let Err(e) = NOTIFICATION_CHANNEL.try_send(notification) {
            defmt::warn!(
                "[PROCESSOR] Notification queue full, dropping {:?}",
                defmt::Debug2Format(&e)
            );
        }
    }
    if let Err(e) = service.persist_volumes(store) {
        defmt::warn!("[PROCESSOR] Saving volumes failed: {}", e);
    }
}

async fn owner_loop<S: KeyValueStore>(mut service: Service, store: &mut S) {
    let messages = MESSAGE_CHANNEL.receiver();
    let requests = REQUEST_CHANNEL.receiver();

    loop {
        let deadline = service.next_deadline();
        let timer = async {
            match deadline {
                Some(at) => Timer::at(Instant::from_millis(at)).await,
                None => core::future::pending().await,
            }
        };

        match select3(messages.receive(), requests.receive(), timer).await {
            Either3::First(message) => {
                // errors are logged by the dispatcher; the loop keeps going
                let _ = service.handle(message, Instant::now().as_millis());
            }
            Either3::Second(request) => {
                let response = service.process_api_request(request);
                RESPONSE_CHANNEL.sender().send(response).await;
            }
            Either3::Third(()) => {}
        }
        service.run_timers(Instant::now().as_millis());
        flush(&mut service, store).await;

        if service.is_stopped() {
            let mut dropped = 0usize;
            while messages.try_receive().is_ok() {
                dropped += 1;
            }
            defmt::info!("[PROCESSOR] Owner stopped, {} queued messages dropped", dropped);
            return;
        }
    }
}

/// Run the owner task and the command processor until `Exit` is processed
///
/// The saved volume table is restored from `store` before the first message.
///
/// # Errors
/// `InvalidArgument` if the configuration does not validate
pub async fn run<C: HostController, S: KeyValueStore>(
    config: ServiceConfig,
    controller: &mut C,
    store: &mut S,
) -> Result<(), ServiceError> {
    let mut service = Service::new(config)?;
    if let Err(e) = service.load_volumes(store) {
        defmt::warn!("[PROCESSOR] Saved volumes unreadable: {}", e);
    }
    defmt::info!("[PROCESSOR] Owner task started");

    match select(owner_loop(service, store), command_processor(controller)).await {
        Either::First(()) | Either::Second(()) => Ok(()),
    }
}
