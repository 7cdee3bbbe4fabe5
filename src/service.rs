//! Service Core - the state owned by the single owner task
//!
//! `Service` bundles every component's state: the Remote Device Manager, the timer
//! registry, the scan policy, the saved volume table and the power scheduler inputs.
//! Only the owner task touches it. Other tasks talk to it through messages and
//! ask-pattern requests.
//!
//! ## Event Flow
//!
//! 1. A [`Message`] is dispatched to the handler registered for its tag
//! 2. Handlers mutate state synchronously and queue [`ControllerCommand`]s and
//!    [`Notification`]s in the outbox
//! 3. Expired timers run between messages, never while a handler runs
//! 4. The processor drains the outbox after every step
//!
//! All methods take the current time in milliseconds, so the whole engine can be driven
//! without an executor.

mod api_processor;
mod connection;
mod message_processor;

use crate::{
    ControllerCommand, Message, Notification, ServiceConfig, ServiceError,
    a2dp::PromptToneFilter,
    constants::{
        MAX_CONNECT_REQUESTS, MAX_HOST_COMMANDS, MAX_NOTIFICATIONS, SAVED_VOLUME_CAPACITY,
    },
    message::{Handler, HandlerRegistry, MessageTag},
    power::TwsLinkState,
    rdm::DeviceManager,
    scan::ScanPolicy,
    timer::{Millis, TimerRegistry},
    volume::SavedVolumeTable,
};
use heapless::Vec;

/// Lifecycle of the owner task
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Lifecycle {
    /// Created, waiting for `Init`
    Created,
    /// Processing every message
    Running,
    /// Profile messages are dropped
    Suspended,
    /// `Exit` received
    Stopped,
}

/// Commands and notifications produced by handlers
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    pub(crate) commands: Vec<ControllerCommand, MAX_HOST_COMMANDS>,
    pub(crate) notifications: Vec<Notification, MAX_NOTIFICATIONS>,
}

impl Outbox {
    pub(crate) fn command(&mut self, command: ControllerCommand) {
        defmt::debug!("[CORE] Queue command {}", command);
        if self.commands.push(command).is_err() {
            defmt::warn!("[CORE] Command queue full, dropping {}", command);
        }
    }

    pub(crate) fn notify(&mut self, notification: Notification) {
        if let Err(dropped) = self.notifications.push(notification) {
            defmt::warn!(
                "[CORE] Notification queue full, dropping {:?}",
                defmt::Debug2Format(&dropped)
            );
        }
    }
}

/// State of the connection coordination engine
#[derive(Debug)]
pub struct Service {
    pub(crate) config: ServiceConfig,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) registry: HandlerRegistry,
    pub(crate) rdm: DeviceManager,
    pub(crate) timers: TimerRegistry,
    pub(crate) scan: ScanPolicy,
    pub(crate) volumes: SavedVolumeTable<SAVED_VOLUME_CAPACITY>,
    pub(crate) volumes_dirty: bool,
    pub(crate) connect_requests: Vec<connection::ConnectRequest, MAX_CONNECT_REQUESTS>,
    pub(crate) prompt_tone: PromptToneFilter,
    pub(crate) tws_link: TwsLinkState,
    pub(crate) outbox: Outbox,
}

impl Service {
    /// Create the service and register the handlers of the configured profiles
    ///
    /// # Errors
    /// `InvalidArgument` if the configuration does not validate
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        config.validate()?;

        let mut registry = HandlerRegistry::new();
        registry.register(MessageTag::Connection, connection::handle_connection)?;
        registry.register(MessageTag::Scan, crate::scan::handle_scan)?;
        registry.register(MessageTag::Power, crate::power::handle_power)?;
        registry.register(MessageTag::Volume, crate::volume::handle_volume)?;

        let mut service = Self {
            config,
            lifecycle: Lifecycle::Created,
            registry,
            rdm: DeviceManager::new(),
            timers: TimerRegistry::new(),
            scan: ScanPolicy::new(),
            volumes: SavedVolumeTable::new(),
            volumes_dirty: false,
            connect_requests: Vec::new(),
            prompt_tone: PromptToneFilter::default(),
            tws_link: TwsLinkState::default(),
            outbox: Outbox::default(),
        };
        service.register_profile_handlers()?;
        Ok(service)
    }

    /// Register the handlers of enabled profiles that have none yet
    pub(crate) fn register_profile_handlers(&mut self) -> Result<(), ServiceError> {
        let profiles = self.config.profiles;
        let handlers: [(bool, MessageTag, Handler); 3] = [
            (profiles.a2dp, MessageTag::A2dp, crate::a2dp::handle_a2dp),
            (profiles.avrcp, MessageTag::Avrcp, crate::a2dp::handle_avrcp),
            (profiles.hfp, MessageTag::Hfp, crate::hfp::handle_hfp),
        ];
        for (enabled, tag, handler) in handlers {
            if enabled && self.registry.get(tag).is_none() {
                self.registry.register(tag, handler)?;
            }
        }
        Ok(())
    }

    /// Whether messages of a tag are processed under the current configuration
    pub(crate) fn tag_enabled(&self, tag: MessageTag) -> bool {
        let profiles = self.config.profiles;
        match tag {
            MessageTag::A2dp => profiles.a2dp,
            MessageTag::Avrcp => profiles.avrcp,
            MessageTag::Hfp => profiles.hfp,
            _ => true,
        }
    }

    /// Tags that must have a handler before `Init` succeeds
    pub(crate) fn required_tags(&self) -> Vec<MessageTag, 8> {
        let mut tags: Vec<MessageTag, 8> = Vec::new();
        for (tag, needed) in [
            (MessageTag::Connection, true),
            (MessageTag::Scan, true),
            (MessageTag::Power, true),
            (MessageTag::Volume, true),
            (MessageTag::A2dp, self.config.profiles.a2dp),
            (MessageTag::Avrcp, self.config.profiles.avrcp),
            (MessageTag::Hfp, self.config.profiles.hfp),
        ] {
            if needed {
                tags.push(tag).ok();
            }
        }
        tags
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Lifecycle state
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Whether `Exit` was processed
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.lifecycle == Lifecycle::Stopped
    }

    /// Remote Device Manager
    #[must_use]
    pub fn rdm(&self) -> &DeviceManager {
        &self.rdm
    }

    /// Earliest timer deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<Millis> {
        self.timers.next_deadline()
    }

    /// Take the controller commands queued since the last call
    pub fn take_commands(&mut self) -> Vec<ControllerCommand, MAX_HOST_COMMANDS> {
        core::mem::take(&mut self.outbox.commands)
    }

    /// Take the notifications queued since the last call
    pub fn take_notifications(&mut self) -> Vec<Notification, MAX_NOTIFICATIONS> {
        core::mem::take(&mut self.outbox.notifications)
    }

    pub(crate) fn notify(&mut self, notification: Notification) {
        self.outbox.notify(notification);
    }

    pub(crate) fn command(&mut self, command: ControllerCommand) {
        self.outbox.command(command);
    }
}

/// Convenience used by tests and integrators driving the engine by hand
impl Service {
    /// Handle a batch of messages at the same instant
    ///
    /// # Errors
    /// The first error returned by a handler; later messages are still handled
    pub fn handle_all<I: IntoIterator<Item = Message>>(
        &mut self,
        messages: I,
        now: Millis,
    ) -> Result<(), ServiceError> {
        let mut result = Ok(());
        for message in messages {
            let outcome = self.handle(message, now);
            if result.is_ok() {
                result = outcome;
            }
        }
        result
    }
}
