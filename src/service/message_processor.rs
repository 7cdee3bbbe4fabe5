use super::{Lifecycle, Service};
use crate::{
    ControllerCommand, Message, Notification, ServiceError,
    message::MessageTag,
    timer::{Millis, TimerId, TimerKind},
};

impl Service {
    /// Dispatch one message to the handler registered for its tag
    ///
    /// Control messages are handled by the core itself. The handler runs to completion
    /// before the next message or timer is looked at.
    ///
    /// # Errors
    /// `NotInitialized` before `Init` or after `Exit`, `NotFound` for a tag without a
    /// handler, otherwise whatever the handler returns
    pub fn handle(&mut self, message: Message, now: Millis) -> Result<(), ServiceError> {
        let tag = message.tag();
        defmt::debug!("[CORE] {} {:?}", tag, defmt::Debug2Format(&message));

        if tag == MessageTag::Control {
            return self.handle_control(message, now);
        }

        match self.lifecycle {
            Lifecycle::Created | Lifecycle::Stopped => {
                defmt::warn!("[CORE] {} message while {}", tag, self.lifecycle);
                return Err(ServiceError::NotInitialized);
            }
            Lifecycle::Suspended if tag.is_profile() => {
                defmt::debug!("[CORE] Suspended, dropping {} message", tag);
                return Ok(());
            }
            _ => {}
        }

        if !self.tag_enabled(tag) {
            defmt::debug!("[CORE] {} disabled, dropping message", tag);
            return Ok(());
        }

        let Some(handler) = self.registry.get(tag) else {
            defmt::warn!("[CORE] No handler for {}", tag);
            return Err(ServiceError::NotFound);
        };

        let result = handler(self, message, now);
        if let Err(error) = result {
            defmt::warn!("[CORE] {} handler failed: {}", tag, error);
        }
        result
    }

    /// Run every timer whose deadline has passed, earliest first
    pub fn run_timers(&mut self, now: Millis) {
        if !matches!(self.lifecycle, Lifecycle::Running | Lifecycle::Suspended) {
            return;
        }
        for id in self.timers.take_expired(now) {
            if let Err(error) = self.on_timer(id, now) {
                defmt::warn!("[CORE] Timer {} failed: {}", id, error);
            }
        }
    }

    fn handle_control(&mut self, message: Message, now: Millis) -> Result<(), ServiceError> {
        if self.lifecycle == Lifecycle::Stopped {
            return Err(ServiceError::NotInitialized);
        }

        match message {
            Message::Init => {
                if self.lifecycle != Lifecycle::Created {
                    return Err(ServiceError::AlreadyInState);
                }
                let required = self.required_tags();
                if let Some(tag) = self.registry.missing(&required) {
                    defmt::warn!("[CORE] Init refused, no handler for {}", tag);
                    return Err(ServiceError::NotFound);
                }
                self.lifecycle = Lifecycle::Running;
                self.start_power_timers(now)?;
                self.update_scan(true);
                defmt::info!("[CORE] Running");
                Ok(())
            }
            Message::Suspend => match self.lifecycle {
                Lifecycle::Running => {
                    self.lifecycle = Lifecycle::Suspended;
                    defmt::info!("[CORE] Suspended");
                    Ok(())
                }
                Lifecycle::Suspended => Err(ServiceError::AlreadyInState),
                _ => Err(ServiceError::NotInitialized),
            },
            Message::Resume => match self.lifecycle {
                Lifecycle::Suspended => {
                    self.lifecycle = Lifecycle::Running;
                    defmt::info!("[CORE] Resumed");
                    Ok(())
                }
                Lifecycle::Running => Err(ServiceError::AlreadyInState),
                _ => Err(ServiceError::NotInitialized),
            },
            Message::Exit => {
                self.lifecycle = Lifecycle::Stopped;
                defmt::info!("[CORE] Stopped");
                Ok(())
            }
            Message::UpdateConfig(config) => {
                config.validate()?;
                self.config = config;
                self.register_profile_handlers()?;
                if self.lifecycle != Lifecycle::Created {
                    self.start_power_timers(now)?;
                    self.update_scan(true);
                }
                defmt::info!("[CORE] Configuration updated");
                Ok(())
            }
            Message::CommandFailed { command, status } => {
                if self.lifecycle == Lifecycle::Created {
                    return Err(ServiceError::NotInitialized);
                }
                self.command_failed(command, status, now)
            }
            _ => Err(ServiceError::InvalidArgument),
        }
    }

    fn command_failed(
        &mut self,
        command: ControllerCommand,
        status: u8,
        now: Millis,
    ) -> Result<(), ServiceError> {
        defmt::warn!("[CORE] {} failed with status 0x{:02x}", command, status);
        match command {
            ControllerCommand::WriteScanEnable { .. }
            | ControllerCommand::WriteCurrentIac { .. }
            | ControllerCommand::WriteInquiryScanActivity { .. }
            | ControllerCommand::WriteInquiryScanType(_)
            | ControllerCommand::WritePageScanActivity { .. }
            | ControllerCommand::WritePageScanType(_) => {
                self.scan.request_retry();
                self.schedule_scan_update(now)
            }
            ControllerCommand::Connect { addr } => {
                self.scan.inputs.connect_pending = false;
                self.notify(Notification::ConnectFailed { addr, reason: status });
                self.schedule_scan_update(now)
            }
            ControllerCommand::SniffMode { handle, .. } => {
                let record = self.rdm.find_by_acl(handle).ok_or(ServiceError::NotFound)?;
                if let Some(record) = self.rdm.get_mut(record) {
                    record.power.entering = false;
                }
                Ok(())
            }
            ControllerCommand::ExitSniffMode { handle } => {
                let record = self.rdm.find_by_acl(handle).ok_or(ServiceError::NotFound)?;
                if let Some(record) = self.rdm.get_mut(record) {
                    record.power.exiting = false;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn on_timer(&mut self, id: TimerId, now: Millis) -> Result<(), ServiceError> {
        match (id.kind, id.owner) {
            (TimerKind::SniffTick, _) => {
                self.sniff_tick(now);
                Ok(())
            }
            (TimerKind::LinkAdjustTick, _) => {
                self.link_adjust_tick();
                Ok(())
            }
            (TimerKind::ScanUpdate, _) => {
                self.update_scan(false);
                Ok(())
            }
            (TimerKind::A2dpCheck, _) => {
                self.a2dp_check(now);
                Ok(())
            }
            (TimerKind::PromptToneCheck, _) => {
                self.prompt_tone_poll();
                Ok(())
            }
            (TimerKind::AvrcpVolume, Some(owner)) => self.avrcp_volume_expired(owner),
            (TimerKind::AvrcpConnectingPending, Some(owner)) => {
                self.avrcp_connecting_expired(owner, now)
            }
            (TimerKind::AvrcpPlayingPending, Some(owner)) => {
                let record = self.rdm.get_mut(owner).ok_or(ServiceError::NotFound)?;
                record.avrcp_play_pended = true;
                Ok(())
            }
            (TimerKind::DisconnectWait, Some(owner)) => self.disconnect_wait_expired(owner),
            (kind, None) => {
                defmt::warn!("[CORE] {} timer without owner", kind);
                Err(ServiceError::InvalidArgument)
            }
        }
    }
}
