//! A2DP priority and play arbitration
//!
//! Every stream change runs two passes. `update_prio` adjusts the priority bits of the
//! changed record and of its peer phone. `update_play` then compares the two phones,
//! moves the active flag and raises the application events.

use super::{A2dpEvent, A2dpPriority, MediaState, PlayStatus, Verdict};
use crate::{
    ControllerCommand, Notification, ServiceError,
    constants::{
        A2DP_CALL_GRACE_MS, A2DP_CHECK_INTERVAL_MS, AVRCP_CONNECTING_PENDING_MS,
        AVRCP_PLAYING_PENDING_MS, AVRCP_VOLUME_DELAY_MS, AVRCP_VOLUME_FILTER_MAX,
        PROMPT_TONE_POLL_MS,
    },
    rdm::{A2dpState, Profile, RecordHandle, TwsRole},
    service::Service,
    timer::{Millis, TimerId, TimerKind},
};

const CHECK_TIMER: TimerId = TimerId::global(TimerKind::A2dpCheck);
const PROMPT_TONE_TIMER: TimerId = TimerId::global(TimerKind::PromptToneCheck);

/// Stream change fed through arbitration
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
enum StreamChange {
    Started,
    Suspended,
    /// Prompt tone filter accepted the stream as real playback
    NonPromptToneStarted,
}

impl StreamChange {
    fn event(self) -> A2dpEvent {
        match self {
            Self::Started | Self::NonPromptToneStarted => A2dpEvent::Started,
            Self::Suspended => A2dpEvent::Suspended,
        }
    }
}

impl Service {
    fn a2dp_priority(&self, handle: RecordHandle) -> A2dpPriority {
        self.rdm
            .get(handle)
            .map(|r| r.a2dp.priority)
            .unwrap_or_default()
    }

    fn with_a2dp(&mut self, handle: RecordHandle, update: impl FnOnce(&mut A2dpState)) {
        if let Some(record) = self.rdm.get_mut(handle) {
            update(&mut record.a2dp);
        }
    }

    fn a2dp_event(&mut self, handle: RecordHandle, event: A2dpEvent) {
        if matches!(event, A2dpEvent::Started | A2dpEvent::StreamCheckStarted) {
            // airtime goes to the new source before its audio starts
            self.link_adjust_tick();
        }
        let Some(record) = self.rdm.get(handle) else {
            return;
        };
        let addr = record.address;
        defmt::info!("[A2DP] {} {}", addr, event);
        self.notify(Notification::A2dp { addr, event });
    }

    fn start_a2dp_check(&mut self, now: Millis) -> Result<(), ServiceError> {
        self.timers
            .ensure_periodic(CHECK_TIMER, now, A2DP_CHECK_INTERVAL_MS)
    }

    /// Media state reported by the A2DP profile
    pub(crate) fn a2dp_media_state(
        &mut self,
        handle: RecordHandle,
        state: MediaState,
        now: Millis,
    ) -> Result<(), ServiceError> {
        let record = self.rdm.get_mut(handle).ok_or(ServiceError::NotFound)?;
        let avrcp = record.profiles.is_connected(Profile::Avrcp);
        let stream_open = record.a2dp.priority.stream_open;
        defmt::debug!("[A2DP] {} media {}", record.address, state);

        let change = match state {
            MediaState::Open => None,
            MediaState::Start if avrcp => {
                let ahead = core::mem::take(&mut record.a2dp.pending_ahead_start);
                let avrcp_play = record.a2dp.priority.avrcp_play;
                if !avrcp_play {
                    let pending = TimerId::owned(TimerKind::AvrcpPlayingPending, handle);
                    if !self.timers.is_armed(pending) {
                        self.timers.start(pending, now, AVRCP_PLAYING_PENDING_MS)?;
                    }
                }
                (!stream_open || ahead).then_some(StreamChange::Started)
            }
            MediaState::Start => {
                record.a2dp.pending_ahead_start = true;
                let pending = TimerId::owned(TimerKind::AvrcpConnectingPending, handle);
                if !self.timers.is_armed(pending) {
                    defmt::info!("[A2DP] Start before AVRCP, pending");
                    self.timers.start(pending, now, AVRCP_CONNECTING_PENDING_MS)?;
                }
                None
            }
            MediaState::Suspend | MediaState::Close => {
                record.a2dp.pending_ahead_start = false;
                if record.pending_disconnect.after_avrcp_pause {
                    record.pending_disconnect.after_avrcp_pause = false;
                    self.timers
                        .cancel(TimerId::owned(TimerKind::DisconnectWait, handle));
                    if let Some(acl) = record.acl_handle {
                        defmt::info!("[A2DP] 0x{:04x} paused, disconnecting", acl);
                        self.outbox.command(ControllerCommand::Disconnect { handle: acl });
                    }
                }
                stream_open.then_some(StreamChange::Suspended)
            }
            MediaState::PendingAheadStart => {
                record.a2dp.pending_ahead_start = true;
                None
            }
        };

        match change {
            Some(change) => self.a2dp_stream_change(handle, change, now),
            None => Ok(()),
        }
    }

    fn a2dp_stream_change(
        &mut self,
        handle: RecordHandle,
        change: StreamChange,
        now: Millis,
    ) -> Result<(), ServiceError> {
        if self.rdm.local_role() == TwsRole::Slave {
            // the master arbitrates, the slave plays what it is told
            self.set_stream_bits(handle, change, now);
            self.a2dp_event(handle, change.event());
            return Ok(());
        }
        self.update_prio(handle, change, now)?;
        self.update_play(handle, change, now);
        self.start_a2dp_check(now)
    }

    fn set_stream_bits(&mut self, handle: RecordHandle, change: StreamChange, now: Millis) {
        self.with_a2dp(handle, |a2dp| {
            let open = match change {
                StreamChange::Started => true,
                StreamChange::Suspended => false,
                StreamChange::NonPromptToneStarted => return,
            };
            a2dp.priority.stream_open = open;
            a2dp.priority.user_start = open;
            a2dp.priority.avrcp_play = open;
            if open {
                a2dp.start_time = now;
                a2dp.stop_time = 0;
            } else {
                a2dp.start_time = 0;
                a2dp.stop_time = now;
            }
        });
    }

    fn update_prio(
        &mut self,
        handle: RecordHandle,
        change: StreamChange,
        now: Millis,
    ) -> Result<(), ServiceError> {
        let active = self.rdm.a2dp_active();
        let second = self.rdm.a2dp_second();
        self.set_stream_bits(handle, change, now);
        let Some(active) = active else {
            return Ok(());
        };
        let filter = self.config.prompt_tone_filter;

        let Some(second) = second else {
            match change {
                StreamChange::Started if filter => self.prompt_tone_start(active, now)?,
                StreamChange::Started | StreamChange::NonPromptToneStarted => {
                    self.with_a2dp(active, |a2dp| {
                        a2dp.priority.first_used = true;
                        a2dp.priority.stop_wait = false;
                        a2dp.priority.call_wait = false;
                    });
                }
                StreamChange::Suspended => {
                    self.prompt_tone_stop();
                    self.with_a2dp(active, |a2dp| {
                        a2dp.priority.stop_wait = true;
                        a2dp.priority.first_used = false;
                    });
                }
            }
            return Ok(());
        };

        if handle == active {
            match change {
                StreamChange::Started if filter => self.prompt_tone_start(active, now)?,
                StreamChange::Started | StreamChange::NonPromptToneStarted => {
                    let clear_second = change == StreamChange::NonPromptToneStarted;
                    self.take_first_used(active, second, clear_second);
                }
                StreamChange::Suspended => {
                    if self.prompt_tone.target() == Some(handle) {
                        self.prompt_tone_stop();
                    }
                    self.with_a2dp(active, |a2dp| a2dp.priority.stop_wait = true);
                }
            }
            return Ok(());
        }

        let may_take_over = self.config.stop_another_when_one_playing
            || !self.a2dp_priority(active).used_start();
        match change {
            StreamChange::Started if may_take_over && filter => {
                self.prompt_tone_start(handle, now)?;
            }
            StreamChange::Started if may_take_over => {
                self.with_a2dp(handle, |a2dp| a2dp.priority.first_used = true);
                self.with_a2dp(active, |a2dp| a2dp.priority.first_used = false);
            }
            StreamChange::NonPromptToneStarted
                if may_take_over && self.a2dp_priority(handle).used_start() =>
            {
                self.take_first_used(handle, active, true);
            }
            _ => {}
        }
        Ok(())
    }

    /// Give `winner` the first-used bit, taking it from `other`
    fn take_first_used(&mut self, winner: RecordHandle, other: RecordHandle, clear_other_waits: bool) {
        self.with_a2dp(winner, |a2dp| {
            a2dp.priority.first_used = true;
            a2dp.priority.stop_wait = false;
            a2dp.priority.call_wait = false;
        });
        self.with_a2dp(other, |a2dp| {
            a2dp.priority.first_used = false;
            if clear_other_waits {
                a2dp.priority.stop_wait = false;
                a2dp.priority.call_wait = false;
            }
        });
    }

    fn update_play(&mut self, handle: RecordHandle, change: StreamChange, now: Millis) {
        let Some(active) = self.rdm.a2dp_active() else {
            return;
        };
        let Some(second) = self.rdm.a2dp_second() else {
            self.with_a2dp(handle, |a2dp| a2dp.active = true);
            self.a2dp_event(handle, change.event());
            return;
        };

        let active_prio = self.a2dp_priority(active);
        let second_prio = self.a2dp_priority(second);
        if active_prio.bits() >= second_prio.bits() {
            self.with_a2dp(active, |a2dp| a2dp.active = true);
            self.with_a2dp(second, |a2dp| a2dp.active = false);
            if handle == active {
                self.a2dp_event(active, change.event());
            } else if change != StreamChange::NonPromptToneStarted {
                // only one phone is audible; the other one's stream is muted
                self.a2dp_event(handle, A2dpEvent::Suspended);
            }
            return;
        }

        defmt::info!("[A2DP] Active device change");
        self.with_a2dp(active, |a2dp| a2dp.active = false);
        self.with_a2dp(second, |a2dp| a2dp.active = true);
        if active_prio.stream_open {
            self.with_a2dp(active, |a2dp| {
                a2dp.priority.stop_wait = true;
                a2dp.stop_time = now;
            });
            self.a2dp_event(active, A2dpEvent::Suspended);
        }
        if change != StreamChange::Suspended {
            self.a2dp_event(second, A2dpEvent::Started);
        }
    }

    /// One pass of the stop/call wait check
    pub(crate) fn a2dp_check(&mut self, now: Millis) {
        if self.rdm.local_role() == TwsRole::Slave {
            self.timers.cancel(CHECK_TIMER);
            return;
        }
        let active = self.rdm.a2dp_active();
        let second = self.rdm.a2dp_second();
        let stopped_delay = Millis::from(self.config.a2dp_stopped_delay_ms);

        let mut need_timer = false;
        let mut need_check_play = false;
        for handle in [active, second].into_iter().flatten() {
            let Some(record) = self.rdm.get_mut(handle) else {
                continue;
            };
            let in_call = record.hfp.state.in_call();
            let a2dp = &mut record.a2dp;
            if a2dp.priority.stop_wait {
                need_timer = true;
                let elapsed = now.saturating_sub(a2dp.stop_time);
                if elapsed <= Millis::from(A2DP_CALL_GRACE_MS) {
                    if in_call {
                        defmt::info!("[A2DP] {} stopped by a call", record.address);
                        a2dp.priority.stop_wait = false;
                        a2dp.priority.call_wait = true;
                    }
                } else if elapsed > stopped_delay {
                    a2dp.priority.stop_wait = false;
                    need_check_play = true;
                }
            } else if a2dp.priority.call_wait {
                need_timer = true;
                if !in_call {
                    a2dp.priority.call_wait = false;
                    a2dp.priority.stop_wait = true;
                    a2dp.stop_time = now;
                }
            }
        }

        if need_check_play {
            match (active, second) {
                (Some(active), Some(second)) => {
                    if self.a2dp_priority(second).avrcp_play {
                        self.check_update_play(active, second);
                    } else {
                        defmt::debug!("[A2DP] Second device not playing");
                    }
                }
                (Some(active), None) => {
                    if self.a2dp_priority(active).stream_open {
                        self.a2dp_event(active, A2dpEvent::StreamStartedAvrcpPaused);
                    }
                }
                _ => {}
            }
        }

        if !need_timer {
            self.timers.cancel(CHECK_TIMER);
        }
    }

    /// Hand playback to the second device once it outranks the active one
    fn check_update_play(&mut self, active: RecordHandle, second: RecordHandle) {
        let active_prio = self.a2dp_priority(active);
        let second_prio = self.a2dp_priority(second);
        if second_prio.bits() <= active_prio.bits() {
            return;
        }
        defmt::info!(
            "[A2DP] Second device takes over, prio 0x{:02x} > 0x{:02x}",
            second_prio.bits(),
            active_prio.bits()
        );

        self.with_a2dp(active, |a2dp| {
            a2dp.active = false;
            a2dp.priority.first_used = false;
        });
        if active_prio.stream_open {
            if active_prio.used_start() {
                self.a2dp_event(active, A2dpEvent::Suspended);
            } else {
                self.with_a2dp(active, |a2dp| a2dp.priority.user_start = true);
            }
        }

        self.with_a2dp(second, |a2dp| {
            a2dp.active = true;
            a2dp.priority.first_used = true;
        });
        if second_prio.stream_open {
            self.with_a2dp(second, |a2dp| a2dp.priority.user_start = true);
            self.a2dp_event(second, A2dpEvent::Started);
        }
    }

    /// Re-assert an open stream on the active device
    pub(crate) fn a2dp_check_state(&mut self) {
        let Some(active) = self.rdm.a2dp_active() else {
            return;
        };
        if !self.a2dp_priority(active).stream_open {
            return;
        }
        self.with_a2dp(active, |a2dp| a2dp.priority.user_start = true);
        self.a2dp_event(active, A2dpEvent::StreamCheckStarted);
    }

    /// The user paused playback on a device
    pub(crate) fn a2dp_user_pause(&mut self, handle: RecordHandle, now: Millis) -> Result<(), ServiceError> {
        let Some(active) = self.rdm.a2dp_active() else {
            return Ok(());
        };
        if handle != active {
            defmt::debug!("[A2DP] Pause ignored, not the active device");
            return Ok(());
        }
        if !self.a2dp_priority(active).used_start() {
            return Ok(());
        }
        let second_playing = self
            .rdm
            .a2dp_second()
            .is_some_and(|second| self.a2dp_priority(second).used_start());

        defmt::info!("[A2DP] User pause, second playing {}", second_playing);
        self.with_a2dp(active, |a2dp| {
            if second_playing {
                a2dp.priority.user_start = false;
            }
            a2dp.priority.stop_wait = true;
            a2dp.stop_time = now;
        });
        if second_playing {
            self.a2dp_event(active, A2dpEvent::Suspended);
        }
        self.start_a2dp_check(now)
    }

    /// AVRCP play state reported by the phone
    pub(crate) fn avrcp_play_state(
        &mut self,
        handle: RecordHandle,
        playing: bool,
        now: Millis,
    ) -> Result<(), ServiceError> {
        let is_active = self.rdm.a2dp_active() == Some(handle);
        let stop_another = self.config.stop_another_when_one_playing;
        if playing {
            self.timers
                .cancel(TimerId::owned(TimerKind::AvrcpPlayingPending, handle));
        }
        let record = self.rdm.get_mut(handle).ok_or(ServiceError::NotFound)?;
        record.avrcp_play_pended = false;
        let a2dp = &mut record.a2dp;
        if playing {
            if a2dp.priority.stream_open && !a2dp.priority.avrcp_play {
                a2dp.priority.avrcp_play = true;
                a2dp.priority.stop_wait = false;
                if !is_active && stop_another {
                    defmt::info!("[A2DP] Second device pending ahead start");
                    a2dp.pending_ahead_start = true;
                }
            }
        } else if a2dp.priority.avrcp_play {
            a2dp.priority.avrcp_play = false;
            if is_active && !a2dp.priority.stop_wait {
                a2dp.priority.stop_wait = true;
                a2dp.stop_time = now;
            }
        }
        defmt::info!(
            "[A2DP] {} avrcp playing {} prio 0x{:02x}",
            record.address,
            playing,
            record.a2dp.priority.bits()
        );
        self.start_a2dp_check(now)
    }

    /// AVRCP came up on a record
    pub(crate) fn a2dp_avrcp_connected(&mut self, handle: RecordHandle, now: Millis) -> Result<(), ServiceError> {
        self.timers
            .cancel(TimerId::owned(TimerKind::AvrcpConnectingPending, handle));
        let record = self.rdm.get_mut(handle).ok_or(ServiceError::NotFound)?;
        record.avrcp_volume = Default::default();
        if record.a2dp.pending_ahead_start && record.profiles.is_connected(Profile::A2dp) {
            return self.a2dp_media_state(handle, MediaState::Start, now);
        }
        Ok(())
    }

    /// AVRCP went down on a record
    pub(crate) fn a2dp_avrcp_disconnected(&mut self, handle: RecordHandle) {
        for kind in [
            TimerKind::AvrcpVolume,
            TimerKind::AvrcpConnectingPending,
            TimerKind::AvrcpPlayingPending,
        ] {
            self.timers.cancel(TimerId::owned(kind, handle));
        }
        if let Some(record) = self.rdm.get_mut(handle) {
            record.avrcp_volume = Default::default();
            record.avrcp_play_pended = false;
        }
    }

    /// AVRCP did not connect in time; start the stream without it
    pub(crate) fn avrcp_connecting_expired(
        &mut self,
        handle: RecordHandle,
        now: Millis,
    ) -> Result<(), ServiceError> {
        let record = self.rdm.get_mut(handle).ok_or(ServiceError::NotFound)?;
        defmt::warn!("[A2DP] {} AVRCP connect timeout", record.address);
        if !record.a2dp.pending_ahead_start || record.profiles.is_connected(Profile::Avrcp) {
            return Ok(());
        }
        record.a2dp.pending_ahead_start = false;
        if record.a2dp.priority.stream_open {
            return Ok(());
        }
        self.a2dp_stream_change(handle, StreamChange::Started, now)
    }

    /// A2DP is going down on a record; called while the profile is still flagged
    pub(crate) fn a2dp_disconnected(&mut self, handle: RecordHandle) {
        if self.prompt_tone.target() == Some(handle) {
            self.prompt_tone_stop();
        }
        let active = self.rdm.a2dp_active();
        let second = self.rdm.a2dp_second();
        let stream_open = self.a2dp_priority(handle).stream_open;

        if active == Some(handle) && stream_open {
            self.a2dp_event(handle, A2dpEvent::DisconnectedStreamSuspend);
        }
        self.with_a2dp(handle, |a2dp| *a2dp = A2dpState::default());
        if active != Some(handle) {
            return;
        }

        if let Some(second) = second {
            if self.a2dp_priority(second).used_start() {
                self.with_a2dp(second, |a2dp| a2dp.active = true);
                self.a2dp_event(second, A2dpEvent::ReqDelayCheckStart);
            }
        }
    }

    fn prompt_tone_start(&mut self, handle: RecordHandle, now: Millis) -> Result<(), ServiceError> {
        defmt::info!("[A2DP] Prompt tone check started");
        self.prompt_tone.start(handle);
        self.timers
            .start_periodic(PROMPT_TONE_TIMER, now, PROMPT_TONE_POLL_MS)?;
        self.prompt_tone_poll();
        Ok(())
    }

    fn prompt_tone_stop(&mut self) {
        self.prompt_tone.stop();
        self.timers.cancel(PROMPT_TONE_TIMER);
    }

    /// Ask the candidate phone for its play status
    pub(crate) fn prompt_tone_poll(&mut self) {
        let acl = self
            .prompt_tone
            .target()
            .and_then(|h| self.rdm.get(h))
            .and_then(|r| r.acl_handle);
        match acl {
            Some(acl) => self.command(ControllerCommand::AvrcpGetPlayStatus { handle: acl }),
            None => self.prompt_tone_stop(),
        }
    }

    /// Play status response for the prompt tone filter
    pub(crate) fn prompt_tone_sample(&mut self, handle: RecordHandle, status: PlayStatus, now: Millis) {
        if self.prompt_tone.target() != Some(handle) {
            defmt::debug!("[A2DP] Play status for a record not under test");
            return;
        }
        let other_stream_open = self
            .rdm
            .iter()
            .any(|(h, r)| h != handle && r.is_phone() && r.a2dp.priority.stream_open);

        match self.prompt_tone.sample(status, other_stream_open) {
            Verdict::Continue => {}
            Verdict::Promote => {
                defmt::info!("[A2DP] Stream is real playback");
                self.prompt_tone_stop();
                let change = StreamChange::NonPromptToneStarted;
                if let Err(error) = self.update_prio(handle, change, now) {
                    defmt::warn!("[A2DP] Promotion failed: {}", error);
                }
                self.update_play(handle, change, now);
            }
            Verdict::Discard => {
                defmt::info!("[A2DP] Prompt tone, not promoted");
                self.prompt_tone_stop();
            }
        }
    }

    /// AVRCP absolute volume from the phone, deferred and filtered
    pub(crate) fn avrcp_set_volume(
        &mut self,
        handle: RecordHandle,
        volume: u8,
        now: Millis,
    ) -> Result<(), ServiceError> {
        let timer = TimerId::owned(TimerKind::AvrcpVolume, handle);
        let armed = self.timers.is_armed(timer);
        let record = self.rdm.get_mut(handle).ok_or(ServiceError::NotFound)?;
        let avrcp = &mut record.avrcp_volume;
        if avrcp.last_requested == Some(volume) {
            return Ok(());
        }
        avrcp.last_requested = Some(volume);
        avrcp.pending = Some(volume);
        if armed {
            avrcp.filtered += 1;
        }

        if avrcp.filtered >= AVRCP_VOLUME_FILTER_MAX {
            avrcp.filtered = 0;
            self.timers.cancel(timer);
            return self.avrcp_volume_expired(handle);
        }
        self.timers.start(timer, now, AVRCP_VOLUME_DELAY_MS)
    }

    /// Apply the pending absolute volume
    pub(crate) fn avrcp_volume_expired(&mut self, handle: RecordHandle) -> Result<(), ServiceError> {
        let record = self.rdm.get_mut(handle).ok_or(ServiceError::NotFound)?;
        if !record.profiles.is_connected(Profile::Avrcp) {
            record.avrcp_volume.pending = None;
            return Ok(());
        }
        let Some(volume) = record.avrcp_volume.pending.take() else {
            return Ok(());
        };
        let addr = record.address;
        defmt::info!("[A2DP] {} absolute volume {}", addr, volume);
        self.notify(Notification::AbsoluteVolume { addr, volume });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        BluetoothAddress, ControllerCommand, Message, Notification, Service, ServiceConfig,
        a2dp::{A2dpEvent, MediaState, PlayState, PlayStatus},
        hfp::CallIndicator,
        rdm::{Profile, RecordHandle},
        timer::{TimerId, TimerKind},
    };

    fn addr(last: u8) -> BluetoothAddress {
        BluetoothAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, last])
    }

    fn running(config: ServiceConfig) -> Service {
        let mut service = Service::new(config).unwrap();
        service.handle(Message::Init, 0).unwrap();
        service.take_commands();
        service
    }

    fn phone(service: &mut Service, last: u8, acl: u16) -> RecordHandle {
        service
            .handle(
                Message::AclConnected {
                    addr: addr(last),
                    handle: acl,
                },
                0,
            )
            .unwrap();
        for profile in [Profile::A2dp, Profile::Avrcp, Profile::Hfp] {
            service
                .handle(Message::ProfileConnected { handle: acl, profile }, 0)
                .unwrap();
        }
        service.take_notifications();
        service.take_commands();
        service.rdm.find(addr(last)).unwrap()
    }

    fn media(service: &mut Service, acl: u16, state: MediaState, now: u64) {
        service
            .handle(Message::A2dpMedia { handle: acl, state }, now)
            .unwrap();
    }

    fn a2dp_events(service: &mut Service) -> heapless::Vec<(BluetoothAddress, A2dpEvent), 8> {
        service
            .take_notifications()
            .iter()
            .filter_map(|n| match n {
                Notification::A2dp { addr, event } => Some((*addr, *event)),
                _ => None,
            })
            .collect()
    }

    fn playing(position: u32) -> PlayStatus {
        PlayStatus {
            state: PlayState::Playing,
            position_ms: Some(position),
        }
    }

    #[test]
    fn test_single_phone_start_and_suspend() {
        let mut service = running(ServiceConfig::default());
        let a = phone(&mut service, 1, 0x40);

        media(&mut service, 0x40, MediaState::Start, 0);
        assert_eq!(a2dp_events(&mut service).as_slice(), &[(addr(1), A2dpEvent::Started)]);
        let record = service.rdm.get(a).unwrap();
        assert!(record.a2dp.active);
        assert!(record.a2dp.priority.used_start());
        assert!(record.a2dp.priority.first_used);

        // a repeated start of an open stream raises nothing
        media(&mut service, 0x40, MediaState::Start, 10);
        assert!(a2dp_events(&mut service).is_empty());

        media(&mut service, 0x40, MediaState::Suspend, 100);
        assert_eq!(a2dp_events(&mut service).as_slice(), &[(addr(1), A2dpEvent::Suspended)]);
        let record = service.rdm.get(a).unwrap();
        assert!(!record.a2dp.priority.stream_open);
        assert!(record.a2dp.priority.stop_wait);
        assert_eq!(record.a2dp.stop_time, 100);
        assert!(service.timers.is_armed(TimerId::global(TimerKind::A2dpCheck)));
    }

    #[test]
    fn test_second_phone_preempts_when_configured() {
        let mut service = running(ServiceConfig {
            stop_another_when_one_playing: true,
            ..ServiceConfig::default()
        });
        let a = phone(&mut service, 1, 0x40);
        let b = phone(&mut service, 2, 0x41);

        media(&mut service, 0x40, MediaState::Start, 0);
        assert_eq!(a2dp_events(&mut service).as_slice(), &[(addr(1), A2dpEvent::Started)]);

        media(&mut service, 0x41, MediaState::Start, 100);
        assert_eq!(
            a2dp_events(&mut service).as_slice(),
            &[(addr(1), A2dpEvent::Suspended), (addr(2), A2dpEvent::Started)]
        );
        assert_eq!(service.rdm.a2dp_active(), Some(b));
        let first = service.rdm.get(a).unwrap();
        assert!(first.a2dp.priority.stop_wait);
        assert!(!first.a2dp.active);
        assert!(service.rdm.get(b).unwrap().a2dp.priority.first_used);
    }

    #[test]
    fn test_second_phone_muted_while_first_plays() {
        let mut service = running(ServiceConfig::default());
        let a = phone(&mut service, 1, 0x40);
        phone(&mut service, 2, 0x41);

        media(&mut service, 0x40, MediaState::Start, 0);
        a2dp_events(&mut service);
        media(&mut service, 0x41, MediaState::Start, 100);
        assert_eq!(a2dp_events(&mut service).as_slice(), &[(addr(2), A2dpEvent::Suspended)]);
        assert_eq!(service.rdm.a2dp_active(), Some(a));
    }

    #[test]
    fn test_stop_wait_becomes_call_wait() {
        let mut service = running(ServiceConfig::default());
        let a = phone(&mut service, 1, 0x40);
        phone(&mut service, 2, 0x41);

        media(&mut service, 0x40, MediaState::Start, 0);
        media(&mut service, 0x40, MediaState::Suspend, 1000);
        service
            .handle(
                Message::HfpIndicator {
                    handle: 0x40,
                    indicator: CallIndicator::CallSetup(1),
                },
                1200,
            )
            .unwrap();

        service.run_timers(1250);
        let priority = service.rdm.get(a).unwrap().a2dp.priority;
        assert!(priority.call_wait);
        assert!(!priority.stop_wait);

        // the call is rejected: call-wait turns back into stop-wait
        service
            .handle(
                Message::HfpIndicator {
                    handle: 0x40,
                    indicator: CallIndicator::CallSetup(0),
                },
                5000,
            )
            .unwrap();
        service.run_timers(5050);
        let record = service.rdm.get(a).unwrap();
        assert!(record.a2dp.priority.stop_wait);
        assert_eq!(record.a2dp.stop_time, 5050);

        service.run_timers(6000);
        assert!(service.rdm.get(a).unwrap().a2dp.priority.stop_wait);

        service.run_timers(6600);
        let priority = service.rdm.get(a).unwrap().a2dp.priority;
        assert!(!priority.stop_wait && !priority.call_wait);
        service.run_timers(6650);
        assert!(!service.timers.is_armed(TimerId::global(TimerKind::A2dpCheck)));
    }

    #[test]
    fn test_user_pause_hands_over_after_stopped_delay() {
        let mut service = running(ServiceConfig::default());
        let a = phone(&mut service, 1, 0x40);
        let b = phone(&mut service, 2, 0x41);
        media(&mut service, 0x40, MediaState::Start, 0);
        media(&mut service, 0x41, MediaState::Start, 100);
        a2dp_events(&mut service);

        // pausing the inactive phone does nothing
        service
            .handle(Message::A2dpUserPause { handle: 0x41 }, 400)
            .unwrap();
        assert!(!service.rdm.get(b).unwrap().a2dp.priority.stop_wait);

        service
            .handle(Message::A2dpUserPause { handle: 0x40 }, 500)
            .unwrap();
        assert_eq!(a2dp_events(&mut service).as_slice(), &[(addr(1), A2dpEvent::Suspended)]);
        let priority = service.rdm.get(a).unwrap().a2dp.priority;
        assert!(priority.stop_wait);
        assert!(!priority.user_start);
        assert_eq!(service.rdm.a2dp_active(), Some(a));

        service.run_timers(2100);
        assert_eq!(a2dp_events(&mut service).as_slice(), &[(addr(2), A2dpEvent::Started)]);
        assert_eq!(service.rdm.a2dp_active(), Some(b));
        assert!(service.rdm.get(b).unwrap().a2dp.priority.first_used);
    }

    #[test]
    fn test_check_state_reasserts_open_stream() {
        let mut service = running(ServiceConfig::default());
        phone(&mut service, 1, 0x40);
        service.handle(Message::A2dpCheckState, 0).unwrap();
        assert!(a2dp_events(&mut service).is_empty());

        media(&mut service, 0x40, MediaState::Start, 0);
        a2dp_events(&mut service);
        service.handle(Message::A2dpCheckState, 10).unwrap();
        assert_eq!(
            a2dp_events(&mut service).as_slice(),
            &[(addr(1), A2dpEvent::StreamCheckStarted)]
        );
    }

    #[test]
    fn test_avrcp_pause_starts_stop_wait_on_active() {
        let mut service = running(ServiceConfig::default());
        let a = phone(&mut service, 1, 0x40);
        media(&mut service, 0x40, MediaState::Start, 0);
        service
            .handle(
                Message::AvrcpPlayState {
                    handle: 0x40,
                    playing: false,
                },
                300,
            )
            .unwrap();
        let record = service.rdm.get(a).unwrap();
        assert!(!record.a2dp.priority.avrcp_play);
        assert!(record.a2dp.priority.stop_wait);
        assert_eq!(record.a2dp.stop_time, 300);
        a2dp_events(&mut service);

        // the stream stays open past the stopped delay
        service.run_timers(1900);
        assert_eq!(
            a2dp_events(&mut service).as_slice(),
            &[(addr(1), A2dpEvent::StreamStartedAvrcpPaused)]
        );

        service
            .handle(
                Message::AvrcpPlayState {
                    handle: 0x40,
                    playing: true,
                },
                2000,
            )
            .unwrap();
        assert!(service.rdm.get(a).unwrap().a2dp.priority.avrcp_play);
    }

    #[test]
    fn test_start_waits_for_avrcp() {
        let mut service = running(ServiceConfig::default());
        service
            .handle(
                Message::AclConnected {
                    addr: addr(1),
                    handle: 0x40,
                },
                0,
            )
            .unwrap();
        service
            .handle(
                Message::ProfileConnected {
                    handle: 0x40,
                    profile: Profile::A2dp,
                },
                0,
            )
            .unwrap();
        let a = service.rdm.find(addr(1)).unwrap();
        service.take_notifications();

        media(&mut service, 0x40, MediaState::Start, 10);
        assert!(a2dp_events(&mut service).is_empty());
        assert!(service.rdm.get(a).unwrap().a2dp.pending_ahead_start);
        let pending = TimerId::owned(TimerKind::AvrcpConnectingPending, a);
        assert!(service.timers.is_armed(pending));

        service
            .handle(
                Message::ProfileConnected {
                    handle: 0x40,
                    profile: Profile::Avrcp,
                },
                500,
            )
            .unwrap();
        assert!(!service.timers.is_armed(pending));
        assert_eq!(a2dp_events(&mut service).as_slice(), &[(addr(1), A2dpEvent::Started)]);
        assert!(!service.rdm.get(a).unwrap().a2dp.pending_ahead_start);
    }

    #[test]
    fn test_start_without_avrcp_after_window() {
        let mut service = running(ServiceConfig::default());
        service
            .handle(
                Message::AclConnected {
                    addr: addr(1),
                    handle: 0x40,
                },
                0,
            )
            .unwrap();
        service
            .handle(
                Message::ProfileConnected {
                    handle: 0x40,
                    profile: Profile::A2dp,
                },
                0,
            )
            .unwrap();
        service.take_notifications();

        media(&mut service, 0x40, MediaState::Start, 0);
        service.run_timers(1999);
        assert!(a2dp_events(&mut service).is_empty());
        service.run_timers(2000);
        assert_eq!(a2dp_events(&mut service).as_slice(), &[(addr(1), A2dpEvent::Started)]);
    }

    #[test]
    fn test_prompt_tone_filter_promotes_second_phone() {
        let mut service = running(ServiceConfig {
            prompt_tone_filter: true,
            stop_another_when_one_playing: true,
            ..ServiceConfig::default()
        });
        let a = phone(&mut service, 1, 0x40);
        let b = phone(&mut service, 2, 0x41);

        media(&mut service, 0x40, MediaState::Start, 0);
        assert!(
            service
                .take_commands()
                .contains(&ControllerCommand::AvrcpGetPlayStatus { handle: 0x40 })
        );
        for (i, position) in [0, 200, 400, 600].into_iter().enumerate() {
            service
                .handle(
                    Message::AvrcpPlayStatus {
                        handle: 0x40,
                        status: playing(position),
                    },
                    200 * (i as u64 + 1),
                )
                .unwrap();
        }
        assert!(service.rdm.get(a).unwrap().a2dp.priority.first_used);
        assert!(!service.timers.is_armed(TimerId::global(TimerKind::PromptToneCheck)));
        a2dp_events(&mut service);

        media(&mut service, 0x41, MediaState::Start, 1000);
        // a possible prompt tone stays muted
        assert_eq!(a2dp_events(&mut service).as_slice(), &[(addr(2), A2dpEvent::Suspended)]);
        assert_eq!(service.prompt_tone.target(), Some(b));
        assert!(!service.rdm.get(b).unwrap().a2dp.priority.first_used);

        service.run_timers(1200);
        assert!(
            service
                .take_commands()
                .contains(&ControllerCommand::AvrcpGetPlayStatus { handle: 0x41 })
        );
        for (i, position) in [5000, 5200, 5400, 5600].into_iter().enumerate() {
            service
                .handle(
                    Message::AvrcpPlayStatus {
                        handle: 0x41,
                        status: playing(position),
                    },
                    1200 + 200 * i as u64,
                )
                .unwrap();
        }
        assert_eq!(
            a2dp_events(&mut service).as_slice(),
            &[(addr(1), A2dpEvent::Suspended), (addr(2), A2dpEvent::Started)]
        );
        assert_eq!(service.rdm.a2dp_active(), Some(b));
        assert_eq!(service.prompt_tone.target(), None);
    }

    #[test]
    fn test_prompt_tone_discarded_next_to_open_stream() {
        let mut service = running(ServiceConfig {
            prompt_tone_filter: true,
            ..ServiceConfig::default()
        });
        let a = phone(&mut service, 1, 0x40);
        phone(&mut service, 2, 0x41);
        media(&mut service, 0x40, MediaState::Start, 0);
        media(&mut service, 0x41, MediaState::Start, 0);
        assert_eq!(service.prompt_tone.target(), Some(a));
        a2dp_events(&mut service);

        for i in 0..=crate::constants::PROMPT_TONE_KEEP_SAMPLES {
            service
                .handle(
                    Message::AvrcpPlayStatus {
                        handle: 0x40,
                        status: playing(700),
                    },
                    200 * u64::from(i),
                )
                .unwrap();
        }
        assert_eq!(service.prompt_tone.target(), None);
        assert!(a2dp_events(&mut service).is_empty());
    }

    #[test]
    fn test_active_disconnect_promotes_playing_second() {
        let mut service = running(ServiceConfig::default());
        phone(&mut service, 1, 0x40);
        let b = phone(&mut service, 2, 0x41);
        media(&mut service, 0x40, MediaState::Start, 0);
        media(&mut service, 0x41, MediaState::Start, 100);
        a2dp_events(&mut service);

        service
            .handle(
                Message::ProfileDisconnected {
                    handle: 0x40,
                    profile: Profile::A2dp,
                },
                200,
            )
            .unwrap();
        assert_eq!(
            a2dp_events(&mut service).as_slice(),
            &[
                (addr(1), A2dpEvent::DisconnectedStreamSuspend),
                (addr(2), A2dpEvent::ReqDelayCheckStart)
            ]
        );
        assert_eq!(service.rdm.a2dp_active(), Some(b));
    }

    #[test]
    fn test_absolute_volume_deferred() {
        let mut service = running(ServiceConfig::default());
        let a = phone(&mut service, 1, 0x40);
        let set = |service: &mut Service, volume: u8, now: u64| {
            service
                .handle(
                    Message::AvrcpSetAbsoluteVolume {
                        handle: 0x40,
                        volume,
                    },
                    now,
                )
                .unwrap();
        };

        set(&mut service, 50, 0);
        assert!(service.take_notifications().is_empty());
        service.run_timers(49);
        assert!(service.take_notifications().is_empty());
        service.run_timers(50);
        assert_eq!(
            service.take_notifications().as_slice(),
            &[Notification::AbsoluteVolume {
                addr: addr(1),
                volume: 50
            }]
        );

        // same value again is ignored
        set(&mut service, 50, 100);
        assert!(!service.timers.is_armed(TimerId::owned(TimerKind::AvrcpVolume, a)));
    }

    #[test]
    fn test_absolute_volume_burst_applied_after_filter_limit() {
        let mut service = running(ServiceConfig::default());
        let a = phone(&mut service, 1, 0x40);
        for (i, volume) in [10, 20, 30].into_iter().enumerate() {
            service
                .handle(
                    Message::AvrcpSetAbsoluteVolume {
                        handle: 0x40,
                        volume,
                    },
                    10 * i as u64,
                )
                .unwrap();
        }
        assert!(service.take_notifications().is_empty());
        assert_eq!(service.rdm.get(a).unwrap().avrcp_volume.filtered, 2);

        service
            .handle(
                Message::AvrcpSetAbsoluteVolume {
                    handle: 0x40,
                    volume: 40,
                },
                30,
            )
            .unwrap();
        assert_eq!(
            service.take_notifications().as_slice(),
            &[Notification::AbsoluteVolume {
                addr: addr(1),
                volume: 40
            }]
        );
        assert_eq!(service.rdm.get(a).unwrap().avrcp_volume.filtered, 0);
        assert!(!service.timers.is_armed(TimerId::owned(TimerKind::AvrcpVolume, a)));
    }
}
