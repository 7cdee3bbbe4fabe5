//! A2DP/AVRCP Arbitration
//!
//! Decides which phone is the audible A2DP source when two phones stream. Each record
//! carries a set of priority bits; the active device is the one holding the explicit
//! active flag, otherwise the one with the greatest bits (see
//! [`DeviceManager::a2dp_active`](crate::rdm::DeviceManager::a2dp_active)).
//!
//! ## Flow
//!
//! - Media state changes run `update_prio` then `update_play`, which raise at most one
//!   started/suspended event per change and never two audible sources.
//! - A stopped or call-interrupted source keeps a wait bit for a while. A 50 ms check
//!   timer runs while any wait bit is set and re-arbitrates once the wait expires.
//! - With the prompt tone filter enabled, a phone that starts streaming is only
//!   promoted once AVRCP shows its play position advancing.

mod arbitration;
mod prompt_tone;

pub use prompt_tone::{PlayState, PlayStatus, PromptToneFilter, Verdict};

use crate::{Message, ServiceError, rdm::Profile, service::Service, timer::Millis};

/// Priority bits of one record, compared as a number when selecting the active device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub struct A2dpPriority {
    /// Most recently chosen by the user
    pub first_used: bool,
    /// Stream started by the user
    pub user_start: bool,
    /// AVRCP reports playing
    pub avrcp_play: bool,
    /// Stream started
    pub stream_open: bool,
    /// Stream stopped recently, holding priority for the stopped delay
    pub stop_wait: bool,
    /// Stream stopped by a call, holding priority until the call ends
    pub call_wait: bool,
}

impl A2dpPriority {
    const FIRST_USED: u8 = 0x01;
    const USER_START: u8 = 0x02;
    const AVRCP_PLAY: u8 = 0x04;
    const STREAM_OPEN: u8 = 0x08;
    const STOP_WAIT: u8 = 0x10;
    const CALL_WAIT: u8 = 0x20;

    /// Numeric value used for comparisons
    #[must_use]
    pub fn bits(&self) -> u8 {
        [
            (self.first_used, Self::FIRST_USED),
            (self.user_start, Self::USER_START),
            (self.avrcp_play, Self::AVRCP_PLAY),
            (self.stream_open, Self::STREAM_OPEN),
            (self.stop_wait, Self::STOP_WAIT),
            (self.call_wait, Self::CALL_WAIT),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .fold(0, |bits, (_, bit)| bits | bit)
    }

    /// Stream open, started by the user and confirmed playing by AVRCP
    #[must_use]
    pub fn used_start(&self) -> bool {
        self.stream_open && self.user_start && self.avrcp_play
    }

    /// A stop or call wait is pending
    #[must_use]
    pub fn waiting(&self) -> bool {
        self.stop_wait || self.call_wait
    }
}

/// Stream lifecycle reported by the A2DP profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum MediaState {
    /// Stream configured, not streaming
    Open,
    /// Stream started
    Start,
    /// Stream suspended
    Suspend,
    /// Stream closed
    Close,
    /// Playback known to be starting before the stream start arrives
    PendingAheadStart,
}

/// Stream events raised to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum A2dpEvent {
    /// Route this device's stream to the speaker
    Started,
    /// Mute or stop this device's stream
    Suspended,
    /// Active stream re-asserted by `check_state`
    StreamCheckStarted,
    /// Active stream is still open after AVRCP reported a pause
    StreamStartedAvrcpPaused,
    /// Active device dropped A2DP while streaming
    DisconnectedStreamSuspend,
    /// Second device promoted after the active one disconnected
    ReqDelayCheckStart,
}

/// Message handler for [`MessageTag::A2dp`](crate::message::MessageTag::A2dp)
pub(crate) fn handle_a2dp(service: &mut Service, message: Message, now: Millis) -> Result<(), ServiceError> {
    match message {
        Message::A2dpMedia { handle, state } => {
            let record = service
                .rdm
                .find_by_profile(handle, Profile::A2dp)
                .ok_or(ServiceError::NotFound)?;
            service.a2dp_media_state(record, state, now)
        }
        Message::A2dpUserPause { handle } => {
            let record = service.rdm.find_by_acl(handle).ok_or(ServiceError::NotFound)?;
            service.a2dp_user_pause(record, now)
        }
        Message::A2dpCheckState => {
            service.a2dp_check_state();
            Ok(())
        }
        Message::A2dpCodec { handle, codec } => {
            let record = service.rdm.find_by_acl(handle).ok_or(ServiceError::NotFound)?;
            if let Some(record) = service.rdm.get_mut(record) {
                record.a2dp_codec = Some(codec);
            }
            Ok(())
        }
        _ => Err(ServiceError::InvalidArgument),
    }
}

/// Message handler for [`MessageTag::Avrcp`](crate::message::MessageTag::Avrcp)
pub(crate) fn handle_avrcp(service: &mut Service, message: Message, now: Millis) -> Result<(), ServiceError> {
    match message {
        Message::AvrcpPlayState { handle, playing } => {
            let record = service
                .rdm
                .find_by_profile(handle, Profile::Avrcp)
                .ok_or(ServiceError::NotFound)?;
            service.avrcp_play_state(record, playing, now)
        }
        Message::AvrcpPlayStatus { handle, status } => {
            let record = service.rdm.find_by_acl(handle).ok_or(ServiceError::NotFound)?;
            service.prompt_tone_sample(record, status, now);
            Ok(())
        }
        Message::AvrcpSetAbsoluteVolume { handle, volume } => {
            let record = service
                .rdm
                .find_by_profile(handle, Profile::Avrcp)
                .ok_or(ServiceError::NotFound)?;
            service.avrcp_set_volume(record, volume, now)
        }
        _ => Err(ServiceError::InvalidArgument),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_bits() {
        let mut priority = A2dpPriority::default();
        assert_eq!(priority.bits(), 0);

        priority.first_used = true;
        priority.stream_open = true;
        assert_eq!(priority.bits(), 0x09);

        priority.stop_wait = true;
        assert_eq!(priority.bits(), 0x19);
        assert!(priority.waiting());
    }

    #[test]
    fn test_stop_wait_outranks_open_stream() {
        let stopped = A2dpPriority {
            stop_wait: true,
            ..A2dpPriority::default()
        };
        let playing = A2dpPriority {
            user_start: true,
            avrcp_play: true,
            stream_open: true,
            ..A2dpPriority::default()
        };
        assert!(stopped.bits() > playing.bits());
        assert!(playing.used_start());
        assert!(!stopped.used_start());
    }
}
