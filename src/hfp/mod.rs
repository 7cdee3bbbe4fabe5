//! HFP/Call Arbitration
//!
//! Each phone runs its own call state machine driven by the AG's aggregate call
//! indicators ([`call`]). On top of it sits the dual-phone arbitration
//! ([`arbitration`]): the HFP active phone is sticky and only hands over when it goes
//! idle while the other phone has call activity, or when the user forces a switch.
//!
//! Only the active phone's SCO path is reported to the application.

mod arbitration;
mod call;

pub use call::{Transition, transition};

use crate::{Message, ServiceError, rdm::Profile, service::Service, timer::Millis};

/// Call state of one phone, ordered as the AG moves through a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, defmt::Format)]
pub enum CallState {
    /// HFP not connected
    #[default]
    Init,
    /// Service level connection up, no call
    Linked,
    /// Incoming call ringing
    Incoming,
    /// Outgoing call being set up
    Outgoing,
    /// Remote party alerted
    Alerted,
    /// Call active
    Ongoing,
    /// Active call plus a waiting or outgoing second call
    ThreeWayIn,
    /// Held call present
    Multiparty,
    /// SCO up without call indicators (voice dial, in-band audio)
    ScoEstablished,
}

impl CallState {
    /// Any call activity, SCO-only audio included
    #[must_use]
    pub fn in_call(self) -> bool {
        self > Self::Linked
    }

    /// Ringing, dialing or alerting
    #[must_use]
    pub fn is_setup(self) -> bool {
        matches!(self, Self::Incoming | Self::Outgoing | Self::Alerted)
    }

    /// Talking, possibly with a second call
    #[must_use]
    pub fn is_talking(self) -> bool {
        matches!(self, Self::Ongoing | Self::ThreeWayIn | Self::Multiparty)
    }
}

/// Selection tier of a phone in HFP arbitration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub enum ActiveTier {
    /// Not selected
    #[default]
    Deactive,
    /// Has call activity, waits for the active phone to go idle
    Pending,
    /// The HFP active phone
    Actived,
}

/// Who owns the voice path of a phone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub enum ScoState {
    /// No SCO
    #[default]
    Init,
    /// Audio stays on the phone during a call
    Phone,
    /// SCO up to the headset
    Hfp,
    /// SCO disconnect requested
    Disconnect,
}

/// Aggregate AG call indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, defmt::Format)]
pub struct CallCounters {
    /// Active calls
    pub active: u8,
    /// Held calls
    pub held: u8,
    /// Incoming call in setup
    pub incoming: u8,
    /// Outgoing call in setup
    pub outgoing: u8,
}

/// Stack events fed to the call state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum HfpStackEvent {
    /// `call` = 0
    CallExited,
    /// `call` = 1
    CallOngoing,
    /// `callsetup` = 0
    CallSetupExited,
    /// `callsetup` = 1
    CallIncoming,
    /// `callsetup` = 2
    CallOutgoing,
    /// `callsetup` = 3
    CallAlerted,
    /// `callheld` = 0
    CallHeldExited,
    /// `callheld` = 1, call placed on hold or calls swapped
    CallMultipartyHeld,
    /// `callheld` = 2, call on hold with no active call
    CallHeld,
    /// SCO link established
    ScoEstablished,
    /// SCO link released
    ScoReleased,
}

/// AG indicator update (`+CIEV`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum CallIndicator {
    /// `call` indicator
    Call(u8),
    /// `callsetup` indicator
    CallSetup(u8),
    /// `callheld` indicator
    CallHeld(u8),
}

impl CallIndicator {
    /// Stack event carried by an indicator value
    ///
    /// # Errors
    /// `InvalidArgument` for values the indicator does not define
    pub fn stack_event(self) -> Result<HfpStackEvent, ServiceError> {
        Ok(match self {
            Self::Call(0) => HfpStackEvent::CallExited,
            Self::Call(1) => HfpStackEvent::CallOngoing,
            Self::CallSetup(0) => HfpStackEvent::CallSetupExited,
            Self::CallSetup(1) => HfpStackEvent::CallIncoming,
            Self::CallSetup(2) => HfpStackEvent::CallOutgoing,
            Self::CallSetup(3) => HfpStackEvent::CallAlerted,
            Self::CallHeld(0) => HfpStackEvent::CallHeldExited,
            Self::CallHeld(1) => HfpStackEvent::CallMultipartyHeld,
            Self::CallHeld(2) => HfpStackEvent::CallHeld,
            other => {
                defmt::warn!("[HFP] Unknown indicator {}", other);
                return Err(ServiceError::InvalidArgument);
            }
        })
    }
}

/// Call status events raised to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum HfpEvent {
    /// Incoming call ringing
    CallIncoming,
    /// Outgoing call started
    CallOutgoing,
    /// Remote party alerted
    CallAlerted,
    /// Call active
    CallOngoing,
    /// Second incoming call while a call is active
    Call3WayIn,
    /// Second outgoing call while a call is active
    Call3WayOut,
    /// Two calls present
    CallMultiparty,
    /// No call left
    CallExit,
    /// Voice codec of the SCO link
    CodecInfo {
        /// Codec id (1 = CVSD, 2 = mSBC)
        codec_id: u8,
        /// Sample rate in kHz
        sample_rate_khz: u8,
    },
    /// Voice path routed to the headset
    ScoConnected,
    /// Voice path released
    ScoDisconnected,
}

/// Message handler for [`MessageTag::Hfp`](crate::message::MessageTag::Hfp)
pub(crate) fn handle_hfp(service: &mut Service, message: Message, _now: Millis) -> Result<(), ServiceError> {
    match message {
        Message::HfpIndicator { handle, indicator } => {
            let record = service
                .rdm
                .find_by_profile(handle, Profile::Hfp)
                .ok_or(ServiceError::NotFound)?;
            service.hfp_stack_event(record, indicator.stack_event()?)
        }
        Message::HfpSco {
            handle,
            established,
        } => {
            let record = service.rdm.find_by_acl(handle).ok_or(ServiceError::NotFound)?;
            let event = if established {
                HfpStackEvent::ScoEstablished
            } else {
                HfpStackEvent::ScoReleased
            };
            service.hfp_stack_event(record, event)
        }
        Message::HfpCodec {
            handle,
            codec_id,
            sample_rate_khz,
        } => {
            let record = service.rdm.find_by_acl(handle).ok_or(ServiceError::NotFound)?;
            service.hfp_codec(record, codec_id, sample_rate_khz)
        }
        Message::HfpSwitchActive { addr } => service.hfp_switch_active(addr),
        Message::HfpSwitchSoundSource => service.hfp_switch_sound_source(),
        _ => Err(ServiceError::InvalidArgument),
    }
}
