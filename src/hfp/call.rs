//! Per-phone call state machine
//!
//! The AG reports aggregate indicators, not individual calls, so the same indicator can
//! mean different things depending on where the phone is: `callsetup = 0` ends a ringing
//! call when nothing is active, but only drops the waiting call while talking. The
//! counters track what the indicators last said.

use super::{CallCounters, CallState, HfpEvent, HfpStackEvent, ScoState};

/// Outcome of one stack event
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct Transition {
    /// New call state and the event reported for it; `None` keeps the state
    pub status: Option<(CallState, HfpEvent)>,
    /// Counters after the event
    pub calls: CallCounters,
    /// SCO state after the event
    pub sco: ScoState,
}

/// Audio left on the phone belongs to the call that just ended
fn released_by_call_exit(sco: ScoState) -> ScoState {
    if sco == ScoState::Phone {
        ScoState::Init
    } else {
        sco
    }
}

/// Feed one stack event to a phone's call state machine
#[must_use]
pub fn transition(
    state: CallState,
    mut calls: CallCounters,
    mut sco: ScoState,
    event: HfpStackEvent,
) -> Transition {
    use CallState as S;
    use HfpEvent as E;

    let status = match event {
        HfpStackEvent::CallExited => {
            calls.active = 0;
            calls.held = 0;
            if state == S::Init {
                None
            } else if calls.incoming == 0 && calls.outgoing == 0 {
                sco = released_by_call_exit(sco);
                Some((S::Linked, E::CallExit))
            } else if calls.incoming > 0 {
                Some((S::Incoming, E::CallIncoming))
            } else {
                Some((S::Outgoing, E::CallOutgoing))
            }
        }
        HfpStackEvent::CallSetupExited => {
            if calls.incoming > 0 {
                calls.incoming = 0;
            } else {
                calls.outgoing = 0;
            }
            match state {
                S::Incoming | S::Outgoing | S::Alerted => {
                    sco = released_by_call_exit(sco);
                    Some((S::Linked, E::CallExit))
                }
                S::ThreeWayIn => Some((S::Ongoing, E::CallOngoing)),
                _ => None,
            }
        }
        HfpStackEvent::CallHeldExited => {
            calls.held = 0;
            if state != S::Multiparty {
                None
            } else if calls.incoming + calls.outgoing > 0 && calls.active > 0 {
                Some((S::ThreeWayIn, E::Call3WayIn))
            } else if calls.incoming > 0 {
                Some((S::Incoming, E::CallIncoming))
            } else if calls.outgoing > 0 {
                Some((S::Outgoing, E::CallOutgoing))
            } else {
                // the held call was resumed
                calls.active = 1;
                Some((S::Ongoing, E::CallOngoing))
            }
        }
        HfpStackEvent::CallHeld => {
            calls.active = 0;
            calls.held = 1;
            Some((S::Multiparty, E::CallMultiparty))
        }
        HfpStackEvent::CallMultipartyHeld => {
            calls.active = 1;
            calls.held = 1;
            Some((S::Multiparty, E::CallMultiparty))
        }
        HfpStackEvent::CallIncoming => {
            calls.incoming = 1;
            match state {
                S::Init | S::Linked | S::ScoEstablished => Some((S::Incoming, E::CallIncoming)),
                S::Ongoing | S::ThreeWayIn => Some((S::ThreeWayIn, E::Call3WayIn)),
                _ => None,
            }
        }
        HfpStackEvent::CallOutgoing => {
            calls.outgoing = 1;
            match state {
                S::Init | S::Linked | S::ScoEstablished => Some((S::Outgoing, E::CallOutgoing)),
                S::Ongoing | S::ThreeWayIn => Some((S::ThreeWayIn, E::Call3WayIn)),
                _ => None,
            }
        }
        HfpStackEvent::CallAlerted => {
            calls.outgoing = 1;
            match state {
                S::Init | S::Outgoing | S::ScoEstablished => Some((S::Alerted, E::CallAlerted)),
                S::Ongoing | S::ThreeWayIn => Some((S::ThreeWayIn, E::Call3WayIn)),
                _ => None,
            }
        }
        HfpStackEvent::CallOngoing => {
            calls.active = 1;
            match state {
                S::Init | S::Linked | S::Incoming | S::Outgoing | S::Alerted | S::ScoEstablished => {
                    Some((S::Ongoing, E::CallOngoing))
                }
                S::ThreeWayIn => Some((S::Multiparty, E::CallMultiparty)),
                _ => None,
            }
        }
        HfpStackEvent::ScoEstablished => {
            sco = ScoState::Hfp;
            match state {
                S::Init | S::Linked => Some((S::ScoEstablished, E::ScoConnected)),
                _ => None,
            }
        }
        HfpStackEvent::ScoReleased => match state {
            S::ScoEstablished => {
                sco = ScoState::Init;
                Some((S::Linked, E::ScoDisconnected))
            }
            S::Init | S::Linked => {
                sco = ScoState::Init;
                None
            }
            _ => {
                // the phone took the audio back during the call
                sco = ScoState::Phone;
                None
            }
        },
    };

    Transition { status, calls, sco }
}
