//! Prompt tone filter
//!
//! Phones play short notification tones over an A2DP stream. Before such a stream may
//! take over from the playing phone, its AVRCP play position is polled: an advancing
//! position is real playback.

use crate::{
    constants::{PROMPT_TONE_CHANGE_SAMPLES, PROMPT_TONE_KEEP_SAMPLES},
    rdm::RecordHandle,
};

/// AVRCP play state
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum PlayState {
    /// Stopped
    Stopped,
    /// Playing
    Playing,
    /// Paused
    Paused,
}

/// AVRCP `GetPlayStatus` response
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct PlayStatus {
    /// Play state
    pub state: PlayState,
    /// Song position in ms, `None` when the phone reports it as unavailable
    pub position_ms: Option<u32>,
}

/// Outcome of one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Verdict {
    /// Keep polling
    Continue,
    /// Real playback, promote the stream
    Promote,
    /// Give up without promoting
    Discard,
}

/// Play position sampler for one candidate stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PromptToneFilter {
    target: Option<RecordHandle>,
    last_position: Option<u32>,
    changes: u8,
    unchanged: u8,
}

impl PromptToneFilter {
    /// Start sampling a record, replacing any previous candidate
    pub fn start(&mut self, target: RecordHandle) {
        *self = Self {
            target: Some(target),
            ..Self::default()
        };
    }

    /// Stop sampling
    pub fn stop(&mut self) {
        *self = Self::default();
    }

    /// Record under test
    #[must_use]
    pub fn target(&self) -> Option<RecordHandle> {
        self.target
    }

    fn reset_counters(&mut self) {
        self.last_position = None;
        self.changes = 0;
        self.unchanged = 0;
    }

    /// Feed one play status sample.
    ///
    /// `other_stream_open` tells whether another phone's stream is open; a stream that
    /// never moves is then not promoted over it.
    pub fn sample(&mut self, status: PlayStatus, other_stream_open: bool) -> Verdict {
        if self.target.is_none() {
            return Verdict::Discard;
        }
        let position = match (status.state, status.position_ms) {
            (PlayState::Playing, Some(position)) => position,
            _ => {
                self.reset_counters();
                return Verdict::Continue;
            }
        };

        match self.last_position {
            Some(last) if last == position => {
                self.unchanged += 1;
                if self.unchanged >= PROMPT_TONE_KEEP_SAMPLES {
                    return if other_stream_open {
                        Verdict::Discard
                    } else {
                        Verdict::Promote
                    };
                }
            }
            Some(_) => {
                self.changes += 1;
                self.unchanged = 0;
                if self.changes >= PROMPT_TONE_CHANGE_SAMPLES {
                    return Verdict::Promote;
                }
            }
            None => {}
        }
        self.last_position = Some(position);
        Verdict::Continue
    }
}
