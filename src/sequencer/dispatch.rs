/// Note dispatch - decides which tracks fire on a step and sends them
use crate::error::MidiError;
use crate::midi::{Channel, MidiOutputPort, Pitch};
use crate::sequencer::Track;

pub const DEFAULT_VELOCITY: u8 = 80;

#[derive(Debug, Clone)]
pub struct NoteDispatcher {
    channel: Channel,
    velocity: u8,
    failing: bool,
}

impl NoteDispatcher {
    pub fn new(channel: Channel, velocity: u8) -> Self {
        Self {
            channel,
            velocity: velocity.min(127),
            failing: false,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    /// Trigger every track whose pattern contains this step.
    ///
    /// `step` is the 0-based clock position; patterns are 1-based, so a track
    /// fires when it holds `step + 1`. Each hit is a note-on immediately
    /// followed by its note-off. Device errors are logged and do not stop
    /// the remaining tracks. Returns the number of tracks triggered.
    pub fn dispatch(
        &mut self,
        step: usize,
        tracks: &[Track],
        port: &mut dyn MidiOutputPort,
    ) -> usize {
        let Ok(authored) = u8::try_from(step + 1) else {
            return 0;
        };

        let mut fired = 0;
        for track in tracks.iter().filter(|t| t.has_step(authored)) {
            let result = self.trigger(track.pitch(), port);
            self.record(result);
            fired += 1;
        }
        fired
    }

    fn trigger(&self, pitch: Pitch, port: &mut dyn MidiOutputPort) -> Result<(), MidiError> {
        let on = port.play_note(pitch, self.channel, self.velocity);
        let off = port.stop_note(pitch, self.channel);
        on.and(off)
    }

    /// Forget previous failures so the next one is reported loudly again.
    pub fn reset_failures(&mut self) {
        self.failing = false;
    }

    fn record(&mut self, result: Result<(), MidiError>) {
        match result {
            Ok(()) => self.failing = false,
            Err(e) if !self.failing => {
                tracing::warn!(error = %e, "note output failed, continuing silently");
                self.failing = true;
            }
            Err(e) => tracing::trace!(error = %e, "note output failed"),
        }
    }
}

impl Default for NoteDispatcher {
    fn default() -> Self {
        Self::new(Channel::All, DEFAULT_VELOCITY)
    }
}
