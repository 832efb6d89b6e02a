/// Transport - play/stop/cue control over the sequencer clock
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::error::SequencerError;
use crate::midi::MidiOutputPort;
use crate::sequencer::clock::SequencerClock;
use crate::sequencer::dispatch::NoteDispatcher;
use crate::sequencer::{
    tick_interval, validate_bpm, InstrumentKind, PatternStore, StepCounter,
};

/// Output shared between the clock thread and the UI.
pub type SharedPort = Arc<Mutex<dyn MidiOutputPort>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
}

impl TransportState {
    pub fn is_playing(&self) -> bool {
        matches!(self, TransportState::Playing)
    }
}

/// The one playback service of the application.
///
/// Owns the clock, so there is never more than one tick stream. Construct it
/// once and hand out references.
pub struct TransportController {
    patterns: PatternStore,
    port: SharedPort,
    clock: SequencerClock,
    dispatcher: NoteDispatcher,
    bpm: f32,
    state: TransportState,
}

impl TransportController {
    pub fn new(patterns: PatternStore, port: SharedPort, config: &EngineConfig) -> Self {
        Self {
            patterns,
            port,
            clock: SequencerClock::new(StepCounter::new()),
            dispatcher: NoteDispatcher::new(config.channel, config.velocity),
            bpm: config.bpm,
            state: TransportState::Stopped,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn patterns(&self) -> &PatternStore {
        &self.patterns
    }

    pub fn current_step(&self) -> usize {
        self.clock.counter().current()
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    /// Change the tempo. A running clock keeps the interval it was started
    /// with; the new tempo is used from the next `play`.
    pub fn set_bpm(&mut self, bpm: f32) -> Result<(), SequencerError> {
        self.bpm = validate_bpm(bpm)?;
        if self.is_playing() {
            tracing::info!(bpm, "tempo changed, applies on next play");
        } else {
            tracing::debug!(bpm, "tempo changed");
        }
        Ok(())
    }

    /// Interval of the running clock, if playing.
    pub fn clock_interval(&self) -> Option<Duration> {
        self.clock.interval()
    }

    pub fn play(&mut self) {
        if self.is_playing() {
            tracing::debug!("already playing");
            return;
        }

        if !self.port.lock().is_available() {
            tracing::warn!("no MIDI output available, playing silently");
        }

        let interval = match tick_interval(self.bpm) {
            Ok(interval) => interval,
            Err(e) => {
                tracing::warn!(error = %e, "playback not started");
                return;
            }
        };

        let patterns = self.patterns.clone();
        let port = Arc::clone(&self.port);
        let mut dispatcher = self.dispatcher.clone();
        dispatcher.reset_failures();

        let started = self.clock.start(interval, move |step| {
            let snapshot = patterns.snapshot();
            let mut port = port.lock();
            dispatcher.dispatch(step, &snapshot, &mut *port);
        });

        match started {
            Ok(()) => {
                self.state = TransportState::Playing;
                tracing::info!(bpm = self.bpm, step = self.current_step(), "playing");
            }
            Err(e) => tracing::warn!(error = %e, "playback not started"),
        }
    }

    /// Stop the clock and send transport stop. Leaves the step pointer where
    /// it is.
    pub fn stop(&mut self) {
        if !self.is_playing() {
            return;
        }

        self.clock.stop();
        if let Err(e) = self.port.lock().send_stop() {
            tracing::warn!(error = %e, "transport stop not sent");
        }
        self.state = TransportState::Stopped;
        tracing::info!(step = self.current_step(), "stopped");
    }

    pub fn toggle_play(&mut self) {
        if self.is_playing() {
            self.stop();
        } else {
            self.play();
        }
    }

    /// Realign to the start of the pattern without touching play state.
    pub fn cue(&mut self) {
        self.clock.counter().reset();
        tracing::info!(playing = self.is_playing(), "cued to pattern start");
    }

    /// Store an instrument control value and send it as a control change.
    pub fn send_control(
        &mut self,
        kind: InstrumentKind,
        index: usize,
        value: u8,
    ) -> Result<(), SequencerError> {
        let cc = self.patterns.set_control(kind, index, value)?;
        let channel = self.dispatcher.channel();
        if let Err(e) = self.port.lock().send_control_change(cc, value, channel) {
            tracing::warn!(error = %e, %kind, cc, "control change not sent");
        }
        Ok(())
    }
}
