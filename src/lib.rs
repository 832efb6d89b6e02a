//! DRUMSQNC - a 16-step drum machine sequencer library
//!
//! This library provides the playback engine behind a drum machine:
//! - Per-instrument 16-step patterns with copy-on-write snapshots
//! - A tempo-driven clock with play/stop/cue transport
//! - MIDI output for production use
//! - Audio preview for testing without a drum module

pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod sequencer;

// Re-export commonly used types
pub use audio::{AudioMonitor, AudioOutput, Monitored};
pub use config::EngineConfig;
pub use error::{ConfigError, MidiError, SequencerError};
pub use midi::{midi_note_name, Channel, MidiOutputDevice, MidiOutputPort, Pitch};
pub use sequencer::clock::SequencerClock;
pub use sequencer::dispatch::NoteDispatcher;
pub use sequencer::transport::{SharedPort, TransportController, TransportState};
pub use sequencer::{InstrumentKind, PatternStore, Snapshot, StepCounter, Track};
