/// Error types for the sequencer engine, MIDI output and configuration
use thiserror::Error;

use crate::sequencer::InstrumentKind;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SequencerError {
    #[error("step {0} is outside 1..=16")]
    InvalidStep(u8),

    #[error("tempo must be a positive number of beats per minute, got {0}")]
    InvalidTempo(f32),

    #[error("{kind} has no control number {index}")]
    InvalidControl { kind: InstrumentKind, index: usize },

    #[error("control value {0} is outside 0..=127")]
    InvalidControlValue(u8),

    #[error("sequencer clock is already running")]
    ClockAlreadyRunning,

    #[error("failed to spawn clock thread: {0}")]
    ClockSpawn(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MidiError {
    #[error("no MIDI output connected")]
    NotConnected,

    #[error("failed to create MIDI output: {0}")]
    Init(String),

    #[error("no MIDI output port matches '{0}'")]
    PortNotFound(String),

    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to send MIDI message: {0}")]
    Send(String),

    #[error("'{0}' is not a note name")]
    InvalidPitch(String),

    #[error("MIDI channel {0} is outside 1..=16")]
    InvalidChannel(u8),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(#[from] SequencerError),

    #[error("velocity {0} is outside 0..=127")]
    Velocity(u8),
}
