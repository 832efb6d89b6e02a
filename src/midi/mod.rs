/// MIDI output using midir
use std::fmt;
use std::str::FromStr;

use midir::{MidiOutput, MidiOutputConnection};
use serde::{Deserialize, Serialize};

use crate::error::MidiError;

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const CONTROL_CHANGE: u8 = 0xB0;
/// System real-time stop, carries no channel.
const TRANSPORT_STOP: u8 = 0xFC;

/// Capability to emit the messages the sequencer produces.
///
/// Calls are fire-and-forget: an implementation reports failure through the
/// returned error but must never block waiting for the device.
pub trait MidiOutputPort: Send {
    /// Whether a device is currently able to receive messages.
    fn is_available(&self) -> bool;

    fn send_control_change(
        &mut self,
        control: u8,
        value: u8,
        channel: Channel,
    ) -> Result<(), MidiError>;

    fn play_note(&mut self, pitch: Pitch, channel: Channel, velocity: u8)
        -> Result<(), MidiError>;

    fn stop_note(&mut self, pitch: Pitch, channel: Channel) -> Result<(), MidiError>;

    fn send_stop(&mut self) -> Result<(), MidiError>;
}

/// A MIDI note number, written in scores as a name plus octave ("C1", "F#1").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pitch(u8);

impl Pitch {
    pub fn new(note: u8) -> Result<Self, MidiError> {
        if note > 127 {
            return Err(MidiError::InvalidPitch(note.to_string()));
        }
        Ok(Self(note))
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Frequency in Hz, A4 = 440.
    pub fn frequency(self) -> f32 {
        440.0 * 2.0_f32.powf((self.0 as f32 - 69.0) / 12.0)
    }
}

impl FromStr for Pitch {
    type Err = MidiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MidiError::InvalidPitch(s.to_string());
        let mut chars = s.trim().chars();

        let semitone: i32 = match chars.next().map(|c| c.to_ascii_uppercase()) {
            Some('C') => 0,
            Some('D') => 2,
            Some('E') => 4,
            Some('F') => 5,
            Some('G') => 7,
            Some('A') => 9,
            Some('B') => 11,
            _ => return Err(invalid()),
        };

        let rest = chars.as_str();
        let (accidental, octave) = match rest.chars().next() {
            Some('#') => (1, &rest[1..]),
            Some('b') => (-1, &rest[1..]),
            _ => (0, rest),
        };

        let octave: i32 = octave.parse().map_err(|_| invalid())?;
        octave
            .checked_add(1)
            .and_then(|o| o.checked_mul(12))
            .and_then(|base| base.checked_add(semitone + accidental))
            .and_then(|number| u8::try_from(number).ok())
            .filter(|n| *n <= 127)
            .map(Pitch)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&midi_note_name(self.0))
    }
}

/// Output channel. `All` broadcasts on each of the sixteen channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "ChannelRepr", into = "ChannelRepr")]
pub enum Channel {
    #[default]
    All,
    Single(u8),
}

impl Channel {
    pub fn single(channel: u8) -> Result<Self, MidiError> {
        if (1..=16).contains(&channel) {
            Ok(Channel::Single(channel))
        } else {
            Err(MidiError::InvalidChannel(channel))
        }
    }

    /// Zero-based channel nibbles this selection addresses.
    pub fn nibbles(self) -> impl Iterator<Item = u8> {
        match self {
            Channel::All => 0..16,
            Channel::Single(n) => {
                let nibble = n.saturating_sub(1) & 0x0F;
                nibble..nibble + 1
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ChannelRepr {
    Name(String),
    Number(u8),
}

impl TryFrom<ChannelRepr> for Channel {
    type Error = MidiError;

    fn try_from(repr: ChannelRepr) -> Result<Self, Self::Error> {
        match repr {
            ChannelRepr::Name(name) if name.eq_ignore_ascii_case("all") => Ok(Channel::All),
            ChannelRepr::Name(_) => Err(MidiError::InvalidChannel(0)),
            ChannelRepr::Number(n) => Channel::single(n),
        }
    }
}

impl From<Channel> for ChannelRepr {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::All => ChannelRepr::Name("all".to_string()),
            Channel::Single(n) => ChannelRepr::Number(n),
        }
    }
}

pub fn note_on_messages(pitch: Pitch, channel: Channel, velocity: u8) -> Vec<[u8; 3]> {
    channel
        .nibbles()
        .map(|ch| [NOTE_ON | ch, pitch.number(), velocity & 0x7F])
        .collect()
}

pub fn note_off_messages(pitch: Pitch, channel: Channel) -> Vec<[u8; 3]> {
    channel
        .nibbles()
        .map(|ch| [NOTE_OFF | ch, pitch.number(), 0])
        .collect()
}

pub fn control_change_messages(control: u8, value: u8, channel: Channel) -> Vec<[u8; 3]> {
    channel
        .nibbles()
        .map(|ch| [CONTROL_CHANGE | ch, control & 0x7F, value & 0x7F])
        .collect()
}

pub struct MidiOutputDevice {
    client_name: String,
    connection: Option<MidiOutputConnection>,
    port_name: Option<String>,
}

impl MidiOutputDevice {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            connection: None,
            port_name: None,
        }
    }

    pub fn available_ports(client_name: &str) -> Vec<String> {
        if let Ok(midi_out) = MidiOutput::new(client_name) {
            midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect()
        } else {
            vec![]
        }
    }

    pub fn connect(&mut self, port_index: usize) -> Result<(), MidiError> {
        let midi_out =
            MidiOutput::new(&self.client_name).map_err(|e| MidiError::Init(e.to_string()))?;

        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| MidiError::PortNotFound(format!("#{port_index}")))?;
        let port_name = midi_out
            .port_name(port)
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        let connection = midi_out
            .connect(port, &self.client_name)
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        tracing::info!(port = %port_name, "connected MIDI output");
        self.connection = Some(connection);
        self.port_name = Some(port_name);
        Ok(())
    }

    /// Connect to the first port whose name contains `needle`.
    pub fn connect_by_name(&mut self, needle: &str) -> Result<(), MidiError> {
        let index = Self::available_ports(&self.client_name)
            .iter()
            .position(|name| name.contains(needle))
            .ok_or_else(|| MidiError::PortNotFound(needle.to_string()))?;
        self.connect(index)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            tracing::info!(port = ?self.port_name.take(), "disconnected MIDI output");
        }
    }

    fn send(&mut self, messages: &[[u8; 3]]) -> Result<(), MidiError> {
        let conn = self.connection.as_mut().ok_or(MidiError::NotConnected)?;
        for message in messages {
            conn.send(message)
                .map_err(|e| MidiError::Send(e.to_string()))?;
        }
        Ok(())
    }
}

impl MidiOutputPort for MidiOutputDevice {
    fn is_available(&self) -> bool {
        self.is_connected()
    }

    fn send_control_change(
        &mut self,
        control: u8,
        value: u8,
        channel: Channel,
    ) -> Result<(), MidiError> {
        self.send(&control_change_messages(control, value, channel))
    }

    fn play_note(
        &mut self,
        pitch: Pitch,
        channel: Channel,
        velocity: u8,
    ) -> Result<(), MidiError> {
        self.send(&note_on_messages(pitch, channel, velocity))
    }

    fn stop_note(&mut self, pitch: Pitch, channel: Channel) -> Result<(), MidiError> {
        self.send(&note_off_messages(pitch, channel))
    }

    fn send_stop(&mut self) -> Result<(), MidiError> {
        let conn = self.connection.as_mut().ok_or(MidiError::NotConnected)?;
        conn.send(&[TRANSPORT_STOP])
            .map_err(|e| MidiError::Send(e.to_string()))
    }
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kit_pitches() {
        assert_eq!("C1".parse::<Pitch>().unwrap().number(), 24);
        assert_eq!("D1".parse::<Pitch>().unwrap().number(), 26);
        assert_eq!("F#1".parse::<Pitch>().unwrap().number(), 30);
        assert_eq!("C#2".parse::<Pitch>().unwrap().number(), 37);
        assert_eq!("C4".parse::<Pitch>().unwrap().number(), 60);
        assert_eq!("Bb0".parse::<Pitch>().unwrap().number(), 22);
        assert_eq!("C-1".parse::<Pitch>().unwrap().number(), 0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("H2".parse::<Pitch>().is_err());
        assert!("C".parse::<Pitch>().is_err());
        assert!("G#9".parse::<Pitch>().is_err());
        assert_eq!("G9".parse::<Pitch>().unwrap().number(), 127);
        assert!("".parse::<Pitch>().is_err());
        assert!("C2147483647".parse::<Pitch>().is_err());
        assert!("C-2147483648".parse::<Pitch>().is_err());
    }

    #[test]
    fn test_pitch_display_matches_note_name() {
        let pitch: Pitch = "F#1".parse().unwrap();
        assert_eq!(pitch.to_string(), "F#1");
        assert_eq!(midi_note_name(60), "C4");
    }

    #[test]
    fn test_channel_all_broadcasts() {
        let pitch = Pitch::new(36).unwrap();
        let on = note_on_messages(pitch, Channel::All, 80);
        assert_eq!(on.len(), 16);
        assert_eq!(on[0], [0x90, 36, 80]);
        assert_eq!(on[15], [0x9F, 36, 80]);

        let off = note_off_messages(pitch, Channel::single(10).unwrap());
        assert_eq!(off, vec![[0x89, 36, 0]]);
    }

    #[test]
    fn test_control_change_encoding() {
        let cc = control_change_messages(21, 127, Channel::single(1).unwrap());
        assert_eq!(cc, vec![[0xB0, 21, 127]]);
    }

    #[test]
    fn test_channel_bounds() {
        assert!(Channel::single(0).is_err());
        assert!(Channel::single(17).is_err());
        assert_eq!(Channel::single(16), Ok(Channel::Single(16)));
    }

    #[test]
    fn test_channel_serde() {
        let all: Channel = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(all, Channel::All);
        let ten: Channel = serde_json::from_str("10").unwrap();
        assert_eq!(ten, Channel::Single(10));
        assert!(serde_json::from_str::<Channel>("0").is_err());
        assert_eq!(serde_json::to_string(&Channel::All).unwrap(), "\"all\"");
    }

    #[test]
    fn test_disconnected_device_reports_not_connected() {
        let mut device = MidiOutputDevice::new("drumsqnc-test");
        assert!(!device.is_available());
        let pitch = Pitch::new(36).unwrap();
        assert_eq!(
            device.play_note(pitch, Channel::All, 80),
            Err(MidiError::NotConnected)
        );
        assert_eq!(device.send_stop(), Err(MidiError::NotConnected));
    }
}
