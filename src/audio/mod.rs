/// Audio preview using cpal - a decaying sine click per triggered note
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::MidiError;
use crate::midi::{Channel, MidiOutputPort, Pitch};

const PREVIEW_GAIN: f32 = 0.2;
/// Seconds for a hit to fall by 1/e.
const DECAY_SECONDS: f32 = 0.08;
const SILENCE: f32 = 1.0e-4;

/// A single percussive voice. Retriggering restarts the envelope.
#[derive(Debug, Clone, Default)]
pub struct Voice {
    frequency: f32,
    phase: f32,
    amplitude: f32,
}

impl Voice {
    pub fn trigger(&mut self, frequency: f32) {
        self.frequency = frequency;
        self.phase = 0.0;
        self.amplitude = 1.0;
    }

    pub fn silence(&mut self) {
        self.amplitude = 0.0;
    }

    pub fn is_sounding(&self) -> bool {
        self.amplitude > SILENCE
    }

    pub fn next_sample(&mut self, sample_rate: f32) -> f32 {
        if !self.is_sounding() {
            self.phase = 0.0;
            return 0.0;
        }

        let sample = (self.phase * 2.0 * std::f32::consts::PI).sin() * self.amplitude * PREVIEW_GAIN;
        self.phase += self.frequency / sample_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        self.amplitude *= (-1.0 / (DECAY_SECONDS * sample_rate)).exp();
        sample
    }
}

/// Owns the output stream. Keep it alive for as long as previews should sound.
pub struct AudioOutput {
    _stream: cpal::Stream,
    voice: Arc<Mutex<Voice>>,
}

impl AudioOutput {
    pub fn new() -> Option<Self> {
        let voice = Arc::new(Mutex::new(Voice::default()));
        let stream = Self::setup_audio_stream(Arc::clone(&voice))?;

        Some(Self {
            _stream: stream,
            voice,
        })
    }

    fn setup_audio_stream(voice: Arc<Mutex<Voice>>) -> Option<cpal::Stream> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        let config = device.default_output_config().ok()?;

        let sample_rate = config.sample_rate().0 as f32;
        let channels = config.channels() as usize;

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut voice = voice.lock();
                    for frame in data.chunks_mut(channels) {
                        let sample = voice.next_sample(sample_rate);
                        frame.fill(sample);
                    }
                },
                |err| tracing::error!(error = %err, "audio stream error"),
                None,
            ),
            format => {
                tracing::warn!(?format, "unsupported sample format, audio preview disabled");
                return None;
            }
        };

        match stream {
            Ok(stream) => {
                if let Err(e) = stream.play() {
                    tracing::warn!(error = %e, "failed to start audio stream");
                    return None;
                }
                tracing::info!(sample_rate, channels, "audio preview ready");
                Some(stream)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to open audio stream");
                None
            }
        }
    }

    /// Handle that can be moved to the clock thread.
    pub fn monitor(&self) -> AudioMonitor {
        AudioMonitor {
            voice: Arc::clone(&self.voice),
        }
    }
}

/// Plays note-ons through the preview voice. Control changes are ignored and
/// note-offs do nothing, since every hit decays on its own.
#[derive(Debug, Clone, Default)]
pub struct AudioMonitor {
    voice: Arc<Mutex<Voice>>,
}

impl AudioMonitor {
    pub fn is_sounding(&self) -> bool {
        self.voice.lock().is_sounding()
    }
}

impl MidiOutputPort for AudioMonitor {
    fn is_available(&self) -> bool {
        true
    }

    fn send_control_change(&mut self, _: u8, _: u8, _: Channel) -> Result<(), MidiError> {
        Ok(())
    }

    fn play_note(&mut self, pitch: Pitch, _: Channel, _: u8) -> Result<(), MidiError> {
        self.voice.lock().trigger(pitch.frequency());
        Ok(())
    }

    fn stop_note(&mut self, _: Pitch, _: Channel) -> Result<(), MidiError> {
        Ok(())
    }

    fn send_stop(&mut self) -> Result<(), MidiError> {
        self.voice.lock().silence();
        Ok(())
    }
}

/// Sends everything to `port` and, while a monitor is attached, to the audio
/// preview as well. A missing device is not an error while previewing.
pub struct Monitored<P> {
    port: P,
    monitor: Option<AudioMonitor>,
}

impl<P: MidiOutputPort> Monitored<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            monitor: None,
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn set_monitor(&mut self, monitor: Option<AudioMonitor>) {
        self.monitor = monitor;
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_some()
    }

    fn settle(&self, result: Result<(), MidiError>) -> Result<(), MidiError> {
        match result {
            Err(MidiError::NotConnected) if self.monitor.is_some() => Ok(()),
            other => other,
        }
    }
}

impl<P: MidiOutputPort> MidiOutputPort for Monitored<P> {
    fn is_available(&self) -> bool {
        self.monitor.is_some() || self.port.is_available()
    }

    fn send_control_change(
        &mut self,
        control: u8,
        value: u8,
        channel: Channel,
    ) -> Result<(), MidiError> {
        let result = self.port.send_control_change(control, value, channel);
        self.settle(result)
    }

    fn play_note(
        &mut self,
        pitch: Pitch,
        channel: Channel,
        velocity: u8,
    ) -> Result<(), MidiError> {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.play_note(pitch, channel, velocity)?;
        }
        let result = self.port.play_note(pitch, channel, velocity);
        self.settle(result)
    }

    fn stop_note(&mut self, pitch: Pitch, channel: Channel) -> Result<(), MidiError> {
        let result = self.port.stop_note(pitch, channel);
        self.settle(result)
    }

    fn send_stop(&mut self) -> Result<(), MidiError> {
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.send_stop()?;
        }
        let result = self.port.send_stop();
        self.settle(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::dispatch::tests::{RecordingPort, Sent};

    #[test]
    fn test_voice_decays_to_silence() {
        let mut voice = Voice::default();
        assert_eq!(voice.next_sample(48_000.0), 0.0);

        voice.trigger(440.0);
        assert!(voice.is_sounding());
        let peak = (0..200)
            .map(|_| voice.next_sample(48_000.0).abs())
            .fold(0.0_f32, f32::max);
        assert!(peak > 0.1 && peak <= PREVIEW_GAIN);

        for _ in 0..48_000 {
            voice.next_sample(48_000.0);
        }
        assert!(!voice.is_sounding());
    }

    #[test]
    fn test_monitor_triggers_and_stops() {
        let mut monitor = AudioMonitor::default();
        let pitch: Pitch = "C1".parse().unwrap();
        monitor.play_note(pitch, Channel::All, 80).unwrap();
        monitor.stop_note(pitch, Channel::All).unwrap();
        assert!(monitor.is_sounding());
        monitor.send_stop().unwrap();
        assert!(!monitor.is_sounding());
    }

    #[test]
    fn test_monitored_forwards_to_port() {
        let mut output = Monitored::new(RecordingPort::default());
        let monitor = AudioMonitor::default();
        output.set_monitor(Some(monitor.clone()));

        let pitch: Pitch = "D1".parse().unwrap();
        output.play_note(pitch, Channel::All, 80).unwrap();
        assert!(monitor.is_sounding());
        assert_eq!(output.port().sent, vec![Sent::NoteOn(pitch, Channel::All, 80)]);
    }

    #[test]
    fn test_missing_device_is_fine_while_previewing() {
        let port = RecordingPort {
            unavailable: true,
            ..Default::default()
        };
        let mut output = Monitored::new(port);
        assert!(!output.is_available());
        let pitch: Pitch = "E1".parse().unwrap();
        assert_eq!(
            output.play_note(pitch, Channel::All, 80),
            Err(MidiError::NotConnected)
        );

        output.set_monitor(Some(AudioMonitor::default()));
        assert!(output.is_available());
        assert_eq!(output.play_note(pitch, Channel::All, 80), Ok(()));
        assert_eq!(output.send_stop(), Ok(()));
    }
}
