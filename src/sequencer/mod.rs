/// Core sequencer logic - drum tracks, pattern storage and step state
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::error::SequencerError;
use crate::midi::Pitch;

pub mod clock;
pub mod dispatch;
pub mod transport;

/// Sixteenth-note slots per pattern.
pub const STEPS: usize = 16;
pub const DEFAULT_BPM: f32 = 120.0;
/// First control-change number used for instrument controls.
const CONTROL_CC_BASE: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstrumentKind {
    Bass,
    Snare,
    Tom,
    HiHat,
    Cymbals,
}

impl InstrumentKind {
    pub const ALL: [InstrumentKind; 5] = [
        InstrumentKind::Bass,
        InstrumentKind::Snare,
        InstrumentKind::Tom,
        InstrumentKind::HiHat,
        InstrumentKind::Cymbals,
    ];

    pub fn name(self) -> &'static str {
        match self {
            InstrumentKind::Bass => "Bass",
            InstrumentKind::Snare => "Snare",
            InstrumentKind::Tom => "Tom",
            InstrumentKind::HiHat => "Hi Hat",
            InstrumentKind::Cymbals => "Cymbals",
        }
    }

    /// Note the drum module maps to this voice.
    pub fn default_pitch(self) -> &'static str {
        match self {
            InstrumentKind::Bass => "C1",
            InstrumentKind::Snare => "D1",
            InstrumentKind::Tom => "E1",
            InstrumentKind::HiHat => "F#1",
            InstrumentKind::Cymbals => "C#2",
        }
    }

    pub fn control_count(self) -> usize {
        match self {
            InstrumentKind::Bass | InstrumentKind::Snare => 4,
            InstrumentKind::Tom | InstrumentKind::HiHat | InstrumentKind::Cymbals => 3,
        }
    }

    pub fn control_label(self, index: usize) -> &'static str {
        match index {
            1 => "Tune",
            2 => "Level",
            3 => "Decay",
            _ => "Tone",
        }
    }

    /// Control-change number for a 1-based control index.
    pub fn control_number(self, index: usize) -> Result<u8, SequencerError> {
        if index == 0 || index > self.control_count() {
            return Err(SequencerError::InvalidControl { kind: self, index });
        }
        Ok(CONTROL_CC_BASE + 4 * self.ordinal() + (index as u8 - 1))
    }

    fn ordinal(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One instrument voice: a pitch plus a 16-slot on/off pattern.
///
/// Steps are stored 1-based, the way they are authored on a row of sixteen
/// buttons.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    kind: InstrumentKind,
    pitch: Pitch,
    steps: BTreeSet<u8>,
    controls: Vec<u8>,
}

impl Track {
    pub fn new(kind: InstrumentKind, pitch: Pitch) -> Self {
        Self {
            kind,
            pitch,
            steps: BTreeSet::new(),
            controls: vec![0; kind.control_count()],
        }
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    pub fn pitch(&self) -> Pitch {
        self.pitch
    }

    pub fn steps(&self) -> &BTreeSet<u8> {
        &self.steps
    }

    pub fn has_step(&self, step: u8) -> bool {
        self.steps.contains(&step)
    }

    pub fn controls(&self) -> &[u8] {
        &self.controls
    }

    /// Control value for a 1-based control index.
    pub fn control(&self, index: usize) -> Option<u8> {
        index.checked_sub(1).and_then(|i| self.controls.get(i)).copied()
    }
}

/// Read-only view of every track, taken atomically.
pub type Snapshot = Arc<Vec<Track>>;

/// Shared pattern data, edited by the UI and read once per tick.
///
/// Edits are copy-on-write: a snapshot handed to the dispatcher never
/// changes underneath it.
#[derive(Debug, Clone)]
pub struct PatternStore {
    tracks: Arc<RwLock<Snapshot>>,
}

impl PatternStore {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks: Arc::new(RwLock::new(Arc::new(tracks))),
        }
    }

    /// The five-piece kit with empty patterns.
    pub fn drum_kit() -> Self {
        let tracks = InstrumentKind::ALL
            .iter()
            .filter_map(|&kind| {
                let pitch = kind.default_pitch().parse().ok()?;
                Some(Track::new(kind, pitch))
            })
            .collect();
        Self::new(tracks)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.tracks.read().clone()
    }

    /// Add or remove a 1-based step. Both directions are idempotent; an
    /// unknown track is ignored.
    pub fn set_step(
        &self,
        kind: InstrumentKind,
        step: u8,
        active: bool,
    ) -> Result<(), SequencerError> {
        if !(1..=STEPS as u8).contains(&step) {
            return Err(SequencerError::InvalidStep(step));
        }
        self.edit(kind, |track| {
            if active {
                track.steps.insert(step);
            } else {
                track.steps.remove(&step);
            }
        });
        Ok(())
    }

    pub fn toggle_step(&self, kind: InstrumentKind, step: u8) -> Result<bool, SequencerError> {
        let active = !self
            .snapshot()
            .iter()
            .any(|t| t.kind == kind && t.has_step(step));
        self.set_step(kind, step, active)?;
        Ok(active)
    }

    pub fn clear_track(&self, kind: InstrumentKind) {
        self.edit(kind, |track| track.steps.clear());
    }

    /// Store a control value and return the control-change number it maps to.
    pub fn set_control(
        &self,
        kind: InstrumentKind,
        index: usize,
        value: u8,
    ) -> Result<u8, SequencerError> {
        let cc = kind.control_number(index)?;
        if value > 127 {
            return Err(SequencerError::InvalidControlValue(value));
        }
        self.edit(kind, |track| {
            if let Some(slot) = track.controls.get_mut(index - 1) {
                *slot = value;
            }
        });
        Ok(cc)
    }

    fn edit(&self, kind: InstrumentKind, f: impl FnOnce(&mut Track)) {
        let mut guard = self.tracks.write();
        if let Some(track) = Arc::make_mut(&mut *guard).iter_mut().find(|t| t.kind == kind) {
            f(track);
        }
    }
}

impl Default for PatternStore {
    fn default() -> Self {
        Self::drum_kit()
    }
}

/// Cyclic 0-based step pointer shared between the clock and the transport.
#[derive(Debug, Clone, Default)]
pub struct StepCounter(Arc<AtomicUsize>);

impl StepCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Move to the next step, wrapping at 16, and return the new value.
    pub fn advance(&self) -> usize {
        let previous = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |step| {
                Some((step + 1) % STEPS)
            })
            .unwrap_or_default();
        (previous + 1) % STEPS
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Release);
    }
}

/// Longest step the clock will wait for.
const MAX_TICK_INTERVAL: Duration = Duration::from_secs(3600);

/// Accepts tempos whose step interval the clock can actually schedule.
pub fn validate_bpm(bpm: f32) -> Result<f32, SequencerError> {
    if bpm.is_finite() && bpm > 0.0 {
        tick_interval(bpm).map(|_| bpm)
    } else {
        Err(SequencerError::InvalidTempo(bpm))
    }
}

/// Milliseconds between sixteenth notes: 60000 / (bpm * 4).
pub fn tick_interval_ms(bpm: f32) -> f64 {
    60_000.0 / (bpm as f64 * 4.0)
}

pub fn tick_interval(bpm: f32) -> Result<Duration, SequencerError> {
    Duration::try_from_secs_f64(tick_interval_ms(bpm) / 1000.0)
        .ok()
        .filter(|interval| !interval.is_zero() && *interval <= MAX_TICK_INTERVAL)
        .ok_or(SequencerError::InvalidTempo(bpm))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bass_steps(store: &PatternStore) -> BTreeSet<u8> {
        store
            .snapshot()
            .iter()
            .find(|t| t.kind() == InstrumentKind::Bass)
            .map(|t| t.steps().clone())
            .unwrap()
    }

    #[test]
    fn test_drum_kit_layout() {
        let store = PatternStore::drum_kit();
        let snapshot = store.snapshot();
        let names: Vec<_> = snapshot.iter().map(|t| t.pitch().to_string()).collect();
        assert_eq!(names, ["C1", "D1", "E1", "F#1", "C#2"]);
        assert!(snapshot.iter().all(|t| t.steps().is_empty()));
        assert_eq!(snapshot[0].controls().len(), 4);
        assert_eq!(snapshot[4].controls().len(), 3);
    }

    #[test]
    fn test_set_step_is_idempotent() {
        let store = PatternStore::drum_kit();
        store.set_step(InstrumentKind::Bass, 5, true).unwrap();
        store.set_step(InstrumentKind::Bass, 5, true).unwrap();
        assert_eq!(bass_steps(&store), BTreeSet::from([5]));

        store.set_step(InstrumentKind::Bass, 9, false).unwrap();
        assert_eq!(bass_steps(&store), BTreeSet::from([5]));
    }

    #[test]
    fn test_set_then_clear_restores_pattern() {
        let store = PatternStore::drum_kit();
        store.set_step(InstrumentKind::Bass, 3, true).unwrap();
        let original = bass_steps(&store);

        for step in 1..=16 {
            let present = original.contains(&step);
            store.set_step(InstrumentKind::Bass, step, true).unwrap();
            store.set_step(InstrumentKind::Bass, step, false).unwrap();
            if present {
                store.set_step(InstrumentKind::Bass, step, true).unwrap();
            }
            assert_eq!(bass_steps(&store), original);
        }

        let empty = PatternStore::drum_kit();
        for step in 1..=16 {
            empty.set_step(InstrumentKind::Bass, step, true).unwrap();
            empty.set_step(InstrumentKind::Bass, step, false).unwrap();
            assert!(bass_steps(&empty).is_empty());
        }
    }

    #[test]
    fn test_out_of_range_step_rejected() {
        let store = PatternStore::drum_kit();
        assert_eq!(
            store.set_step(InstrumentKind::Snare, 0, true),
            Err(SequencerError::InvalidStep(0))
        );
        assert_eq!(
            store.set_step(InstrumentKind::Snare, 17, true),
            Err(SequencerError::InvalidStep(17))
        );
        assert!(store.snapshot().iter().all(|t| t.steps().is_empty()));
    }

    #[test]
    fn test_snapshot_is_stable_across_edits() {
        let store = PatternStore::drum_kit();
        let before = store.snapshot();
        store.set_step(InstrumentKind::HiHat, 2, true).unwrap();
        assert!(before.iter().all(|t| t.steps().is_empty()));
        assert!(store.snapshot()[3].has_step(2));
    }

    #[test]
    fn test_toggle_and_clear() {
        let store = PatternStore::drum_kit();
        assert!(store.toggle_step(InstrumentKind::Tom, 4).unwrap());
        assert!(!store.toggle_step(InstrumentKind::Tom, 4).unwrap());
        store.set_step(InstrumentKind::Tom, 1, true).unwrap();
        store.set_step(InstrumentKind::Tom, 16, true).unwrap();
        store.clear_track(InstrumentKind::Tom);
        assert!(store.snapshot()[2].steps().is_empty());
    }

    #[test]
    fn test_set_control_maps_to_cc() {
        let store = PatternStore::drum_kit();
        assert_eq!(store.set_control(InstrumentKind::Bass, 1, 64), Ok(20));
        assert_eq!(store.set_control(InstrumentKind::Snare, 2, 100), Ok(25));
        assert_eq!(store.snapshot()[1].control(2), Some(100));
        assert!(matches!(
            store.set_control(InstrumentKind::Tom, 4, 1),
            Err(SequencerError::InvalidControl { .. })
        ));
        assert_eq!(
            store.set_control(InstrumentKind::Tom, 1, 128),
            Err(SequencerError::InvalidControlValue(128))
        );
    }

    #[test]
    fn test_step_counter_wraps() {
        let counter = StepCounter::new();
        let seen: Vec<_> = (0..18).map(|_| counter.advance()).collect();
        let expected: Vec<_> = (1..=18).map(|n| n % 16).collect();
        assert_eq!(seen, expected);

        counter.reset();
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn test_tick_interval() {
        assert_eq!(tick_interval_ms(120.0), 125.0);
        assert_eq!(tick_interval_ms(90.0), 60_000.0 / 360.0);
        assert_eq!(tick_interval(120.0), Ok(Duration::from_millis(125)));
        for bpm in [1.0_f32, 33.0, 60.0, 174.0, 300.0] {
            assert_eq!(tick_interval_ms(bpm), 60_000.0 / (bpm as f64 * 4.0));
        }
    }

    #[test]
    fn test_validate_bpm() {
        assert_eq!(validate_bpm(120.0), Ok(120.0));
        assert!(validate_bpm(0.0).is_err());
        assert!(validate_bpm(-5.0).is_err());
        assert!(validate_bpm(f32::NAN).is_err());
        assert!(validate_bpm(1.0e-30).is_err());
        assert!(validate_bpm(1.0e-18).is_err());
        assert!(validate_bpm(f32::MAX).is_err());
        assert_eq!(validate_bpm(0.01), Ok(0.01));
    }
}
