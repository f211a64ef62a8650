//! Feutre: a real-time physically modeled piano.
//!
//! Per sounding note a felt hammer strikes 1..3 waveguide strings whose
//! bridge outputs drive a shared feedback-delay-network soundboard. The
//! engine runs at a fixed 22050 Hz, keeps a bounded pool of voices, and
//! splits per-voice DSP between the audio thread and one worker.
//!
//! ```no_run
//! use feutre::{midi::MidiQueue, MidiMessage, Piano, PianoConfig};
//!
//! let mut piano = Piano::new(&PianoConfig::default()).unwrap();
//! let queue = MidiQueue::default();
//! queue.push(MidiMessage::note_on(69, 64));
//! let mut block = [0i32; 128];
//! piano.update(&mut block, &queue);
//! ```

pub mod config;
pub mod dsp;
pub mod error;
pub mod hammer;
pub mod manager;
pub mod midi;
pub mod note;
pub mod numeric;
pub mod params;
pub mod pedal;
pub mod soundboard;
pub mod string;
pub mod telemetry;
pub mod types;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use manager::NoteManager;
use pedal::PedalState;
use soundboard::Soundboard;
use types::{note_index, Sample, MAX_BLOCK_SIZE};

pub use config::PianoConfig;
pub use error::FeutreError;
pub use midi::{MidiMessage, MidiParser, MidiQueue};
pub use params::SystemParameters;
pub use telemetry::EngineMetrics;

/// The complete instrument: event demux, voice manager and soundboard.
pub struct Piano {
    pedal: PedalState,
    manager: NoteManager,
    soundboard: Soundboard,
    mix: Vec<Sample>,
    metrics: Arc<EngineMetrics>,
}

impl Piano {
    /// Builds all 88 notes and the voice pool, and spawns the DSP worker.
    pub fn new(config: &PianoConfig) -> Result<Self, FeutreError> {
        let metrics = Arc::new(EngineMetrics::default());
        let manager = NoteManager::new(&config.params, config.polyphony, Arc::clone(&metrics))?;
        let soundboard = Soundboard::new(&config.params, config.soundboard_scale);
        Ok(Self {
            pedal: PedalState::default(),
            manager,
            soundboard,
            mix: vec![Sample::default(); MAX_BLOCK_SIZE],
            metrics,
        })
    }

    /// Produces exactly `out.len()` frames of signed samples near ±32768,
    /// draining the MIDI queue at the top of the block.
    pub fn update(&mut self, out: &mut [i32], midi: &MidiQueue) {
        let start = Instant::now();

        while let Some(m) = midi.pop() {
            self.dispatch(m);
        }

        for chunk in out.chunks_mut(MAX_BLOCK_SIZE) {
            let n = chunk.len();
            self.mix[..n].fill(Sample::default());
            self.manager.update(&mut self.mix[..n], self.pedal);
            // the sostenuto edge only latches keys held at the press
            self.pedal.sostenuto_trigger = false;
            self.soundboard.update(chunk, &self.mix[..n]);
        }

        let voices = self.manager.current_note_count() as u32;
        self.metrics.active_voices.store(voices, Ordering::Relaxed);
        self.metrics.peak_voices.fetch_max(voices, Ordering::Relaxed);
        self.metrics
            .midi_dropped
            .store(midi.dropped(), Ordering::Relaxed);
        self.metrics
            .timing
            .record(out.len(), start.elapsed().as_nanos() as u64);
    }

    fn dispatch(&mut self, m: MidiMessage) {
        if !m.is_valid() {
            return;
        }
        match m.status() {
            0x80 => {
                if let Some(idx) = note_index(m.data[1]) {
                    self.manager.key_off(idx);
                }
            }
            0x90 => {
                if let Some(idx) = note_index(m.data[1]) {
                    self.manager.key_on(idx, m.data[2] as f32 * (10.0 / 127.0));
                }
            }
            0xb0 => match m.data[1] {
                64 => self.pedal.set_damper(m.data[2] >= 64),
                66 => self.pedal.set_sostenuto(m.data[2] >= 64),
                67 => self.pedal.set_shift(m.data[2] >= 64),
                _ => {}
            },
            _ => {}
        }
    }

    /// Number of sounding voices, for the UI.
    pub fn current_note_count(&self) -> usize {
        self.manager.current_note_count()
    }

    pub fn set_soundboard_scale(&mut self, scale: f32) {
        self.soundboard.set_scale(scale);
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }
}
