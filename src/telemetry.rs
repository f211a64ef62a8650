//! Engine telemetry. Read from the low-priority UI loop, written by the
//! audio thread; everything is atomic, nothing locks.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::types::SAMPLE_RATE;

const NS_PER_FRAME: u64 = 1_000_000_000 / SAMPLE_RATE as u64;

/// Block timing against the real-time deadline.
///
/// The engine rate is fixed, so a block of `n` frames has a hard budget of
/// `n / 22050` seconds no matter which of the two workers its voices ran
/// on. What the UI needs from that is not a smoothed average but the
/// questions "how close is the engine to the edge right now", "how bad has
/// it ever gotten", and "has a block actually blown its deadline" (an
/// audible dropout), so this keeps the last block, a peak-hold of the
/// per-frame cost, and a miss counter.
#[derive(Default)]
pub struct BlockStats {
    last_ns: AtomicU64,
    last_frames: AtomicU32,
    worst_frame_ns: AtomicU32,
    deadline_misses: AtomicU32,
}

impl BlockStats {
    /// Records one `update` call that produced `frames` in `elapsed_ns`.
    pub fn record(&self, frames: usize, elapsed_ns: u64) {
        if frames == 0 {
            return;
        }
        self.last_ns.store(elapsed_ns, Ordering::Relaxed);
        self.last_frames.store(frames as u32, Ordering::Relaxed);

        let per_frame = (elapsed_ns / frames as u64).min(u32::MAX as u64) as u32;
        self.worst_frame_ns.fetch_max(per_frame, Ordering::Relaxed);

        if elapsed_ns > frames as u64 * NS_PER_FRAME {
            self.deadline_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fraction of the most recent block's deadline that was spent;
    /// 1.0 means the block used its entire real-time budget.
    pub fn load(&self) -> f32 {
        let frames = self.last_frames.load(Ordering::Relaxed);
        if frames == 0 {
            return 0.0;
        }
        let budget = frames as u64 * NS_PER_FRAME;
        self.last_ns.load(Ordering::Relaxed) as f32 / budget as f32
    }

    /// Worst per-frame cost since the last reset, as a fraction of the
    /// per-frame budget.
    pub fn worst_load(&self) -> f32 {
        self.worst_frame_ns.load(Ordering::Relaxed) as f32 / NS_PER_FRAME as f32
    }

    /// Blocks that overran their deadline since the last reset.
    pub fn deadline_misses(&self) -> u32 {
        self.deadline_misses.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.worst_frame_ns.store(0, Ordering::Relaxed);
        self.deadline_misses.store(0, Ordering::Relaxed);
    }
}

/// Aggregated engine counters for the UI.
#[derive(Default)]
pub struct EngineMetrics {
    pub timing: BlockStats,
    pub active_voices: AtomicU32,
    pub peak_voices: AtomicU32,
    pub voices_stolen: AtomicU32,
    pub midi_dropped: AtomicU32,
}

impl EngineMetrics {
    pub fn reset_peaks(&self) {
        self.peak_voices.store(0, Ordering::Relaxed);
        self.voices_stolen.store(0, Ordering::Relaxed);
        self.timing.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_is_elapsed_over_budget() {
        let stats = BlockStats::default();
        // 128 frames at 22050 Hz is ~5.8 ms; half that spent = 0.5 load
        let budget = 128 * NS_PER_FRAME;
        stats.record(128, budget / 2);
        assert!((stats.load() - 0.5).abs() < 0.01, "got {}", stats.load());
        assert_eq!(stats.deadline_misses(), 0);
    }

    #[test]
    fn overrun_counts_as_deadline_miss() {
        let stats = BlockStats::default();
        let budget = 64 * NS_PER_FRAME;
        stats.record(64, budget * 3);
        assert_eq!(stats.deadline_misses(), 1);
        assert!(stats.load() > 2.9);
    }

    #[test]
    fn worst_load_holds_the_peak() {
        let stats = BlockStats::default();
        stats.record(128, 128 * NS_PER_FRAME);
        stats.record(128, 128 * NS_PER_FRAME / 10);
        assert!(stats.worst_load() > 0.9, "peak lost: {}", stats.worst_load());
        assert!(stats.load() < 0.2, "last-block load stuck at peak");
        stats.reset();
        assert_eq!(stats.worst_load(), 0.0);
        assert_eq!(stats.deadline_misses(), 0);
    }

    #[test]
    fn empty_block_is_ignored() {
        let stats = BlockStats::default();
        stats.record(0, 12345);
        assert_eq!(stats.load(), 0.0);
        assert_eq!(stats.deadline_misses(), 0);
    }
}
