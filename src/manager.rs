//! Voice pool and the two-worker block scheduler.
//!
//! Voices are pooled entries addressed by small indices. A singly-linked
//! free list feeds allocation; sounding voices sit on a doubly-linked
//! active list ordered so the oldest *released* voice is at the head and
//! is therefore the one stolen when the pool runs dry.
//!
//! Each block the active list is snapshotted into a work vector and both
//! the audio thread and one long-lived worker claim entries with an atomic
//! `fetch_add`, each mixing its claimed voices into its own buffer; the
//! worker's buffer is added point-wise after the SYNC hand-back. START,
//! SYNC and EXIT travel over bounded crossbeam channels, whose send/recv
//! pairs provide the happens-before edges the shared state relies on.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::FeutreError;
use crate::note::{Note, NoteState};
use crate::params::SystemParameters;
use crate::pedal::PedalState;
use crate::telemetry::EngineMetrics;
use crate::types::{note_frequency, Sample, MAX_BLOCK_SIZE, NOTE_BEGIN, N_NOTES};

const NIL: u16 = u16::MAX;

#[derive(Debug, Clone, Copy)]
struct VoiceNode {
    note: i16,
    prev: u16,
    next: u16,
}

/// State shared with the worker thread.
///
/// Safety protocol: `work` and `mix` are written by the audio thread only
/// between SYNC and the next START, and read by both threads in between;
/// every `states` cell is accessed by exactly one thread per block, the
/// one that claimed its work entry from `next_work`.
struct Shared {
    notes: Box<[Note]>,
    states: Box<[UnsafeCell<NoteState>]>,
    work: UnsafeCell<Vec<(u16, u16)>>, // (voice index, note index)
    next_work: AtomicUsize,
    mix: UnsafeCell<Vec<Sample>>,
}

unsafe impl Sync for Shared {}

enum Cmd {
    Block { n_samples: usize, pedal: PedalState },
    Exit,
}

pub struct NoteManager {
    shared: Arc<Shared>,
    nodes: Vec<VoiceNode>,
    note_to_voice: [i16; N_NOTES],
    free_head: u16,
    active_head: u16,
    active_tail: u16,
    active_count: usize,
    metrics: Arc<EngineMetrics>,
    start_tx: Sender<Cmd>,
    sync_rx: Receiver<()>,
    worker: Option<JoinHandle<()>>,
}

impl NoteManager {
    pub fn new(
        params: &SystemParameters,
        n_poly: usize,
        metrics: Arc<EngineMetrics>,
    ) -> Result<Self, FeutreError> {
        assert!(n_poly >= 1 && n_poly < NIL as usize);

        let notes: Box<[Note]> = (0..N_NOTES)
            .map(|i| Note::new(note_frequency(i as u8 + NOTE_BEGIN), params))
            .collect();
        let arena_len = notes.iter().map(Note::arena_len).max().unwrap_or(0);

        let states: Box<[UnsafeCell<NoteState>]> = (0..n_poly)
            .map(|_| UnsafeCell::new(NoteState::new(arena_len)))
            .collect();

        let shared = Arc::new(Shared {
            notes,
            states,
            work: UnsafeCell::new(Vec::with_capacity(n_poly)),
            next_work: AtomicUsize::new(0),
            mix: UnsafeCell::new(vec![Sample::default(); MAX_BLOCK_SIZE]),
        });

        let (start_tx, start_rx) = bounded::<Cmd>(1);
        let (sync_tx, sync_rx) = bounded::<()>(1);
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("feutre-dsp".into())
            .spawn(move || worker_loop(worker_shared, start_rx, sync_tx))
            .map_err(|e| FeutreError::WorkerSpawnFailed(e.to_string()))?;

        let mut nodes = vec![
            VoiceNode {
                note: -1,
                prev: NIL,
                next: NIL,
            };
            n_poly
        ];
        for i in 0..n_poly - 1 {
            nodes[i].next = (i + 1) as u16;
        }

        Ok(Self {
            shared,
            nodes,
            note_to_voice: [-1; N_NOTES],
            free_head: 0,
            active_head: NIL,
            active_tail: NIL,
            active_count: 0,
            metrics,
            start_tx,
            sync_rx,
            worker: Some(worker),
        })
    }

    pub fn current_note_count(&self) -> usize {
        self.active_count
    }

    /// Starts (or retriggers) a voice for `note_idx` (0..88).
    ///
    /// Called from the audio thread between blocks; the worker is parked
    /// on START, so the state access is exclusive.
    pub fn key_on(&mut self, note_idx: usize, velocity: f32) {
        let voice = if self.note_to_voice[note_idx] >= 0 {
            self.note_to_voice[note_idx] as u16
        } else {
            let v = match self.alloc_free() {
                Some(v) => v,
                None => {
                    // steal the head: oldest released, else oldest held
                    let v = self.pop_front_active().expect("voice pool is empty");
                    let old = self.nodes[v as usize].note;
                    self.note_to_voice[old as usize] = -1;
                    self.metrics
                        .voices_stolen
                        .fetch_add(1, Ordering::Relaxed);
                    v
                }
            };
            self.nodes[v as usize].note = note_idx as i16;
            self.note_to_voice[note_idx] = v as i16;
            self.push_active(v);
            v
        };

        let state = unsafe { &mut *self.shared.states[voice as usize].get() };
        self.shared.notes[note_idx].key_on(state, velocity);
    }

    /// Releases the voice mapped to `note_idx`, if any, and moves it to
    /// the front of the active list so released voices are stolen first.
    pub fn key_off(&mut self, note_idx: usize) {
        let mapped = self.note_to_voice[note_idx];
        if mapped < 0 {
            return;
        }
        let voice = mapped as u16;
        debug_assert_eq!(self.nodes[voice as usize].note, note_idx as i16);

        let state = unsafe { &mut *self.shared.states[voice as usize].get() };
        self.shared.notes[note_idx].key_off(state);

        if self.active_head != voice {
            self.remove_active(voice);
            self.push_front_active(voice);
        }
    }

    /// Produces one block: every active voice accumulates into either
    /// `dst` (audio thread) or the shared worker buffer, which is then
    /// reduced into `dst`. Idle voices are swept back to the free list.
    pub fn update(&mut self, dst: &mut [Sample], pedal: PedalState) {
        let n = dst.len();
        debug_assert!(n <= MAX_BLOCK_SIZE);

        {
            // exclusive access: worker is parked on START
            let work = unsafe { &mut *self.shared.work.get() };
            work.clear();
            let mut v = self.active_head;
            while v != NIL {
                let node = self.nodes[v as usize];
                work.push((v, node.note as u16));
                v = node.next;
            }
            let mix = unsafe { &mut *self.shared.mix.get() };
            mix[..n].fill(Sample::default());
        }

        self.shared.next_work.store(0, Ordering::Release);
        self.start_tx
            .send(Cmd::Block {
                n_samples: n,
                pedal,
            })
            .expect("dsp worker disconnected");

        run_work_queue(&self.shared, dst, pedal);

        self.sync_rx.recv().expect("dsp worker disconnected");

        // sweep idle voices back to the free list
        let mut v = self.active_head;
        while v != NIL {
            let next = self.nodes[v as usize].next;
            let idle = unsafe { (*self.shared.states[v as usize].get()).idle };
            if idle {
                let note = self.nodes[v as usize].note;
                self.note_to_voice[note as usize] = -1;
                self.remove_active(v);
                self.push_free(v);
            }
            v = next;
        }

        let mix = unsafe { &*self.shared.mix.get() };
        for (d, m) in dst.iter_mut().zip(&mix[..n]) {
            *d += *m;
        }
    }

    fn alloc_free(&mut self) -> Option<u16> {
        if self.free_head == NIL {
            return None;
        }
        let v = self.free_head;
        self.free_head = self.nodes[v as usize].next;
        Some(v)
    }

    fn push_free(&mut self, v: u16) {
        self.nodes[v as usize].next = self.free_head;
        self.free_head = v;
    }

    fn push_active(&mut self, v: u16) {
        let node = &mut self.nodes[v as usize];
        node.prev = self.active_tail;
        node.next = NIL;
        if self.active_tail != NIL {
            self.nodes[self.active_tail as usize].next = v;
        } else {
            self.active_head = v;
        }
        self.active_tail = v;
        self.active_count += 1;
    }

    fn push_front_active(&mut self, v: u16) {
        let node = &mut self.nodes[v as usize];
        node.prev = NIL;
        node.next = self.active_head;
        if self.active_head != NIL {
            self.nodes[self.active_head as usize].prev = v;
        } else {
            self.active_tail = v;
        }
        self.active_head = v;
        self.active_count += 1;
    }

    fn pop_front_active(&mut self) -> Option<u16> {
        if self.active_head == NIL {
            return None;
        }
        let v = self.active_head;
        self.remove_active(v);
        Some(v)
    }

    fn remove_active(&mut self, v: u16) {
        let VoiceNode { prev, next, .. } = self.nodes[v as usize];
        if prev != NIL {
            self.nodes[prev as usize].next = next;
        } else {
            debug_assert_eq!(self.active_head, v);
            self.active_head = next;
        }
        if next != NIL {
            self.nodes[next as usize].prev = prev;
        } else {
            debug_assert_eq!(self.active_tail, v);
            self.active_tail = prev;
        }
        self.active_count -= 1;
    }

    #[cfg(test)]
    fn free_count(&self) -> usize {
        let mut n = 0;
        let mut v = self.free_head;
        while v != NIL {
            n += 1;
            v = self.nodes[v as usize].next;
        }
        n
    }

    #[cfg(test)]
    fn voice_for(&self, note_idx: usize) -> i16 {
        self.note_to_voice[note_idx]
    }
}

impl Drop for NoteManager {
    fn drop(&mut self) {
        let _ = self.start_tx.send(Cmd::Exit);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Claims voices off the shared queue until it drains, mixing each into
/// `dst`. Runs concurrently on the audio thread and the worker; the
/// `fetch_add` makes every claim exclusive.
fn run_work_queue(shared: &Shared, dst: &mut [Sample], pedal: PedalState) {
    let work = unsafe { &*shared.work.get() };
    loop {
        let i = shared.next_work.fetch_add(1, Ordering::AcqRel);
        if i >= work.len() {
            break;
        }
        let (voice, note) = work[i];
        let state = unsafe { &mut *shared.states[voice as usize].get() };
        shared.notes[note as usize].update(dst, state, pedal);
    }
}

fn worker_loop(shared: Arc<Shared>, start_rx: Receiver<Cmd>, sync_tx: Sender<()>) {
    while let Ok(Cmd::Block { n_samples, pedal }) = start_rx.recv() {
        let mix = unsafe { &mut *shared.mix.get() };
        run_work_queue(&shared, &mut mix[..n_samples], pedal);
        if sync_tx.send(()).is_err() {
            break;
        }
    }
}
