//! MIDI messages, the bounded input queue, and a byte-stream parser for
//! serial transports.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::types::DEFAULT_MIDI_QUEUE_CAPACITY;

/// One channel-voice message, at most three bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MidiMessage {
    pub len: u8,
    pub data: [u8; 3],
}

impl MidiMessage {
    pub fn new(bytes: &[u8]) -> Self {
        let len = bytes.len().min(3);
        let mut data = [0u8; 3];
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            len: len as u8,
            data,
        }
    }

    pub fn note_on(note: u8, velocity: u8) -> Self {
        Self::new(&[0x90, note, velocity])
    }

    pub fn note_off(note: u8) -> Self {
        Self::new(&[0x80, note, 0])
    }

    pub fn control_change(controller: u8, value: u8) -> Self {
        Self::new(&[0xb0, controller, value])
    }

    pub fn is_valid(&self) -> bool {
        self.len > 0
    }

    pub fn status(&self) -> u8 {
        self.data[0] & 0xf0
    }

    pub fn is_end_of_sysex(&self) -> bool {
        self.len > 0 && self.data[self.len as usize - 1] == 0xf7
    }
}

/// Bounded MPSC queue between MIDI transports and the audio thread.
///
/// Producers never block: a push to a full or disabled queue is dropped
/// and reported through the drop counter. The consumer drains at block
/// boundaries only.
pub struct MidiQueue {
    tx: Sender<MidiMessage>,
    rx: Receiver<MidiMessage>,
    enabled: AtomicBool,
    dropped: AtomicU32,
}

impl MidiQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            enabled: AtomicBool::new(true),
            dropped: AtomicU32::new(0),
        }
    }

    /// Enable or disconnect the producer side; pushes while disabled are
    /// refused without counting as drops.
    pub fn set_active(&self, active: bool) {
        self.enabled.store(active, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Non-blocking push; returns whether the message was accepted.
    pub fn push(&self, m: MidiMessage) -> bool {
        if !self.is_active() {
            return false;
        }
        match self.tx.try_send(m) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Non-blocking pop for the block-boundary drain.
    pub fn pop(&self) -> Option<MidiMessage> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Messages dropped by producers since construction.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for MidiQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MIDI_QUEUE_CAPACITY)
    }
}

/// Reassembles messages from a raw MIDI byte stream: running status,
/// SysEx split into 3-byte chunks, realtime bytes discarded.
#[derive(Debug, Default)]
pub struct MidiParser {
    sysex: bool,
    msg: MidiMessage,
    pos: usize,
}

impl MidiParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.sysex = false;
        self.pos = 0;
        self.msg.data[0] = 0;
    }

    pub fn feed(&mut self, byte: u8, sink: &mut impl FnMut(MidiMessage)) {
        if byte < 0x80 {
            if self.sysex {
                self.msg.data[self.pos] = byte;
                self.pos += 1;
                if self.pos == 3 {
                    self.msg.len = 3;
                    sink(self.msg);
                    self.pos = 0;
                }
                return;
            }
            if self.pos == 0 {
                // running status: reuse the previous status byte
                if self.msg.data[0] >= 0x80 && self.msg.len >= 2 {
                    self.pos = 1;
                } else {
                    return;
                }
            }
            self.msg.data[self.pos] = byte;
            self.pos += 1;
            if self.pos == self.msg.len as usize {
                sink(self.msg);
                self.pos = 0;
            }
        } else if byte < 0xf0 {
            const MESSAGE_SIZE: [u8; 8] = [3, 3, 3, 3, 2, 2, 3, 0];
            self.msg.len = MESSAGE_SIZE[((byte >> 4) - 8) as usize];
            self.msg.data[0] = byte;
            self.pos = 0;
        } else if byte == 0xf0 {
            self.sysex = true;
            self.pos = 0;
        } else if byte == 0xf7 {
            if self.sysex {
                self.msg.data[self.pos] = 0xf7;
                self.pos += 1;
                self.msg.len = self.pos as u8;
                sink(self.msg);
                self.pos = 0;
            }
            self.sysex = false;
        } else if byte >= 0xf8 {
            // realtime bytes never reach the synthesis core
        } else {
            self.msg.data[0] = byte;
            self.msg.len = 1;
            sink(self.msg);
            self.pos = 0;
        }
    }

    pub fn feed_slice(&mut self, bytes: &[u8], sink: &mut impl FnMut(MidiMessage)) {
        for &b in bytes {
            self.feed(b, sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> Vec<MidiMessage> {
        let mut parser = MidiParser::new();
        let mut out = Vec::new();
        parser.feed_slice(bytes, &mut |m| out.push(m));
        out
    }

    #[test]
    fn parses_note_on_off() {
        let msgs = parse(&[0x90, 69, 64, 0x80, 69, 0]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0], MidiMessage::note_on(69, 64));
        assert_eq!(msgs[1], MidiMessage::new(&[0x80, 69, 0]));
    }

    #[test]
    fn running_status_reuses_previous_status() {
        let msgs = parse(&[0x90, 60, 100, 64, 90, 67, 80]);
        assert_eq!(msgs.len(), 3);
        for m in &msgs {
            assert_eq!(m.status(), 0x90);
        }
        assert_eq!(msgs[1].data[1], 64);
        assert_eq!(msgs[2].data[1], 67);
    }

    #[test]
    fn sysex_splits_into_chunks() {
        let msgs = parse(&[0xf0, 1, 2, 3, 4, 0xf7]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].len, 3);
        assert!(!msgs[0].is_end_of_sysex());
        assert!(msgs[1].is_end_of_sysex());
    }

    #[test]
    fn realtime_bytes_are_discarded() {
        let msgs = parse(&[0x90, 60, 0xf8, 100]);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0], MidiMessage::note_on(60, 100));
    }

    #[test]
    fn queue_drops_when_full() {
        let q = MidiQueue::new(2);
        assert!(q.push(MidiMessage::note_on(60, 1)));
        assert!(q.push(MidiMessage::note_on(61, 1)));
        assert!(!q.push(MidiMessage::note_on(62, 1)));
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn disabled_queue_refuses_without_counting() {
        let q = MidiQueue::new(4);
        q.set_active(false);
        assert!(!q.push(MidiMessage::note_on(60, 1)));
        assert_eq!(q.dropped(), 0);
        q.set_active(true);
        assert!(q.push(MidiMessage::note_on(60, 1)));
        assert_eq!(q.pop(), Some(MidiMessage::note_on(60, 1)));
        assert_eq!(q.pop(), None);
    }
}
