use criterion::{criterion_group, criterion_main, Criterion};
use feutre::{midi::MidiQueue, MidiMessage, Piano, PianoConfig};

fn sustained_chord(c: &mut Criterion) {
    let mut piano = Piano::new(&PianoConfig::default()).unwrap();
    let queue = MidiQueue::new(16);
    for note in [36u8, 48, 52, 55, 60, 64, 67, 72] {
        queue.push(MidiMessage::note_on(note, 100));
    }
    let mut block = [0i32; 128];
    // strike and let the voices settle into steady state
    piano.update(&mut block, &queue);

    c.bench_function("block_128_chord_8", |b| {
        b.iter(|| piano.update(&mut block, &queue))
    });
}

fn single_treble_note(c: &mut Criterion) {
    let mut piano = Piano::new(&PianoConfig::default()).unwrap();
    let queue = MidiQueue::new(16);
    queue.push(MidiMessage::note_on(96, 100));
    let mut block = [0i32; 128];
    piano.update(&mut block, &queue);

    c.bench_function("block_128_treble_rk4", |b| {
        b.iter(|| piano.update(&mut block, &queue))
    });
}

criterion_group!(benches, sustained_chord, single_treble_note);
criterion_main!(benches);
