//! Offline WAV rendering for feutre.
//!
//! Renders a timed note script through the engine instead of real-time
//! playback.

use clap::Parser;
use feutre::types::SAMPLE_RATE;
use feutre::{midi::MidiQueue, MidiMessage, Piano, PianoConfig, SystemParameters};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "feutre-render")]
#[command(about = "Render a piano note script to a WAV file", long_about = None)]
struct Args {
    /// Duration to render in seconds.
    #[arg(short, long)]
    duration: f32,

    /// Timed event, repeatable: "<time>:on:<note>[:<velocity>]",
    /// "<time>:off:<note>" or "<time>:cc:<controller>:<value>".
    #[arg(short, long)]
    event: Vec<String>,

    /// Output WAV file path.
    #[arg(short, long)]
    output: PathBuf,

    /// Voicing preset (JSON SystemParameters).
    #[arg(long)]
    params: Option<PathBuf>,

    /// Maximum polyphony.
    #[arg(long, default_value = "16")]
    polyphony: usize,

    /// Soundboard output scale.
    #[arg(long, default_value = "10.0")]
    scale: f32,
}

struct TimedEvent {
    sample: usize,
    message: MidiMessage,
}

fn parse_event(text: &str) -> Result<TimedEvent, String> {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() < 3 {
        return Err(format!("malformed event: {text}"));
    }
    let time: f32 = parts[0]
        .parse()
        .map_err(|_| format!("bad time in event: {text}"))?;
    let sample = (time * SAMPLE_RATE as f32) as usize;

    let arg = |i: usize| -> Result<u8, String> {
        parts
            .get(i)
            .ok_or_else(|| format!("missing field in event: {text}"))?
            .parse()
            .map_err(|_| format!("bad number in event: {text}"))
    };

    let message = match parts[1] {
        "on" => MidiMessage::note_on(arg(2)?, arg(3).unwrap_or(100)),
        "off" => MidiMessage::note_off(arg(2)?),
        "cc" => MidiMessage::control_change(arg(2)?, arg(3)?),
        other => return Err(format!("unknown event kind: {other}")),
    };
    Ok(TimedEvent { sample, message })
}

fn main() {
    let args = Args::parse();

    let params = match &args.params {
        Some(path) => {
            let text = std::fs::read_to_string(path).unwrap_or_else(|e| {
                eprintln!("Failed to read {}: {e}", path.display());
                std::process::exit(1);
            });
            serde_json::from_str::<SystemParameters>(&text).unwrap_or_else(|e| {
                eprintln!("Failed to parse {}: {e}", path.display());
                std::process::exit(1);
            })
        }
        None => SystemParameters::default(),
    };

    let mut events: Vec<TimedEvent> = if args.event.is_empty() {
        vec![TimedEvent {
            sample: 0,
            message: MidiMessage::note_on(69, 100),
        }]
    } else {
        args.event
            .iter()
            .map(|e| {
                parse_event(e).unwrap_or_else(|msg| {
                    eprintln!("{msg}");
                    std::process::exit(1);
                })
            })
            .collect()
    };
    events.sort_by_key(|e| e.sample);

    let config = PianoConfig::default()
        .with_polyphony(args.polyphony)
        .with_soundboard_scale(args.scale)
        .with_params(params);
    let mut piano = Piano::new(&config).unwrap_or_else(|e| {
        eprintln!("Failed to build engine: {e}");
        std::process::exit(1);
    });
    let queue = MidiQueue::new(events.len().max(16));

    let total = (SAMPLE_RATE as f32 * args.duration) as usize;
    let mut output = vec![0i32; total];
    let mut next_event = 0;

    let mut cursor = 0;
    for chunk in output.chunks_mut(128) {
        while next_event < events.len() && events[next_event].sample < cursor + chunk.len() {
            queue.push(events[next_event].message);
            next_event += 1;
        }
        piano.update(chunk, &queue);
        cursor += chunk.len();
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(&args.output, spec).expect("failed to create WAV file");
    for sample in output {
        let s = sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        writer.write_sample(s).expect("failed to write sample");
    }
    writer.finalize().expect("failed to finalize WAV");

    println!(
        "Rendered {:.2}s to {} ({} Hz, mono)",
        args.duration,
        args.output.display(),
        SAMPLE_RATE
    );
}
