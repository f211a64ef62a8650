//! Live piano server: cpal output stream plus a stdin note protocol.
//!
//! The engine runs at 22050 Hz; when the output device cannot open at that
//! rate each engine sample is held for an integer number of device frames.

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::Arc;

use clap::Parser;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate};
use feutre::types::SAMPLE_RATE;
use feutre::{midi::MidiQueue, FeutreError, MidiMessage, Piano, PianoConfig, SystemParameters};

#[derive(Parser)]
#[command(name = "feutre")]
#[command(about = "Physically modeled piano server", long_about = None)]
struct Args {
    /// Output device name or index. Default: system default.
    #[arg(short, long)]
    device: Option<String>,

    /// List output devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Voicing preset (JSON SystemParameters).
    #[arg(long)]
    params: Option<std::path::PathBuf>,

    /// Maximum polyphony.
    #[arg(long, default_value = "16")]
    polyphony: usize,

    /// Soundboard output scale.
    #[arg(long, default_value = "10.0")]
    scale: f32,
}

fn find_device(host: &cpal::Host, spec: &str) -> Option<Device> {
    let devices: Vec<Device> = host.output_devices().ok()?.collect();
    if let Ok(index) = spec.parse::<usize>() {
        return devices.into_iter().nth(index);
    }
    devices
        .into_iter()
        .find(|d| d.name().map(|n| n.contains(spec)).unwrap_or(false))
}

fn list_devices(host: &cpal::Host) {
    println!("Output devices:");
    let Ok(devices) = host.output_devices() else {
        println!("  (no output devices available)");
        return;
    };
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    for (i, device) in devices.enumerate() {
        let name = device.name().unwrap_or_else(|_| "<Unknown>".to_string());
        let marker = if Some(&name) == default_name.as_ref() {
            " (default)"
        } else {
            ""
        };
        println!("  {i}: {name}{marker}");
    }
}

/// Parses one stdin line into MIDI messages.
fn parse_line(line: &str) -> Option<Vec<MidiMessage>> {
    let mut words = line.split_whitespace();
    let cmd = words.next()?;
    let on_off = |w: Option<&str>| w == Some("on");
    match cmd {
        "on" => {
            let note: u8 = words.next()?.parse().ok()?;
            let vel: u8 = words.next().and_then(|w| w.parse().ok()).unwrap_or(100);
            Some(vec![MidiMessage::note_on(note, vel)])
        }
        "off" => {
            let note: u8 = words.next()?.parse().ok()?;
            Some(vec![MidiMessage::note_off(note)])
        }
        "damper" => Some(vec![MidiMessage::control_change(
            64,
            if on_off(words.next()) { 127 } else { 0 },
        )]),
        "sost" => Some(vec![MidiMessage::control_change(
            66,
            if on_off(words.next()) { 127 } else { 0 },
        )]),
        "soft" => Some(vec![MidiMessage::control_change(
            67,
            if on_off(words.next()) { 127 } else { 0 },
        )]),
        "chord" => {
            // e.g. "chord 60 64 67"
            let msgs: Vec<MidiMessage> = words
                .filter_map(|w| w.parse().ok())
                .map(|n| MidiMessage::note_on(n, 100))
                .collect();
            Some(msgs)
        }
        _ => None,
    }
}

fn run() -> Result<(), FeutreError> {
    let args = Args::parse();

    let host = cpal::default_host();
    if args.list_devices {
        list_devices(&host);
        return Ok(());
    }

    let params = match &args.params {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| FeutreError::InvalidPreset(e.to_string()))?;
            serde_json::from_str::<SystemParameters>(&text)
                .map_err(|e| FeutreError::InvalidPreset(e.to_string()))?
        }
        None => SystemParameters::default(),
    };

    let device = match &args.device {
        Some(spec) => {
            find_device(&host, spec).ok_or_else(|| FeutreError::DeviceNotFound(spec.clone()))?
        }
        None => host
            .default_output_device()
            .ok_or(FeutreError::NoDefaultDevice)?,
    };
    println!("Output: {}", device.name().unwrap_or_default());

    let default_config = device
        .default_output_config()
        .map_err(|e| FeutreError::StreamCreationFailed(e.to_string()))?;
    let channels = default_config.channels() as usize;
    let device_rate = default_config.sample_rate().0;

    // exact engine rate when possible, else integer sample holding
    let (rate, factor) = if device_rate == SAMPLE_RATE {
        (SAMPLE_RATE, 1usize)
    } else if device_rate % SAMPLE_RATE == 0 {
        (device_rate, (device_rate / SAMPLE_RATE) as usize)
    } else if device_rate >= 2 * SAMPLE_RATE {
        (2 * SAMPLE_RATE, 2usize)
    } else {
        return Err(FeutreError::UnsupportedSampleRate(device_rate));
    };
    let config = cpal::StreamConfig {
        channels: channels as u16,
        sample_rate: SampleRate(rate),
        buffer_size: cpal::BufferSize::Default,
    };
    println!("Stream: {rate} Hz x{channels}, engine 22050 Hz (hold x{factor})");

    let piano_config = PianoConfig::default()
        .with_polyphony(args.polyphony)
        .with_soundboard_scale(args.scale)
        .with_params(params);
    let mut piano = Piano::new(&piano_config)?;
    let queue = Arc::new(MidiQueue::default());
    let producer = Arc::clone(&queue);

    let mut fifo: VecDeque<f32> = VecDeque::with_capacity(256);
    let mut hold = 0.0f32;
    let mut hold_left = 0usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                for frame in data.chunks_mut(channels) {
                    if hold_left == 0 {
                        if fifo.is_empty() {
                            let mut block = [0i32; 64];
                            piano.update(&mut block, &queue);
                            fifo.extend(
                                block
                                    .iter()
                                    .map(|&v| (v as f32 / 32768.0).clamp(-1.0, 1.0)),
                            );
                        }
                        hold = fifo.pop_front().unwrap_or(0.0);
                        hold_left = factor;
                    }
                    hold_left -= 1;
                    for s in frame.iter_mut() {
                        *s = hold;
                    }
                }
            },
            |err| eprintln!("stream error: {err}"),
            None,
        )
        .map_err(|e| FeutreError::StreamCreationFailed(e.to_string()))?;
    stream
        .play()
        .map_err(|e| FeutreError::StreamCreationFailed(e.to_string()))?;

    println!("Commands: on <note> [vel] | off <note> | chord <notes...> |");
    println!("          damper on|off | sost on|off | soft on|off | quit");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line == "quit" || line == "exit" {
            break;
        }
        match parse_line(line) {
            Some(msgs) => {
                for m in msgs {
                    if !producer.push(m) {
                        eprintln!("queue full, dropped message");
                    }
                }
            }
            None => {
                if !line.is_empty() {
                    eprintln!("unrecognized command: {line}");
                }
            }
        }
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
