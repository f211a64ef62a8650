//! Error types for the Feutre piano engine.

use std::fmt;

/// Errors that can occur when constructing the engine or its audio front
/// end. The real-time path itself never fails after construction.
#[derive(Debug)]
pub enum FeutreError {
    /// The DSP worker thread could not be spawned.
    WorkerSpawnFailed(String),
    /// No output device matched the requested name or index.
    DeviceNotFound(String),
    /// The audio host offers no default output device.
    NoDefaultDevice,
    /// Opening the output stream was refused by the device.
    StreamCreationFailed(String),
    /// The output device offers no rate the engine can feed.
    UnsupportedSampleRate(u32),
    /// A voicing preset file could not be parsed.
    InvalidPreset(String),
}

impl fmt::Display for FeutreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeutreError::WorkerSpawnFailed(msg) => {
                write!(f, "failed to spawn DSP worker: {msg}")
            }
            FeutreError::DeviceNotFound(spec) => {
                write!(f, "no output device matches \"{spec}\"")
            }
            FeutreError::NoDefaultDevice => {
                write!(f, "the audio host has no default output device")
            }
            FeutreError::StreamCreationFailed(msg) => {
                write!(f, "the device refused the output stream: {msg}")
            }
            FeutreError::UnsupportedSampleRate(rate) => {
                write!(f, "no usable output rate near {rate} Hz")
            }
            FeutreError::InvalidPreset(msg) => {
                write!(f, "invalid voicing preset: {msg}")
            }
        }
    }
}

impl std::error::Error for FeutreError {}
