//! Test helper modules for neon-player integration tests
//!
//! - FakeBackend / FakePlayer: scriptable media framework recording every call
//! - ManualClock: monotonic clock stepped by hand
//! - audio_generator: S16LE sine and silence buffers, WAV fixtures

#![allow(dead_code)]

pub mod audio_generator;
pub mod fake_media;
pub mod manual_clock;

pub use audio_generator::{sine_pcm, silence_pcm, write_sine_wav};
pub use fake_media::{FakeBackend, FakePlayer};
pub use manual_clock::ManualClock;
