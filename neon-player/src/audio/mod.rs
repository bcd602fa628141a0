//! Audio subsystem: media engine, native backend and spectrum analysis

pub mod backend;
pub mod decoder;
pub mod engine;
pub mod native;
pub mod output;
pub mod resampler;
pub mod spectrum;

pub use backend::{
    Media, MediaBackend, MediaLocation, MediaPlayer, PcmCallback, PcmFormat, PlayerEvent,
    PlayerRole,
};
pub use engine::MediaEngine;
pub use native::NativeBackend;
pub use spectrum::{Spectrum, SpectrumAnalyzer};
