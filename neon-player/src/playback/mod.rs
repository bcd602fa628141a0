//! Playback control: source resolution and the controller

pub mod controller;
pub mod resolver;
pub mod url_cache;

pub use controller::PlaybackController;
pub use resolver::{ResolvedSource, SourceResolver};
pub use url_cache::StreamUrlCache;
