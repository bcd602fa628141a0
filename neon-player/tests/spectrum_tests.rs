//! Spectrum analyzer integration tests
//!
//! PCM goes in the way a capture player delivers it (S16LE, interleaved),
//! either directly or through the callback installed by `attach`.

mod helpers;

use helpers::{silence_pcm, sine_pcm, FakePlayer};
use neon_player::audio::{PcmFormat, PlayerRole, SpectrumAnalyzer};
use neon_player::config::AnalyzerSettings;
use std::sync::Arc;

fn analyzer() -> SpectrumAnalyzer {
    SpectrumAnalyzer::new(&AnalyzerSettings::default())
}

#[test]
fn test_needs_minimum_samples() {
    let analyzer = analyzer();
    assert!(analyzer.get_fft().is_none());

    // 16 stereo frames: 64 bytes, 16 left-channel samples
    let short = sine_pcm(440.0, 44_100, 2, 16, 0.5);
    assert_eq!(short.len(), 64);
    analyzer.push_pcm(&short, 16);
    assert!(analyzer.get_fft().is_none());

    analyzer.clear_buffer();
    let enough = sine_pcm(440.0, 44_100, 2, 64, 0.5);
    analyzer.push_pcm(&enough, 64);

    let spectrum = analyzer.get_fft().expect("64 frames are enough");
    assert_eq!(spectrum.frequencies.len(), spectrum.magnitudes.len());
    assert_eq!(spectrum.len(), 64 / 2 + 1);
    assert_eq!(spectrum.frequencies[0], 0.0);
    assert!((spectrum.frequencies[1] - 44_100.0 / 64.0).abs() < 1e-3);
}

#[test]
fn test_window_capped_by_samples_per_read() {
    let analyzer = analyzer();
    let pcm = sine_pcm(440.0, 44_100, 2, 4096, 0.5);
    analyzer.push_pcm(&pcm, 4096);

    let spectrum = analyzer.get_fft().unwrap();
    assert_eq!(spectrum.len(), 1024 / 2 + 1);
}

#[test]
fn test_window_below_minimum_is_rejected() {
    // Reads shorter than the minimum can never produce a window
    let analyzer = SpectrumAnalyzer::new(&AnalyzerSettings {
        samples_per_read: 16,
        min_fft_size: 32,
        ..AnalyzerSettings::default()
    });
    analyzer.push_pcm(&sine_pcm(440.0, 44_100, 2, 64, 0.5), 64);
    assert!(analyzer.get_fft().is_none());

    // 33 samples pass the first check but round down to a 32 window
    let analyzer = SpectrumAnalyzer::new(&AnalyzerSettings {
        min_fft_size: 33,
        ..AnalyzerSettings::default()
    });
    analyzer.push_pcm(&sine_pcm(440.0, 44_100, 2, 33, 0.5), 33);
    assert!(analyzer.get_fft().is_none());

    analyzer.push_pcm(&sine_pcm(440.0, 44_100, 2, 1, 0.5), 1);
    assert_eq!(analyzer.get_fft().map(|s| s.len()), Some(34 / 2 + 1));
}

#[test]
fn test_buffer_capped_to_duration() {
    let analyzer = SpectrumAnalyzer::new(&AnalyzerSettings {
        sample_rate: 1000,
        channels: 2,
        samples_per_read: 64,
        buffer_duration_secs: 0.1,
        min_fft_size: 32,
    });
    assert_eq!(analyzer.capacity_bytes(), 400);

    analyzer.push_pcm(&silence_pcm(2, 60), 60);
    assert_eq!(analyzer.available_bytes(), 240);

    analyzer.push_pcm(&silence_pcm(2, 90), 90);
    assert_eq!(analyzer.available_bytes(), 400);
}

#[test]
fn test_frame_count_limits_copied_bytes() {
    let analyzer = analyzer();
    let pcm = silence_pcm(2, 100);
    analyzer.push_pcm(&pcm, 10);
    assert_eq!(analyzer.available_bytes(), 10 * 4);
}

#[test]
fn test_silence_is_not_normalized() {
    let analyzer = analyzer();
    analyzer.push_pcm(&silence_pcm(2, 256), 256);

    let spectrum = analyzer.get_fft().unwrap();
    assert!(spectrum.magnitudes.iter().all(|m| *m == 0.0));
    assert_eq!(spectrum.peak_frequency(), None);
}

#[test]
fn test_magnitudes_normalized() {
    let analyzer = analyzer();
    let pcm = sine_pcm(2000.0, 44_100, 2, 2048, 0.8);
    analyzer.push_pcm(&pcm, 2048);

    let spectrum = analyzer.get_fft().unwrap();
    let max = spectrum.magnitudes.iter().copied().fold(0.0f32, f32::max);
    assert!((max - 1.0).abs() < 1e-6);
    assert!(spectrum.magnitudes.iter().all(|m| (0.0..=1.0).contains(m)));
}

#[test]
fn test_sine_peak_lands_on_its_bin() {
    let analyzer = analyzer();
    let pcm = sine_pcm(1000.0, 44_100, 2, 2048, 0.5);
    analyzer.push_pcm(&pcm, 2048);

    let spectrum = analyzer.get_fft().unwrap();
    let bin_hz = 44_100.0 / 1024.0;
    let peak = spectrum.peak_frequency().unwrap();
    assert!(
        (peak - 1000.0).abs() <= bin_hz,
        "peak at {} Hz, expected about 1000 Hz",
        peak
    );
}

#[test]
fn test_mono_downmix_uses_left_channel() {
    let analyzer = analyzer();

    // Left carries a 3 kHz tone, right stays silent
    let left = sine_pcm(3000.0, 44_100, 1, 2048, 0.5);
    let mut stereo = Vec::with_capacity(left.len() * 2);
    for sample in left.chunks_exact(2) {
        stereo.extend_from_slice(sample);
        stereo.extend_from_slice(&[0, 0]);
    }
    analyzer.push_pcm(&stereo, 2048);

    let peak = analyzer.get_fft().unwrap().peak_frequency().unwrap();
    assert!((peak - 3000.0).abs() <= 44_100.0 / 1024.0);
}

#[test]
fn test_attach_routes_capture_pcm() {
    let player = Arc::new(FakePlayer::new(PlayerRole::Capture));
    let analyzer = analyzer();

    analyzer.attach(player.clone());
    assert!(player.has_callback());
    assert_eq!(player.audio_format(), PcmFormat::new(44_100, 2));

    assert!(player.feed_pcm(&sine_pcm(440.0, 44_100, 2, 128, 0.5)));
    assert_eq!(analyzer.available_bytes(), 128 * 4);
    assert!(analyzer.get_fft().is_some());

    analyzer.detach();
    assert!(!player.has_callback());
    assert!(!player.feed_pcm(&silence_pcm(2, 16)));
    assert_eq!(analyzer.available_bytes(), 128 * 4);
}

#[test]
fn test_reattach_moves_callback() {
    let first = Arc::new(FakePlayer::new(PlayerRole::Capture));
    let second = Arc::new(FakePlayer::new(PlayerRole::Capture));
    let analyzer = analyzer();

    analyzer.attach(first.clone());
    analyzer.attach(second.clone());
    assert!(!first.has_callback());
    assert!(second.has_callback());

    drop(analyzer);
    assert!(!second.has_callback());
}

#[test]
fn test_callback_usable_from_other_threads() {
    let analyzer = Arc::new(analyzer());
    let callback = analyzer.callback();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let callback = callback.clone();
            std::thread::spawn(move || {
                for _ in 0..10 {
                    callback(&silence_pcm(2, 32), 32);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(analyzer.available_bytes(), 4 * 10 * 32 * 4);
    let _ = analyzer.get_fft();
}
