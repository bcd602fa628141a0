//! Streaming audio decoder using symphonia
//!
//! Decodes MP3, AAC/M4A, FLAC, Vorbis and WAV packet by packet into
//! interleaved f32 samples. Local files are read in place; stream URLs are
//! downloaded in full first, since catalog CDNs serve whole files and the
//! format readers need a seekable source.

use crate::audio::backend::MediaLocation;
use crate::error::{Error, Result};
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use tracing::{debug, warn};

/// Consecutive undecodable packets tolerated before giving up
const MAX_CONSECUTIVE_DECODE_ERRORS: usize = 16;

/// Packet-at-a-time decoder over one audio track
pub struct StreamDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    time_base: Option<TimeBase>,
    duration_ms: u64,
    finished: bool,
}

impl StreamDecoder {
    /// Open a local file or download and open a stream URL
    ///
    /// Blocks for the whole download when the location is remote.
    pub fn open(location: &MediaLocation) -> Result<Self> {
        match location {
            MediaLocation::File(path) => Self::open_file(path),
            MediaLocation::Url(url) => Self::open_url(url),
        }
    }

    pub fn open_file(path: &Path) -> Result<Self> {
        debug!("Opening file: {}", path.display());

        let file = std::fs::File::open(path)
            .map_err(|e| Error::Decode(format!("Failed to open file {}: {}", path.display(), e)))?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        Self::from_source(Box::new(file), hint)
    }

    fn open_url(url: &str) -> Result<Self> {
        debug!("Fetching stream: {}", url);

        let bytes = reqwest::blocking::get(url)
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.bytes())
            .map_err(|e| Error::Decode(format!("Failed to fetch stream: {}", e)))?;

        debug!("Fetched {} bytes", bytes.len());

        let mut hint = Hint::new();
        if let Some(ext) = url_extension(url) {
            hint.with_extension(ext);
        }

        Self::from_source(Box::new(Cursor::new(bytes.to_vec())), hint)
    }

    fn from_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<Self> {
        let mss = MediaSourceStream::new(source, Default::default());

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;

        let channels = codec_params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| Error::Decode("Channel count not found".to_string()))?;

        let duration_ms = codec_params
            .n_frames
            .map(|frames| frames.saturating_mul(1000) / u64::from(sample_rate.max(1)))
            .unwrap_or(0);

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

        debug!(
            "Audio format: sample_rate={}, channels={}, duration={}ms",
            sample_rate, channels, duration_ms
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            time_base: codec_params.time_base,
            duration_ms,
            finished: false,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Track length, 0 when the container does not say
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Decode the next packet into interleaved f32 samples
    ///
    /// Returns `Ok(None)` at end of stream. Corrupt packets are skipped.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        if self.finished {
            return Ok(None);
        }

        let mut decode_errors = 0;

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("Reached end of stream");
                    self.finished = true;
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => {
                    self.finished = true;
                    return Err(Error::Decode(format!("Failed to read packet: {}", e)));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    let spec = *decoded.spec();
                    self.channels = spec.channels.count();
                    let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    return Ok(Some(buffer.samples().to_vec()));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    decode_errors += 1;
                    warn!("Skipping undecodable packet: {}", e);
                    if decode_errors >= MAX_CONSECUTIVE_DECODE_ERRORS {
                        self.finished = true;
                        return Err(Error::Decode(format!(
                            "{} consecutive decode errors, last: {}",
                            decode_errors, e
                        )));
                    }
                }
                Err(e) => {
                    self.finished = true;
                    return Err(Error::Decode(format!("Decode failed: {}", e)));
                }
            }
        }
    }

    /// Seek to a position, returning where decoding actually resumes
    pub fn seek(&mut self, position_ms: u64) -> Result<u64> {
        let time = Time::new(position_ms / 1000, (position_ms % 1000) as f64 / 1000.0);

        let seeked = self
            .format
            .seek(
                SeekMode::Coarse,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| Error::Decode(format!("Seek to {}ms failed: {}", position_ms, e)))?;

        self.decoder.reset();
        self.finished = false;

        let actual_ms = match self.time_base {
            Some(time_base) => {
                let time = time_base.calc_time(seeked.actual_ts);
                time.seconds * 1000 + (time.frac * 1000.0) as u64
            }
            None => position_ms,
        };

        debug!("Seeked to {}ms (requested {}ms)", actual_ms, position_ms);
        Ok(actual_ms)
    }
}

/// File extension of a URL path, ignoring query and fragment
fn url_extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    (!ext.is_empty() && ext.len() <= 4).then_some(ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_sine_wav(path: &Path, sample_rate: u32, channels: u16, seconds: f32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let frames = (sample_rate as f32 * seconds) as usize;
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let sample = ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5 * i16::MAX as f32) as i16;
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_url_extension() {
        assert_eq!(url_extension("https://cdn.example.com/a/b/track.m4a?sig=1"), Some("m4a"));
        assert_eq!(url_extension("https://cdn.example.com/get.mp3#t=1"), Some("mp3"));
        assert_eq!(url_extension("https://cdn.example.com/stream"), None);
        assert_eq!(url_extension("https://cdn.example.com/videoplayback.abcdefgh"), None);
    }

    #[test]
    fn test_decode_wav_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, 22_050, 2, 0.5);

        let mut decoder = StreamDecoder::open(&MediaLocation::File(path)).unwrap();
        assert_eq!(decoder.sample_rate(), 22_050);
        assert_eq!(decoder.channels(), 2);
        assert_eq!(decoder.duration_ms(), 500);

        let mut total = 0;
        while let Some(chunk) = decoder.next_chunk().unwrap() {
            assert_eq!(chunk.len() % 2, 0);
            total += chunk.len();
        }
        assert_eq!(total, 22_050 / 2 * 2);
        assert!(decoder.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_seek_restarts_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine_wav(&path, 8_000, 1, 1.0);

        let mut decoder = StreamDecoder::open_file(&path).unwrap();
        while decoder.next_chunk().unwrap().is_some() {}

        let actual = decoder.seek(500).unwrap();
        assert!(actual <= 500);
        assert!(decoder.next_chunk().unwrap().is_some());
    }

    #[test]
    fn test_open_missing_file() {
        let result = StreamDecoder::open(&MediaLocation::File(PathBuf::from(
            "/nonexistent/neon/missing.mp3",
        )));
        assert!(matches!(result, Err(Error::Decode(_))));
    }
}
