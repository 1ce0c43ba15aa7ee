//! # Audio Decoding
//!
//! The service never parses audio containers itself. Decoding sits behind the
//! `AudioDecoder` trait so the pipeline only sees "bytes in, waveform out";
//! the production implementation delegates to symphonia, which handles WAV,
//! FLAC, MP3, OGG/Vorbis, AAC/M4A, AIFF and more.
//!
//! ## Decoding Rules:
//! - The file's native sample rate is kept (no resampling)
//! - All channels are averaged into a single mono channel
//! - Corrupted packets in an otherwise valid stream are skipped
//! - A stream that yields no samples at all is an error

use super::source::{AudioSource, SourceReader};
use super::waveform::Waveform;
use anyhow::{anyhow, bail, Context, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Turns an acquired upload into a waveform.
///
/// Implementations must be shareable across worker threads; one decoder
/// instance serves every request.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, source: &AudioSource) -> Result<Waveform>;
}

/// Decoder backed by the symphonia format/codec registries.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, source: &AudioSource) -> Result<Waveform> {
        let media: Box<dyn MediaSource> = match source.open()? {
            SourceReader::Memory(cursor) => Box::new(cursor),
            SourceReader::File(file) => Box::new(file),
        };
        let mss = MediaSourceStream::new(media, Default::default());

        // The extension only speeds up probing, content sniffing still decides
        let mut hint = Hint::new();
        if let Some(ext) = source.extension() {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .context("unrecognized audio format")?;
        let mut format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| anyhow!("no audio tracks found"))?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .context("unsupported codec")?;

        let mut samples: Vec<f32> = Vec::new();
        let mut skipped_packets = 0usize;

        loop {
            let packet = match format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(anyhow!(e).context("reading packet")),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    skipped_packets += 1;
                    tracing::debug!(reason = msg, "Skipping corrupted packet");
                    continue;
                }
                Err(e) => return Err(anyhow!(e).context("decoding packet")),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            if channels == 0 || decoded.frames() == 0 {
                continue;
            }
            sample_rate.get_or_insert(spec.rate);

            let mut interleaved = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            interleaved.copy_interleaved_ref(decoded);
            mix_to_mono(interleaved.samples(), channels, &mut samples);
        }

        if skipped_packets > 0 {
            tracing::warn!(skipped_packets, "Some packets could not be decoded");
        }

        let sample_rate = match sample_rate {
            Some(rate) if rate > 0 => rate,
            _ => bail!("stream does not declare a sample rate"),
        };

        if samples.is_empty() {
            bail!("stream contains no audio samples");
        }

        Ok(Waveform::new(samples, sample_rate))
    }
}

/// Average interleaved frames into mono and append them to `out`.
fn mix_to_mono(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels == 1 {
        out.extend_from_slice(interleaved);
        return;
    }

    let scale = 1.0 / channels as f32;
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::Upload;
    use crate::testing::{sine, wav_bytes, wav_bytes_stereo};

    fn decode(bytes: Vec<u8>, name: &str) -> Result<Waveform> {
        let source = AudioSource::in_memory(Upload::new(Some(name.to_string()), bytes));
        SymphoniaDecoder::new().decode(&source)
    }

    #[test]
    fn test_decode_wav_keeps_native_rate() {
        let samples = sine(440.0, 22050, 0.5, 0.5);
        let waveform = decode(wav_bytes(&samples, 22050), "tone.wav").unwrap();

        assert_eq!(waveform.sample_rate, 22050);
        assert_eq!(waveform.len(), samples.len());
        // 16-bit quantization error
        for (decoded, original) in waveform.samples.iter().zip(samples.iter()) {
            assert!((decoded - original).abs() < 1e-3);
        }
    }

    #[test]
    fn test_decode_stereo_mixes_to_mono() {
        let left = vec![0.5f32; 1000];
        let right = vec![-0.25f32; 1000];
        let waveform = decode(wav_bytes_stereo(&left, &right, 44100), "stereo.wav").unwrap();

        assert_eq!(waveform.sample_rate, 44100);
        assert_eq!(waveform.len(), 1000);
        assert!(waveform.samples.iter().all(|s| (s - 0.125).abs() < 1e-3));
    }

    #[test]
    fn test_decode_without_extension_hint() {
        let samples = sine(220.0, 16000, 0.25, 0.3);
        let waveform = decode(wav_bytes(&samples, 16000), "upload").unwrap();
        assert_eq!(waveform.sample_rate, 16000);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode(b"definitely not an audio file".to_vec(), "notes.txt").unwrap_err();
        assert!(format!("{:#}", err).contains("unrecognized audio format"));
    }

    #[test]
    fn test_decode_rejects_empty_stream() {
        assert!(decode(wav_bytes(&[], 22050), "empty.wav").is_err());
    }

    #[test]
    fn test_decode_from_spooled_file() {
        let dir = tempfile::tempdir().unwrap();
        let samples = sine(440.0, 22050, 0.2, 0.5);
        let upload = Upload::new(Some("tone.wav".to_string()), wav_bytes(&samples, 22050));
        let source = AudioSource::spooled(upload, Some(dir.path())).unwrap();

        let waveform = SymphoniaDecoder::new().decode(&source).unwrap();
        assert_eq!(waveform.len(), samples.len());
    }

    #[test]
    fn test_mix_to_mono() {
        let mut out = Vec::new();
        mix_to_mono(&[1.0, 0.0, 0.5, 0.5], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5]);

        mix_to_mono(&[0.1, 0.2], 1, &mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.1, 0.2]);
    }
}
