//! Synthetic signals and in-memory WAV fixtures shared by the unit tests.

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f32::consts::PI;
use std::io::Cursor;

/// Pure tone: `amplitude * sin(2π f t)`.
pub fn sine(freq: f32, sample_rate: u32, seconds: f32, amplitude: f32) -> Vec<f32> {
    let n = (sample_rate as f32 * seconds).round() as usize;
    (0..n)
        .map(|i| amplitude * (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
        .collect()
}

/// Seeded white noise in [-amplitude, amplitude).
pub fn noise(len: usize, amplitude: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(0x5EED_A0D1);
    (0..len).map(|_| rng.gen_range(-amplitude..amplitude)).collect()
}

/// Decaying 1 kHz clicks every `period_samples` samples.
pub fn click_track(period_samples: usize, sample_rate: u32, seconds: f32) -> Vec<f32> {
    let total = (sample_rate as f32 * seconds) as usize;
    let click_len = (sample_rate as f32 * 0.005) as usize;
    let mut samples = vec![0.0f32; total];

    let mut start = 0;
    while start < total {
        for j in 0..click_len.min(total - start) {
            let t = j as f32 / sample_rate as f32;
            samples[start + j] = (2.0 * PI * 1000.0 * t).sin() * (-t * 500.0).exp();
        }
        start += period_samples;
    }
    samples
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Encode mono samples as a 16-bit PCM WAV file.
pub fn wav_bytes(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &sample in samples {
            writer.write_sample(to_i16(sample)).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Encode two channels as an interleaved 16-bit PCM WAV file.
pub fn wav_bytes_stereo(left: &[f32], right: &[f32], sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for (&l, &r) in left.iter().zip(right.iter()) {
            writer.write_sample(to_i16(l)).unwrap();
            writer.write_sample(to_i16(r)).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
