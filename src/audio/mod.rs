//! # Audio Input
//!
//! Everything between the uploaded bytes and a decoded waveform.
//!
//! ## Key Components:
//! - **Source**: holds the upload for the lifetime of one analysis, either in
//!   memory or spooled to a temporary file that is deleted on drop
//! - **Decoder**: the `AudioDecoder` seam and its symphonia-backed implementation
//! - **Waveform**: mono `f32` samples at the file's native sample rate
//!
//! No resampling happens here. Extractors work at whatever rate the file
//! was recorded at.

pub mod decoder;   // AudioDecoder trait + symphonia implementation
pub mod source;    // Transient upload storage
pub mod waveform;  // Decoded samples + sample rate

pub use decoder::{AudioDecoder, SymphoniaDecoder};
pub use source::{AudioSource, Upload};
pub use waveform::Waveform;
