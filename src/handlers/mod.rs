pub mod analyze;

pub use analyze::analyze_audio;
