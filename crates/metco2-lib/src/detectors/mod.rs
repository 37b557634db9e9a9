pub mod peaks;

pub use peaks::{detect_peaks, detect_peaks_with_config};
