use crate::{config::SignalMarkers, signal::PhysioRecording};
use anyhow::{Context, Result};
use log::debug;
use std::path::Path;

use super::text::read_f64_series;

/// Load a physio `.1D` file as a recording labelled by its file stem.
///
/// The signal kind is tagged here, once, from `markers`.
pub fn load_recording(path: &Path, fs: f64, markers: &SignalMarkers) -> Result<PhysioRecording> {
    let label = recording_label(path);
    let samples = read_f64_series(path)?;
    let kind = markers.classify(&label);
    debug!(
        "loaded {} ({} samples, kind {})",
        path.display(),
        samples.len(),
        kind.map_or_else(|| "unknown".to_string(), |k| k.to_string())
    );
    PhysioRecording::new(label, kind, fs, samples)
        .with_context(|| format!("invalid recording {}", path.display()))
}

/// File name with every extension stripped (`sub-01_ECG_run1.1D` -> `sub-01_ECG_run1`).
pub fn recording_label(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.split_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => name,
    }
}
