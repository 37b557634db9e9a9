use crate::{
    config::PeakConfig,
    error::{PhysioError, PhysioResult},
    signal::{Extremum, PeakSeries, PhysioRecording},
};
use log::debug;

/// Detect heartbeats or breaths using the default filter settings for the
/// recording's kind and the given hysteresis threshold.
pub fn detect_peaks(recording: &PhysioRecording, threshold: f64) -> PhysioResult<PeakSeries> {
    let kind = recording
        .kind
        .ok_or_else(|| PhysioError::UnsupportedSignalKind {
            label: recording.label.clone(),
        })?;
    let cfg = PeakConfig {
        threshold,
        ..PeakConfig::for_kind(kind)
    };
    detect_peaks_with_config(recording, &cfg)
}

/// Detect events with a fully specified configuration.
///
/// The waveform is band-limited, then scanned with a Schmitt trigger centered on
/// the median: a lobe opens above `median + h` and closes below `median - h`,
/// where `h` is `threshold` times half the 1st-99th percentile range. Each closed
/// lobe yields its maximum as a peak; peaks closer than the refractory period
/// collapse to the taller one.
pub fn detect_peaks_with_config(
    recording: &PhysioRecording,
    cfg: &PeakConfig,
) -> PhysioResult<PeakSeries> {
    if recording.is_empty() {
        return Err(PhysioError::insufficient(format!(
            "recording '{}' contains no samples",
            recording.label
        )));
    }
    if recording.samples.iter().any(|x| !x.is_finite()) {
        return Err(PhysioError::insufficient(format!(
            "recording '{}' contains non-finite samples",
            recording.label
        )));
    }
    cfg.validate(&recording.label)?;

    let fs = recording.fs;
    let conditioned = bandpass(&recording.samples, fs, cfg.lowcut_hz, cfg.highcut_hz);

    let mut sorted = conditioned.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let range = percentile(&sorted, 99.0) - percentile(&sorted, 1.0);
    if !(range > 0.0) {
        return Err(PhysioError::insufficient(format!(
            "recording '{}' is flat after filtering",
            recording.label
        )));
    }
    let center = percentile(&sorted, 50.0);
    let half_band = 0.5 * cfg.threshold * range;

    let candidates = schmitt_peaks(&conditioned, center + half_band, center - half_band);
    let min_gap = ((cfg.min_interval_s * fs).round() as usize).max(1);
    let peaks = merge_refractory(candidates, min_gap);
    debug!(
        "{}: {} peaks (band {:.4}, refractory {} samples)",
        recording.label,
        peaks.len(),
        half_band,
        min_gap
    );
    if peaks.len() < 2 {
        return Err(PhysioError::insufficient(format!(
            "recording '{}' yielded {} peak(s) at threshold {}; at least 2 are required",
            recording.label,
            peaks.len(),
            cfg.threshold
        )));
    }

    let troughs = peaks
        .windows(2)
        .map(|w| lowest_between(&conditioned, w[0].index, w[1].index))
        .collect();

    Ok(PeakSeries {
        fs,
        peaks,
        troughs,
    })
}

fn schmitt_peaks(data: &[f64], upper: f64, lower: f64) -> Vec<Extremum> {
    let mut out = Vec::new();
    let mut in_lobe = false;
    let mut best = Extremum {
        index: 0,
        amplitude: f64::MIN,
    };
    for (i, &x) in data.iter().enumerate() {
        if in_lobe {
            if x > best.amplitude {
                best = Extremum {
                    index: i,
                    amplitude: x,
                };
            }
            if x < lower {
                out.push(best);
                in_lobe = false;
            }
        } else if x > upper {
            in_lobe = true;
            best = Extremum {
                index: i,
                amplitude: x,
            };
        }
    }
    // A lobe cut off by the end of the buffer only counts if it already turned over.
    if in_lobe && best.index + 1 < data.len() {
        out.push(best);
    }
    out
}

fn merge_refractory(candidates: Vec<Extremum>, min_gap: usize) -> Vec<Extremum> {
    let mut peaks: Vec<Extremum> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if let Some(last) = peaks.last().copied() {
            if candidate.index - last.index < min_gap {
                if candidate.amplitude > last.amplitude {
                    let n = peaks.len();
                    peaks[n - 1] = candidate;
                }
                continue;
            }
        }
        peaks.push(candidate);
    }
    peaks
}

fn lowest_between(data: &[f64], start: usize, end: usize) -> Extremum {
    let mut low = Extremum {
        index: start,
        amplitude: data[start],
    };
    for (offset, &x) in data[start..=end].iter().enumerate() {
        if x < low.amplitude {
            low = Extremum {
                index: start + offset,
                amplitude: x,
            };
        }
    }
    low
}

/// Linear-interpolated percentile of an ascending slice (`q` in 0..=100).
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn bandpass(data: &[f64], fs: f64, low: f64, high: f64) -> Vec<f64> {
    let hp = if low > 0.0 {
        single_pole_highpass(data, fs, low)
    } else {
        data.to_vec()
    };
    if high >= fs * 0.5 {
        hp
    } else {
        single_pole_lowpass(&hp, fs, high)
    }
}

fn single_pole_highpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    let dt = 1.0 / fs;
    let rc = 1.0 / (2.0 * std::f64::consts::PI * cutoff);
    let alpha = rc / (rc + dt);
    let mut out = Vec::with_capacity(data.len());
    // Start from steady state so a DC offset does not ring through the first seconds.
    let mut prev_y = 0.0;
    let mut prev_x = data[0];
    for &x in data {
        let y = alpha * (prev_y + x - prev_x);
        out.push(y);
        prev_y = y;
        prev_x = x;
    }
    out
}

fn single_pole_lowpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    if data.is_empty() {
        return Vec::new();
    }
    let dt = 1.0 / fs;
    let rc = 1.0 / (2.0 * std::f64::consts::PI * cutoff);
    let alpha = dt / (rc + dt);
    let mut out = Vec::with_capacity(data.len());
    let mut prev = data[0];
    for &x in data {
        prev += alpha * (x - prev);
        out.push(prev);
    }
    out
}
