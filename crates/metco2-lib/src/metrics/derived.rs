use crate::{
    config::BinningConfig,
    error::{PhysioError, PhysioResult},
    signal::{PeakSeries, SignalKind},
};
use log::warn;
use serde::{Deserialize, Serialize};

/// Low-frequency physiological metric sampled on the scan's TR grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetric {
    pub kind: SignalKind,
    pub tr: f64,
    pub start_s: f64,
    /// One value per TR window
    pub values: Vec<f64>,
    /// Windows that had no events and were filled from their neighbours
    pub filled: Vec<usize>,
}

impl DerivedMetric {
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Center time (seconds) of every window.
    pub fn times(&self) -> Vec<f64> {
        (0..self.values.len())
            .map(|k| self.start_s + (k as f64 + 0.5) * self.tr)
            .collect()
    }
}

/// Piecewise-constant stretch of the metric between two consecutive events.
#[derive(Debug, Clone, Copy)]
struct Segment {
    t0: f64,
    t1: f64,
    value: f64,
}

/// Instantaneous heart rate (beats per minute) per TR window.
///
/// Each beat-to-beat interval contributes `60 / interval` over its own span;
/// a window takes the overlap-weighted mean of the intervals touching it.
/// Intervals longer than `max_interval_s` are treated as missed detections.
pub fn instantaneous_heart_rate(
    peaks: &PeakSeries,
    binning: &BinningConfig,
    max_interval_s: f64,
) -> PhysioResult<DerivedMetric> {
    binning.validate()?;
    let segments: Vec<Segment> = peaks
        .peaks
        .windows(2)
        .filter_map(|w| {
            let t0 = w[0].index as f64 / peaks.fs;
            let t1 = w[1].index as f64 / peaks.fs;
            let interval = t1 - t0;
            (interval > 0.0 && interval <= max_interval_s).then(|| Segment {
                t0,
                t1,
                value: 60.0 / interval,
            })
        })
        .collect();
    bin_metric(SignalKind::Cardiac, &segments, binning)
}

/// Respiratory volume per time per TR window.
///
/// Breath `k` spans peaks `k` and `k + 1`; its value is the mean of the two
/// peak amplitudes minus the trough between them, divided by the breath
/// period. Windows average the breaths overlapping them, weighted by overlap.
pub fn respiratory_volume_per_time(
    peaks: &PeakSeries,
    binning: &BinningConfig,
    max_interval_s: f64,
) -> PhysioResult<DerivedMetric> {
    binning.validate()?;
    let segments: Vec<Segment> = peaks
        .peaks
        .windows(2)
        .zip(peaks.troughs.iter())
        .filter_map(|(w, trough)| {
            let t0 = w[0].index as f64 / peaks.fs;
            let t1 = w[1].index as f64 / peaks.fs;
            let period = t1 - t0;
            let depth = 0.5 * (w[0].amplitude + w[1].amplitude) - trough.amplitude;
            (period > 0.0 && period <= max_interval_s).then(|| Segment {
                t0,
                t1,
                value: depth / period,
            })
        })
        .collect();
    bin_metric(SignalKind::Respiratory, &segments, binning)
}

fn bin_metric(
    kind: SignalKind,
    segments: &[Segment],
    binning: &BinningConfig,
) -> PhysioResult<DerivedMetric> {
    let binned = bin_segments(segments, binning);
    let n = binned.len();
    let (values, filled) = fill_gaps(&binned).ok_or_else(|| {
        PhysioError::insufficient(format!(
            "no {kind} events fall inside the {}..{} s scan window",
            binning.start_s, binning.end_s
        ))
    })?;
    if !filled.is_empty() {
        warn!(
            "{kind}: {} of {} TR windows had no events and were interpolated",
            filled.len(),
            n
        );
    }
    Ok(DerivedMetric {
        kind,
        tr: binning.tr,
        start_s: binning.start_s,
        values,
        filled,
    })
}

fn bin_segments(segments: &[Segment], binning: &BinningConfig) -> Vec<Option<f64>> {
    (0..binning.window_count())
        .map(|k| {
            let (lo, hi) = binning.window_bounds(k);
            let mut acc = 0.0;
            let mut weight = 0.0;
            for seg in segments {
                let overlap = seg.t1.min(hi) - seg.t0.max(lo);
                if overlap > 0.0 {
                    acc += seg.value * overlap;
                    weight += overlap;
                }
            }
            (weight > 0.0).then(|| acc / weight)
        })
        .collect()
}

/// Interpolate empty windows linearly between the nearest valid neighbours and
/// hold the nearest value at either edge. Returns `None` when nothing is valid.
fn fill_gaps(binned: &[Option<f64>]) -> Option<(Vec<f64>, Vec<usize>)> {
    let valid: Vec<usize> = binned
        .iter()
        .enumerate()
        .filter_map(|(k, v)| v.map(|_| k))
        .collect();
    if valid.is_empty() {
        return None;
    }
    let value_at = |k: usize| binned[k].unwrap_or_default();
    let mut values = Vec::with_capacity(binned.len());
    let mut filled = Vec::new();
    for (k, slot) in binned.iter().enumerate() {
        if let Some(v) = slot {
            values.push(*v);
            continue;
        }
        filled.push(k);
        let pos = valid.partition_point(|&i| i < k);
        let prev = pos.checked_sub(1).map(|j| valid[j]);
        let next = valid.get(pos).copied();
        let v = match (prev, next) {
            (Some(p), Some(q)) => {
                let frac = (k - p) as f64 / (q - p) as f64;
                value_at(p) + (value_at(q) - value_at(p)) * frac
            }
            (Some(p), None) => value_at(p),
            (None, Some(q)) => value_at(q),
            (None, None) => return None,
        };
        values.push(v);
    }
    Some((values, filled))
}
