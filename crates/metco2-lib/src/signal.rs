use crate::error::{PhysioError, PhysioResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physiological channel a recording carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Cardiac,
    Respiratory,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Cardiac => f.write_str("cardiac"),
            SignalKind::Respiratory => f.write_str("respiratory"),
        }
    }
}

/// Uniformly sampled single-channel physio recording.
///
/// `kind` is decided once when the recording is ingested; `None` means the label
/// matched no known marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysioRecording {
    pub label: String,
    pub kind: Option<SignalKind>,
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    pub samples: Vec<f64>,
}

impl PhysioRecording {
    pub fn new(
        label: impl Into<String>,
        kind: Option<SignalKind>,
        fs: f64,
        samples: Vec<f64>,
    ) -> PhysioResult<Self> {
        if !(fs.is_finite() && fs > 0.0) {
            return Err(PhysioError::invalid(format!(
                "sampling rate must be positive, got {fs}"
            )));
        }
        Ok(Self {
            label: label.into(),
            kind,
            fs,
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.fs
    }
}

/// A detected peak or trough.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extremum {
    /// Sample index in the source recording
    pub index: usize,
    /// Conditioned-signal value at `index`
    pub amplitude: f64,
}

/// Heartbeats or breaths detected in a recording.
///
/// Peaks are strictly increasing; `troughs[k]` lies between `peaks[k]` and
/// `peaks[k + 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakSeries {
    pub fs: f64,
    pub peaks: Vec<Extremum>,
    pub troughs: Vec<Extremum>,
}

impl PeakSeries {
    pub fn len(&self) -> usize {
        self.peaks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn indices(&self) -> Vec<usize> {
        self.peaks.iter().map(|p| p.index).collect()
    }

    /// Peak times in seconds from the start of the recording.
    pub fn times(&self) -> Vec<f64> {
        self.peaks
            .iter()
            .map(|p| p.index as f64 / self.fs)
            .collect()
    }

    /// Peak-to-peak intervals in seconds.
    pub fn intervals(&self) -> Vec<f64> {
        self.peaks
            .windows(2)
            .map(|w| (w[1].index as f64 - w[0].index as f64) / self.fs)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_sampling_rate() {
        assert!(PhysioRecording::new("x", None, 0.0, vec![1.0]).is_err());
        assert!(PhysioRecording::new("x", None, f64::NAN, vec![1.0]).is_err());
        let rec = PhysioRecording::new("x", Some(SignalKind::Cardiac), 40.0, vec![0.0; 80])
            .expect("valid recording");
        assert_eq!(rec.duration(), 2.0);
    }

    #[test]
    fn intervals_follow_peak_spacing() {
        let peaks = [0usize, 40, 100]
            .iter()
            .map(|&index| Extremum {
                index,
                amplitude: 1.0,
            })
            .collect();
        let series = PeakSeries {
            fs: 40.0,
            peaks,
            troughs: Vec::new(),
        };
        assert_eq!(series.intervals(), vec![1.0, 1.5]);
        assert_eq!(series.times(), vec![0.0, 1.0, 2.5]);
        assert_eq!(series.indices(), vec![0, 40, 100]);
    }
}
