use crate::{
    config::PipelineConfig,
    detectors::detect_peaks_with_config,
    error::{PhysioError, PhysioResult},
    metrics::{instantaneous_heart_rate, respiratory_volume_per_time},
    response::response_function,
    signal::{PhysioRecording, SignalKind},
};
use log::debug;
use serde::{Deserialize, Serialize};

/// Derived metric convolved with its response function, on the scan's TR grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfoundSeries {
    pub kind: SignalKind,
    pub tr: f64,
    pub start_s: f64,
    pub values: Vec<f64>,
}

impl ConfoundSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Turn one physio recording into its confound regressor.
///
/// Cardiac recordings go through instantaneous heart rate and the cardiac
/// response function, respiratory recordings through RVT and the respiratory
/// response function. A recording without a kind yields
/// [`PhysioError::UnsupportedSignalKind`].
pub fn synthesize_confound(
    recording: &PhysioRecording,
    cfg: &PipelineConfig,
) -> PhysioResult<ConfoundSeries> {
    let kind = recording
        .kind
        .ok_or_else(|| PhysioError::UnsupportedSignalKind {
            label: recording.label.clone(),
        })?;
    let peak_cfg = cfg.peak_config(kind);
    let peaks = detect_peaks_with_config(recording, peak_cfg)?;
    let metric = match kind {
        SignalKind::Cardiac => {
            instantaneous_heart_rate(&peaks, &cfg.binning, peak_cfg.max_interval_s)?
        }
        SignalKind::Respiratory => {
            respiratory_volume_per_time(&peaks, &cfg.binning, peak_cfg.max_interval_s)?
        }
    };
    let kernel = response_function(kind, cfg.binning.tr)?;
    let values = convolve_same(&metric.values, &kernel.values);
    debug!(
        "{}: {} {} peaks -> {} TR samples ({} filled), kernel length {}",
        recording.label,
        peaks.len(),
        kind,
        values.len(),
        metric.filled.len(),
        kernel.len()
    );
    Ok(ConfoundSeries {
        kind,
        tr: metric.tr,
        start_s: metric.start_s,
        values,
    })
}

/// Discrete convolution cropped to the centered `signal.len()` samples of the
/// full result (the `same` mode of scipy/numpy).
pub fn convolve_same(signal: &[f64], kernel: &[f64]) -> Vec<f64> {
    if signal.is_empty() {
        return Vec::new();
    }
    if kernel.is_empty() {
        return vec![0.0; signal.len()];
    }
    let m = kernel.len();
    let offset = (m - 1) / 2;
    (0..signal.len())
        .map(|i| {
            let n = i + offset;
            let lo = n.saturating_sub(m - 1);
            let hi = n.min(signal.len() - 1);
            (lo..=hi).map(|j| signal[j] * kernel[n - j]).sum()
        })
        .collect()
}

/// Two aligned confound columns for one run, as the regression step consumes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfoundMatrix {
    pub tr: f64,
    pub cardiac: Vec<f64>,
    pub respiratory: Vec<f64>,
}

impl ConfoundMatrix {
    pub fn new(tr: f64, cardiac: Vec<f64>, respiratory: Vec<f64>) -> PhysioResult<Self> {
        if cardiac.len() != respiratory.len() {
            return Err(PhysioError::LengthMismatch {
                cardiac: cardiac.len(),
                respiratory: respiratory.len(),
            });
        }
        Ok(Self {
            tr,
            cardiac,
            respiratory,
        })
    }

    pub fn from_series(cardiac: &ConfoundSeries, respiratory: &ConfoundSeries) -> PhysioResult<Self> {
        if cardiac.kind != SignalKind::Cardiac || respiratory.kind != SignalKind::Respiratory {
            return Err(PhysioError::invalid(format!(
                "confound columns must be [cardiac, respiratory], got [{}, {}]",
                cardiac.kind, respiratory.kind
            )));
        }
        if cardiac.tr != respiratory.tr || cardiac.start_s != respiratory.start_s {
            return Err(PhysioError::invalid(
                "cardiac and respiratory confounds are on different TR grids",
            ));
        }
        Self::new(
            cardiac.tr,
            cardiac.values.clone(),
            respiratory.values.clone(),
        )
    }

    pub fn len(&self) -> usize {
        self.cardiac.len()
    }
    pub fn is_empty(&self) -> bool {
        self.cardiac.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = [f64; 2]> + '_ {
        self.cardiac
            .iter()
            .zip(&self.respiratory)
            .map(|(&c, &r)| [c, r])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BinningConfig;
    use std::f64::consts::PI;

    fn sine_recording(label: &str, kind: Option<SignalKind>, hz: f64, seconds: f64) -> PhysioRecording {
        let fs = 40.0;
        let n = (fs * seconds) as usize;
        let data = (0..n)
            .map(|i| (2.0 * PI * hz * i as f64 / fs).sin())
            .collect();
        PhysioRecording::new(label, kind, fs, data).expect("recording")
    }

    #[test]
    fn same_convolution_is_centered() {
        assert_eq!(convolve_same(&[1.0, 2.0, 3.0], &[0.0, 1.0, 0.5]), vec![1.0, 2.5, 4.0]);
        assert_eq!(convolve_same(&[1.0, 2.0, 3.0], &[1.0, 1.0]), vec![1.0, 3.0, 5.0]);
        assert_eq!(
            convolve_same(&[4.0, -1.0, 2.0, 7.0], &[0.0, 1.0, 0.0]),
            vec![4.0, -1.0, 2.0, 7.0]
        );
    }

    #[test]
    fn same_convolution_with_kernel_longer_than_signal() {
        let out = convolve_same(&[1.0, 1.0], &[1.0, 2.0, 3.0, 4.0, 5.0]);
        // full = [1, 3, 5, 7, 9, 5], centered start (5 - 1) / 2 = 2
        assert_eq!(out, vec![5.0, 7.0]);
    }

    #[test]
    fn cardiac_confound_matches_metric_length() {
        let rec = sine_recording("sub-01_ECG_run1", Some(SignalKind::Cardiac), 1.0, 440.0);
        let cfg = PipelineConfig::default();
        let confound = synthesize_confound(&rec, &cfg).expect("confound");
        assert_eq!(confound.kind, SignalKind::Cardiac);
        assert_eq!(confound.len(), 215);
        assert!(confound.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn respiratory_confound_matches_metric_length_at_other_trs() {
        let rec = sine_recording("sub-01_Resp_run1", Some(SignalKind::Respiratory), 0.25, 440.0);
        for tr in [1.0, 2.0, 2.5] {
            let cfg = PipelineConfig {
                binning: BinningConfig {
                    tr,
                    ..BinningConfig::default()
                },
                ..PipelineConfig::default()
            };
            let confound = synthesize_confound(&rec, &cfg).expect("confound");
            assert_eq!(confound.len(), cfg.binning.window_count(), "tr {tr}");
            assert!(confound.values.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn unlabelled_recording_is_unsupported() {
        let rec = sine_recording("sub-01_EDA_run1", None, 1.0, 60.0);
        let err = synthesize_confound(&rec, &PipelineConfig::default()).unwrap_err();
        assert_eq!(
            err,
            PhysioError::UnsupportedSignalKind {
                label: "sub-01_EDA_run1".into()
            }
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn empty_respiratory_recording_is_insufficient() {
        let rec = PhysioRecording::new("sub-01_Resp_run1", Some(SignalKind::Respiratory), 40.0, vec![])
            .expect("recording");
        let err = synthesize_confound(&rec, &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, PhysioError::InsufficientSignal { .. }));
    }

    #[test]
    fn matrix_requires_aligned_columns() {
        let err = ConfoundMatrix::new(2.0, vec![0.0; 3], vec![0.0; 4]).unwrap_err();
        assert_eq!(
            err,
            PhysioError::LengthMismatch {
                cardiac: 3,
                respiratory: 4
            }
        );
        let cardiac = ConfoundSeries {
            kind: SignalKind::Cardiac,
            tr: 2.0,
            start_s: 8.0,
            values: vec![1.0, 2.0],
        };
        let respiratory = ConfoundSeries {
            kind: SignalKind::Respiratory,
            values: vec![3.0, 4.0],
            ..cardiac.clone()
        };
        let matrix = ConfoundMatrix::from_series(&cardiac, &respiratory).expect("matrix");
        assert_eq!(matrix.rows().collect::<Vec<_>>(), vec![[1.0, 3.0], [2.0, 4.0]]);
        assert!(ConfoundMatrix::from_series(&respiratory, &cardiac).is_err());
    }
}
