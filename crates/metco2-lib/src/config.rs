use crate::error::{PhysioError, PhysioResult};
use crate::signal::SignalKind;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Tolerance applied when deciding how many whole TRs fit in the scan range.
const WINDOW_COUNT_EPS: f64 = 1e-9;

/// Shortest TR accepted anywhere a grid or kernel is sampled (seconds).
pub const MIN_TR_S: f64 = 1e-3;
/// Upper bound on the number of TR windows in one scan.
pub const MAX_WINDOWS: usize = 1_000_000;

/// Peak detection parameters for one signal kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakConfig {
    /// Hysteresis half-band as a fraction of the robust (1st-99th percentile) range.
    pub threshold: f64,
    /// Cutoff of the baseline-removing single-pole high-pass (Hz).
    pub lowcut_hz: f64,
    /// Cutoff of the smoothing single-pole low-pass (Hz).
    pub highcut_hz: f64,
    /// Refractory period between two events (seconds).
    pub min_interval_s: f64,
    /// Intervals longer than this are detection gaps, not events (seconds).
    pub max_interval_s: f64,
}

impl PeakConfig {
    pub fn cardiac() -> Self {
        Self {
            threshold: 0.3,
            lowcut_hz: 0.5,
            highcut_hz: 5.0,
            min_interval_s: 0.3,
            max_interval_s: 2.0,
        }
    }

    pub fn respiratory() -> Self {
        Self {
            threshold: 0.1,
            lowcut_hz: 0.05,
            highcut_hz: 1.0,
            min_interval_s: 1.0,
            max_interval_s: 15.0,
        }
    }

    pub fn for_kind(kind: SignalKind) -> Self {
        match kind {
            SignalKind::Cardiac => Self::cardiac(),
            SignalKind::Respiratory => Self::respiratory(),
        }
    }

    pub fn validate(&self, kind: impl fmt::Display) -> PhysioResult<()> {
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(PhysioError::invalid(format!(
                "{kind} threshold must lie in (0, 1), got {}",
                self.threshold
            )));
        }
        if !(self.lowcut_hz >= 0.0 && self.highcut_hz > self.lowcut_hz) {
            return Err(PhysioError::invalid(format!(
                "{kind} filter band {}..{} Hz is empty",
                self.lowcut_hz, self.highcut_hz
            )));
        }
        if !(self.min_interval_s > 0.0 && self.max_interval_s > self.min_interval_s) {
            return Err(PhysioError::invalid(format!(
                "{kind} interval bounds {}..{} s are invalid",
                self.min_interval_s, self.max_interval_s
            )));
        }
        Ok(())
    }
}

/// Partial [`PeakConfig`]; unset fields keep the kind's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakOverrides {
    pub threshold: Option<f64>,
    pub lowcut_hz: Option<f64>,
    pub highcut_hz: Option<f64>,
    pub min_interval_s: Option<f64>,
    pub max_interval_s: Option<f64>,
}

impl PeakOverrides {
    pub fn apply(&self, cfg: &mut PeakConfig) {
        if let Some(v) = self.threshold {
            cfg.threshold = v;
        }
        if let Some(v) = self.lowcut_hz {
            cfg.lowcut_hz = v;
        }
        if let Some(v) = self.highcut_hz {
            cfg.highcut_hz = v;
        }
        if let Some(v) = self.min_interval_s {
            cfg.min_interval_s = v;
        }
        if let Some(v) = self.max_interval_s {
            cfg.max_interval_s = v;
        }
    }
}

fn cardiac_peaks<'de, D: Deserializer<'de>>(de: D) -> Result<PeakConfig, D::Error> {
    let mut cfg = PeakConfig::cardiac();
    PeakOverrides::deserialize(de)?.apply(&mut cfg);
    Ok(cfg)
}

fn respiratory_peaks<'de, D: Deserializer<'de>>(de: D) -> Result<PeakConfig, D::Error> {
    let mut cfg = PeakConfig::respiratory();
    PeakOverrides::deserialize(de)?.apply(&mut cfg);
    Ok(cfg)
}

/// TR grid onto which derived metrics are binned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    /// Repetition time (seconds).
    pub tr: f64,
    /// Start of the first window (seconds into the recording).
    pub start_s: f64,
    /// End of the last window (seconds into the recording).
    pub end_s: f64,
    /// Width of each window in TRs, centered on its TR slot.
    pub window_trs: usize,
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self {
            tr: 2.0,
            start_s: 8.0,
            end_s: 438.0,
            window_trs: 1,
        }
    }
}

impl BinningConfig {
    pub fn validate(&self) -> PhysioResult<()> {
        validate_tr(self.tr)?;
        if !(self.start_s.is_finite() && self.end_s.is_finite() && self.end_s > self.start_s) {
            return Err(PhysioError::invalid(format!(
                "scan window {}..{} s is empty",
                self.start_s, self.end_s
            )));
        }
        if self.window_trs == 0 {
            return Err(PhysioError::invalid("window_trs must be at least 1"));
        }
        let span = (self.end_s - self.start_s) / self.tr;
        if span > MAX_WINDOWS as f64 {
            return Err(PhysioError::invalid(format!(
                "scan window {}..{} s at TR {} s exceeds {MAX_WINDOWS} windows",
                self.start_s, self.end_s, self.tr
            )));
        }
        if self.window_count() == 0 {
            return Err(PhysioError::invalid(format!(
                "scan window {}..{} s is shorter than one TR ({} s)",
                self.start_s, self.end_s, self.tr
            )));
        }
        Ok(())
    }

    /// Number of whole TR slots between `start_s` and `end_s`.
    pub fn window_count(&self) -> usize {
        let n = ((self.end_s - self.start_s) / self.tr + WINDOW_COUNT_EPS).floor();
        if n.is_finite() && n > 0.0 {
            n as usize
        } else {
            0
        }
    }

    /// `[lo, hi)` bounds of window `k` in seconds.
    pub fn window_bounds(&self, k: usize) -> (f64, f64) {
        let center = self.start_s + (k as f64 + 0.5) * self.tr;
        let half = 0.5 * self.window_trs as f64 * self.tr;
        (center - half, center + half)
    }
}

pub(crate) fn validate_tr(tr: f64) -> PhysioResult<()> {
    if !(tr.is_finite() && tr > 0.0) {
        return Err(PhysioError::invalid(format!(
            "TR must be a positive number of seconds, got {tr}"
        )));
    }
    if tr < MIN_TR_S {
        return Err(PhysioError::invalid(format!(
            "TR {tr} s is below the {MIN_TR_S} s minimum"
        )));
    }
    Ok(())
}

/// Label substrings that identify each signal kind at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalMarkers {
    pub cardiac: String,
    pub respiratory: String,
}

impl Default for SignalMarkers {
    fn default() -> Self {
        Self {
            cardiac: "ECG".into(),
            respiratory: "Resp".into(),
        }
    }
}

impl SignalMarkers {
    pub fn classify(&self, label: &str) -> Option<SignalKind> {
        if !self.cardiac.is_empty() && label.contains(&self.cardiac) {
            Some(SignalKind::Cardiac)
        } else if !self.respiratory.is_empty() && label.contains(&self.respiratory) {
            Some(SignalKind::Respiratory)
        } else {
            None
        }
    }
}

/// Everything the confound pipeline needs, threaded explicitly through every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Sampling rate of the physio recordings (Hz).
    pub fs: f64,
    #[serde(deserialize_with = "cardiac_peaks")]
    pub cardiac: PeakConfig,
    #[serde(deserialize_with = "respiratory_peaks")]
    pub respiratory: PeakConfig,
    pub binning: BinningConfig,
    pub markers: SignalMarkers,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fs: 40.0,
            cardiac: PeakConfig::cardiac(),
            respiratory: PeakConfig::respiratory(),
            binning: BinningConfig::default(),
            markers: SignalMarkers::default(),
        }
    }
}

impl PipelineConfig {
    pub fn peak_config(&self, kind: SignalKind) -> &PeakConfig {
        match kind {
            SignalKind::Cardiac => &self.cardiac,
            SignalKind::Respiratory => &self.respiratory,
        }
    }

    pub fn validate(&self) -> PhysioResult<()> {
        if !(self.fs.is_finite() && self.fs > 0.0) {
            return Err(PhysioError::invalid(format!(
                "sampling rate must be positive, got {}",
                self.fs
            )));
        }
        self.cardiac.validate(SignalKind::Cardiac)?;
        self.respiratory.validate(SignalKind::Respiratory)?;
        self.binning.validate()
    }
}
