//! Canonical physiological response functions (Chang & Glover 2009, Appendix A).

use crate::{
    config::validate_tr,
    error::{PhysioError, PhysioResult},
    signal::SignalKind,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Kernel support of the cardiac response function (seconds).
pub const CARDIAC_SUPPORT_S: f64 = 32.0;
/// Kernel support of the respiratory response function (seconds).
pub const RESPIRATORY_SUPPORT_S: f64 = 50.0;

/// Convolution kernel sampled every TR, normalized to a maximum magnitude of 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFunction {
    pub kind: SignalKind,
    pub tr: f64,
    pub values: Vec<f64>,
}

impl ResponseFunction {
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn response_function(kind: SignalKind, tr: f64) -> PhysioResult<ResponseFunction> {
    match kind {
        SignalKind::Cardiac => cardiac_response_function(tr),
        SignalKind::Respiratory => respiratory_response_function(tr),
    }
}

/// Cardiac response function over `t = 0, tr, 2tr, ...` while `t < 32 s`.
pub fn cardiac_response_function(tr: f64) -> PhysioResult<ResponseFunction> {
    let gauss_scale = 16.0 * (1.0 / (2.0 * PI * 9.0).sqrt());
    let values = sample_times(tr, CARDIAC_SUPPORT_S)?
        .into_iter()
        .map(|t| {
            0.6 * t.powf(2.7) * (-t / 1.6).exp()
                - gauss_scale * (-0.5 * ((t - 12.0).powi(2) / 9.0)).exp()
        })
        .collect();
    normalized(SignalKind::Cardiac, tr, values)
}

/// Respiratory response function over `t = 0, tr, 2tr, ...` while `t < 50 s`.
pub fn respiratory_response_function(tr: f64) -> PhysioResult<ResponseFunction> {
    let values = sample_times(tr, RESPIRATORY_SUPPORT_S)?
        .into_iter()
        .map(|t| 0.6 * t.powf(2.1) * (-t / 1.6).exp() - 0.0023 * t.powf(3.54) * (-t / 4.25).exp())
        .collect();
    normalized(SignalKind::Respiratory, tr, values)
}

fn sample_times(tr: f64, support_s: f64) -> PhysioResult<Vec<f64>> {
    validate_tr(tr)?;
    let n = (support_s / tr).ceil() as usize;
    Ok((0..n).map(|i| i as f64 * tr).collect())
}

fn normalized(kind: SignalKind, tr: f64, mut values: Vec<f64>) -> PhysioResult<ResponseFunction> {
    let peak = values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if !(peak.is_finite() && peak > 0.0) {
        return Err(PhysioError::NumericDegenerate {
            what: format!("{kind} response function at TR {tr} s (maximum magnitude {peak})"),
        });
    }
    for v in values.iter_mut() {
        *v /= peak;
    }
    Ok(ResponseFunction { kind, tr, values })
}
