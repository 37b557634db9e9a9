use anyhow::{Context, Result};
use metco2_lib::{Naming, PeakOverrides, PhysioResult, PipelineConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Study file as written on disk; every field is optional and falls back to
/// the protocol defaults in [`PipelineConfig::default`].
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StudySpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub naming: Option<Naming>,
    #[serde(default)]
    pub pipeline: Option<PipelineSpec>,
    #[serde(default)]
    pub subjects: BTreeMap<String, SubjectSpec>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineSpec {
    #[serde(default)]
    pub fs: Option<f64>,
    #[serde(default)]
    pub tr: Option<f64>,
    #[serde(default)]
    pub start_s: Option<f64>,
    #[serde(default)]
    pub end_s: Option<f64>,
    #[serde(default)]
    pub window_trs: Option<usize>,
    #[serde(default)]
    pub cardiac: Option<PeakOverrides>,
    #[serde(default)]
    pub respiratory: Option<PeakOverrides>,
    #[serde(default)]
    pub markers: Option<MarkerSpec>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MarkerSpec {
    #[serde(default)]
    pub cardiac: Option<String>,
    #[serde(default)]
    pub respiratory: Option<String>,
}

/// Per-subject overrides, e.g. subjects recorded at a different sampling rate.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SubjectSpec {
    #[serde(default)]
    pub fs: Option<f64>,
}

/// Resolved study settings handed to the batch runner.
#[derive(Debug, Clone, PartialEq)]
pub struct Study {
    pub name: String,
    pub pipeline: PipelineConfig,
    pub naming: Naming,
    pub subject_fs: BTreeMap<String, f64>,
}

impl Default for Study {
    fn default() -> Self {
        Self {
            name: "metco2".into(),
            pipeline: PipelineConfig::default(),
            naming: Naming::default(),
            subject_fs: BTreeMap::new(),
        }
    }
}

impl Study {
    /// Pipeline settings for one subject, with its sampling-rate override applied.
    pub fn config_for(&self, subject: &str) -> PipelineConfig {
        let mut cfg = self.pipeline.clone();
        if let Some(fs) = self.subject_fs.get(subject) {
            cfg.fs = *fs;
        }
        cfg
    }

    pub fn validate(&self) -> PhysioResult<()> {
        self.pipeline.validate()?;
        for subject in self.subject_fs.keys() {
            self.config_for(subject).validate()?;
        }
        Ok(())
    }
}

impl StudySpec {
    pub fn resolve(&self) -> PhysioResult<Study> {
        let mut pipeline = PipelineConfig::default();
        if let Some(spec) = &self.pipeline {
            if let Some(v) = spec.fs {
                pipeline.fs = v;
            }
            if let Some(v) = spec.tr {
                pipeline.binning.tr = v;
            }
            if let Some(v) = spec.start_s {
                pipeline.binning.start_s = v;
            }
            if let Some(v) = spec.end_s {
                pipeline.binning.end_s = v;
            }
            if let Some(v) = spec.window_trs {
                pipeline.binning.window_trs = v;
            }
            if let Some(peaks) = &spec.cardiac {
                peaks.apply(&mut pipeline.cardiac);
            }
            if let Some(peaks) = &spec.respiratory {
                peaks.apply(&mut pipeline.respiratory);
            }
            if let Some(markers) = &spec.markers {
                if let Some(v) = &markers.cardiac {
                    pipeline.markers.cardiac = v.clone();
                }
                if let Some(v) = &markers.respiratory {
                    pipeline.markers.respiratory = v.clone();
                }
            }
        }
        let study = Study {
            name: self.name.clone().unwrap_or_else(|| "metco2".into()),
            pipeline,
            naming: self.naming.unwrap_or_default(),
            subject_fs: self
                .subjects
                .iter()
                .filter_map(|(id, s)| s.fs.map(|fs| (id.clone(), fs)))
                .collect(),
        };
        study.validate()?;
        Ok(study)
    }
}

pub fn read_study_config(path: &Path) -> Result<StudySpec> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read study config {}", path.display()))?;
    let spec: StudySpec = toml::from_str(&contents)
        .with_context(|| format!("parsing study config {}", path.display()))?;
    Ok(spec)
}

/// Read and resolve a study file in one step.
pub fn load_study(path: &Path) -> Result<Study> {
    let spec = read_study_config(path)?;
    let study = spec
        .resolve()
        .with_context(|| format!("invalid study config {}", path.display()))?;
    Ok(study)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metco2_lib::PhysioError;
    use tempfile::tempdir;

    const STUDY: &str = r#"
name = "atta"
naming = "bids"

[pipeline]
tr = 2.5
end_s = 400.0

[pipeline.respiratory]
threshold = 0.15

[pipeline.markers]
cardiac = "PULSE"

[subjects.sub-1611058]
fs = 50.0
"#;

    #[test]
    fn merges_study_file_over_defaults() {
        let spec: StudySpec = toml::from_str(STUDY).unwrap();
        let study = spec.resolve().unwrap();
        assert_eq!(study.name, "atta");
        assert_eq!(study.naming, Naming::Bids);
        assert_eq!(study.pipeline.binning.tr, 2.5);
        assert_eq!(study.pipeline.binning.start_s, 8.0);
        assert_eq!(study.pipeline.binning.end_s, 400.0);
        assert_eq!(study.pipeline.respiratory.threshold, 0.15);
        assert_eq!(study.pipeline.respiratory.max_interval_s, 15.0);
        assert_eq!(study.pipeline.cardiac, metco2_lib::PeakConfig::cardiac());
        assert_eq!(study.pipeline.markers.cardiac, "PULSE");
        assert_eq!(study.pipeline.markers.respiratory, "Resp");
    }

    #[test]
    fn subject_sampling_rate_override() {
        let study = toml::from_str::<StudySpec>(STUDY).unwrap().resolve().unwrap();
        assert_eq!(study.config_for("sub-1611058").fs, 50.0);
        assert_eq!(study.config_for("sub-1611103").fs, 40.0);
    }

    #[test]
    fn empty_file_is_the_default_study() {
        let study = toml::from_str::<StudySpec>("").unwrap().resolve().unwrap();
        assert_eq!(study, Study::default());
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        let spec: StudySpec = toml::from_str("[pipeline]\ntr = 0.0\n").unwrap();
        let err = spec.resolve().unwrap_err();
        assert!(matches!(err, PhysioError::InvalidConfig(_)));
        let spec: StudySpec = toml::from_str("[subjects.sub-01]\nfs = -1.0\n").unwrap();
        assert!(spec.resolve().unwrap_err().is_fatal());
    }

    #[test]
    fn reads_study_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("study.toml");
        fs::write(&path, STUDY).unwrap();
        let study = load_study(&path).unwrap();
        assert_eq!(study.pipeline.binning.tr, 2.5);
        assert!(load_study(&dir.path().join("missing.toml")).is_err());
    }
}
