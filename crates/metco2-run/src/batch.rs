use crate::plan::{write_plan, WorkflowPlan, PLAN_FILE};
use crate::study::Study;
use anyhow::{bail, Context, Result};
use csv::WriterBuilder;
use log::{info, warn};
use metco2_lib::{
    assemble_runs, discover_subjects, gather_inputs,
    io::{load_recording, write_confound_matrix},
    select_subjects, synthesize_confound, ConfoundMatrix, ConfoundSeries, PhysioError,
    PipelineConfig, SignalKind, SubjectRun,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const RUN_SUMMARY_FILE: &str = "runs.tsv";

pub fn confound_file_name(subject: &str, run: usize) -> String {
    format!("{subject}_run-{run}_confounds.1D")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Written,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub index: usize,
    pub physio_key: String,
    pub status: RunStatus,
    #[serde(default)]
    pub confounds: Option<PathBuf>,
    #[serde(default)]
    pub length: Option<usize>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectReport {
    pub subject: String,
    #[serde(default)]
    pub runs: Vec<RunReport>,
    #[serde(default)]
    pub plan: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SubjectReport {
    fn failed(subject: &str, err: impl ToString) -> Self {
        Self {
            subject: subject.to_string(),
            runs: Vec::new(),
            plan: None,
            error: Some(err.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn written(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| r.status == RunStatus::Written)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub study: String,
    pub data_dir: PathBuf,
    pub out_dir: PathBuf,
    pub subjects: Vec<SubjectReport>,
    pub confounds_written: usize,
    pub failed_subjects: usize,
}

/// Run every selected subject under `data_dir`, writing into `out_dir`.
///
/// Only configuration problems (an invalid study, an empty data directory)
/// abort the batch; a subject that fails is recorded and the rest continue.
pub fn process_batch(
    data_dir: &Path,
    out_dir: &Path,
    selected: Option<&[String]>,
    study: &Study,
) -> Result<BatchReport> {
    study.validate()?;
    let discovered = discover_subjects(data_dir)?;
    let mut subjects = Vec::new();
    for pick in select_subjects(&discovered, selected) {
        let subject = match pick {
            Ok(subject) => subject,
            Err(err) => {
                warn!("{err}");
                if let PhysioError::MissingSubjectFiles { subject } = &err {
                    subjects.push(SubjectReport::failed(subject, &err));
                }
                continue;
            }
        };
        info!("processing {subject}");
        match process_subject(data_dir, &subject, out_dir, study) {
            Ok(report) => subjects.push(report),
            Err(err) => {
                if err
                    .downcast_ref::<PhysioError>()
                    .is_some_and(PhysioError::is_fatal)
                {
                    return Err(err);
                }
                warn!("{subject} failed: {err:#}");
                subjects.push(SubjectReport::failed(&subject, format!("{err:#}")));
            }
        }
    }
    let report = BatchReport {
        study: study.name.clone(),
        data_dir: data_dir.to_path_buf(),
        out_dir: out_dir.to_path_buf(),
        confounds_written: subjects.iter().map(SubjectReport::written).sum(),
        failed_subjects: subjects.iter().filter(|s| !s.is_ok()).count(),
        subjects,
    };
    write_run_summary(&out_dir.join(RUN_SUMMARY_FILE), &report)?;
    info!(
        "{} subjects, {} confound files, {} failed",
        report.subjects.len(),
        report.confounds_written,
        report.failed_subjects
    );
    Ok(report)
}

/// Confound matrices and the workflow plan for one subject.
pub fn process_subject(
    data_dir: &Path,
    subject: &str,
    out_dir: &Path,
    study: &Study,
) -> Result<SubjectReport> {
    let cfg = study.config_for(subject);
    cfg.validate()?;
    let inputs = gather_inputs(data_dir, subject)?;
    let runs = assemble_runs(&inputs, study.naming.convention());
    if runs.is_empty() {
        bail!("no physio runs found in {}", inputs.dir.display());
    }
    let subject_dir = out_dir.join(subject);
    let mut plan = WorkflowPlan::new(subject, out_dir);
    let mut reports = Vec::with_capacity(runs.len());
    for run in &runs {
        let report = process_run(subject, run, &cfg, &subject_dir)?;
        if let (Some(confounds), Some(image)) = (&report.confounds, &run.image) {
            plan.add_run(run.index, image, &run.timings, confounds);
        }
        reports.push(report);
    }
    let plan_path = if plan.runs.is_empty() {
        warn!("{subject}: no run produced confounds, no workflow plan written");
        None
    } else {
        let path = subject_dir.join(PLAN_FILE);
        write_plan(&path, &plan)?;
        Some(path)
    };
    Ok(SubjectReport {
        subject: subject.to_string(),
        runs: reports,
        plan: plan_path,
        error: None,
    })
}

fn process_run(
    subject: &str,
    run: &SubjectRun,
    cfg: &PipelineConfig,
    subject_dir: &Path,
) -> Result<RunReport> {
    let mut warnings = Vec::new();
    let mut cardiac: Option<ConfoundSeries> = None;
    let mut respiratory: Option<ConfoundSeries> = None;
    for path in &run.physio {
        let recording = match load_recording(path, cfg.fs, &cfg.markers) {
            Ok(recording) => recording,
            Err(err) => {
                warn!("{subject} run {}: {err:#}", run.index);
                warnings.push(format!("{err:#}"));
                continue;
            }
        };
        let series = match synthesize_confound(&recording, cfg) {
            Ok(series) => series,
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                warn!("{subject} run {}: {err}", run.index);
                warnings.push(err.to_string());
                continue;
            }
        };
        let slot = match series.kind {
            SignalKind::Cardiac => &mut cardiac,
            SignalKind::Respiratory => &mut respiratory,
        };
        if slot.is_some() {
            let msg = format!(
                "{}: a {} confound already exists for this run, ignoring",
                recording.label, series.kind
            );
            warn!("{subject} run {}: {msg}", run.index);
            warnings.push(msg);
            continue;
        }
        *slot = Some(series);
    }

    let skipped = |warnings: Vec<String>| RunReport {
        index: run.index,
        physio_key: run.physio_key.clone(),
        status: RunStatus::Skipped,
        confounds: None,
        length: None,
        warnings,
    };
    let (Some(cardiac), Some(respiratory)) = (cardiac, respiratory) else {
        warnings.push("run needs both a cardiac and a respiratory confound".into());
        warn!(
            "{subject} run {}: missing cardiac or respiratory confound, skipped",
            run.index
        );
        return Ok(skipped(warnings));
    };
    let matrix = match ConfoundMatrix::from_series(&cardiac, &respiratory) {
        Ok(matrix) => matrix,
        Err(err) => {
            warn!("{subject} run {}: {err}", run.index);
            warnings.push(err.to_string());
            return Ok(skipped(warnings));
        }
    };
    let path = subject_dir.join(confound_file_name(subject, run.index));
    write_confound_matrix(&path, &matrix)?;
    info!(
        "{subject} run {}: {} TRs -> {}",
        run.index,
        matrix.len(),
        path.display()
    );
    Ok(RunReport {
        index: run.index,
        physio_key: run.physio_key.clone(),
        status: RunStatus::Written,
        confounds: Some(path),
        length: Some(matrix.len()),
        warnings,
    })
}

/// Tab-separated line per run (and per failed subject) next to the outputs.
pub fn write_run_summary(path: &Path, report: &BatchReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = fs::File::create(path)
        .with_context(|| format!("creating summary {}", path.display()))?;
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(file);
    writer.write_record(["subject", "run", "physio_key", "status", "confounds", "note"])?;
    for subject in &report.subjects {
        if let Some(err) = &subject.error {
            writer.write_record([subject.subject.as_str(), "", "", "failed", "", err.as_str()])?;
            continue;
        }
        for run in &subject.runs {
            let status = match run.status {
                RunStatus::Written => "written",
                RunStatus::Skipped => "skipped",
            };
            writer.write_record([
                subject.subject.clone(),
                run.index.to_string(),
                run.physio_key.clone(),
                status.to_string(),
                run.confounds
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                run.warnings.join("; "),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metco2_lib::io::read_confound_matrix;
    use std::f64::consts::PI;
    use tempfile::tempdir;

    const FS: f64 = 40.0;
    const SECONDS: f64 = 440.0;

    fn sine_file(dir: &Path, name: &str, hz: f64) {
        let n = (FS * SECONDS) as usize;
        let text: String = (0..n)
            .map(|i| format!("{:.6}\n", (2.0 * PI * hz * i as f64 / FS).sin()))
            .collect();
        fs::write(dir.join(name), text).unwrap();
    }

    fn subject_tree(root: &Path, subject: &str, runs: usize) -> PathBuf {
        let dir = root.join(subject);
        fs::create_dir_all(&dir).unwrap();
        for k in 1..=runs {
            fs::write(dir.join(format!("{subject}_task_run{k}.nii.gz")), b"").unwrap();
            sine_file(&dir, &format!("{subject}_ECG_run{k}.1D"), 1.1);
            sine_file(&dir, &format!("{subject}_Resp_run{k}.1D"), 0.25);
            fs::write(dir.join(format!("{subject}_run_{k}_condition_1.txt")), "0.0\t").unwrap();
        }
        dir
    }

    #[test]
    fn writes_confounds_and_plan_per_run() {
        let data = tempdir().unwrap();
        let out = tempdir().unwrap();
        subject_tree(data.path(), "sub-01", 2);
        let report =
            process_subject(data.path(), "sub-01", out.path(), &Study::default()).unwrap();
        assert!(report.is_ok());
        assert_eq!(report.written(), 2);
        let path = out.path().join("sub-01").join("sub-01_run-2_confounds.1D");
        assert_eq!(report.runs[1].confounds.as_deref(), Some(path.as_path()));
        let matrix = read_confound_matrix(&path, 2.0).unwrap();
        assert_eq!(matrix.len(), 215);
        let plan = crate::plan::read_plan(&out.path().join("sub-01").join(PLAN_FILE)).unwrap();
        assert_eq!(plan.runs.len(), 2);
        assert_eq!(plan.runs[0].deconvolve.stim_times.len(), 1);
    }

    #[test]
    fn unsupported_recording_writes_nothing() {
        let data = tempdir().unwrap();
        let out = tempdir().unwrap();
        let dir = data.path().join("sub-01");
        fs::create_dir_all(&dir).unwrap();
        sine_file(&dir, "sub-01_EDA_run1.1D", 1.0);
        let report =
            process_subject(data.path(), "sub-01", out.path(), &Study::default()).unwrap();
        assert_eq!(report.runs.len(), 1);
        assert_eq!(report.runs[0].status, RunStatus::Skipped);
        assert!(report.runs[0].warnings[0].contains("sub-01_EDA_run1"));
        assert!(report.plan.is_none());
        assert!(!out.path().join("sub-01").join("sub-01_run-1_confounds.1D").exists());
    }

    #[test]
    fn empty_respiratory_file_skips_the_run_only() {
        let data = tempdir().unwrap();
        let out = tempdir().unwrap();
        let dir = subject_tree(data.path(), "sub-01", 2);
        fs::write(dir.join("sub-01_Resp_run1.1D"), "").unwrap();
        let report =
            process_subject(data.path(), "sub-01", out.path(), &Study::default()).unwrap();
        assert_eq!(report.runs[0].status, RunStatus::Skipped);
        assert!(report.runs[0].warnings[0].contains("insufficient signal"));
        assert_eq!(report.runs[1].status, RunStatus::Written);
        assert_eq!(report.written(), 1);
    }

    #[test]
    fn unparsable_physio_file_skips_the_run_only() {
        let data = tempdir().unwrap();
        let out = tempdir().unwrap();
        let dir = subject_tree(data.path(), "sub-01", 2);
        let ecg = dir.join("sub-01_ECG_run1.1D");
        let mut text = fs::read_to_string(&ecg).unwrap();
        text.push_str("not-a-number\n");
        fs::write(&ecg, text).unwrap();
        let report =
            process_subject(data.path(), "sub-01", out.path(), &Study::default()).unwrap();
        assert!(report.is_ok());
        assert_eq!(report.runs[0].status, RunStatus::Skipped);
        assert!(report.runs[0].warnings[0].contains("sub-01_ECG_run1"));
        assert_eq!(report.runs[1].status, RunStatus::Written);
        assert_eq!(report.written(), 1);
    }

    #[test]
    fn nan_sample_does_not_abort_other_subjects() {
        let data = tempdir().unwrap();
        let out = tempdir().unwrap();
        let dir = subject_tree(data.path(), "sub-01", 1);
        subject_tree(data.path(), "sub-02", 1);
        let ecg = dir.join("sub-01_ECG_run1.1D");
        let mut lines: Vec<String> = fs::read_to_string(&ecg)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        lines[200] = "NaN".into();
        fs::write(&ecg, lines.join("\n")).unwrap();
        let report = process_batch(data.path(), out.path(), None, &Study::default()).unwrap();
        assert_eq!(report.subjects.len(), 2);
        assert_eq!(report.subjects[0].runs[0].status, RunStatus::Skipped);
        assert!(report.subjects[0].runs[0].warnings[0].contains("non-finite"));
        assert_eq!(report.subjects[1].written(), 1);
        assert_eq!(report.confounds_written, 1);
        let summary = fs::read_to_string(out.path().join(RUN_SUMMARY_FILE)).unwrap();
        assert!(summary.contains("sub-02\t1\trun1\twritten"));
    }

    #[test]
    fn batch_isolates_failed_subjects() {
        let data = tempdir().unwrap();
        let out = tempdir().unwrap();
        subject_tree(data.path(), "sub-01", 1);
        fs::create_dir_all(data.path().join("sub-02")).unwrap();
        let selected = vec!["sub-01".to_string(), "sub-02".to_string(), "sub-03".to_string()];
        let report =
            process_batch(data.path(), out.path(), Some(&selected), &Study::default()).unwrap();
        assert_eq!(report.subjects.len(), 3);
        assert!(report.subjects[0].is_ok());
        assert!(!report.subjects[1].is_ok());
        assert!(report.subjects[2].error.as_deref().unwrap().contains("sub-03"));
        assert_eq!(report.confounds_written, 1);
        assert_eq!(report.failed_subjects, 2);
        let summary = fs::read_to_string(out.path().join(RUN_SUMMARY_FILE)).unwrap();
        assert!(summary.starts_with("subject\trun\tphysio_key\tstatus"));
        assert!(summary.contains("sub-01\t1\trun1\twritten"));
    }

    #[test]
    fn empty_data_directory_is_fatal() {
        let data = tempdir().unwrap();
        let out = tempdir().unwrap();
        let err = process_batch(data.path(), out.path(), None, &Study::default()).unwrap_err();
        assert!(err.downcast_ref::<PhysioError>().is_some_and(PhysioError::is_fatal));
    }

    #[test]
    fn invalid_study_is_fatal_before_any_work() {
        let data = tempdir().unwrap();
        let out = tempdir().unwrap();
        subject_tree(data.path(), "sub-01", 1);
        let mut study = Study::default();
        study.pipeline.binning.tr = -2.0;
        let err = process_batch(data.path(), out.path(), None, &study).unwrap_err();
        assert!(err.downcast_ref::<PhysioError>().is_some_and(PhysioError::is_fatal));
        assert!(!out.path().join("sub-01").exists());
    }
}
