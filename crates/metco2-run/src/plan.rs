//! Regression workflow handed to AFNI: `3dDeconvolve` with the physio confounds
//! as orthogonal regressors, then `3dSynthesize` to rebuild the cleaned series.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const STIM_MODEL: &str = "BLOCK(10,1)";
pub const ORTVEC_LABEL: &str = "confounds";
pub const X1D: &str = "mat";
pub const CBUCKET: &str = "cbucket.nii";
pub const SYNTHESIZE_SELECT: [&str; 3] = ["baseline", "polort", "allfunc"];
pub const PLAN_FILE: &str = "workflow.json";

/// `(index, timing file, response model)`; index is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimTuple(pub usize, pub PathBuf, pub String);

pub fn stim_tuples(timings: &[PathBuf]) -> Vec<StimTuple> {
    timings
        .iter()
        .enumerate()
        .map(|(i, file)| StimTuple(i + 1, file.clone(), STIM_MODEL.to_string()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeconvolveStep {
    pub in_files: Vec<PathBuf>,
    pub stim_times: Vec<StimTuple>,
    /// `-ortvec <file> confounds`
    pub ortvec: (PathBuf, String),
    pub x1d: String,
    pub cbucket: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizeStep {
    pub cbucket: String,
    pub matrix: String,
    pub select: Vec<String>,
    pub prefix: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    pub index: usize,
    pub image: PathBuf,
    pub confounds: PathBuf,
    /// Both AFNI steps run from here
    pub working_dir: PathBuf,
    pub deconvolve: DeconvolveStep,
    pub synthesize: SynthesizeStep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub subject: String,
    pub out_dir: PathBuf,
    pub working_dir: PathBuf,
    pub runs: Vec<RunPlan>,
}

impl WorkflowPlan {
    pub fn new(subject: &str, out_dir: &Path) -> Self {
        Self {
            subject: subject.to_string(),
            out_dir: out_dir.join(subject),
            working_dir: out_dir.join("working").join(subject),
            runs: Vec::new(),
        }
    }

    pub fn add_run(&mut self, index: usize, image: &Path, timings: &[PathBuf], confounds: &Path) {
        let working_dir = self.working_dir.join(format!("run-{index}"));
        let prefix = self
            .out_dir
            .join(format!("{}_run-{index}_physio_corr.nii.gz", self.subject));
        let deconvolve = deconvolve_step(image, timings, confounds);
        let synthesize = synthesize_step(prefix);
        self.runs.push(RunPlan {
            index,
            image: image.to_path_buf(),
            confounds: confounds.to_path_buf(),
            working_dir,
            deconvolve,
            synthesize,
        });
    }
}

fn deconvolve_step(image: &Path, timings: &[PathBuf], confounds: &Path) -> DeconvolveStep {
    let stim_times = stim_tuples(timings);
    let mut args = vec![
        "3dDeconvolve".to_string(),
        "-input".to_string(),
        image.display().to_string(),
        "-num_stimts".to_string(),
        stim_times.len().to_string(),
    ];
    for StimTuple(i, file, model) in &stim_times {
        args.extend([
            "-stim_times".to_string(),
            i.to_string(),
            file.display().to_string(),
            model.clone(),
        ]);
    }
    args.extend([
        "-ortvec".to_string(),
        confounds.display().to_string(),
        ORTVEC_LABEL.to_string(),
        "-x1D".to_string(),
        X1D.to_string(),
        "-cbucket".to_string(),
        CBUCKET.to_string(),
    ]);
    DeconvolveStep {
        in_files: vec![image.to_path_buf()],
        stim_times,
        ortvec: (confounds.to_path_buf(), ORTVEC_LABEL.to_string()),
        x1d: X1D.to_string(),
        cbucket: CBUCKET.to_string(),
        args,
    }
}

fn synthesize_step(prefix: PathBuf) -> SynthesizeStep {
    let select: Vec<String> = SYNTHESIZE_SELECT.iter().map(|s| s.to_string()).collect();
    let mut args = vec![
        "3dSynthesize".to_string(),
        "-cbucket".to_string(),
        CBUCKET.to_string(),
        "-matrix".to_string(),
        X1D.to_string(),
        "-select".to_string(),
    ];
    args.extend(select.iter().cloned());
    args.extend(["-prefix".to_string(), prefix.display().to_string()]);
    SynthesizeStep {
        cbucket: CBUCKET.to_string(),
        matrix: X1D.to_string(),
        select,
        prefix,
        args,
    }
}

pub fn write_plan(path: &Path, plan: &WorkflowPlan) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file =
        fs::File::create(path).with_context(|| format!("creating plan {}", path.display()))?;
    serde_json::to_writer_pretty(file, plan)?;
    Ok(())
}

pub fn read_plan(path: &Path) -> Result<WorkflowPlan> {
    let file = fs::File::open(path).with_context(|| format!("opening plan {}", path.display()))?;
    let plan = serde_json::from_reader::<_, WorkflowPlan>(file)
        .with_context(|| format!("parsing plan {}", path.display()))?;
    Ok(plan)
}
