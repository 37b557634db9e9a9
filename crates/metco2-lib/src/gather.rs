use crate::error::PhysioError;
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const SUBJECT_PREFIX: &str = "sub-";
pub const IMAGE_SUFFIX: &str = ".nii.gz";
pub const PHYSIO_SUFFIX: &str = ".1D";
pub const TIMING_SUFFIX: &str = ".txt";

/// Subject directory names (`sub-*`) under `data_dir`, sorted.
pub fn discover_subjects(data_dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(data_dir)
        .with_context(|| format!("failed to list data directory {}", data_dir.display()))?;
    let mut subjects = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to list data directory {}", data_dir.display()))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(SUBJECT_PREFIX) {
                subjects.push(name.to_string());
            }
        }
    }
    if subjects.is_empty() {
        return Err(PhysioError::NoSubjects {
            data_dir: data_dir.to_path_buf(),
        }
        .into());
    }
    subjects.sort();
    debug!("found {} subjects under {}", subjects.len(), data_dir.display());
    Ok(subjects)
}

/// Restrict `discovered` to `selected`, keeping the selection order.
///
/// A selected subject that was not discovered fails on its own; the rest of
/// the selection is unaffected. `None` selects everything.
pub fn select_subjects(
    discovered: &[String],
    selected: Option<&[String]>,
) -> Vec<Result<String, PhysioError>> {
    match selected {
        None => discovered.iter().cloned().map(Ok).collect(),
        Some(selected) => selected
            .iter()
            .map(|s| {
                if discovered.contains(s) {
                    Ok(s.clone())
                } else {
                    Err(PhysioError::MissingSubjectFiles { subject: s.clone() })
                }
            })
            .collect(),
    }
}

/// Files found in one subject directory, each list sorted by file name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectInputs {
    pub subject: String,
    pub dir: PathBuf,
    pub images: Vec<PathBuf>,
    pub physio: Vec<PathBuf>,
    pub timings: Vec<PathBuf>,
}

pub fn gather_inputs(data_dir: &Path, subject: &str) -> Result<SubjectInputs> {
    let dir = data_dir.join(subject);
    if !dir.is_dir() {
        return Err(PhysioError::MissingSubjectFiles {
            subject: subject.to_string(),
        }
        .into());
    }
    let entries = std::fs::read_dir(&dir)
        .with_context(|| format!("failed to list subject directory {}", dir.display()))?;
    let mut images = Vec::new();
    let mut physio = Vec::new();
    let mut timings = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list subject directory {}", dir.display()))?
            .path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = file_name(&path) else {
            continue;
        };
        if name.ends_with(IMAGE_SUFFIX) {
            images.push(path);
        } else if name.ends_with(PHYSIO_SUFFIX) {
            physio.push(path);
        } else if name.ends_with(TIMING_SUFFIX) {
            timings.push(path);
        }
    }
    sort_by_file_name(&mut images);
    sort_by_file_name(&mut physio);
    sort_by_file_name(&mut timings);
    Ok(SubjectInputs {
        subject: subject.to_string(),
        dir,
        images,
        physio,
        timings,
    })
}

/// Files sharing one run key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunGroup {
    pub key: String,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunGroups {
    /// Ascending by key
    pub groups: Vec<RunGroup>,
    /// Files whose name carried no run key
    pub unmatched: Vec<PathBuf>,
}

/// Group files by the run key `key_fn` extracts from each file name.
pub fn group_by_run<F>(files: &[PathBuf], key_fn: F) -> RunGroups
where
    F: Fn(&str) -> Option<String>,
{
    let mut by_key: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let mut unmatched = Vec::new();
    for path in files {
        match file_name(path).and_then(&key_fn) {
            Some(key) => by_key.entry(key).or_default().push(path.clone()),
            None => unmatched.push(path.clone()),
        }
    }
    let groups = by_key
        .into_iter()
        .map(|(key, mut files)| {
            sort_by_file_name(&mut files);
            RunGroup { key, files }
        })
        .collect();
    sort_by_file_name(&mut unmatched);
    RunGroups { groups, unmatched }
}

/// How run identity is encoded in physio and timing file names.
pub trait NamingConvention {
    fn physio_key(&self, file_name: &str) -> Option<String>;
    fn timing_key(&self, file_name: &str) -> Option<String>;
}

/// Underscore-positional names: `sub-01_ECG_run1.1D`, `sub-01_run_1_condition_2.txt`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionalNaming;

impl NamingConvention for PositionalNaming {
    fn physio_key(&self, file_name: &str) -> Option<String> {
        let (_, last) = file_name.rsplit_once('_')?;
        non_empty(strip_extensions(last))
    }

    fn timing_key(&self, file_name: &str) -> Option<String> {
        let token = file_name.split('_').nth(2)?;
        non_empty(strip_extensions(token))
    }
}

/// BIDS-style names carrying a `run-<label>` entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct BidsNaming;

impl BidsNaming {
    fn run_entity(file_name: &str) -> Option<String> {
        strip_extensions(file_name)
            .split('_')
            .find_map(|entity| entity.strip_prefix("run-"))
            .and_then(non_empty)
    }
}

impl NamingConvention for BidsNaming {
    fn physio_key(&self, file_name: &str) -> Option<String> {
        Self::run_entity(file_name)
    }

    fn timing_key(&self, file_name: &str) -> Option<String> {
        Self::run_entity(file_name)
    }
}

/// Naming convention selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Naming {
    #[default]
    Positional,
    Bids,
}

impl Naming {
    pub fn convention(self) -> &'static dyn NamingConvention {
        match self {
            Naming::Positional => &PositionalNaming,
            Naming::Bids => &BidsNaming,
        }
    }
}

impl fmt::Display for Naming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Naming::Positional => f.write_str("positional"),
            Naming::Bids => f.write_str("bids"),
        }
    }
}

impl FromStr for Naming {
    type Err = PhysioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "positional" => Ok(Naming::Positional),
            "bids" => Ok(Naming::Bids),
            other => Err(PhysioError::invalid(format!(
                "unknown naming convention '{other}' (expected positional or bids)"
            ))),
        }
    }
}

/// One run of one subject: the image to model, its physio files and timing files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRun {
    /// 1-based, in ascending run-key order
    pub index: usize,
    pub physio_key: String,
    pub image: Option<PathBuf>,
    pub physio: Vec<PathBuf>,
    pub timings: Vec<PathBuf>,
}

/// Pair physio run groups with images and timing groups by position.
pub fn assemble_runs(inputs: &SubjectInputs, convention: &dyn NamingConvention) -> Vec<SubjectRun> {
    let physio = group_by_run(&inputs.physio, |name| convention.physio_key(name));
    let timings = group_by_run(&inputs.timings, |name| convention.timing_key(name));
    for path in physio.unmatched.iter().chain(&timings.unmatched) {
        warn!(
            "{}: {} carries no run key and is ignored",
            inputs.subject,
            path.display()
        );
    }
    if physio.groups.len() != inputs.images.len() {
        warn!(
            "{}: {} physio runs but {} images",
            inputs.subject,
            physio.groups.len(),
            inputs.images.len()
        );
    }
    physio
        .groups
        .into_iter()
        .enumerate()
        .map(|(k, group)| SubjectRun {
            index: k + 1,
            physio_key: group.key,
            image: inputs.images.get(k).cloned(),
            physio: group.files,
            timings: timings
                .groups
                .get(k)
                .map(|g| g.files.clone())
                .unwrap_or_default(),
        })
        .collect()
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn sort_by_file_name(files: &mut [PathBuf]) {
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
}

fn strip_extensions(name: &str) -> &str {
    name.split_once('.').map_or(name, |(stem, _)| stem)
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}
