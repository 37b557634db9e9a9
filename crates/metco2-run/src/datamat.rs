//! PLS datamat text files to per-run, per-condition onset files.

use anyhow::{Context, Result};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

const SESSION_SEPARATOR: &str = "data_files";
const ONSETS_TOKEN: &str = "block_onsets";

/// Rows of one session: the run line first, then one row per condition.
pub type Session = Vec<Vec<String>>;

/// Split a datamat export into sessions.
///
/// Text before the first `data_files` marker is discarded. Only lines that
/// mention a run or carry block onsets are kept; each is split on tabs and
/// loses its `block_onsets` label.
pub fn split_datamat(text: &str) -> Vec<Session> {
    text.split(SESSION_SEPARATOR)
        .skip(1)
        .map(|part| {
            part.trim()
                .lines()
                .filter(|line| line.contains("run") || line.contains(ONSETS_TOKEN))
                .map(|line| {
                    let mut tokens: Vec<String> = line.split('\t').map(str::to_string).collect();
                    if let Some(pos) = tokens.iter().position(|t| t == ONSETS_TOKEN) {
                        tokens.remove(pos);
                    }
                    tokens
                })
                .collect()
        })
        .collect()
}

pub fn read_datamat(path: &Path) -> Result<Vec<Session>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read datamat {}", path.display()))?;
    let sessions = split_datamat(&text);
    debug!("{}: {} sessions", path.display(), sessions.len());
    Ok(sessions)
}

/// Write `<subject>_run_<i>_condition_<c>.txt` for every run and condition.
///
/// Sessions are ordered by their run line first. Onsets are block indices and
/// are written in seconds (`onset * tr`), each followed by a tab. Existing
/// files are replaced.
pub fn write_condition_files(
    tr: f64,
    sessions: &[Session],
    subject: &str,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let mut ordered: Vec<&Session> = sessions.iter().collect();
    ordered.sort_by(|a, b| a.first().cmp(&b.first()));

    let mut written = Vec::new();
    for (i, session) in ordered.iter().enumerate() {
        for (c, onsets) in session.iter().enumerate().skip(1) {
            let path = out_dir.join(format!("{subject}_run_{}_condition_{c}.txt", i + 1));
            let mut contents = String::new();
            for token in onsets.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
                let block: i64 = token.parse().with_context(|| {
                    format!("onset '{token}' for {} is not an integer", path.display())
                })?;
                contents.push_str(&format_onset(block as f64 * tr));
                contents.push('\t');
            }
            fs::write(&path, contents)
                .with_context(|| format!("failed to write {}", path.display()))?;
            written.push(path);
        }
    }
    info!(
        "{subject}: wrote {} condition files to {}",
        written.len(),
        out_dir.display()
    );
    Ok(written)
}

/// Seconds with at least one decimal (`20.0`, `7.5`).
fn format_onset(seconds: f64) -> String {
    if seconds.fract() == 0.0 && seconds.abs() < 1e15 {
        format!("{seconds:.1}")
    } else {
        format!("{seconds}")
    }
}
