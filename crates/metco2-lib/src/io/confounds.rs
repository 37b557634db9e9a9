use crate::confound::ConfoundMatrix;
use anyhow::{bail, Context, Result};
use std::fmt::Write as _;
use std::path::Path;

/// Render one row per TR as `[cardiac, respiratory]`, fixed width, 5 decimals.
pub fn format_confound_matrix(matrix: &ConfoundMatrix) -> String {
    let mut out = String::with_capacity(matrix.len() * 26);
    for [cardiac, respiratory] in matrix.rows() {
        let _ = writeln!(out, "{cardiac:>12.5} {respiratory:>12.5}");
    }
    out
}

pub fn write_confound_matrix(path: &Path, matrix: &ConfoundMatrix) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, format_confound_matrix(matrix))
        .with_context(|| format!("failed to write {}", path.display()))
}

pub fn parse_confound_matrix(text: &str, tr: f64) -> Result<ConfoundMatrix> {
    let mut cardiac = Vec::new();
    let mut respiratory = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let cols: Vec<&str> = trimmed.split_whitespace().collect();
        if cols.len() != 2 {
            bail!("line {} has {} columns, expected 2", idx + 1, cols.len());
        }
        let parse = |s: &str| -> Result<f64> {
            s.parse()
                .with_context(|| format!("line {} is not f64: {}", idx + 1, s))
        };
        cardiac.push(parse(cols[0])?);
        respiratory.push(parse(cols[1])?);
    }
    Ok(ConfoundMatrix::new(tr, cardiac, respiratory)?)
}

pub fn read_confound_matrix(path: &Path, tr: f64) -> Result<ConfoundMatrix> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_confound_matrix(&text, tr).with_context(|| format!("failed to parse {}", path.display()))
}
