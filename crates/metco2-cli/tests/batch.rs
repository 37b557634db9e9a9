use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::{
    error::Error,
    f64::consts::PI,
    fs,
    path::{Path, PathBuf},
};
use tempfile::tempdir;

fn write_sine(path: &Path, hz: f64, fs_hz: f64, seconds: f64) {
    let n = (fs_hz * seconds) as usize;
    let text: String = (0..n)
        .map(|i| format!("{:.6}\n", (2.0 * PI * hz * i as f64 / fs_hz).sin()))
        .collect();
    fs::write(path, text).expect("write samples");
}

fn subject_tree(root: &Path, subject: &str, fs_hz: f64) {
    let dir = root.join(subject);
    fs::create_dir_all(&dir).expect("subject dir");
    fs::write(dir.join(format!("{subject}_task_run1.nii.gz")), b"").expect("image");
    write_sine(&dir.join(format!("{subject}_ECG_run1.1D")), 1.2, fs_hz, 440.0);
    write_sine(&dir.join(format!("{subject}_Resp_run1.1D")), 0.3, fs_hz, 440.0);
    fs::write(dir.join(format!("{subject}_run_1_condition_1.txt")), "20.0\t").expect("timing");
}

#[test]
fn process_writes_confounds_and_workflow_plan() -> Result<(), Box<dyn Error>> {
    let data = tempdir()?;
    let out = tempdir()?;
    subject_tree(data.path(), "sub-01", 40.0);
    subject_tree(data.path(), "sub-02", 40.0);

    let mut cmd = cargo_bin_cmd!("metco2");
    cmd.args([
        "process",
        "--data-dir",
        data.path().to_str().expect("utf8 path"),
        "--out-dir",
        out.path().to_str().expect("utf8 path"),
        "--subjects",
        "sub-02",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let report: Value = serde_json::from_slice(&output)?;
    assert_eq!(report["subjects"].as_array().expect("subjects").len(), 1);
    assert_eq!(report["confounds_written"], 1);
    assert_eq!(report["failed_subjects"], 0);

    let confounds = out.path().join("sub-02").join("sub-02_run-1_confounds.1D");
    let text = fs::read_to_string(&confounds)?;
    assert_eq!(text.lines().count(), 215);
    assert!(text.lines().all(|line| line.len() == 25));
    assert!(!out.path().join("sub-01").exists());

    let plan: Value =
        serde_json::from_str(&fs::read_to_string(out.path().join("sub-02").join("workflow.json"))?)?;
    let args: Vec<&str> = plan["runs"][0]["deconvolve"]["args"]
        .as_array()
        .expect("args")
        .iter()
        .filter_map(Value::as_str)
        .collect();
    let ortvec = args.iter().position(|a| *a == "-ortvec").expect("-ortvec");
    assert_eq!(PathBuf::from(args[ortvec + 1]), confounds);
    assert_eq!(args[ortvec + 2], "confounds");
    Ok(())
}

#[test]
fn study_file_sets_subject_sampling_rate() -> Result<(), Box<dyn Error>> {
    let data = tempdir()?;
    let out = tempdir()?;
    subject_tree(data.path(), "sub-1611058", 50.0);
    let study = workspace_root().join("test_data").join("study.toml");

    let mut cmd = cargo_bin_cmd!("metco2");
    cmd.args([
        "process",
        "--data-dir",
        data.path().to_str().expect("utf8 path"),
        "--out-dir",
        out.path().to_str().expect("utf8 path"),
        "--config",
        study.to_str().expect("utf8 path"),
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let report: Value = serde_json::from_slice(&output)?;
    assert_eq!(report["study"], "atta");
    assert_eq!(report["confounds_written"], 1);
    Ok(())
}

#[test]
fn missing_subject_is_reported_not_fatal() -> Result<(), Box<dyn Error>> {
    let data = tempdir()?;
    let out = tempdir()?;
    subject_tree(data.path(), "sub-01", 40.0);

    let mut cmd = cargo_bin_cmd!("metco2");
    cmd.args([
        "process",
        "--data-dir",
        data.path().to_str().expect("utf8 path"),
        "--out-dir",
        out.path().to_str().expect("utf8 path"),
        "--subjects",
        "sub-01,sub-99",
    ]);
    let output = cmd.assert().success().get_output().stdout.clone();
    let report: Value = serde_json::from_slice(&output)?;
    assert_eq!(report["confounds_written"], 1);
    assert_eq!(report["failed_subjects"], 1);
    assert_eq!(report["subjects"][1]["subject"], "sub-99");
    Ok(())
}

#[test]
fn empty_data_directory_exits_non_zero() -> Result<(), Box<dyn Error>> {
    let data = tempdir()?;
    let out = tempdir()?;
    let mut cmd = cargo_bin_cmd!("metco2");
    cmd.args([
        "process",
        "--data-dir",
        data.path().to_str().expect("utf8 path"),
        "--out-dir",
        out.path().to_str().expect("utf8 path"),
    ]);
    cmd.assert().failure();
    Ok(())
}

#[test]
fn invalid_tr_override_exits_non_zero() -> Result<(), Box<dyn Error>> {
    let data = tempdir()?;
    let out = tempdir()?;
    subject_tree(data.path(), "sub-01", 40.0);
    let mut cmd = cargo_bin_cmd!("metco2");
    cmd.args([
        "process",
        "--data-dir",
        data.path().to_str().expect("utf8 path"),
        "--out-dir",
        out.path().to_str().expect("utf8 path"),
        "--tr",
        "-1",
    ]);
    cmd.assert().failure();
    assert!(!out.path().join("sub-01").exists());
    Ok(())
}

#[test]
fn plot_confounds_rejects_empty_matrix() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let input = dir.path().join("sub-01_run-1_confounds.1D");
    fs::write(&input, "")?;
    let png = dir.path().join("confounds.png");

    let mut cmd = cargo_bin_cmd!("metco2");
    cmd.args([
        "plot-confounds",
        "--input",
        input.to_str().expect("utf8 path"),
        "--out",
        png.to_str().expect("utf8 path"),
    ]);
    cmd.assert().failure();
    assert!(!png.exists());
    Ok(())
}

fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .expect("crates dir")
        .parent()
        .expect("workspace root")
        .to_path_buf()
}
