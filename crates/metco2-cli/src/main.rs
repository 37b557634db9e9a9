use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::warn;
use metco2_lib::{
    detect_peaks, detect_peaks_with_config, instantaneous_heart_rate,
    io::{self as metco2_io, read_confound_matrix, recording_label},
    plot::{figure_from_confounds, Figure, Series},
    respiratory_volume_per_time, response_function, synthesize_confound, Naming, PeakConfig,
    PhysioError, PhysioRecording, SignalKind,
};
use metco2_run::{load_study, process_batch, read_datamat, write_condition_files, Study};
use plotters::prelude::*;
use std::{
    io::{self, Read},
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "metco2",
    version,
    about = "metco2: cardiac and respiratory confound regressors for fMRI"
)]
struct Cli {
    /// Log filter for stderr (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum KindArg {
    Cardiac,
    Respiratory,
}

impl From<KindArg> for SignalKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Cardiac => SignalKind::Cardiac,
            KindArg::Respiratory => SignalKind::Respiratory,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum NamingArg {
    Positional,
    Bids,
}

impl From<NamingArg> for Naming {
    fn from(naming: NamingArg) -> Self {
        match naming {
            NamingArg::Positional => Naming::Positional,
            NamingArg::Bids => Naming::Bids,
        }
    }
}

/// Pipeline settings: a study file plus per-flag overrides.
#[derive(Args, Clone, Debug)]
struct PipelineArgs {
    /// Study configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Physio sampling rate (Hz)
    #[arg(long)]
    fs: Option<f64>,
    /// Repetition time (s)
    #[arg(long)]
    tr: Option<f64>,
    /// Start of the first TR window (s)
    #[arg(long)]
    start: Option<f64>,
    /// End of the last TR window (s)
    #[arg(long)]
    end: Option<f64>,
    /// Window span in TRs
    #[arg(long)]
    window_trs: Option<usize>,
    #[arg(long)]
    cardiac_threshold: Option<f64>,
    #[arg(long)]
    respiratory_threshold: Option<f64>,
    /// Label substring that marks cardiac recordings
    #[arg(long)]
    cardiac_marker: Option<String>,
    /// Label substring that marks respiratory recordings
    #[arg(long)]
    respiratory_marker: Option<String>,
    #[arg(long, value_enum)]
    naming: Option<NamingArg>,
}

impl PipelineArgs {
    fn study(&self) -> Result<Study> {
        let mut study = match &self.config {
            Some(path) => load_study(path)?,
            None => Study::default(),
        };
        let cfg = &mut study.pipeline;
        if let Some(v) = self.fs {
            cfg.fs = v;
        }
        if let Some(v) = self.tr {
            cfg.binning.tr = v;
        }
        if let Some(v) = self.start {
            cfg.binning.start_s = v;
        }
        if let Some(v) = self.end {
            cfg.binning.end_s = v;
        }
        if let Some(v) = self.window_trs {
            cfg.binning.window_trs = v;
        }
        if let Some(v) = self.cardiac_threshold {
            cfg.cardiac.threshold = v;
        }
        if let Some(v) = self.respiratory_threshold {
            cfg.respiratory.threshold = v;
        }
        if let Some(v) = &self.cardiac_marker {
            cfg.markers.cardiac = v.clone();
        }
        if let Some(v) = &self.respiratory_marker {
            cfg.markers.respiratory = v.clone();
        }
        if let Some(v) = self.naming {
            study.naming = v.into();
        }
        study.validate()?;
        Ok(study)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Detect heartbeats or breaths in newline-delimited samples (stdin or --input)
    DetectPeaks {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long, default_value_t = 40.0)]
        fs: f64,
        /// Hysteresis threshold (defaults to 0.3 cardiac, 0.1 respiratory)
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Heart rate or RVT binned onto the TR grid
    DerivedMetric {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, value_enum)]
        kind: KindArg,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Sample a normalized cardiac or respiratory response function
    ResponseFunction {
        #[arg(long, value_enum)]
        kind: KindArg,
        #[arg(long, default_value_t = 2.0)]
        tr: f64,
    },
    /// Confound regressor for one recording; its kind comes from the label
    Confound {
        #[arg(long)]
        input: Option<PathBuf>,
        /// Recording label (defaults to the input file name)
        #[arg(long)]
        label: Option<String>,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Confound matrices and workflow plans for every subject in a data directory
    Process {
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        /// Comma-separated subject ids (default: all sub-* directories)
        #[arg(long, value_delimiter = ',')]
        subjects: Option<Vec<String>>,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
    /// Convert a PLS datamat text export into per-run condition timing files
    DatamatToConditions {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        subject: String,
        #[arg(long, default_value_t = 2.0)]
        tr: f64,
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Render a confound matrix to a PNG via plotters
    PlotConfounds {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 2.0)]
        tr: f64,
        #[arg(long, default_value_t = 8.0)]
        start: f64,
        #[arg(long)]
        title: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();
    match cli.command {
        Commands::DetectPeaks {
            input,
            kind,
            fs,
            threshold,
        } => cmd_detect_peaks(input.as_deref(), kind.into(), fs, threshold)?,
        Commands::DerivedMetric {
            input,
            kind,
            pipeline,
        } => cmd_derived_metric(input.as_deref(), kind.into(), &pipeline)?,
        Commands::ResponseFunction { kind, tr } => cmd_response_function(kind.into(), tr)?,
        Commands::Confound {
            input,
            label,
            pipeline,
        } => cmd_confound(input.as_deref(), label, &pipeline)?,
        Commands::Process {
            data_dir,
            out_dir,
            subjects,
            pipeline,
        } => cmd_process(&data_dir, &out_dir, subjects.as_deref(), &pipeline)?,
        Commands::DatamatToConditions {
            input,
            subject,
            tr,
            out_dir,
        } => cmd_datamat_to_conditions(&input, &subject, tr, &out_dir)?,
        Commands::PlotConfounds {
            input,
            out,
            tr,
            start,
            title,
        } => cmd_plot_confounds(&input, &out, tr, start, title)?,
    }
    Ok(())
}

fn read_samples(input: Option<&Path>) -> Result<Vec<f64>> {
    match input {
        Some(path) => metco2_io::read_f64_series(path),
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            metco2_io::parse_f64_series(&buf)
        }
    }
}

fn tagged_recording(input: Option<&Path>, kind: SignalKind, fs: f64) -> Result<PhysioRecording> {
    let label = input.map_or_else(|| "stdin".to_string(), recording_label);
    let samples = read_samples(input)?;
    Ok(PhysioRecording::new(label, Some(kind), fs, samples)?)
}

fn cmd_detect_peaks(
    input: Option<&Path>,
    kind: SignalKind,
    fs: f64,
    threshold: Option<f64>,
) -> Result<()> {
    let recording = tagged_recording(input, kind, fs)?;
    let threshold = threshold.unwrap_or_else(|| PeakConfig::for_kind(kind).threshold);
    let peaks = detect_peaks(&recording, threshold)?;
    println!("{}", serde_json::to_string(&peaks)?);
    Ok(())
}

fn cmd_derived_metric(input: Option<&Path>, kind: SignalKind, args: &PipelineArgs) -> Result<()> {
    let study = args.study()?;
    let cfg = &study.pipeline;
    let recording = tagged_recording(input, kind, cfg.fs)?;
    let peak_cfg = cfg.peak_config(kind);
    let peaks = detect_peaks_with_config(&recording, peak_cfg)?;
    let metric = match kind {
        SignalKind::Cardiac => {
            instantaneous_heart_rate(&peaks, &cfg.binning, peak_cfg.max_interval_s)?
        }
        SignalKind::Respiratory => {
            respiratory_volume_per_time(&peaks, &cfg.binning, peak_cfg.max_interval_s)?
        }
    };
    println!("{}", serde_json::to_string(&metric)?);
    Ok(())
}

fn cmd_response_function(kind: SignalKind, tr: f64) -> Result<()> {
    let kernel = response_function(kind, tr)?;
    println!("{}", serde_json::to_string(&kernel)?);
    Ok(())
}

fn cmd_confound(input: Option<&Path>, label: Option<String>, args: &PipelineArgs) -> Result<()> {
    let study = args.study()?;
    let cfg = &study.pipeline;
    let label = match (label, input) {
        (Some(label), _) => label,
        (None, Some(path)) => recording_label(path),
        (None, None) => bail!("--label is required when samples come from stdin"),
    };
    let kind = cfg.markers.classify(&label);
    let recording = PhysioRecording::new(label, kind, cfg.fs, read_samples(input)?)?;
    match synthesize_confound(&recording, cfg) {
        Ok(confound) => println!("{}", serde_json::to_string(&confound)?),
        Err(err @ PhysioError::UnsupportedSignalKind { .. }) => warn!("{err}, skipped"),
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

fn cmd_process(
    data_dir: &Path,
    out_dir: &Path,
    subjects: Option<&[String]>,
    args: &PipelineArgs,
) -> Result<()> {
    let study = args.study()?;
    let report = process_batch(data_dir, out_dir, subjects, &study)?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn cmd_datamat_to_conditions(input: &Path, subject: &str, tr: f64, out_dir: &Path) -> Result<()> {
    if !(tr.is_finite() && tr > 0.0) {
        return Err(PhysioError::invalid(format!("TR must be positive, got {tr}")).into());
    }
    let sessions = read_datamat(input)?;
    let files = write_condition_files(tr, &sessions, subject, out_dir)?;
    let js = serde_json::json!({
        "subject": subject,
        "runs": sessions.len(),
        "files": files,
    });
    println!("{}", js);
    Ok(())
}

fn cmd_plot_confounds(
    input: &Path,
    out: &Path,
    tr: f64,
    start: f64,
    title: Option<String>,
) -> Result<()> {
    let matrix = read_confound_matrix(input, tr)?;
    if matrix.is_empty() {
        bail!("{} holds no confound rows", input.display());
    }
    let title = title.unwrap_or_else(|| recording_label(input));
    let fig = figure_from_confounds(&title, &matrix, start, 2048);
    draw_plotters_figure(out, &fig)?;
    Ok(())
}

fn draw_plotters_figure(path: &Path, fig: &Figure) -> Result<()> {
    let backend = BitMapBackend::new(path, (960, 480));
    let root = backend.into_drawing_area();
    root.fill(&WHITE)?;
    let points = || {
        fig.series.iter().flat_map(|series| match series {
            Series::Line(line) => line.points.iter(),
        })
    };
    let (x_min, x_max) = padded_range(points().map(|p| p[0]));
    let (y_min, y_max) = padded_range(points().map(|p| p[1]));
    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .caption(
            fig.title.clone().unwrap_or_else(|| "Plot".into()),
            ("sans-serif", 24),
        )
        .x_label_area_size(30)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
    chart
        .configure_mesh()
        .x_desc(fig.x.label.clone().unwrap_or_default())
        .y_desc(fig.y.label.clone().unwrap_or_default())
        .draw()?;
    for series in &fig.series {
        match series {
            Series::Line(line) => {
                let color = RGBColor(
                    ((line.style.color.0 >> 16) & 0xFF) as u8,
                    ((line.style.color.0 >> 8) & 0xFF) as u8,
                    (line.style.color.0 & 0xFF) as u8,
                );
                chart
                    .draw_series(LineSeries::new(
                        line.points.iter().map(|p| (p[0], p[1])),
                        &color,
                    ))?
                    .label(line.name.clone())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
            }
        }
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// Finite min/max of `values`, widened when the range is empty or flat.
fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !(lo.is_finite() && hi.is_finite()) {
        return (0.0, 1.0);
    }
    if hi - lo < f64::EPSILON {
        return (lo - 0.5, hi + 0.5);
    }
    (lo, hi)
}
