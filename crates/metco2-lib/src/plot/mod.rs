use crate::confound::ConfoundMatrix;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub dash: Option<[f32; 2]>,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct Color(pub u32);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis { label: None },
            y: Axis { label: None },
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }
}

pub fn decimate_points(points: &[[f64; 2]], max_points: usize) -> Vec<[f64; 2]> {
    if points.len() <= max_points {
        return points.to_vec();
    }
    let bucket_size = points.len() as f64 / max_points as f64;
    let mut result = Vec::with_capacity(max_points);
    for i in 0..max_points {
        let start = (i as f64 * bucket_size).floor() as usize;
        if start >= points.len() {
            break;
        }
        result.push(points[start]);
    }
    result
}

const CARDIAC_COLOR: u32 = 0xFF0077;
const RESPIRATORY_COLOR: u32 = 0x0077FF;

/// Both confound columns against scan time (`start_s` is the first window).
pub fn figure_from_confounds(
    title: &str,
    matrix: &ConfoundMatrix,
    start_s: f64,
    max_points: usize,
) -> Figure {
    let mut fig = Figure::new(Some(title.into()));
    fig.x.label = Some("time (s)".into());
    fig.y.label = Some("confound (a.u.)".into());
    let columns = [
        ("cardiac", &matrix.cardiac, CARDIAC_COLOR),
        ("respiratory", &matrix.respiratory, RESPIRATORY_COLOR),
    ];
    for (name, values, color) in columns {
        let points: Vec<[f64; 2]> = values
            .iter()
            .enumerate()
            .map(|(k, v)| [start_s + (k as f64 + 0.5) * matrix.tr, *v])
            .collect();
        fig.add_series(Series::Line(LineSeries {
            name: name.into(),
            points: decimate_points(&points, max_points),
            style: Style {
                width: 1.4,
                dash: None,
                color: Color(color),
            },
        }));
    }
    fig
}
