//! SVG charts of the training history.
//!
//! Two charts per run, accuracy and loss, each with train and validation
//! curves for both phases. Fine-tuning epochs continue the x axis where the
//! first phase stopped.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use civic_core::{PhaseHistory, Result, TrainingHistory};

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;

const COLOR_TRAIN: &str = "#3498db";
const COLOR_VAL: &str = "#2ecc71";
const COLOR_TRAIN_FT: &str = "#9b59b6";
const COLOR_VAL_FT: &str = "#e74c3c";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

/// A data point for a line chart
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    pub x: f64,
    pub y: f64,
}

/// A named, colored line
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub points: Vec<DataPoint>,
    pub color: String,
}

/// Y axis bounds and tick format
#[derive(Debug, Clone, Copy)]
pub enum YAxis {
    /// Fractions in `[0, 1]`, ticks shown as percentages
    Fraction,
    /// `[0, max]` over the data, ticks shown with two decimals
    FromZero,
}

/// Render a line chart to `output_path`.
///
/// `marker_x` draws a dashed vertical line, used for the phase boundary.
pub fn generate_line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    series: &[DataSeries],
    y_axis: YAxis,
    marker_x: Option<f64>,
    output_path: &Path,
) -> Result<()> {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let (x_min, x_max, _, data_y_max) = find_ranges(series);
    let (x_min, x_max) = if x_min.is_finite() && x_max > x_min {
        (x_min, x_max)
    } else {
        (0.0, 1.0)
    };
    let y_min = 0.0;
    let y_max = match y_axis {
        YAxis::Fraction => 1.0,
        YAxis::FromZero if data_y_max.is_finite() && data_y_max > 0.0 => data_y_max * 1.05,
        YAxis::FromZero => 1.0,
    };

    let to_x = |x: f64| MARGIN_LEFT + ((x - x_min) / (x_max - x_min)) * plot_width;
    let to_y = |y: f64| {
        let y = y.clamp(y_min, y_max);
        MARGIN_TOP + plot_height - ((y - y_min) / (y_max - y_min)) * plot_height
    };

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"#,
        w = CHART_WIDTH,
        h = CHART_HEIGHT
    );
    let _ = write!(svg, r#"<rect width="{}" height="{}" fill="white"/>"#, CHART_WIDTH, CHART_HEIGHT);
    let _ = write!(
        svg,
        r#"<text x="{}" y="35" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        CHART_WIDTH / 2.0,
        COLOR_TEXT,
        escape_xml(title)
    );

    // Horizontal grid and y ticks
    for i in 0..=5 {
        let value = y_min + (i as f64 / 5.0) * (y_max - y_min);
        let y = to_y(value);
        let tick = match y_axis {
            YAxis::Fraction => format!("{:.0}%", value * 100.0),
            YAxis::FromZero => format!("{:.2}", value),
        };
        let _ = write!(
            svg,
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT,
            y,
            MARGIN_LEFT + plot_width,
            y,
            COLOR_GRID
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            MARGIN_LEFT - 10.0,
            y + 4.0,
            COLOR_TEXT,
            tick
        );
    }

    // Axes
    let _ = write!(
        svg,
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT,
        MARGIN_TOP + plot_height,
        MARGIN_LEFT + plot_width,
        MARGIN_TOP + plot_height,
        COLOR_AXIS
    );
    let _ = write!(
        svg,
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT,
        MARGIN_TOP,
        MARGIN_LEFT,
        MARGIN_TOP + plot_height,
        COLOR_AXIS
    );
    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0,
        CHART_HEIGHT - 20.0,
        COLOR_TEXT,
        escape_xml(x_label)
    );
    let _ = write!(
        svg,
        r#"<text x="20" y="{y}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}" transform="rotate(-90 20 {y})">{}</text>"#,
        COLOR_TEXT,
        escape_xml(y_label),
        y = CHART_HEIGHT / 2.0
    );

    // At most ~10 x ticks
    let span = (x_max - x_min).max(1.0);
    let step = (span / 10.0).ceil().max(1.0);
    let mut tick = x_min.ceil();
    while tick <= x_max {
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="11" fill="{}">{:.0}</text>"#,
            to_x(tick),
            MARGIN_TOP + plot_height + 20.0,
            COLOR_TEXT,
            tick
        );
        tick += step;
    }

    if let Some(marker) = marker_x {
        let x = to_x(marker);
        let _ = write!(
            svg,
            r#"<line x1="{x}" y1="{}" x2="{x}" y2="{}" stroke="{}" stroke-width="1" stroke-dasharray="6 4"/>"#,
            MARGIN_TOP,
            MARGIN_TOP + plot_height,
            COLOR_AXIS
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="11" fill="{}">Start Fine Tuning</text>"#,
            x + 5.0,
            MARGIN_TOP + 12.0,
            COLOR_TEXT
        );
    }

    for series_data in series.iter().filter(|s| !s.points.is_empty()) {
        let path = series_data
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{} {} {}", if i == 0 { "M" } else { "L" }, to_x(p.x), to_y(p.y)))
            .collect::<Vec<_>>()
            .join(" ");
        let _ = write!(
            svg,
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
            path, series_data.color
        );

        if series_data.points.len() <= 30 {
            for p in &series_data.points {
                let _ = write!(
                    svg,
                    r#"<circle cx="{}" cy="{}" r="3" fill="{}" stroke="white" stroke-width="1"/>"#,
                    to_x(p.x),
                    to_y(p.y),
                    series_data.color
                );
            }
        }
    }

    // Legend
    let mut legend_y = MARGIN_TOP + 10.0;
    for series_data in series {
        let _ = write!(
            svg,
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            CHART_WIDTH - MARGIN_RIGHT - 160.0,
            legend_y,
            series_data.color
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" font-family="Arial, sans-serif" font-size="12" fill="{}">{}</text>"#,
            CHART_WIDTH - MARGIN_RIGHT - 140.0,
            legend_y + 12.0,
            COLOR_TEXT,
            escape_xml(&series_data.name)
        );
        legend_y += 25.0;
    }

    svg.push_str("</svg>");

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output_path, svg)?;
    Ok(())
}

fn phase_series(
    phase: &PhaseHistory,
    offset: usize,
    value: impl Fn(&civic_core::EpochMetrics) -> f64,
    name: &str,
    color: &str,
) -> DataSeries {
    DataSeries {
        name: name.to_string(),
        points: phase
            .epochs
            .iter()
            .enumerate()
            .map(|(i, m)| DataPoint {
                x: (offset + i + 1) as f64,
                y: value(m),
            })
            .collect(),
        color: color.to_string(),
    }
}

/// Write `accuracy_history.svg` and `loss_history.svg` into `output_dir`.
pub fn plot_training_history(history: &TrainingHistory, output_dir: &Path) -> Result<Vec<PathBuf>> {
    let offset = history.initial.len();
    let marker = history
        .fine_tune
        .as_ref()
        .filter(|ft| !ft.is_empty())
        .map(|_| offset as f64 + 0.5);

    let build = |value: fn(&civic_core::EpochMetrics) -> f64, val: fn(&civic_core::EpochMetrics) -> f64| {
        let mut series = vec![
            phase_series(&history.initial, 0, value, "Train", COLOR_TRAIN),
            phase_series(&history.initial, 0, val, "Validation", COLOR_VAL),
        ];
        if let Some(ft) = history.fine_tune.as_ref().filter(|ft| !ft.is_empty()) {
            series.push(phase_series(ft, offset, value, "Train (fine-tune)", COLOR_TRAIN_FT));
            series.push(phase_series(ft, offset, val, "Validation (fine-tune)", COLOR_VAL_FT));
        }
        series
    };

    let accuracy_path = output_dir.join("accuracy_history.svg");
    generate_line_chart(
        "Training and Validation Accuracy",
        "Epoch",
        "Accuracy",
        &build(|m| m.accuracy, |m| m.val_accuracy),
        YAxis::Fraction,
        marker,
        &accuracy_path,
    )?;

    let loss_path = output_dir.join("loss_history.svg");
    generate_line_chart(
        "Training and Validation Loss",
        "Epoch",
        "Cross Entropy",
        &build(|m| m.loss, |m| m.val_loss),
        YAxis::FromZero,
        marker,
        &loss_path,
    )?;

    Ok(vec![accuracy_path, loss_path])
}

fn find_ranges(series: &[DataSeries]) -> (f64, f64, f64, f64) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;

    for p in series.iter().flat_map(|s| &s.points) {
        x_min = x_min.min(p.x);
        x_max = x_max.max(p.x);
        if p.y.is_finite() {
            y_min = y_min.min(p.y);
            y_max = y_max.max(p.y);
        }
    }

    (x_min, x_max, y_min, y_max)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
