use std::{fmt::Write, fs, path::Path};

use crate::{error::Result, stats::EpochStats};

const WIDTH: f64 = 900.0;
const PANEL_HEIGHT: f64 = 420.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_RIGHT: f64 = 200.0;
const MARGIN_BOTTOM: f64 = 60.0;
const MARGIN_LEFT: f64 = 80.0;
const GRID_LINES: usize = 5;

const COLOR_TRAIN: &str = "#3498db";
const COLOR_VALID: &str = "#e67e22";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";

const FONT: &str = r##"font-family="Arial, sans-serif" fill="#2c3e50""##;

struct Series<'a> {
    name: String,
    values: &'a [f64],
    color: &'static str,
}

/// Writes loss (top) and accuracy in percent (bottom) against epochs, training
/// and validation curves in each panel.
pub fn write_training_plot(stats: &EpochStats, model_name: &str, path: &Path) -> Result<()> {
    let train_acc: Vec<f64> = stats.train_accuracy.iter().map(|a| a * 100.0).collect();
    let valid_acc: Vec<f64> = stats.valid_accuracy.iter().map(|a| a * 100.0).collect();

    let loss = [
        Series {
            name: format!("{model_name}_Training_Loss"),
            values: &stats.train_loss,
            color: COLOR_TRAIN,
        },
        Series {
            name: format!("{model_name}_Validation_Loss"),
            values: &stats.valid_loss,
            color: COLOR_VALID,
        },
    ];
    let accuracy = [
        Series {
            name: format!("{model_name}_Training_Acc"),
            values: &train_acc,
            color: COLOR_TRAIN,
        },
        Series {
            name: format!("{model_name}_Validation_Acc"),
            values: &valid_acc,
            color: COLOR_VALID,
        },
    ];

    let height = 2.0 * PANEL_HEIGHT;
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {WIDTH} {height}" width="{WIDTH}" height="{height}">"#
    );
    let _ = write!(svg, r#"<rect width="{WIDTH}" height="{height}" fill="white"/>"#);

    panel(&mut svg, 0.0, "Loss", &loss);
    panel(&mut svg, PANEL_HEIGHT, "Accuracy in %", &accuracy);

    svg.push_str("</svg>");
    fs::write(path, svg)?;
    Ok(())
}

fn panel(svg: &mut String, offset: f64, y_label: &str, series: &[Series]) {
    let plot_width = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = PANEL_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let top = offset + MARGIN_TOP;
    let bottom = top + plot_height;

    let epochs = series.iter().map(|s| s.values.len()).max().unwrap_or(0);
    let (y_min, y_max) = value_range(series);

    let x_of = |epoch: usize| {
        if epochs <= 1 {
            MARGIN_LEFT + plot_width / 2.0
        } else {
            MARGIN_LEFT + epoch as f64 / (epochs - 1) as f64 * plot_width
        }
    };
    let y_of = |value: f64| bottom - (value - y_min) / (y_max - y_min) * plot_height;

    for i in 0..=GRID_LINES {
        let fraction = i as f64 / GRID_LINES as f64;
        let y = bottom - fraction * plot_height;
        let _ = write!(
            svg,
            r#"<line x1="{MARGIN_LEFT}" y1="{y}" x2="{}" y2="{y}" stroke="{COLOR_GRID}"/>"#,
            MARGIN_LEFT + plot_width
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" font-size="12" {FONT}>{:.2}</text>"#,
            MARGIN_LEFT - 8.0,
            y + 4.0,
            y_min + fraction * (y_max - y_min)
        );
    }

    let _ = write!(
        svg,
        r#"<polyline points="{MARGIN_LEFT},{top} {MARGIN_LEFT},{bottom} {},{bottom}" fill="none" stroke="{COLOR_AXIS}" stroke-width="2"/>"#,
        MARGIN_LEFT + plot_width
    );

    for epoch in 0..epochs {
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-size="11" {FONT}>{}</text>"#,
            x_of(epoch),
            bottom + 18.0,
            epoch + 1
        );
    }

    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-size="14" {FONT}>Number of Epochs</text>"#,
        MARGIN_LEFT + plot_width / 2.0,
        bottom + 42.0
    );
    let label_y = top + plot_height / 2.0;
    let _ = write!(
        svg,
        r#"<text x="24" y="{label_y}" text-anchor="middle" font-size="14" {FONT} transform="rotate(-90 24 {label_y})">{}</text>"#,
        escape_xml(y_label)
    );

    for (index, series) in series.iter().enumerate() {
        let points = series
            .values
            .iter()
            .enumerate()
            .filter(|(_, value)| value.is_finite())
            .map(|(epoch, &value)| format!("{:.2},{:.2}", x_of(epoch), y_of(value)))
            .collect::<Vec<_>>()
            .join(" ");

        let _ = write!(
            svg,
            r#"<polyline class="series" points="{points}" fill="none" stroke="{}" stroke-width="3"/>"#,
            series.color
        );

        let legend_y = top + 10.0 + index as f64 * 24.0;
        let legend_x = WIDTH - MARGIN_RIGHT + 16.0;
        let _ = write!(
            svg,
            r#"<rect x="{legend_x}" y="{legend_y}" width="14" height="14" fill="{}"/>"#,
            series.color
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" font-size="11" {FONT}>{}</text>"#,
            legend_x + 20.0,
            legend_y + 11.0,
            escape_xml(&series.name)
        );
    }
}

fn value_range(series: &[Series]) -> (f64, f64) {
    let (min, max) = series
        .iter()
        .flat_map(|s| s.values.iter().copied())
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });

    if !min.is_finite() {
        return (0.0, 1.0);
    }
    if (max - min).abs() < f64::EPSILON {
        return (min - 0.5, max + 0.5);
    }

    (min, max)
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
